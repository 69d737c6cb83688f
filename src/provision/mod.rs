//! Schema provisioning.
//!
//! Turns a [`SchemaSource`] into a [`ProvisionedHandle`] that the resolver
//! can read from:
//!
//! - `Ephemeral`: start a disposable Postgres container, poll until it
//!   accepts connections, apply the migration set.
//! - `Remote`: check the endpoint answers and accepts the auth token.
//!
//! Ephemeral handles own the container. Callers hand the handle back through
//! [`ProvisionedHandle::release`] on every path; provisioning itself releases
//! whatever it started before returning an error.

pub mod docker;
pub mod migrate;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::source::{ConnectionParams, MigrationSet, SchemaSource};

use docker::{Container, ContainerSpec};
use migrate::{MigrationReport, PgMigrationTarget};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A migrated, connectable ephemeral database.
#[derive(Debug)]
pub struct EphemeralDatabase {
    container: Container,
    pool: PgPool,
    pub params: ConnectionParams,
    pub migrations: MigrationReport,
    /// Latest migration version, used as the schema-version marker.
    pub schema_version: Option<String>,
}

impl EphemeralDatabase {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn container_id(&self) -> &str {
        self.container.id()
    }
}

/// A reachable remote endpoint.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub endpoint: Url,
    pub auth_token: Option<String>,
    /// Where a fetched document is cached.
    pub cache_path: PathBuf,
    pub client: reqwest::Client,
}

/// A provisioned, queryable schema source.
#[derive(Debug)]
pub enum ProvisionedHandle {
    Ephemeral(EphemeralDatabase),
    Remote(RemoteEndpoint),
    /// A cached schema document the caller asked to reuse. Nothing was
    /// contacted.
    Cached(PathBuf),
}

impl ProvisionedHandle {
    /// Release anything the handle owns. A no-op for remote and cached
    /// handles.
    pub async fn release(self) -> SchemaGenResult<()> {
        match self {
            ProvisionedHandle::Ephemeral(db) => {
                db.pool.close().await;
                info!(container = %short(db.container.id()), "releasing ephemeral database");
                db.container.remove().await
            }
            ProvisionedHandle::Remote(_) | ProvisionedHandle::Cached(_) => Ok(()),
        }
    }
}

/// Provisions schema sources for one pipeline.
#[derive(Debug, Clone)]
pub struct Provisioner {
    pipeline: String,
}

impl Provisioner {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }

    /// Provision `source`. On error nothing is left running.
    pub async fn provision(&self, source: &SchemaSource) -> SchemaGenResult<ProvisionedHandle> {
        match source {
            SchemaSource::Ephemeral {
                connection,
                migrations,
            } => self
                .provision_ephemeral(connection, migrations)
                .await
                .map(ProvisionedHandle::Ephemeral),
            SchemaSource::Remote {
                endpoint,
                auth_token,
                cache,
            } => {
                if cache.reuse {
                    warn!(
                        pipeline = %self.pipeline,
                        path = %cache.path.display(),
                        "reusing cached schema document, {} is not contacted",
                        endpoint
                    );
                    return Ok(ProvisionedHandle::Cached(cache.path.clone()));
                }
                check_remote(endpoint, auth_token.as_deref())
                    .await
                    .map(|client| {
                        ProvisionedHandle::Remote(RemoteEndpoint {
                            endpoint: endpoint.clone(),
                            auth_token: auth_token.clone(),
                            cache_path: cache.path.clone(),
                            client,
                        })
                    })
            }
        }
    }

    async fn provision_ephemeral(
        &self,
        params: &ConnectionParams,
        migrations: &MigrationSet,
    ) -> SchemaGenResult<EphemeralDatabase> {
        let spec = ContainerSpec::postgres(&params.image, &params.user, &params.password, &params.database)
            .label("schemagen.pipeline", &self.pipeline);

        info!(pipeline = %self.pipeline, image = %params.image, "starting ephemeral database");
        let container = Container::run(&spec).await?;

        match self.prepare(&container, params, migrations).await {
            Ok((pool, report)) => Ok(EphemeralDatabase {
                container,
                pool,
                params: params.clone(),
                migrations: report,
                schema_version: migrations.latest().map(|v| v.to_string()),
            }),
            Err(e) => {
                // The instance is discarded; no partial-migration recovery.
                if let Err(cleanup) = container.remove().await {
                    warn!(error = %cleanup, "failed to remove ephemeral database");
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        container: &Container,
        params: &ConnectionParams,
        migrations: &MigrationSet,
    ) -> SchemaGenResult<(PgPool, MigrationReport)> {
        let port = container.host_port(5432).await?;
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(port)
            .username(&params.user)
            .password(&params.password)
            .database(&params.database);

        let pool = wait_ready(options, params.ready_timeout).await?;

        let mut target = PgMigrationTarget::new(&pool, &params.schema, &params.history_table);
        match migrate::migrate(&mut target, migrations).await {
            Ok(report) => Ok((pool, report)),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }
}

/// Poll until the database accepts a connection and answers `SELECT 1`,
/// backing off exponentially, for at most `timeout`.
pub async fn wait_ready(options: PgConnectOptions, timeout: Duration) -> SchemaGenResult<PgPool> {
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let attempt = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(MAX_BACKOFF.min(timeout))
            .connect_with(options.clone())
            .await;

        match attempt {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => {
                    debug!(attempts, "database ready");
                    return Ok(pool);
                }
                Err(e) => {
                    debug!(attempts, error = %e, "database not answering yet");
                    pool.close().await;
                }
            },
            Err(e) => debug!(attempts, error = %e, "database not accepting connections yet"),
        }

        if started.elapsed() + backoff > timeout {
            return Err(SchemaGenError::ProvisioningTimeout {
                waited: started.elapsed(),
            });
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Connect to an existing database, for standalone migration.
pub async fn connect(url: &str) -> SchemaGenResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(url)
        .await
        .map_err(|e| SchemaGenError::ProvisioningFailed {
            reason: format!("failed to connect: {}", e),
        })
}

/// Send a trivial query to check reachability and the auth token.
async fn check_remote(endpoint: &Url, token: Option<&str>) -> SchemaGenResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| SchemaGenError::EndpointUnreachable {
            endpoint: endpoint.to_string(),
            cause: e.to_string(),
        })?;

    let mut request = client
        .post(endpoint.clone())
        .json(&serde_json::json!({ "query": "{ __typename }" }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| SchemaGenError::EndpointUnreachable {
            endpoint: endpoint.to_string(),
            cause: e.to_string(),
        })?;

    match response.status() {
        status if status.is_success() => {
            debug!(%endpoint, "endpoint reachable");
            Ok(client)
        }
        status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Err(SchemaGenError::AuthRejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
        status => Err(SchemaGenError::EndpointUnreachable {
            endpoint: endpoint.to_string(),
            cause: format!("HTTP {}", status),
        }),
    }
}

fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}
