//! Applying a [`MigrationSet`] exactly once, in version order.
//!
//! Each migration runs in its own transaction together with the history-table
//! insert that records it. Already-applied versions with a matching checksum
//! are skipped; anything else that would rewrite history is rejected.

use sqlx::{Executor, PgPool, Row};
use tracing::{debug, info};

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::source::{Migration, MigrationSet, Version};

/// A migration recorded in the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: Version,
    pub checksum: String,
}

/// Something migrations can be applied to.
#[allow(async_fn_in_trait)]
pub trait MigrationTarget {
    /// Create the history table if it does not exist.
    async fn ensure_history(&mut self) -> SchemaGenResult<()>;

    /// Migrations already recorded, in any order.
    async fn applied(&mut self) -> SchemaGenResult<Vec<AppliedMigration>>;

    /// Run one script and record it, atomically. Returns the failure cause.
    async fn apply(&mut self, migration: &Migration) -> Result<(), String>;
}

/// Outcome of a migrate call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<Version>,
    pub skipped: Vec<Version>,
}

/// Apply every pending migration in `set` to `target`.
///
/// Stops at the first failure; nothing after it is attempted.
pub async fn migrate<T: MigrationTarget>(
    target: &mut T,
    set: &MigrationSet,
) -> SchemaGenResult<MigrationReport> {
    target.ensure_history().await?;
    let mut history = target.applied().await?;
    history.sort_by(|a, b| a.version.cmp(&b.version));

    // Applied versions must all still exist locally, unchanged.
    for applied in &history {
        match set.get(&applied.version) {
            None => {
                return Err(SchemaGenError::migration(
                    &applied.version,
                    "applied migration is missing from the migration set",
                ));
            }
            Some(local) if local.checksum != applied.checksum => {
                return Err(SchemaGenError::migration(
                    &applied.version,
                    format!(
                        "checksum mismatch (applied {}, local {})",
                        applied.checksum, local.checksum
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    let highest = history.last().map(|a| a.version.clone());
    let mut report = MigrationReport::default();

    for migration in set.iter() {
        if history.iter().any(|a| a.version == migration.version) {
            debug!(version = %migration.version, "migration already applied");
            report.skipped.push(migration.version.clone());
            continue;
        }

        if let Some(highest) = &highest {
            if &migration.version < highest {
                return Err(SchemaGenError::migration(
                    &migration.version,
                    format!("out of order: V{} is already applied", highest),
                ));
            }
        }

        debug!(version = %migration.version, description = %migration.description, "applying migration");
        target
            .apply(migration)
            .await
            .map_err(|cause| SchemaGenError::migration(&migration.version, cause))?;
        report.applied.push(migration.version.clone());
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "migrations complete"
    );
    Ok(report)
}

/// Migrations against a Postgres pool.
pub struct PgMigrationTarget<'a> {
    pool: &'a PgPool,
    schema: &'a str,
    history_table: &'a str,
}

impl<'a> PgMigrationTarget<'a> {
    /// `schema` and `history_table` must already be validated identifiers.
    pub fn new(pool: &'a PgPool, schema: &'a str, history_table: &'a str) -> Self {
        Self {
            pool,
            schema,
            history_table,
        }
    }

    fn qualified_history(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.history_table)
    }
}

impl MigrationTarget for PgMigrationTarget<'_> {
    async fn ensure_history(&mut self) -> SchemaGenResult<()> {
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{schema}\";
             CREATE TABLE IF NOT EXISTS {table} (
                 installed_rank SERIAL PRIMARY KEY,
                 version TEXT NOT NULL UNIQUE,
                 description TEXT NOT NULL,
                 checksum TEXT NOT NULL,
                 installed_on TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
            schema = self.schema,
            table = self.qualified_history()
        );
        self.pool.execute(ddl.as_str()).await.map_err(|e| {
            SchemaGenError::ProvisioningFailed {
                reason: format!("failed to create migration history table: {}", e),
            }
        })?;
        Ok(())
    }

    async fn applied(&mut self) -> SchemaGenResult<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT version, checksum FROM {} ORDER BY installed_rank",
            self.qualified_history()
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool).await.map_err(|e| {
            SchemaGenError::ProvisioningFailed {
                reason: format!("failed to read migration history: {}", e),
            }
        })?;

        rows.iter()
            .map(|row| {
                let version: String = row.try_get("version").map_err(|e| {
                    SchemaGenError::ProvisioningFailed {
                        reason: e.to_string(),
                    }
                })?;
                let checksum: String = row.try_get("checksum").map_err(|e| {
                    SchemaGenError::ProvisioningFailed {
                        reason: e.to_string(),
                    }
                })?;
                Ok(AppliedMigration {
                    version: Version::parse(&version)?,
                    checksum,
                })
            })
            .collect()
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;

        // Unqualified names in scripts land in the configured schema.
        let search_path = format!("SET LOCAL search_path TO \"{}\"", self.schema);
        (&mut *tx)
            .execute(search_path.as_str())
            .await
            .map_err(|e| e.to_string())?;

        (&mut *tx)
            .execute(migration.script.as_str())
            .await
            .map_err(|e| e.to_string())?;

        let record = format!(
            "INSERT INTO {} (version, description, checksum) VALUES ($1, $2, $3)",
            self.qualified_history()
        );
        sqlx::query(&record)
            .bind(migration.version.to_string())
            .bind(&migration.description)
            .bind(&migration.checksum)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())
    }
}
