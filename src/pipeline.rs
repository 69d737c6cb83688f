//! Pipeline orchestration.
//!
//! A [`Pipeline`] walks `Idle -> Provisioning -> Resolving -> Transforming ->
//! Generating -> Done`, or stops in `Failed { stage, cause }`. Stages run
//! strictly in order; none is retried. Whatever the provisioner acquired is
//! released before a result, good or bad, leaves [`Pipeline::run`].
//!
//! Each successful run leaves a ledger (`.schemagen-run.json`) in the
//! package directory. The next run compares fingerprints and, when nothing
//! changed and the artifacts on disk are intact, writes nothing.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, SchemaGenError, SchemaGenResult, Stage};
use crate::generate::{self, ArtifactRole, PackagePath, RenderOptions, WriteReport};
use crate::provision::migrate::{self, MigrationReport, PgMigrationTarget};
use crate::provision::{self, ProvisionedHandle, Provisioner};
use crate::resolve::{self, graphql, ResolveOptions};
use crate::source::{SchemaCache, SchemaSource};
use crate::transform::{self, TransformRules, TransformedSchema};

/// File name of the run ledger inside the package directory.
pub const LEDGER_FILE: &str = ".schemagen-run.json";

/// Bumped into every fingerprint so a new generator never reuses old output.
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything one pipeline needs, fully resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub name: String,
    pub source: SchemaSource,
    pub resolve: ResolveOptions,
    pub rules: TransformRules,
    pub package: PackagePath,
    /// Output root; the package directory is created beneath it.
    pub output_dir: PathBuf,
    pub render: RenderOptions,
}

impl PipelineSpec {
    pub fn package_dir(&self) -> PathBuf {
        self.package.dir(&self.output_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Provisioning,
    Resolving,
    Transforming,
    Generating,
    Done,
    Failed { stage: Stage, cause: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }

    /// The stage a failure in this state is reported under.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineState::Idle | PipelineState::Provisioning => Stage::Provisioning,
            PipelineState::Resolving => Stage::Resolving,
            PipelineState::Transforming => Stage::Transforming,
            PipelineState::Generating | PipelineState::Done => Stage::Generating,
            PipelineState::Failed { stage, .. } => *stage,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("Idle"),
            PipelineState::Provisioning => f.write_str("Provisioning"),
            PipelineState::Resolving => f.write_str("Resolving"),
            PipelineState::Transforming => f.write_str("Transforming"),
            PipelineState::Generating => f.write_str("Generating"),
            PipelineState::Done => f.write_str("Done"),
            PipelineState::Failed { stage, .. } => write!(f, "Failed({})", stage),
        }
    }
}

/// A recorded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub role: ArtifactRole,
    pub checksum: String,
}

/// The ledger of one successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub pipeline: String,
    pub source: String,
    pub package: PackagePath,
    pub schema_version: Option<String>,
    pub fingerprint: String,
    pub generator_version: String,
    pub artifacts: Vec<ArtifactRecord>,
    pub completed_at: DateTime<Utc>,
}

impl RunRecord {
    /// Load the ledger in `dir`. A missing or unreadable ledger is `None`;
    /// the run then simply regenerates.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(LEDGER_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable run ledger");
                None
            }
        }
    }

    pub fn store(&self, dir: &Path) -> SchemaGenResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SchemaGenError::generation(LEDGER_FILE, e))?;
        let tmp = dir.join(format!("{}.tmp", LEDGER_FILE));
        fs::write(&tmp, text).map_err(|e| SchemaGenError::generation(LEDGER_FILE, e))?;
        fs::rename(&tmp, dir.join(LEDGER_FILE))
            .map_err(|e| SchemaGenError::generation(LEDGER_FILE, e))
    }

    /// Every recorded artifact exists in `dir` with the recorded checksum.
    pub fn is_intact(&self, dir: &Path) -> bool {
        self.artifacts.iter().all(|artifact| {
            fs::read(dir.join(&artifact.name))
                .map(|bytes| format!("{:x}", md5::compute(&bytes)) == artifact.checksum)
                .unwrap_or(false)
        })
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.name.clone()).collect()
    }
}

/// How a successful run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Generated { record: RunRecord, report: WriteReport },
    /// Fingerprint and artifacts matched the previous run; nothing written.
    UpToDate { record: RunRecord },
}

impl RunOutcome {
    pub fn record(&self) -> &RunRecord {
        match self {
            RunOutcome::Generated { record, .. } | RunOutcome::UpToDate { record } => record,
        }
    }
}

/// Fingerprint of everything that determines the generated output.
pub fn fingerprint(
    schema: &TransformedSchema,
    package: &PackagePath,
    render: &RenderOptions,
) -> SchemaGenResult<String> {
    let input = serde_json::to_string(&(GENERATOR_VERSION, package, schema, render))
        .map_err(|e| SchemaGenError::generation(LEDGER_FILE, e))?;
    Ok(format!("{:x}", md5::compute(input.as_bytes())))
}

/// One pipeline instance.
#[derive(Debug)]
pub struct Pipeline {
    spec: PipelineSpec,
    state: PipelineState,
    progress: Option<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(spec: PipelineSpec) -> Self {
        Self {
            spec,
            state: PipelineState::Idle,
            progress: None,
        }
    }

    /// Publish every state transition on `progress`.
    pub fn with_progress(mut self, progress: watch::Sender<PipelineState>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run every stage once.
    pub async fn run(&mut self) -> Result<RunOutcome, PipelineError> {
        info!(pipeline = %self.spec.name, source = %self.spec.source.describe(), "pipeline started");

        self.advance(PipelineState::Provisioning);
        let provisioner = Provisioner::new(&self.spec.name);
        let handle = match provisioner.provision(&self.spec.source).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(Stage::Provisioning, e)),
        };

        let result = self.run_stages(&handle).await;

        // Released on every path before the result is surfaced.
        if let Err(e) = handle.release().await {
            warn!(pipeline = %self.spec.name, error = %e, "failed to release provisioned source");
        }

        if result.is_ok() {
            self.advance(PipelineState::Done);
        }
        result
    }

    async fn run_stages(&mut self, handle: &ProvisionedHandle) -> Result<RunOutcome, PipelineError> {
        self.advance(PipelineState::Resolving);
        let schema = match resolve::resolve(handle, &self.spec.resolve).await {
            Ok(schema) => schema,
            Err(e) => return Err(self.fail(Stage::Resolving, e)),
        };

        self.advance(PipelineState::Transforming);
        let transformed = match transform::transform(&schema, &self.spec.rules) {
            Ok(transformed) => transformed,
            Err(e) => return Err(self.fail(Stage::Transforming, e)),
        };

        self.advance(PipelineState::Generating);
        match self.generate(&transformed) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(Stage::Generating, e)),
        }
    }

    fn generate(&self, schema: &TransformedSchema) -> SchemaGenResult<RunOutcome> {
        let dir = self.spec.package_dir();
        let fingerprint = fingerprint(schema, &self.spec.package, &self.spec.render)?;
        let previous = RunRecord::load(&dir);

        if let Some(previous) = &previous {
            if previous.fingerprint == fingerprint && previous.is_intact(&dir) {
                info!(pipeline = %self.spec.name, "artifacts up to date");
                return Ok(RunOutcome::UpToDate {
                    record: previous.clone(),
                });
            }
        }

        let artifacts = generate::generate(schema, &self.spec.package, &self.spec.render)?;
        let stale = previous.map(|p| p.artifact_names()).unwrap_or_default();
        let report = generate::write_artifacts(&dir, &artifacts, &stale)?;

        let record = RunRecord {
            pipeline: self.spec.name.clone(),
            source: self.spec.source.describe(),
            package: self.spec.package.clone(),
            schema_version: schema.version.clone(),
            fingerprint,
            generator_version: GENERATOR_VERSION.to_string(),
            artifacts: artifacts
                .iter()
                .map(|a| ArtifactRecord {
                    name: a.name.clone(),
                    role: a.role,
                    checksum: a.checksum(),
                })
                .collect(),
            completed_at: Utc::now(),
        };
        record.store(&dir)?;

        info!(
            pipeline = %self.spec.name,
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            "artifacts generated"
        );
        Ok(RunOutcome::Generated { record, report })
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(pipeline = %self.spec.name, from = %self.state, to = %next, "stage transition");
        self.set_state(next);
    }

    fn fail(&mut self, stage: Stage, error: SchemaGenError) -> PipelineError {
        warn!(pipeline = %self.spec.name, %stage, error = %error, "pipeline failed");
        self.set_state(PipelineState::Failed {
            stage,
            cause: error.to_string(),
        });
        PipelineError::new(&self.spec.name, stage, error)
    }

    fn set_state(&mut self, next: PipelineState) {
        if let Some(progress) = &self.progress {
            progress.send_replace(next.clone());
        }
        self.state = next;
    }
}

/// Run independent pipelines concurrently. Results come back in input
/// order, one per spec.
pub async fn run_all(specs: Vec<PipelineSpec>) -> Vec<(String, Result<RunOutcome, PipelineError>)> {
    let tasks = specs
        .into_iter()
        .map(|spec| {
            let name = spec.name.clone();
            let (progress, watcher) = watch::channel(PipelineState::Idle);
            let task = async move { Pipeline::new(spec).with_progress(progress).run().await };
            (name, watcher, task)
        })
        .collect();
    join_in_order(tasks).await
}

/// Spawn `tasks` and collect their results in input order. A task that
/// panics yields an `Aborted` error tagged with the last stage it reported.
async fn join_in_order<F>(
    tasks: Vec<(String, watch::Receiver<PipelineState>, F)>,
) -> Vec<(String, Result<RunOutcome, PipelineError>)>
where
    F: Future<Output = Result<RunOutcome, PipelineError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut pending = HashMap::new();
    for (index, (name, watcher, task)) in tasks.into_iter().enumerate() {
        let handle = set.spawn(task);
        pending.insert(handle.id(), (index, name, watcher));
    }

    let mut results = Vec::with_capacity(pending.len());
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                if let Some((index, name, _)) = pending.remove(&id) {
                    results.push((index, name, result));
                }
            }
            Err(e) => {
                let Some((index, name, watcher)) = pending.remove(&e.id()) else {
                    continue;
                };
                let stage = watcher.borrow().stage();
                warn!(pipeline = %name, %stage, error = %e, "pipeline task aborted");
                let error = PipelineError::new(
                    &name,
                    stage,
                    SchemaGenError::Aborted {
                        cause: e.to_string(),
                    },
                );
                results.push((index, name, Err(error)));
            }
        }
    }
    results.sort_by_key(|(index, _, _)| *index);
    results.into_iter().map(|(_, name, result)| (name, result)).collect()
}

/// Remove the artifacts recorded in the pipeline's ledger, and the ledger.
/// Unlisted files are never touched.
pub fn clean(spec: &PipelineSpec) -> SchemaGenResult<Vec<PathBuf>> {
    let dir = spec.package_dir();
    let Some(record) = RunRecord::load(&dir) else {
        info!(pipeline = %spec.name, "no run ledger, nothing to clean");
        return Ok(Vec::new());
    };

    let mut removed = generate::writer::remove_artifacts(&dir, &record.artifact_names())?;
    removed.extend(generate::writer::remove_artifacts(&dir, &[LEDGER_FILE.to_string()])?);

    // Only succeeds if nothing unrelated lives there.
    if fs::remove_dir(&dir).is_ok() {
        debug!(path = %dir.display(), "removed empty package directory");
    }
    Ok(removed)
}

/// Fetch the remote schema document and refresh the cache, without
/// generating anything.
pub async fn fetch_schema(spec: &PipelineSpec) -> SchemaGenResult<PathBuf> {
    let SchemaSource::Remote {
        endpoint,
        auth_token,
        cache,
    } = &spec.source
    else {
        return Err(SchemaGenError::Config(format!(
            "pipeline '{}' does not have a remote source",
            spec.name
        )));
    };

    let source = SchemaSource::Remote {
        endpoint: endpoint.clone(),
        auth_token: auth_token.clone(),
        cache: SchemaCache {
            path: cache.path.clone(),
            reuse: false,
        },
    };
    let handle = Provisioner::new(&spec.name).provision(&source).await?;
    let ProvisionedHandle::Remote(remote) = &handle else {
        return Err(SchemaGenError::resolution("expected a remote handle"));
    };

    let document = graphql::fetch(remote).await?;
    // Only a document that parses replaces the cache.
    graphql::parse_document(&document, remote.endpoint.as_str())?;
    graphql::store_cache(&remote.cache_path, &document)?;
    info!(pipeline = %spec.name, path = %cache.path.display(), "schema document refreshed");
    Ok(cache.path.clone())
}

/// Apply the pipeline's migrations to an existing database.
pub async fn migrate_existing(spec: &PipelineSpec, url: &str) -> SchemaGenResult<MigrationReport> {
    let SchemaSource::Ephemeral {
        connection,
        migrations,
    } = &spec.source
    else {
        return Err(SchemaGenError::Config(format!(
            "pipeline '{}' has no migrations",
            spec.name
        )));
    };

    let pool = provision::connect(url).await?;
    let mut target = PgMigrationTarget::new(&pool, &connection.schema, &connection.history_table);
    let report = migrate::migrate(&mut target, migrations).await;
    pool.close().await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::EntityFilter;
    use crate::transform::{Dialect, NamingRuleSet, TypeMapper};
    use pretty_assertions::assert_eq;
    use url::Url;

    const DOCUMENT: &str = r#"{
        "data": { "__schema": { "types": [
            { "kind": "OBJECT", "name": "Query", "fields": [
                { "name": "items", "type": { "kind": "LIST", "name": null,
                  "ofType": { "kind": "OBJECT", "name": "Item", "ofType": null } } }
            ] },
            { "kind": "OBJECT", "name": "Item", "fields": [
                { "name": "id", "type": { "kind": "NON_NULL", "name": null,
                  "ofType": { "kind": "SCALAR", "name": "ID", "ofType": null } } },
                { "name": "name", "type": { "kind": "SCALAR", "name": "String", "ofType": null } }
            ] },
            { "kind": "SCALAR", "name": "ID" },
            { "kind": "SCALAR", "name": "String" }
        ] } }
    }"#;

    fn cached_spec(root: &Path) -> PipelineSpec {
        let cache = root.join("schema.json");
        fs::write(&cache, DOCUMENT).unwrap();
        PipelineSpec {
            name: "api".to_string(),
            source: SchemaSource::Remote {
                endpoint: Url::parse("https://example.invalid/graphql").unwrap(),
                auth_token: None,
                cache: SchemaCache {
                    path: cache,
                    reuse: true,
                },
            },
            resolve: ResolveOptions {
                filter: EntityFilter::none(),
                ..Default::default()
            },
            rules: TransformRules::new(NamingRuleSet::graphql(), TypeMapper::new(Dialect::GraphQl)),
            package: PackagePath::parse("api").unwrap(),
            output_dir: root.join("generated"),
            render: RenderOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_second_run_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let spec = cached_spec(dir.path());

        let mut pipeline = Pipeline::new(spec.clone());
        let first = pipeline.run().await.unwrap();
        assert_eq!(pipeline.state(), &PipelineState::Done);
        assert!(matches!(first, RunOutcome::Generated { .. }));

        let second = Pipeline::new(spec).run().await.unwrap();
        assert!(matches!(second, RunOutcome::UpToDate { .. }));
        assert_eq!(first.record().fingerprint, second.record().fingerprint);
    }

    #[tokio::test]
    async fn test_tampered_artifact_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let spec = cached_spec(dir.path());
        Pipeline::new(spec.clone()).run().await.unwrap();

        let record_path = spec.package_dir().join("item.rs");
        let original = fs::read_to_string(&record_path).unwrap();
        fs::write(&record_path, "// edited").unwrap();

        let outcome = Pipeline::new(spec).run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Generated { .. }));
        assert_eq!(fs::read_to_string(&record_path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_failure_is_tagged_with_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = cached_spec(dir.path());
        spec.rules = TransformRules::new(
            NamingRuleSet::graphql(),
            TypeMapper::new(Dialect::Postgres),
        );

        let mut pipeline = Pipeline::new(spec.clone());
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, Stage::Transforming);
        assert!(matches!(pipeline.state(), PipelineState::Failed { stage: Stage::Transforming, .. }));
        assert!(!spec.package_dir().exists());
    }

    #[tokio::test]
    async fn test_clean_removes_only_ledger_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let spec = cached_spec(dir.path());
        Pipeline::new(spec.clone()).run().await.unwrap();
        let keep = spec.package_dir().join("extensions.rs");
        fs::write(&keep, "// hand written").unwrap();

        let removed = clean(&spec).unwrap();

        assert!(removed.contains(&spec.package_dir().join("item.rs")));
        assert!(!spec.package_dir().join(LEDGER_FILE).exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn test_run_all_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = cached_spec(dir.path());
        let mut second = cached_spec(dir.path());
        second.name = "api2".to_string();
        second.package = PackagePath::parse("api2").unwrap();

        let results = run_all(vec![first, second]).await;
        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["api", "api2"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    async fn panics_while_transforming(
        progress: watch::Sender<PipelineState>,
    ) -> Result<RunOutcome, PipelineError> {
        progress.send_replace(PipelineState::Transforming);
        panic!("renderer bug");
    }

    #[tokio::test]
    async fn test_panicked_pipeline_is_reported_not_dropped() {
        type Task = std::pin::Pin<Box<dyn Future<Output = Result<RunOutcome, PipelineError>> + Send>>;

        let (_, idle) = watch::channel(PipelineState::Idle);
        let (progress, watcher) = watch::channel(PipelineState::Idle);
        let tasks: Vec<(String, watch::Receiver<PipelineState>, Task)> = vec![
            (
                "offline".to_string(),
                idle,
                Box::pin(async {
                    Err(PipelineError::new(
                        "offline",
                        Stage::Resolving,
                        SchemaGenError::resolution("cache missing"),
                    ))
                }),
            ),
            ("broken".to_string(), watcher, Box::pin(panics_while_transforming(progress))),
        ];

        let results = join_in_order(tasks).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].0, "broken");
        let err = results[1].1.as_ref().unwrap_err();
        assert_eq!(err.stage, Stage::Transforming);
        assert!(matches!(err.source, SchemaGenError::Aborted { .. }));
    }
}
