//! Blocking entry point for `build.rs`.
//!
//! ```rust,ignore
//! // build.rs
//! fn main() {
//!     if let Err(e) = schemagen::build_step::run("schemagen.toml") {
//!         panic!("{e}");
//!     }
//! }
//! ```
//!
//! Generation finishes (or fails the build) before the crate compiles, and
//! cargo reruns the step when the config, a migration directory or a cached
//! schema document changes.

use std::path::Path;

use crate::config::{Config, RunSelection};
use crate::error::{PipelineError, SchemaGenError, Stage};
use crate::pipeline::{self, RunOutcome};

/// Set to `1` to read cached schema documents instead of fetching.
pub const USE_CACHED_SCHEMA_ENV: &str = "SCHEMAGEN_USE_CACHED_SCHEMA";

/// Run every configured pipeline.
pub fn run(config_path: impl AsRef<Path>) -> Result<Vec<RunOutcome>, PipelineError> {
    let use_cached_schema = std::env::var(USE_CACHED_SCHEMA_ENV).is_ok_and(|v| v == "1");
    run_with(
        config_path.as_ref(),
        &RunSelection {
            pipeline: None,
            use_cached_schema,
        },
    )
}

/// Run the selected pipelines, failing on the first pipeline error.
pub fn run_with(
    config_path: &Path,
    selection: &RunSelection,
) -> Result<Vec<RunOutcome>, PipelineError> {
    let config = Config::load(config_path).map_err(configuring)?;

    println!("cargo:rerun-if-env-changed={}", USE_CACHED_SCHEMA_ENV);
    for path in config.watched_paths() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let specs = config.pipeline_specs(selection).map_err(configuring)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| configuring(e.into()))?;

    runtime
        .block_on(pipeline::run_all(specs))
        .into_iter()
        .map(|(_, result)| result)
        .collect()
}

fn configuring(error: SchemaGenError) -> PipelineError {
    PipelineError::new("config", Stage::Configuring, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_fails_while_configuring() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_with(&dir.path().join("schemagen.toml"), &RunSelection::default()).unwrap_err();
        assert_eq!(err.stage, Stage::Configuring);
    }
}
