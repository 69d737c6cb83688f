//! Error types for schemagen.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::source::Version;

/// The pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Loading and validating configuration, before any pipeline starts.
    Configuring,
    Provisioning,
    Resolving,
    Transforming,
    Generating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuring => "Configuring",
            Stage::Provisioning => "Provisioning",
            Stage::Resolving => "Resolving",
            Stage::Transforming => "Transforming",
            Stage::Generating => "Generating",
        };
        f.write_str(name)
    }
}

/// The main error type for schemagen operations.
#[derive(Debug, Error)]
pub enum SchemaGenError {
    /// The ephemeral instance never accepted connections.
    #[error("Ephemeral database not ready after {}s", waited.as_secs())]
    ProvisioningTimeout { waited: Duration },

    /// The container runtime could not start or inspect an instance.
    #[error("Provisioning failed: {reason}")]
    ProvisioningFailed { reason: String },

    /// A migration script could not be applied (or was rejected).
    #[error("Migration V{version} failed: {cause}")]
    MigrationError { version: Version, cause: String },

    /// The remote endpoint could not be reached.
    #[error("Endpoint unreachable: {endpoint}: {cause}")]
    EndpointUnreachable { endpoint: String, cause: String },

    /// The remote endpoint refused the auth token.
    #[error("Auth rejected by {endpoint} (HTTP {status})")]
    AuthRejected { endpoint: String, status: u16 },

    /// The schema could not be read from a provisioned source.
    #[error("Resolution error: {reason}")]
    ResolutionError { reason: String },

    /// A raw schema type has no target mapping.
    #[error("Unsupported type '{raw_type}' ({location})")]
    UnsupportedType { raw_type: String, location: String },

    /// Two raw identifiers produce the same target identifier.
    #[error("Name collision: '{first}' and '{second}' both map to '{target}'")]
    NameCollision {
        first: String,
        second: String,
        target: String,
    },

    /// An artifact could not be rendered or written.
    #[error("Failed to generate {artifact}: {cause}")]
    GenerationError { artifact: String, cause: String },

    /// A pipeline task ended without producing a result (it panicked or was
    /// cancelled).
    #[error("Pipeline task aborted: {cause}")]
    Aborted { cause: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaGenError {
    /// The stage this error is reported under.
    ///
    /// `Io` and `Aborted` have no natural stage; the orchestrator tags them
    /// with the stage it was running instead of asking the error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::ProvisioningTimeout { .. }
            | Self::ProvisioningFailed { .. }
            | Self::MigrationError { .. }
            | Self::EndpointUnreachable { .. }
            | Self::AuthRejected { .. } => Stage::Provisioning,
            Self::ResolutionError { .. } => Stage::Resolving,
            Self::UnsupportedType { .. } | Self::NameCollision { .. } => Stage::Transforming,
            Self::GenerationError { .. } | Self::Io(_) | Self::Aborted { .. } => Stage::Generating,
            Self::Config(_) => Stage::Configuring,
        }
    }

    /// Create a resolution error.
    pub fn resolution(reason: impl Into<String>) -> Self {
        Self::ResolutionError {
            reason: reason.into(),
        }
    }

    /// Create a generation error for the named artifact.
    pub fn generation(artifact: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::GenerationError {
            artifact: artifact.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a migration error for the given version.
    pub fn migration(version: &Version, cause: impl fmt::Display) -> Self {
        Self::MigrationError {
            version: version.clone(),
            cause: cause.to_string(),
        }
    }
}

/// A failed pipeline run, tagged with the pipeline and stage that failed.
#[derive(Debug, Error)]
#[error("pipeline '{pipeline}' failed during {stage}: {source}")]
pub struct PipelineError {
    pub pipeline: String,
    pub stage: Stage,
    #[source]
    pub source: SchemaGenError,
}

impl PipelineError {
    pub fn new(pipeline: impl Into<String>, stage: Stage, source: SchemaGenError) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage,
            source,
        }
    }
}

/// Result type alias for schemagen operations.
pub type SchemaGenResult<T> = Result<T, SchemaGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaGenError::migration(&Version::parse("2").unwrap(), "syntax error");
        assert_eq!(err.to_string(), "Migration V2 failed: syntax error");
        assert_eq!(err.stage(), Stage::Provisioning);
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let err = PipelineError::new(
            "datamodel",
            Stage::Transforming,
            SchemaGenError::UnsupportedType {
                raw_type: "tsvector".to_string(),
                location: "documents.search".to_string(),
            },
        );
        let message = err.to_string();
        assert!(message.contains("datamodel"));
        assert!(message.contains("Transforming"));
        assert!(message.contains("tsvector"));
    }
}
