//! Artifact generation.
//!
//! [`generate`] renders a [`TransformedSchema`] into artifacts in memory;
//! [`writer::write_artifacts`] puts them on disk. Keeping the two apart
//! means a rendering failure never leaves a half-written package behind.

pub mod render;
pub mod writer;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::transform::naming::module_name;
use crate::transform::TransformedSchema;

pub use render::RenderOptions;
pub use writer::{write_artifacts, WriteReport};

/// A `::`-separated module path, e.g. `datamodel::tables`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PackagePath(Vec<String>);

impl PackagePath {
    pub fn parse(path: &str) -> SchemaGenResult<Self> {
        let segments: Vec<String> = path.split("::").map(str::to_string).collect();
        for segment in &segments {
            if !is_identifier(segment) {
                return Err(SchemaGenError::Config(format!(
                    "Invalid package path '{}': '{}' is not an identifier",
                    path, segment
                )));
            }
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The package directory under `root`.
    pub fn dir(&self, root: &Path) -> PathBuf {
        self.0.iter().fold(root.to_path_buf(), |dir, s| dir.join(s))
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("::"))
    }
}

impl From<PackagePath> for String {
    fn from(p: PackagePath) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for PackagePath {
    type Error = SchemaGenError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            s != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Container,
    Record,
    /// Package root, sequences.
    Support,
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    /// File name inside the package directory.
    pub name: String,
    pub role: ArtifactRole,
    pub package: PackagePath,
    pub contents: String,
}

impl GeneratedArtifact {
    pub fn checksum(&self) -> String {
        format!("{:x}", md5::compute(self.contents.as_bytes()))
    }
}

/// Render every artifact for `schema`. Order: package root, then entities
/// in schema order (container before record), then sequences.
pub fn generate(
    schema: &TransformedSchema,
    package: &PackagePath,
    options: &RenderOptions,
) -> SchemaGenResult<Vec<GeneratedArtifact>> {
    let artifact = |name: String, role, contents| GeneratedArtifact {
        name,
        role,
        package: package.clone(),
        contents,
    };

    let mut artifacts = vec![artifact(
        "mod.rs".to_string(),
        ArtifactRole::Support,
        render::package_root(schema),
    )];

    for entity in &schema.entities {
        artifacts.push(artifact(
            format!("{}.rs", module_name(&entity.container_name)),
            ArtifactRole::Container,
            render::container(entity, &schema.namespace),
        ));
        artifacts.push(artifact(
            format!("{}.rs", module_name(&entity.record_name)),
            ArtifactRole::Record,
            render::record(entity, options),
        ));
    }

    if !schema.sequences.is_empty() {
        artifacts.push(artifact(
            "sequences.rs".to_string(),
            ArtifactRole::Support,
            render::sequences(schema),
        ));
    }

    let mut names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
        return Err(SchemaGenError::generation(
            pair[0],
            "two artifacts render to the same file",
        ));
    }

    debug!(package = %package, artifacts = artifacts.len(), "rendered artifacts");
    Ok(artifacts)
}
