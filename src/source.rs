//! Schema sources and migration sets.
//!
//! A [`SchemaSource`] says where a schema comes from: an ephemeral database
//! built from a [`MigrationSet`], or a remote GraphQL endpoint.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::parser::{parse_migration_file_name, parse_version_segments};

/// A migration version: numeric segments compared left to right.
///
/// Trailing zero segments are insignificant, so `1` and `1.0` are the same
/// version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(input: &str) -> SchemaGenResult<Self> {
        parse_version_segments(input).map(Self::from_segments)
    }

    pub fn from_segments(mut segments: Vec<u64>) -> Self {
        while segments.len() > 1 && segments.last() == Some(&0) {
            segments.pop();
        }
        Self(segments)
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = SchemaGenError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Version::parse(&s)
    }
}

/// A single versioned migration script.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: Version,
    pub description: String,
    pub script: String,
    /// md5 of the script text, recorded in the history table.
    pub checksum: String,
}

impl Migration {
    pub fn new(version: Version, description: impl Into<String>, script: impl Into<String>) -> Self {
        let script = script.into();
        let checksum = format!("{:x}", md5::compute(script.as_bytes()));
        Self {
            version,
            description: description.into(),
            script,
            checksum,
        }
    }
}

/// An ordered set of migrations with strictly increasing versions.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set, sorting by version. Duplicate versions are rejected.
    pub fn new(mut migrations: Vec<Migration>) -> SchemaGenResult<Self> {
        migrations.sort_by(|a, b| a.version.cmp(&b.version));

        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(SchemaGenError::Config(format!(
                    "Duplicate migration version V{} ('{}' and '{}')",
                    pair[1].version, pair[0].description, pair[1].description
                )));
            }
        }

        Ok(Self { migrations })
    }

    /// Load every `V<version>__<description>.sql` file from a directory.
    pub fn load_dir(dir: &Path) -> SchemaGenResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SchemaGenError::Config(format!(
                "Failed to read migrations directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match parse_migration_file_name(file_name) {
                Some(name) => {
                    let script = std::fs::read_to_string(&path)?;
                    debug!(file = file_name, "loaded migration");
                    migrations.push(Migration::new(
                        Version::from_segments(name.segments),
                        name.description,
                        script,
                    ));
                }
                None if file_name.ends_with(".sql") => {
                    warn!(file = file_name, "skipping sql file without a V<version>__ prefix");
                }
                None => {}
            }
        }

        Self::new(migrations)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// The highest version in the set, used as the schema-version marker.
    pub fn latest(&self) -> Option<&Version> {
        self.migrations.last().map(|m| &m.version)
    }

    pub fn get(&self, version: &Version) -> Option<&Migration> {
        self.migrations.iter().find(|m| &m.version == version)
    }
}

/// Parameters for the ephemeral database instance.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Container image, e.g. `postgres:15`.
    pub image: String,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Schema (namespace) migrations run in and resolution reads from.
    pub schema: String,
    /// Table that records applied migrations.
    pub history_table: String,
    /// Ceiling for the readiness poll.
    pub ready_timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            image: "postgres:15".to_string(),
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            schema: "public".to_string(),
            history_table: "schema_history".to_string(),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the remote schema document is cached, and whether to reuse it.
#[derive(Debug, Clone)]
pub struct SchemaCache {
    pub path: PathBuf,
    /// Read the cached document instead of fetching. Must be requested
    /// explicitly by the caller.
    pub reuse: bool,
}

/// Where a schema comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// A disposable database built by applying migrations to a fresh instance.
    Ephemeral {
        connection: ConnectionParams,
        migrations: MigrationSet,
    },
    /// An authoritative GraphQL endpoint queried by introspection.
    Remote {
        endpoint: Url,
        auth_token: Option<String>,
        cache: SchemaCache,
    },
}

impl SchemaSource {
    /// A short, stable description used in logs and run fingerprints.
    pub fn describe(&self) -> String {
        match self {
            SchemaSource::Ephemeral {
                connection,
                migrations,
            } => format!(
                "ephemeral {} ({} migrations, latest V{})",
                connection.image,
                migrations.len(),
                migrations
                    .latest()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            SchemaSource::Remote { endpoint, .. } => format!("remote {}", endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(v("2") < v("10"));
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.9") < v("2"));
        assert_eq!(v("1"), v("1.0"));
        assert_eq!(v("1.0.0").to_string(), "1");
    }

    #[test]
    fn test_migration_set_sorts_by_version() {
        let set = MigrationSet::new(vec![
            Migration::new(v("10"), "ten", "select 10"),
            Migration::new(v("2"), "two", "select 2"),
            Migration::new(v("1.5"), "one and a half", "select 1.5"),
        ])
        .unwrap();

        let order: Vec<String> = set.iter().map(|m| m.version.to_string()).collect();
        assert_eq!(order, vec!["1.5", "2", "10"]);
        assert_eq!(set.latest(), Some(&v("10")));
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let result = MigrationSet::new(vec![
            Migration::new(v("1"), "a", "select 1"),
            Migration::new(v("1.0"), "b", "select 2"),
        ]);
        assert!(matches!(result, Err(SchemaGenError::Config(_))));
    }

    #[test]
    fn test_checksum_tracks_script_text() {
        let a = Migration::new(v("1"), "a", "create table a (id int);");
        let b = Migration::new(v("1"), "a", "create table a (id bigint);");
        assert_ne!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 32);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V2__add_name.sql"), "alter table users add name text;").unwrap();
        std::fs::write(dir.path().join("V1__create_users.sql"), "create table users (id serial);").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a migration").unwrap();

        let set = MigrationSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        let first = set.iter().next().unwrap();
        assert_eq!(first.version, v("1"));
        assert_eq!(first.description, "create users");
    }
}
