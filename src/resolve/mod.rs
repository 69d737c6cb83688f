//! Schema resolution: read a provisioned source into a [`CanonicalSchema`].
//!
//! Entities are filtered by name before anything else sees them, and come
//! back in lexical order so generated output diffs cleanly between runs.

pub mod graphql;
pub mod postgres;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::provision::ProvisionedHandle;
use crate::schema::CanonicalSchema;

/// Excludes housekeeping entities by exact name or glob.
#[derive(Debug, Clone)]
pub struct EntityFilter {
    patterns: Vec<String>,
    matcher: GlobSet,
}

impl EntityFilter {
    /// Compile the exclusion patterns. A pattern without glob metacharacters
    /// matches exactly.
    pub fn new(patterns: &[String]) -> SchemaGenResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                SchemaGenError::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|e| SchemaGenError::Config(format!("Invalid exclude patterns: {}", e)))?;

        Ok(Self {
            patterns: patterns.to_vec(),
            matcher,
        })
    }

    /// A filter that excludes nothing.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: GlobSet::empty(),
        }
    }

    /// Also exclude `name` exactly.
    pub fn with_exact(self, name: &str) -> SchemaGenResult<Self> {
        let mut patterns = self.patterns;
        if !patterns.iter().any(|p| p == name) {
            patterns.push(escape_glob(name));
        }
        Self::new(&patterns)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn escape_glob(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// What to read and what to leave out.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub filter: EntityFilter,
    /// Namespace for relational sources.
    pub schema: String,
    pub include_sequences: bool,
    pub include_system_sequences: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            filter: EntityFilter::none(),
            schema: "public".to_string(),
            include_sequences: false,
            include_system_sequences: false,
        }
    }
}

/// Resolve the schema behind `handle`.
pub async fn resolve(
    handle: &ProvisionedHandle,
    options: &ResolveOptions,
) -> SchemaGenResult<CanonicalSchema> {
    let mut schema = match handle {
        ProvisionedHandle::Ephemeral(db) => {
            let mut schema = postgres::resolve(db.pool(), options).await?;
            schema.version = db.schema_version.clone();
            schema
        }
        ProvisionedHandle::Remote(remote) => {
            let document = graphql::fetch(remote).await?;
            // A document that does not parse never replaces the last good cache.
            let schema = graphql::parse_document(&document, remote.endpoint.as_str())?;
            graphql::store_cache(&remote.cache_path, &document)?;
            schema
        }
        ProvisionedHandle::Cached(path) => {
            let document = graphql::read_cache(path)?;
            graphql::parse_document(&document, &path.display().to_string())?
        }
    };

    apply_filter(&mut schema, &options.filter);
    schema.entities.sort_by(|a, b| a.name.cmp(&b.name));
    schema.sequences.sort_by(|a, b| a.name.cmp(&b.name));

    info!(
        entities = schema.entities.len(),
        sequences = schema.sequences.len(),
        "schema resolved"
    );
    Ok(schema)
}

/// Drop excluded entities and sequences.
pub fn apply_filter(schema: &mut CanonicalSchema, filter: &EntityFilter) {
    schema.entities.retain(|entity| {
        let excluded = filter.is_excluded(&entity.name);
        if excluded {
            debug!(entity = %entity.name, "excluded");
        }
        !excluded
    });
    schema.sequences.retain(|seq| !filter.is_excluded(&seq.name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entity, EntityKind, Field, TypeRef};

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_and_glob_exclusion() {
        let filter = EntityFilter::new(&patterns(&["flyway_schema_history", "tmp_*"])).unwrap();

        assert!(filter.is_excluded("flyway_schema_history"));
        assert!(filter.is_excluded("tmp_import"));
        assert!(!filter.is_excluded("flyway_schema_history_v2"));
        assert!(!filter.is_excluded("orders"));
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let err = EntityFilter::new(&patterns(&["orders[", "ok"])).unwrap_err();
        assert!(matches!(err, SchemaGenError::Config(_)));
    }

    #[test]
    fn test_with_exact_escapes_metacharacters() {
        let filter = EntityFilter::none().with_exact("odd[name]").unwrap();
        assert!(filter.is_excluded("odd[name]"));
        assert!(!filter.is_excluded("oddn"));
    }

    #[test]
    fn test_filter_drops_housekeeping_entities() {
        let mut schema = CanonicalSchema {
            entities: vec![
                Entity::new("flyway_schema_history", EntityKind::Table)
                    .field(Field::new("version", TypeRef::scalar("text", true))),
                Entity::new("orders", EntityKind::Table)
                    .field(Field::new("id", TypeRef::scalar("int4", false))),
            ],
            ..Default::default()
        };
        let filter = EntityFilter::new(&patterns(&["flyway_schema_history"])).unwrap();

        apply_filter(&mut schema, &filter);
        let names: Vec<&str> = schema.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["orders"]);
    }

    #[tokio::test]
    async fn test_missing_cached_document_is_a_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ProvisionedHandle::Cached(dir.path().join("schema.json"));

        let err = resolve(&handle, &ResolveOptions::default()).await.unwrap_err();
        assert!(matches!(err, SchemaGenError::ResolutionError { .. }));
    }
}
