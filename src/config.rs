//! Configuration (`schemagen.toml`).
//!
//! ```toml
//! output_dir = "generated"
//!
//! [[pipeline]]
//! name = "datamodel"
//! package = "datamodel"
//! exclude = ["flyway_schema_history"]
//!
//! [pipeline.source]
//! kind = "ephemeral"
//! migrations = "migrations"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::generate::{PackagePath, RenderOptions};
use crate::pipeline::PipelineSpec;
use crate::resolve::{EntityFilter, ResolveOptions};
use crate::source::{ConnectionParams, MigrationSet, SchemaCache, SchemaSource};
use crate::transform::{CaseConvention, Dialect, NamingRuleSet, TransformRules, TypeMapper};

pub const CONFIG_FILE: &str = "schemagen.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(rename = "pipeline", default)]
    pub pipelines: Vec<PipelineConfig>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// The file this was loaded from, if any.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    pub package: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub include_sequences: bool,
    #[serde(default)]
    pub include_system_sequences: bool,
    #[serde(default)]
    pub fluent_setters: bool,
    #[serde(default)]
    pub naming: NamingConfig,
    /// Forced raw-type overrides.
    #[serde(default)]
    pub types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Ephemeral {
        #[serde(default = "default_image")]
        image: String,
        #[serde(default = "default_postgres")]
        database: String,
        #[serde(default = "default_postgres")]
        user: String,
        #[serde(default = "default_postgres")]
        password: String,
        #[serde(default = "default_schema")]
        schema: String,
        #[serde(default = "default_migrations")]
        migrations: PathBuf,
        #[serde(default = "default_history_table")]
        history_table: String,
        #[serde(default = "default_ready_timeout")]
        ready_timeout_secs: u64,
    },
    Remote {
        endpoint: Url,
        #[serde(default)]
        token: Option<String>,
        /// Environment variable holding the token.
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_schema_file")]
        schema_file: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    #[serde(default)]
    pub case: CaseConvention,
    pub container: Option<String>,
    pub record: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_image() -> String {
    "postgres:15".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_migrations() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_history_table() -> String {
    "schema_history".to_string()
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_schema_file() -> PathBuf {
    PathBuf::from("build/schema.json")
}

/// Per-invocation choices that are not part of the file.
#[derive(Debug, Clone, Default)]
pub struct RunSelection {
    /// Only this pipeline.
    pub pipeline: Option<String>,
    /// Read cached schema documents instead of fetching.
    pub use_cached_schema: bool,
}

impl Config {
    /// Find the config file: `explicit`, then `./schemagen.toml`, then
    /// `<config dir>/schemagen/schemagen.toml`.
    pub fn locate(explicit: Option<&Path>) -> SchemaGenResult<PathBuf> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(SchemaGenError::Config(format!(
                "Config file '{}' not found",
                path.display()
            )));
        }

        let mut searched = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            searched.push(dir.join("schemagen").join(CONFIG_FILE));
        }
        for candidate in &searched {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "using config file");
                return Ok(candidate.clone());
            }
        }

        let listed: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
        Err(SchemaGenError::Config(format!(
            "No {} found (searched: {})",
            CONFIG_FILE,
            listed.join(", ")
        )))
    }

    pub fn load(path: &Path) -> SchemaGenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchemaGenError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut config = Self::parse(&content, &base_dir)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str, base_dir: &Path) -> SchemaGenResult<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| SchemaGenError::Config(format!("Invalid config: {}", e)))?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SchemaGenResult<()> {
        if self.pipelines.is_empty() {
            return Err(SchemaGenError::Config("No [[pipeline]] configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut package_dirs: HashMap<PathBuf, &str> = HashMap::new();
        for pipeline in &self.pipelines {
            if !names.insert(pipeline.name.as_str()) {
                return Err(SchemaGenError::Config(format!(
                    "Duplicate pipeline name '{}'",
                    pipeline.name
                )));
            }

            let package = PackagePath::parse(&pipeline.package)?;
            let dir = package.dir(&self.output_root());
            if let Some(other) = package_dirs.insert(dir.clone(), &pipeline.name) {
                return Err(SchemaGenError::Config(format!(
                    "Pipelines '{}' and '{}' share the output directory '{}'",
                    other,
                    pipeline.name,
                    dir.display()
                )));
            }

            pipeline.naming_rules()?;
            EntityFilter::new(&pipeline.exclude)?;

            match &pipeline.source {
                SourceConfig::Ephemeral {
                    schema,
                    history_table,
                    ready_timeout_secs,
                    ..
                } => {
                    for (what, value) in [("schema", schema), ("history_table", history_table)] {
                        if !is_plain_identifier(value) {
                            return Err(SchemaGenError::Config(format!(
                                "Pipeline '{}': {} '{}' is not a plain identifier",
                                pipeline.name, what, value
                            )));
                        }
                    }
                    if *ready_timeout_secs == 0 {
                        return Err(SchemaGenError::Config(format!(
                            "Pipeline '{}': ready_timeout_secs must be positive",
                            pipeline.name
                        )));
                    }
                }
                SourceConfig::Remote {
                    token, token_env, ..
                } => {
                    if token.is_some() && token_env.is_some() {
                        return Err(SchemaGenError::Config(format!(
                            "Pipeline '{}': set either token or token_env, not both",
                            pipeline.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn output_root(&self) -> PathBuf {
        self.resolve_path(&self.output_dir)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Pipelines selected by `selection`, in file order.
    pub fn selected(&self, selection: &RunSelection) -> SchemaGenResult<Vec<&PipelineConfig>> {
        match &selection.pipeline {
            None => Ok(self.pipelines.iter().collect()),
            Some(name) => self
                .pipelines
                .iter()
                .find(|p| &p.name == name)
                .map(|p| vec![p])
                .ok_or_else(|| SchemaGenError::Config(format!("No pipeline named '{}'", name))),
        }
    }

    /// Build runnable specs. Migration directories are read here.
    pub fn pipeline_specs(&self, selection: &RunSelection) -> SchemaGenResult<Vec<PipelineSpec>> {
        self.selected(selection)?
            .into_iter()
            .map(|p| self.pipeline_spec(p, selection.use_cached_schema))
            .collect()
    }

    fn pipeline_spec(&self, pipeline: &PipelineConfig, use_cached_schema: bool) -> SchemaGenResult<PipelineSpec> {
        let mut filter = EntityFilter::new(&pipeline.exclude)?;

        let (source, schema, dialect) = match &pipeline.source {
            SourceConfig::Ephemeral {
                image,
                database,
                user,
                password,
                schema,
                migrations,
                history_table,
                ready_timeout_secs,
            } => {
                // The history table is never part of the generated surface.
                filter = filter.with_exact(history_table)?;
                let migrations = MigrationSet::load_dir(&self.resolve_path(migrations))?;
                let connection = ConnectionParams {
                    image: image.clone(),
                    database: database.clone(),
                    user: user.clone(),
                    password: password.clone(),
                    schema: schema.clone(),
                    history_table: history_table.clone(),
                    ready_timeout: Duration::from_secs(*ready_timeout_secs),
                };
                (
                    SchemaSource::Ephemeral {
                        connection,
                        migrations,
                    },
                    schema.clone(),
                    Dialect::Postgres,
                )
            }
            SourceConfig::Remote {
                endpoint,
                token,
                token_env,
                schema_file,
            } => {
                let auth_token = match (token, token_env) {
                    (Some(token), _) => Some(token.clone()),
                    (None, Some(var)) => match std::env::var(var) {
                        Ok(value) => Some(value),
                        Err(_) => {
                            warn!(pipeline = %pipeline.name, var = %var, "token variable not set, fetching without a token");
                            None
                        }
                    },
                    (None, None) => None,
                };
                (
                    SchemaSource::Remote {
                        endpoint: endpoint.clone(),
                        auth_token,
                        cache: SchemaCache {
                            path: self.resolve_path(schema_file),
                            reuse: use_cached_schema,
                        },
                    },
                    default_schema(),
                    Dialect::GraphQl,
                )
            }
        };

        Ok(PipelineSpec {
            name: pipeline.name.clone(),
            source,
            resolve: ResolveOptions {
                filter,
                schema,
                include_sequences: pipeline.include_sequences,
                include_system_sequences: pipeline.include_system_sequences,
            },
            rules: TransformRules::new(
                pipeline.naming_rules()?,
                TypeMapper::new(dialect).with_forced_types(&pipeline.types),
            ),
            package: PackagePath::parse(&pipeline.package)?,
            output_dir: self.output_root(),
            render: RenderOptions {
                fluent_setters: pipeline.fluent_setters,
            },
        })
    }

    /// Files whose change should re-trigger generation.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.path.iter().cloned().collect();
        for pipeline in &self.pipelines {
            match &pipeline.source {
                SourceConfig::Ephemeral { migrations, .. } => paths.push(self.resolve_path(migrations)),
                SourceConfig::Remote { schema_file, .. } => paths.push(self.resolve_path(schema_file)),
            }
        }
        paths
    }
}

impl PipelineConfig {
    /// Naming rules, with the source kind's defaults for missing expressions.
    pub fn naming_rules(&self) -> SchemaGenResult<NamingRuleSet> {
        let (container, record) = match self.source {
            SourceConfig::Ephemeral { .. } => ("$0_Table", "$0_Record"),
            SourceConfig::Remote { .. } => ("$0_Fields", "$0"),
        };
        let container = self.naming.container.as_deref().unwrap_or(container);
        let record = self.naming.record.as_deref().unwrap_or(record);
        if container == record {
            return Err(SchemaGenError::Config(format!(
                "Pipeline '{}': container and record names must differ",
                self.name
            )));
        }
        NamingRuleSet::new(self.naming.case, container, record)
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Role;
    use pretty_assertions::assert_eq;

    const BOTH: &str = r#"
        output_dir = "generated"

        [[pipeline]]
        name = "datamodel"
        package = "datamodel"
        exclude = ["flyway_schema_history"]
        include_sequences = true

        [pipeline.source]
        kind = "ephemeral"
        migrations = "migrations"

        [pipeline.types]
        tsvector = "string"

        [[pipeline]]
        name = "tarkov"
        package = "tarkov"

        [pipeline.source]
        kind = "remote"
        endpoint = "https://api.tarkov.dev/graphql"
    "#;

    #[test]
    fn test_defaults_per_source_kind() {
        let config = Config::parse(BOTH, Path::new("/work")).unwrap();

        let datamodel = &config.pipelines[0];
        let rules = datamodel.naming_rules().unwrap();
        assert_eq!(rules.name("orders", Role::Container), "Orders_Table");

        let tarkov = &config.pipelines[1];
        let rules = tarkov.naming_rules().unwrap();
        assert_eq!(rules.name("Item", Role::Container), "Item_Fields");
        assert_eq!(rules.name("Item", Role::Record), "Item");

        match &tarkov.source {
            SourceConfig::Remote { schema_file, .. } => {
                assert_eq!(schema_file, Path::new("build/schema.json"))
            }
            other => panic!("unexpected source: {:?}", other),
        }
        assert_eq!(config.output_root(), Path::new("/work/generated"));
    }

    #[test]
    fn test_specs_resolve_paths_and_exclude_history() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        std::fs::create_dir(&migrations).unwrap();
        std::fs::write(migrations.join("V1__init.sql"), "CREATE TABLE users (id serial);").unwrap();

        let config = Config::parse(BOTH, dir.path()).unwrap();
        let specs = config
            .pipeline_specs(&RunSelection {
                pipeline: Some("datamodel".to_string()),
                use_cached_schema: false,
            })
            .unwrap();

        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert!(spec.resolve.filter.is_excluded("schema_history"));
        assert!(spec.resolve.filter.is_excluded("flyway_schema_history"));
        assert_eq!(spec.package_dir(), dir.path().join("generated").join("datamodel"));
        match &spec.source {
            SchemaSource::Ephemeral { migrations, .. } => assert_eq!(migrations.len(), 1),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_cached_schema_flag_reaches_source() {
        let config = Config::parse(BOTH, Path::new("/work")).unwrap();
        let specs = config
            .pipeline_specs(&RunSelection {
                pipeline: Some("tarkov".to_string()),
                use_cached_schema: true,
            })
            .unwrap();

        match &specs[0].source {
            SchemaSource::Remote { cache, .. } => {
                assert!(cache.reuse);
                assert_eq!(cache.path, Path::new("/work/build/schema.json"));
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_shared_output_directory() {
        let text = r#"
            [[pipeline]]
            name = "a"
            package = "shared"
            [pipeline.source]
            kind = "remote"
            endpoint = "https://a.example/graphql"

            [[pipeline]]
            name = "b"
            package = "shared"
            [pipeline.source]
            kind = "remote"
            endpoint = "https://b.example/graphql"
        "#;
        let err = Config::parse(text, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("share the output directory"));
    }

    #[test]
    fn test_rejects_bad_naming_expression() {
        let text = r#"
            [[pipeline]]
            name = "a"
            package = "a"
            naming = { container = "$1_Table" }
            [pipeline.source]
            kind = "remote"
            endpoint = "https://a.example/graphql"
        "#;
        assert!(matches!(
            Config::parse(text, Path::new(".")),
            Err(SchemaGenError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_naming_expression_that_is_not_an_identifier() {
        for expression in ["$0-Table", "$0 $Record", "$0$$"] {
            let text = format!(
                r#"
                [[pipeline]]
                name = "a"
                package = "a"
                naming = {{ container = "{}" }}
                [pipeline.source]
                kind = "remote"
                endpoint = "https://a.example/graphql"
            "#,
                expression
            );
            let err = Config::parse(&text, Path::new(".")).unwrap_err();
            assert!(matches!(err, SchemaGenError::Config(_)), "{expression}: {err}");
        }
    }

    #[test]
    fn test_rejects_unknown_pipeline() {
        let config = Config::parse(BOTH, Path::new("/work")).unwrap();
        let err = config
            .selected(&RunSelection {
                pipeline: Some("nope".to_string()),
                use_cached_schema: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
