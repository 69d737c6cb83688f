//! schemagen: schema-driven code generation
//!
//! # Usage
//!
//! ```bash
//! # Run every configured pipeline
//! schemagen run
//!
//! # One pipeline, from the cached GraphQL schema document
//! schemagen run --pipeline tarkov --use-cached-schema
//!
//! # Refresh the cached schema document only
//! schemagen fetch-schema --pipeline tarkov
//!
//! # Apply migrations to an existing database
//! schemagen migrate --pipeline datamodel --url postgres://localhost/app
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use schemagen::config::{Config, RunSelection};
use schemagen::pipeline::{self, RunOutcome};

#[derive(Parser)]
#[command(name = "schemagen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate typed bindings from migrations or a GraphQL endpoint", long_about = None)]
#[command(after_help = "EXAMPLES:
    schemagen run                                  # Run all pipelines
    schemagen run -p tarkov --use-cached-schema    # Offline, from build/schema.json
    schemagen migrate -p datamodel --url postgres://localhost/app
    schemagen clean                                # Remove generated files")]
struct Cli {
    /// Config file (default: ./schemagen.toml, then the user config dir)
    #[arg(short, long, global = true, env = "SCHEMAGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pipelines: provision, resolve, transform, generate
    Run {
        /// Only this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Read the cached schema document instead of fetching
        #[arg(long)]
        use_cached_schema: bool,
    },
    /// Fetch a remote schema document into its cache file
    FetchSchema {
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Apply a pipeline's migrations to an existing database
    Migrate {
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Database URL
        #[arg(long, env = "DATABASE_URL")]
        url: String,
    },
    /// Remove generated artifacts listed in the run ledger
    Clean {
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Validate the config and list pipelines
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "schemagen=debug" } else { "schemagen=info" };
    let filter = EnvFilter::try_from_env("SCHEMAGEN_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let path = Config::locate(cli.config.as_deref())?;
    let config = Config::load(&path)?;

    match cli.command {
        Commands::Run {
            pipeline,
            use_cached_schema,
        } => run(&config, RunSelection { pipeline, use_cached_schema }).await,
        Commands::FetchSchema { pipeline } => fetch_schema(&config, selection(pipeline)).await,
        Commands::Migrate { pipeline, url } => migrate(&config, selection(pipeline), &url).await,
        Commands::Clean { pipeline } => clean(&config, selection(pipeline)),
        Commands::Check => check(&config, &path),
    }
}

fn selection(pipeline: Option<String>) -> RunSelection {
    RunSelection {
        pipeline,
        use_cached_schema: false,
    }
}

async fn run(config: &Config, selection: RunSelection) -> Result<()> {
    let specs = config.pipeline_specs(&selection)?;
    let results = pipeline::run_all(specs).await;

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(RunOutcome::Generated { record, report }) => {
                println!(
                    "{} {} {} written, {} unchanged, {} removed ({} artifacts)",
                    "✓".green(),
                    name.cyan(),
                    report.written.len().to_string().green(),
                    report.unchanged.len(),
                    report.removed.len(),
                    record.artifacts.len()
                );
            }
            Ok(RunOutcome::UpToDate { record }) => {
                println!(
                    "{} {} up to date ({} artifacts)",
                    "✓".green(),
                    name.cyan(),
                    record.artifacts.len()
                );
            }
            Err(e) => {
                failed += 1;
                println!("{} {} failed during {}", "✗".red(), name.cyan(), e.stage.to_string().yellow());
                eprintln!("  {}", e.source.to_string().red());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} pipeline(s) failed", failed, results.len());
    }
    Ok(())
}

async fn fetch_schema(config: &Config, selection: RunSelection) -> Result<()> {
    let specs = config.pipeline_specs(&selection)?;
    let remote: Vec<_> = specs
        .iter()
        .filter(|s| matches!(s.source, schemagen::SchemaSource::Remote { .. }))
        .collect();
    if remote.is_empty() {
        anyhow::bail!("No remote pipeline selected");
    }

    for spec in remote {
        let path = pipeline::fetch_schema(spec).await?;
        println!("{} {} -> {}", "✓".green(), spec.name.cyan(), path.display());
    }
    Ok(())
}

async fn migrate(config: &Config, selection: RunSelection, url: &str) -> Result<()> {
    let specs = config.pipeline_specs(&selection)?;
    let ephemeral: Vec<_> = specs
        .iter()
        .filter(|s| matches!(s.source, schemagen::SchemaSource::Ephemeral { .. }))
        .collect();
    if ephemeral.len() != 1 {
        anyhow::bail!("Select exactly one pipeline with migrations (found {})", ephemeral.len());
    }

    let spec = ephemeral[0];
    let report = pipeline::migrate_existing(spec, url).await?;
    for version in &report.applied {
        println!("  {} V{}", "↑".green(), version);
    }
    println!(
        "{} {} applied, {} already applied",
        "✓".green(),
        report.applied.len().to_string().green(),
        report.skipped.len()
    );
    Ok(())
}

fn clean(config: &Config, selection: RunSelection) -> Result<()> {
    for spec in config.pipeline_specs(&selection)? {
        let removed = pipeline::clean(&spec)?;
        println!("{} {} removed {} file(s)", "✓".green(), spec.name.cyan(), removed.len());
    }
    Ok(())
}

fn check(config: &Config, path: &std::path::Path) -> Result<()> {
    println!("{} {}", "Config:".dimmed(), path.display());
    println!("{} {}", "Output:".dimmed(), config.output_root().display());
    for pipeline in &config.pipelines {
        let kind = match pipeline.source {
            schemagen::config::SourceConfig::Ephemeral { .. } => "ephemeral",
            schemagen::config::SourceConfig::Remote { .. } => "remote",
        };
        println!("  {} {} ({}) -> {}", "•".cyan(), pipeline.name.bold(), kind, pipeline.package);
    }
    println!("{} configuration is valid", "✓".green());
    Ok(())
}
