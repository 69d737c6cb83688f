//! # schemagen: schema-driven code generation
//!
//! Provision a schema source, resolve it to a canonical description, apply
//! naming and type rules, and emit typed Rust bindings.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use schemagen::prelude::*;
//!
//! let config = Config::load(std::path::Path::new("schemagen.toml"))?;
//! for spec in config.pipeline_specs(&RunSelection::default())? {
//!     match Pipeline::new(spec).run().await? {
//!         RunOutcome::Generated { report, .. } => println!("{} written", report.written.len()),
//!         RunOutcome::UpToDate { .. } => println!("up to date"),
//!     }
//! }
//! ```
//!
//! ## Stages
//!
//! | Stage        | Module      | Output                          |
//! |--------------|-------------|---------------------------------|
//! | Provisioning | `provision` | ephemeral database or endpoint  |
//! | Resolving    | `resolve`   | [`CanonicalSchema`]             |
//! | Transforming | `transform` | [`TransformedSchema`]           |
//! | Generating   | `generate`  | artifacts on disk + run ledger  |

pub mod build_step;
pub mod config;
pub mod error;
pub mod generate;
pub mod parser;
pub mod pipeline;
pub mod provision;
pub mod resolve;
pub mod schema;
pub mod source;
pub mod transform;

pub use error::{PipelineError, SchemaGenError, SchemaGenResult, Stage};
pub use schema::CanonicalSchema;
pub use source::{MigrationSet, SchemaSource, Version};
pub use transform::TransformedSchema;

pub mod prelude {
    pub use crate::config::{Config, RunSelection};
    pub use crate::error::*;
    pub use crate::generate::{generate, GeneratedArtifact, PackagePath, RenderOptions};
    pub use crate::pipeline::{run_all, Pipeline, PipelineSpec, PipelineState, RunOutcome};
    pub use crate::provision::{ProvisionedHandle, Provisioner};
    pub use crate::resolve::{resolve, EntityFilter, ResolveOptions};
    pub use crate::schema::*;
    pub use crate::source::*;
    pub use crate::transform::{transform, NamingRuleSet, TransformRules, TypeMapper};
}
