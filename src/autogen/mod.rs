/// Batch attribute generation: attribute definitions → warehouse models.
///
/// ```text
/// View / AttributeDefinition      (definitions/)
///       ↓
/// Ingestion & naming              (ingest.rs, naming.rs)
///       ↓
/// Modeling-step compiler          (compiler.rs, steps.rs)
///       ↓  configs/base_config.json (config.rs)
/// SQL-context generator           (context.rs, sql.rs)
///       ↓  configs/dbt_config.json
/// Template renderer               (render.rs)
///       ↓
/// Project writer                  (project.rs)
/// ```
///
/// Everything up to the renderer is synchronous and pure; only the project
/// writer touches the filesystem.
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod naming;
pub mod project;
pub mod render;
pub mod sql;
pub mod steps;

pub use compiler::{compile_attribute, compile_attributes, compile_view};
pub use config::BaseConfig;
pub use context::{build_dbt_config, BucketKind, DbtConfig};
pub use error::AutogenError;
pub use ingest::{CompilationContext, PropertyMapping};
pub use project::{discover_projects, generate_project, init_project, ProjectLayout};
pub use render::{ModelTemplate, RenderContext, SqlModelRenderer, TemplateRenderer};
pub use steps::{AttributeSteps, ModelingStep, StepAggregation, StepType};
