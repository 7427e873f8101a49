//! Stage module - per-dataset harvest and processing orchestration.
//!
//! - **Config**: stage configuration files via [`StageConfig`]
//! - **Resolver**: plugin registry and explicit resolution context via [`PluginResolver`]
//! - **Command**: external-executable plugins via [`CommandPlugin`]
//! - **Pipeline**: sequential driver via [`PipelineDriver`]

pub mod command;
pub mod config;
pub mod pipeline;
pub mod resolver;

pub use command::{register_commands, CommandPlugin};
pub use config::StageConfig;
pub use pipeline::{discover_datasets, PipelineDriver, RunSummary, StageReport};
pub use resolver::{PluginFactory, PluginRegistry, PluginResolver, ResolutionContext, SearchPathGuard};
