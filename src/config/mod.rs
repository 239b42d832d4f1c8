//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), one section per external tool,
//! `AppPaths` for cross-platform config and scratch directories, and TOML
//! persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, ConverterConfig, MixerConfig, PipelineConfig, SeparatorConfig, ToolConfig,
    TrainerConfig, WorkspaceConfig,
};
