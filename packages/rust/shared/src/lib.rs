//! Shared types, error model, and configuration for rtools.
//!
//! This crate is the foundation depended on by all other rtools crates.
//! It provides:
//! - [`RtoolsError`]: the unified error type
//! - Layered JSON configuration with provenance ([`ConfigLoader`], [`LoadedConfig`])
//! - Registries for projects, recipes and UI preferences
//! - Domain types ([`Tool`], [`Report`], [`RunSummary`], [`ToolRun`])
//! - Small helpers for subprocesses and `.env` files

pub mod config;
pub mod dotenv;
pub mod error;
pub mod process;
pub mod registry;
pub mod templates;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    CONFIG_DIR_ENV, CONFIG_WHITELIST, ConfigLoader, ConfigPaths, ConfigSources, GlobalSettings,
    LoadedConfig, PROJECT_FILE_NAME, deep_merge, nullable, read_json, write_json_pretty,
};
pub use error::{Result, RtoolsError};
pub use registry::{
    UiSettings, find_project, find_recipe, load_projects, load_recipes, load_ui_settings,
    save_ui_settings,
};
pub use templates::{TemplateOutcome, init_templates};
pub use types::{ProjectEntry, Recipe, Report, ResolvedProject, RunId, RunSummary, Tool, ToolRun};
