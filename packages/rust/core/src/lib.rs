//! Tool dispatch for rtools.
//!
//! This crate turns a tool name plus a JSON argument object into config
//! layers and a tool run. The `rt` CLI and the HTTP server both call into
//! it, so recipes, UI forms and flags share one code path.

pub mod args;
pub mod dispatch;
pub mod listing;
pub mod progress;

pub use dispatch::{ToolContext, dropbox_diag, preview_format, run_recipe, run_tool};
pub use listing::{debug_config, list_config};
pub use progress::{ProgressReporter, SilentProgress};
