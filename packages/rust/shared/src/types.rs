//! Core domain types shared by every rtools crate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RtoolsError;

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// The tools reachable through `rt <tool>` and `/api/run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Search,
    Replace,
    Paste,
    Format,
    Clean,
    GhRaw,
    Git,
    Backup,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::Search,
        Tool::Replace,
        Tool::Paste,
        Tool::Format,
        Tool::Clean,
        Tool::GhRaw,
        Tool::Git,
        Tool::Backup,
    ];

    /// Wire name, as used by the UI and recipes.
    pub fn name(self) -> &'static str {
        match self {
            Tool::Search => "search",
            Tool::Replace => "replace",
            Tool::Paste => "paste",
            Tool::Format => "format",
            Tool::Clean => "clean",
            Tool::GhRaw => "gh-raw",
            Tool::Git => "git",
            Tool::Backup => "backup",
        }
    }

    /// Name of the tool-specific config layer.
    pub fn config_file(self) -> &'static str {
        match self {
            Tool::Search => "search_config.json",
            Tool::Replace => "replace_config.json",
            Tool::Paste => "paste_config.json",
            Tool::Format => "format_config.json",
            Tool::Clean => "clean_config.json",
            Tool::GhRaw => "gh_raw_config.json",
            Tool::Git => "git_config.json",
            Tool::Backup => "backup_config.json",
        }
    }

    /// Top-level config section the tool reads (`gh_raw` for gh-raw).
    pub fn section(self) -> &'static str {
        match self {
            Tool::GhRaw => "gh_raw",
            other => other.name(),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Tool {
    type Err = RtoolsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Tool::ALL
            .into_iter()
            .find(|tool| tool.name() == normalized)
            .ok_or_else(|| RtoolsError::validation(format!("unknown tool: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Text a tool produces, plus its exit code and numeric metrics.
///
/// Tools never print directly; the CLI prints the text and the server
/// returns it as `output`.
#[derive(Debug, Clone, Default)]
pub struct Report {
    text: String,
    rc: i32,
    metrics: BTreeMap<String, i64>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line.
    pub fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    /// Append raw text, adding a trailing newline if it lacks one.
    pub fn block(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        if !text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    pub fn set_rc(&mut self, rc: i32) {
        self.rc = rc;
    }

    pub fn rc(&self) -> i32 {
        self.rc
    }

    pub fn metric(&mut self, key: impl Into<String>, value: i64) {
        self.metrics.insert(key.into(), value);
    }

    pub fn metrics(&self) -> &BTreeMap<String, i64> {
        &self.metrics
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_parts(self) -> (String, i32, BTreeMap<String, i64>) {
        (self.text, self.rc, self.metrics)
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one tool run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `summary` object returned with every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub rc: i32,
    pub duration_ms: u64,
    /// Tool-specific counters, flattened next to `rc`.
    #[serde(flatten)]
    pub metrics: BTreeMap<String, i64>,
}

/// Result of one `run_tool` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    pub run_id: RunId,
    pub tool: Tool,
    pub finished_at: DateTime<Utc>,
    pub output: String,
    pub summary: RunSummary,
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// One entry in `projects_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub path: String,
}

/// A project entry with its path resolved against the tools root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedProject {
    pub name: String,
    pub path: String,
    pub abs_path: String,
    pub exists: bool,
}

/// One entry in `recipes_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
