//! Config inspection: `rt list` and `/api/debug-config`.

use std::fmt::Write as _;
use std::path::Path;

use rtools_backup::{BackupSettings, backup_info};
use rtools_shared::{LoadedConfig, Result, Tool};
use serde_json::{Map, Value, json};

use crate::dispatch::ToolContext;

/// Top-level keys every file-walking tool reads.
const GLOBAL_KEYS: [&str; 5] = [
    "project_root",
    "include_extensions",
    "exclude_dirs",
    "exclude_files",
    "case_insensitive",
];

fn show(path: Option<&Path>) -> String {
    path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
}

fn render_sources(cfg: &LoadedConfig, out: &mut String) {
    let s = &cfg.sources;
    let _ = writeln!(out, "== Sources ==");
    let _ = writeln!(out, "tools_root      : {}", s.tools_root.display());
    let _ = writeln!(out, "global_config   : {}", s.global_config.display());
    let _ = writeln!(out, "tool_config     : {}", show(s.tool_config.as_deref()));
    let _ = writeln!(out, "project_file    : {}", show(s.project_file.as_deref()));
    let _ = writeln!(out, "project_override: {}", show(s.project_override.as_deref()));
}

/// The part of the merged values `rt list` shows for `tool`.
fn effective_view(cfg: &LoadedConfig, tool: Option<Tool>) -> Value {
    let Some(tool) = tool else {
        return cfg.values.clone();
    };
    let mut view = Map::new();
    if matches!(tool, Tool::Search | Tool::Replace | Tool::Clean | Tool::Format) {
        for key in GLOBAL_KEYS {
            if let Some(value) = cfg.values.get(key) {
                view.insert(key.to_string(), value.clone());
            }
        }
        if tool == Tool::Search {
            if let Some(terms) = cfg.values.get("search_terms") {
                view.insert("search_terms".into(), terms.clone());
            }
        }
    }
    let section = tool.section();
    view.insert(
        section.to_string(),
        cfg.values.get(section).cloned().unwrap_or_else(|| json!({})),
    );
    Value::Object(view)
}

fn provenance_lines(cfg: &LoadedConfig, tool: Option<Tool>) -> Vec<String> {
    let prefix = tool.map(|t| format!("{}.", t.section())).unwrap_or_default();
    cfg.provenance_for(&prefix)
        .map(|(key, layer)| format!("{key} <- {layer}"))
        .collect()
}

/// Text for `rt list [--tool T] [--project P]`.
pub fn list_config(ctx: &ToolContext, tool: Option<Tool>, project: Option<&str>) -> Result<String> {
    let project_root = ctx.resolve_project(project)?;
    let cfg = ctx.load_config(tool, project_root, json!({}));
    let mut out = String::new();
    for warning in &cfg.warnings {
        let _ = writeln!(out, "[config] {warning}");
    }

    if tool == Some(Tool::Backup) {
        let settings = BackupSettings::load(&ctx.paths)?;
        out.push_str(&backup_info(&ctx.paths, &settings).render());
        out.push('\n');
        render_sources(&cfg, &mut out);
        return Ok(out);
    }

    render_sources(&cfg, &mut out);
    out.push('\n');
    let _ = writeln!(out, "== Effective config ==");
    let pretty = serde_json::to_string_pretty(&effective_view(&cfg, tool)).unwrap_or_default();
    let _ = writeln!(out, "{pretty}");
    out.push('\n');
    let _ = writeln!(out, "== Provenance (last writer wins) ==");
    let lines = provenance_lines(&cfg, tool);
    if lines.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    Ok(out)
}

/// Everything known about the merged config, for the UI's debug panel.
pub fn debug_config(ctx: &ToolContext, tool: Option<Tool>, project: Option<&str>) -> Result<Value> {
    let project_root = ctx.resolve_project(project)?;
    let cfg = ctx.load_config(tool, project_root, json!({}));
    Ok(json!({
        "config_dir": ctx.paths.config_dir,
        "cwd": cfg.cwd,
        "project_root": cfg.project_root(),
        "sources": cfg.sources,
        "values": cfg.values,
        "provenance": cfg.provenance,
        "warnings": cfg.warnings,
    }))
}
