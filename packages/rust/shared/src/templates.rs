//! Default configuration templates written by `rt init`.

use std::path::PathBuf;

use serde_json::{Value, json};

use crate::config::{CONFIG_WHITELIST, ConfigPaths, write_json_pretty};
use crate::error::{Result, RtoolsError};

/// What `init_templates` did with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOutcome {
    Created(PathBuf),
    Overwritten(PathBuf),
    Kept(PathBuf),
}

/// Built-in default content for a whitelisted config file.
pub fn default_template(name: &str) -> Option<Value> {
    let value = match name {
        "global_config.json" => json!({
            "include_extensions": [".py", ".rs", ".js", ".ts", ".tsx", ".css", ".html", ".md", ".json", ".toml"],
            "exclude_dirs": [".git", ".venv", "venv", "node_modules", "target", "__pycache__", "dist", "build", "paste_out"],
            "exclude_files": ["*.lock", "*.min.js"],
            "case_insensitive": true,
            "search_terms": [],
            "default_project": null,
            "default_tool": "search"
        }),
        "projects_config.json" => json!({
            "projects": [
                { "name": "tools", "path": "." }
            ]
        }),
        "recipes_config.json" => json!({
            "recipes": [
                {
                    "name": "Find TODOs",
                    "tool": "search",
                    "description": "Lines mentioning TODO or FIXME",
                    "args": { "terms": ["TODO", "FIXME"] }
                },
                {
                    "name": "Dry-run clean",
                    "tool": "clean",
                    "args": { "mode": "dry" }
                },
                {
                    "name": "Git status",
                    "tool": "git",
                    "args": { "action": "status" }
                }
            ]
        }),
        "search_config.json" => json!({
            "search": { "include": [], "exclude": [] }
        }),
        "replace_config.json" => json!({
            "replace": {
                "include": [],
                "exclude": [],
                "max_size": 2_000_000
            }
        }),
        "paste_config.json" => json!({
            "paste": {
                "out_dir": "paste_out",
                "max_lines": 4000,
                "allow_binary": false,
                "filename_search": false,
                "include": ["*.*", "**/*.*"],
                "exclude": [],
                "only_globs": [],
                "skip_globs": []
            }
        }),
        "format_config.json" => json!({
            "format": {
                "allow_home": false,
                "prettier": {
                    "enable": true,
                    "printWidth": 100,
                    "tabWidth": 2,
                    "singleQuote": false,
                    "semi": true,
                    "trailingComma": "all",
                    "globs": ["**/*.{html,css,js,ts,tsx,json,yml,yaml,md}"],
                    "ignore": ["**/node_modules/**", "**/dist/**"]
                },
                "black": { "enable": true, "line_length": 100, "target": "py311", "paths": ["./"] },
                "ruff": {
                    "enable": true,
                    "fix": true,
                    "unsafe_fixes": false,
                    "preview": false,
                    "select": [],
                    "ignore": []
                },
                "cleanup": {
                    "enable": true,
                    "paths": ["."],
                    "exts": [".py", ".js", ".ts", ".tsx", ".css", ".scss", ".html", ".md", ".rs", ".c", ".h", ".cpp"],
                    "exclude_exts": [".min.js"],
                    "compact_blocks": true,
                    "max_consecutive_blanks": 1
                }
            }
        }),
        "clean_config.json" => json!({
            "clean": {
                "enable": true,
                "allow_venv_clean": false,
                "targets": {
                    "pycache": true,
                    "pytest_cache": true,
                    "mypy_cache": true,
                    "ruff_cache": true,
                    "coverage": true,
                    "build": false,
                    "dist": false,
                    "editor": true,
                    "ds_store": true,
                    "thumbs_db": true,
                    "node_modules": false
                },
                "extra_globs": [],
                "skip_globs": []
            }
        }),
        "gh_raw_config.json" => json!({
            "gh_raw": {
                "user": "",
                "repo": "",
                "branch": "main",
                "path_prefix": "",
                "wrap_read": false
            }
        }),
        "git_config.json" => json!({
            "git": {
                "default_remote": "origin",
                "default_base": "main",
                "protected_branches": ["main", "master", "release/*"],
                "precheck": false,
                "precheck_tests": false
            }
        }),
        "backup_config.json" => json!({
            "backup": {}
        }),
        "backup_profiles.json" => json!({
            "profiles": {},
            "default": null
        }),
        _ => return None,
    };
    Some(value)
}

/// Create the config directory and write every whitelisted template.
///
/// Existing files are kept unless `force` is set.
pub fn init_templates(paths: &ConfigPaths, force: bool) -> Result<Vec<TemplateOutcome>> {
    std::fs::create_dir_all(&paths.config_dir)
        .map_err(|e| RtoolsError::io(&paths.config_dir, e))?;

    let mut outcomes = Vec::with_capacity(CONFIG_WHITELIST.len());
    for name in CONFIG_WHITELIST {
        let path = paths.file(name);
        let existed = path.exists();
        if existed && !force {
            outcomes.push(TemplateOutcome::Kept(path));
            continue;
        }
        let template = default_template(name)
            .ok_or_else(|| RtoolsError::config(format!("no template for {name}")))?;
        write_json_pretty(&path, &template)?;
        tracing::info!(?path, "wrote config template");
        outcomes.push(if existed {
            TemplateOutcome::Overwritten(path)
        } else {
            TemplateOutcome::Created(path)
        });
    }
    Ok(outcomes)
}
