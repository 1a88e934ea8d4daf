//! Project and recipe registries plus the UI's persisted preferences.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ConfigPaths, GLOBAL_CONFIG, read_json, resolve_path, write_json_pretty};
use crate::error::{Result, RtoolsError};
use crate::types::{ProjectEntry, Recipe, ResolvedProject};

pub const PROJECTS_CONFIG: &str = "projects_config.json";
pub const RECIPES_CONFIG: &str = "recipes_config.json";
pub const BACKUP_CONFIG: &str = "backup_config.json";

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Load and validate `projects_config.json`.
///
/// Relative paths resolve against the tools root. An empty or malformed
/// registry is an error.
pub fn load_projects(paths: &ConfigPaths) -> Result<Vec<ResolvedProject>> {
    let path = paths.file(PROJECTS_CONFIG);
    let doc = read_json(&path)?.ok_or_else(|| {
        RtoolsError::config(format!("{} not found", path.display()))
    })?;

    let items = doc
        .get("projects")
        .and_then(Value::as_array)
        .ok_or_else(|| RtoolsError::config("projects_config.json: 'projects' must be a list"))?;

    let mut projects = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let entry: ProjectEntry = serde_json::from_value(item.clone()).map_err(|_| {
            RtoolsError::config(format!(
                "projects_config.json: entry {idx} must have 'name' and 'path'"
            ))
        })?;
        let abs = resolve_path(&entry.path, &paths.tools_root);
        projects.push(ResolvedProject {
            exists: abs.is_dir(),
            abs_path: abs.to_string_lossy().into_owned(),
            name: entry.name,
            path: entry.path,
        });
    }

    if projects.is_empty() {
        return Err(RtoolsError::config(
            "projects_config.json has no projects",
        ));
    }
    Ok(projects)
}

/// Resolve a project name (or a path) to an existing directory.
pub fn find_project(paths: &ConfigPaths, name_or_path: &str) -> Result<PathBuf> {
    if let Ok(projects) = load_projects(paths) {
        if let Some(project) = projects.iter().find(|p| p.name == name_or_path) {
            if !project.exists {
                return Err(RtoolsError::validation(format!(
                    "project '{}' points to a missing directory: {}",
                    project.name, project.abs_path
                )));
            }
            return Ok(PathBuf::from(&project.abs_path));
        }
    }
    let cwd = std::env::current_dir().map_err(|e| RtoolsError::io(".", e))?;
    let candidate = resolve_path(name_or_path, &cwd);
    if candidate.is_dir() {
        return Ok(candidate);
    }
    Err(RtoolsError::validation(format!(
        "unknown project: {name_or_path}"
    )))
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

/// Load `recipes_config.json`. A missing file yields no recipes.
pub fn load_recipes(paths: &ConfigPaths) -> Result<Vec<Recipe>> {
    let path = paths.file(RECIPES_CONFIG);
    let Some(doc) = read_json(&path)? else {
        return Ok(Vec::new());
    };
    match doc.get("recipes") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone()).map_err(|e| RtoolsError::json(&path, e)),
    }
}

/// Find a recipe by name (case-insensitive).
pub fn find_recipe(paths: &ConfigPaths, name: &str) -> Result<Recipe> {
    load_recipes(paths)?
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| RtoolsError::validation(format!("unknown recipe: {name}")))
}

// ---------------------------------------------------------------------------
// UI settings
// ---------------------------------------------------------------------------

/// The small set of preferences the UI edits directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSettings {
    #[serde(default)]
    pub default_project: Option<String>,
    #[serde(default)]
    pub default_tool: Option<String>,
    #[serde(default)]
    pub backup_script: Option<String>,
}

fn read_object(path: &std::path::Path) -> Map<String, Value> {
    match read_json(path) {
        Ok(Some(Value::Object(map))) => map,
        _ => Map::new(),
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Read preferences from `global_config.json` and `backup_config.json`.
/// Unreadable files count as empty.
pub fn load_ui_settings(paths: &ConfigPaths) -> UiSettings {
    let global = read_object(&paths.file(GLOBAL_CONFIG));
    let backup = read_object(&paths.file(BACKUP_CONFIG));
    UiSettings {
        default_project: non_empty(global.get("default_project")),
        default_tool: non_empty(global.get("default_tool")),
        backup_script: non_empty(backup.get("backup").and_then(|b| b.get("script"))),
    }
}

/// Persist preferences, leaving every other key in both files untouched.
/// An empty backup script removes the key.
pub fn save_ui_settings(paths: &ConfigPaths, settings: &UiSettings) -> Result<()> {
    let global_path = paths.file(GLOBAL_CONFIG);
    let mut global = read_object(&global_path);
    let opt = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or(Value::Null, |s| Value::String(s.to_string()))
    };
    global.insert("default_project".into(), opt(&settings.default_project));
    global.insert("default_tool".into(), opt(&settings.default_tool));
    write_json_pretty(&global_path, &Value::Object(global))?;

    let backup_path = paths.file(BACKUP_CONFIG);
    let mut backup_doc = read_object(&backup_path);
    let section = backup_doc
        .entry("backup")
        .or_insert_with(|| Value::Object(Map::new()));
    if !section.is_object() {
        *section = Value::Object(Map::new());
    }
    if let Value::Object(section) = section {
        match opt(&settings.backup_script) {
            Value::Null => {
                section.remove("script");
            }
            script => {
                section.insert("script".into(), script);
            }
        }
    }
    write_json_pretty(&backup_path, &Value::Object(backup_doc))?;

    tracing::info!(config_dir = ?paths.config_dir, "saved UI settings");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, ConfigPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ConfigPaths::at(dir.path().join("configs"));
        std::fs::create_dir_all(&paths.config_dir).expect("mkdir");
        (dir, paths)
    }

    #[test]
    fn projects_resolve_against_tools_root() {
        let (dir, paths) = setup();
        std::fs::create_dir_all(dir.path().join("app")).expect("mkdir");
        write_json_pretty(
            &paths.file(PROJECTS_CONFIG),
            &json!({"projects": [
                {"name": "app", "path": "app"},
                {"name": "ghost", "path": "/definitely/not/here"}
            ]}),
        )
        .expect("write");

        let projects = load_projects(&paths).expect("load");
        assert_eq!(projects.len(), 2);
        assert!(projects[0].exists);
        assert!(!projects[1].exists);

        let found = find_project(&paths, "app").expect("find");
        assert!(found.ends_with("app"));
        assert!(find_project(&paths, "ghost").is_err());
    }

    #[test]
    fn malformed_registries_are_rejected() {
        let (_dir, paths) = setup();
        write_json_pretty(&paths.file(PROJECTS_CONFIG), &json!({"projects": []})).expect("write");
        assert!(load_projects(&paths).is_err());

        write_json_pretty(&paths.file(PROJECTS_CONFIG), &json!({"projects": {"a": 1}}))
            .expect("write");
        let err = load_projects(&paths).expect_err("not a list");
        assert!(err.to_string().contains("must be a list"));

        write_json_pretty(&paths.file(PROJECTS_CONFIG), &json!({"projects": [{"name": "x"}]}))
            .expect("write");
        assert!(load_projects(&paths).is_err());
    }

    #[test]
    fn recipes_load_and_lookup() {
        let (_dir, paths) = setup();
        assert!(load_recipes(&paths).expect("missing file").is_empty());
        write_json_pretty(
            &paths.file(RECIPES_CONFIG),
            &json!({"recipes": [{"name": "Todo", "tool": "search", "args": {"terms": ["TODO"]}}]}),
        )
        .expect("write");
        let recipe = find_recipe(&paths, "todo").expect("find");
        assert_eq!(recipe.tool, "search");
        assert_eq!(recipe.args["terms"][0], "TODO");
    }

    #[test]
    fn ui_settings_round_trip_preserves_other_keys() {
        let (_dir, paths) = setup();
        write_json_pretty(
            &paths.file(GLOBAL_CONFIG),
            &json!({"exclude_dirs": [".git"]}),
        )
        .expect("write");

        let settings = UiSettings {
            default_project: Some("app".into()),
            default_tool: Some("paste".into()),
            backup_script: Some("/opt/backup.py".into()),
        };
        save_ui_settings(&paths, &settings).expect("save");
        assert_eq!(load_ui_settings(&paths), settings);

        let global = read_json(&paths.file(GLOBAL_CONFIG)).expect("read").expect("exists");
        assert_eq!(global["exclude_dirs"][0], ".git");

        save_ui_settings(&paths, &UiSettings::default()).expect("save");
        let backup = read_json(&paths.file(BACKUP_CONFIG)).expect("read").expect("exists");
        assert!(backup["backup"].get("script").is_none());
    }
}
