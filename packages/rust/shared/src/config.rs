//! Layered JSON configuration for rtools.
//!
//! Configuration files live in a single directory, resolved from
//! `RTOOLS_CONFIG_DIR` or `~/.rtools/configs`. A tool invocation merges
//! several JSON layers in a fixed order:
//!
//! `global_config.json` → `<tool>_config.json` → `.rtools.json` (cwd)
//! → project override → CLI/UI overrides
//!
//! Later layers win. Nested objects merge key by key, every other value
//! (arrays included) replaces. For each flattened dotted key we remember
//! the name of the layer that supplied it last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Result, RtoolsError};

/// Environment variable that overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "RTOOLS_CONFIG_DIR";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".rtools";

/// Per-project configuration file, looked up in the working directory.
pub const PROJECT_FILE_NAME: &str = ".rtools.json";

/// Global configuration file name.
pub const GLOBAL_CONFIG: &str = "global_config.json";

/// The only file names the settings editor may read or write.
pub const CONFIG_WHITELIST: [&str; 12] = [
    "global_config.json",
    "projects_config.json",
    "recipes_config.json",
    "search_config.json",
    "replace_config.json",
    "paste_config.json",
    "format_config.json",
    "clean_config.json",
    "gh_raw_config.json",
    "git_config.json",
    "backup_config.json",
    "backup_profiles.json",
];

// ---------------------------------------------------------------------------
// Config directory
// ---------------------------------------------------------------------------

/// Resolved locations of the configuration directory and the tools root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    /// Directory holding the `*_config.json` files.
    pub config_dir: PathBuf,
    /// Parent of the config directory; relative project paths resolve here.
    pub tools_root: PathBuf,
}

impl ConfigPaths {
    /// Resolve the config directory: explicit path, then `RTOOLS_CONFIG_DIR`,
    /// then `~/.rtools/configs`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(dir) = explicit {
            return Ok(Self::at(dir));
        }
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(Self::at(expand_home(dir.trim())));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| RtoolsError::config("could not determine home directory"))?;
        Ok(Self::at(home.join(CONFIG_DIR_NAME).join("configs")))
    }

    /// Use a specific directory as the config directory.
    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let tools_root = config_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir.clone());
        Self {
            config_dir,
            tools_root,
        }
    }

    /// Path of a file inside the config directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }

    /// Path of a whitelisted config file. Any other name is rejected.
    pub fn whitelisted(&self, name: &str) -> Result<PathBuf> {
        if !CONFIG_WHITELIST.contains(&name) {
            return Err(RtoolsError::validation(format!(
                "invalid config name: {name}"
            )));
        }
        Ok(self.file(name))
    }

    /// Whether the config directory exists on disk.
    pub fn exists(&self) -> bool {
        self.config_dir.is_dir()
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Make `raw` absolute against `base`, expanding `~` and canonicalizing when
/// the target exists.
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let p = expand_home(raw);
    let joined = if p.is_absolute() { p } else { base.join(p) };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

// ---------------------------------------------------------------------------
// JSON file helpers
// ---------------------------------------------------------------------------

/// Read a JSON object from disk for use as a config layer.
///
/// A missing file is an empty layer. Empty files, invalid JSON and
/// non-object documents are reported through `warnings` and also treated
/// as empty layers.
pub fn read_layer(path: &Path, warnings: &mut Vec<String>) -> Map<String, Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            push_warning(warnings, format!("could not read {}: {e}", path.display()));
            return Map::new();
        }
    };
    if content.trim().is_empty() {
        push_warning(
            warnings,
            format!("ignored empty JSON file: {}", path.display()),
        );
        return Map::new();
    }
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            push_warning(
                warnings,
                format!("expected a JSON object in {}", path.display()),
            );
            Map::new()
        }
        Err(e) => {
            push_warning(warnings, format!("invalid JSON in {}: {e}", path.display()));
            Map::new()
        }
    }
}

fn push_warning(warnings: &mut Vec<String>, message: String) {
    tracing::warn!("{message}");
    warnings.push(message);
}

/// Strictly read a JSON document. `Ok(None)` when the file does not exist.
pub fn read_json(path: &Path) -> Result<Option<Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RtoolsError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(Some(Value::Object(Map::new())));
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| RtoolsError::json(path, e))
}

/// Write a JSON document pretty-printed with a trailing newline.
pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RtoolsError::io(parent, e))?;
    }
    let mut text = serde_json::to_string_pretty(value).map_err(|e| RtoolsError::json(path, e))?;
    text.push('\n');
    std::fs::write(path, text).map_err(|e| RtoolsError::io(path, e))
}

// ---------------------------------------------------------------------------
// Merge & provenance
// ---------------------------------------------------------------------------

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Flatten nested objects to dotted keys. Non-object values are leaves.
pub fn flatten(value: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let dotted = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(child, &dotted, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

/// Accept `null` wherever a defaulted field is expected.
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

/// Where each layer of a [`LoadedConfig`] came from.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSources {
    pub tools_root: PathBuf,
    pub global_config: PathBuf,
    pub tool_config: Option<PathBuf>,
    /// `.rtools.json` in the working directory, when present.
    pub project_file: Option<PathBuf>,
    pub project_override: Option<PathBuf>,
    pub cli_overrides: Value,
}

/// The merged configuration for one tool invocation.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Effective merged values (always a JSON object).
    pub values: Value,
    /// Dotted key → name of the layer that supplied it last.
    pub provenance: BTreeMap<String, String>,
    pub sources: ConfigSources,
    /// Non-fatal problems met while loading (missing dir, bad JSON, ...).
    pub warnings: Vec<String>,
    /// Working directory used for relative paths and the project file.
    pub cwd: PathBuf,
}

/// Builder for a layered config load.
#[derive(Debug, Clone)]
pub struct ConfigLoader<'a> {
    paths: &'a ConfigPaths,
    tool_file: Option<String>,
    cwd: Option<PathBuf>,
    project: Option<PathBuf>,
    overrides: Value,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(paths: &'a ConfigPaths) -> Self {
        Self {
            paths,
            tool_file: None,
            cwd: None,
            project: None,
            overrides: Value::Object(Map::new()),
        }
    }

    /// Tool-specific layer, e.g. `search_config.json`.
    pub fn tool(mut self, file_name: impl Into<String>) -> Self {
        self.tool_file = Some(file_name.into());
        self
    }

    /// Working directory (defaults to the process cwd).
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Selected project root; becomes the `project_root` override layer.
    pub fn project(mut self, project: Option<PathBuf>) -> Self {
        self.project = project;
        self
    }

    /// CLI/UI argument overrides, merged last.
    pub fn overrides(mut self, overrides: Value) -> Self {
        if overrides.is_object() {
            self.overrides = overrides;
        }
        self
    }

    /// Merge all layers.
    pub fn load(self) -> LoadedConfig {
        let mut warnings = Vec::new();
        let cwd = self
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        if !self.paths.exists() {
            push_warning(
                &mut warnings,
                format!(
                    "config directory {} does not exist; run 'rt init' to create default templates",
                    self.paths.config_dir.display()
                ),
            );
        }

        let global_path = self.paths.file(GLOBAL_CONFIG);
        let mut layers: Vec<(String, Value)> = vec![(
            "global_config".into(),
            Value::Object(read_layer(&global_path, &mut warnings)),
        )];

        let tool_config = self.tool_file.as_deref().map(|name| self.paths.file(name));
        if let (Some(name), Some(path)) = (self.tool_file.as_deref(), tool_config.as_deref()) {
            layers.push((
                name.to_string(),
                Value::Object(read_layer(path, &mut warnings)),
            ));
        }

        let project_path = cwd.join(PROJECT_FILE_NAME);
        let project_file = project_path.is_file().then(|| project_path.clone());
        if project_file.is_some() {
            layers.push((
                PROJECT_FILE_NAME.to_string(),
                Value::Object(read_layer(&project_path, &mut warnings)),
            ));
        }

        let project_override = self.project.map(|p| {
            let raw = p.to_string_lossy().into_owned();
            resolve_path(&raw, &cwd)
        });
        if let Some(root) = &project_override {
            layers.push((
                "project_override".into(),
                json!({ "project_root": root.to_string_lossy() }),
            ));
        }

        layers.push(("cli_overrides".into(), self.overrides.clone()));

        let mut values = Value::Object(Map::new());
        let mut provenance = BTreeMap::new();
        for (name, layer) in &layers {
            deep_merge(&mut values, layer);
            let mut flat = Vec::new();
            flatten(layer, "", &mut flat);
            for (key, _) in flat {
                provenance.insert(key, name.clone());
            }
        }

        if let Value::Object(map) = &mut values {
            let defaults = [
                ("include_extensions", json!([])),
                ("exclude_dirs", json!([])),
                ("exclude_files", json!([])),
                ("case_insensitive", json!(true)),
            ];
            for (key, value) in defaults {
                if !map.contains_key(key) {
                    map.insert(key.to_string(), value);
                    provenance.insert(key.to_string(), "defaults".into());
                }
            }
        }

        tracing::debug!(
            tool = self.tool_file.as_deref().unwrap_or("-"),
            layers = layers.len(),
            "loaded layered config"
        );

        LoadedConfig {
            values,
            provenance,
            sources: ConfigSources {
                tools_root: self.paths.tools_root.clone(),
                global_config: global_path,
                tool_config,
                project_file,
                project_override,
                cli_overrides: self.overrides,
            },
            warnings,
            cwd,
        }
    }
}

impl LoadedConfig {
    /// Look up a dotted key such as `format.black.line_length`.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        dotted
            .split('.')
            .try_fold(&self.values, |value, key| value.get(key))
    }

    /// Deserialize a top-level section (e.g. `"search"`) into a typed view.
    /// A missing or `null` section yields `T::default()`.
    pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| RtoolsError::config(format!("invalid `{key}` settings: {e}"))),
        }
    }

    /// The top-level keys shared by every tool.
    pub fn global(&self) -> Result<GlobalSettings> {
        serde_json::from_value(self.values.clone())
            .map_err(|e| RtoolsError::config(format!("invalid global settings: {e}")))
    }

    /// Effective project root: `project_root` resolved against the working
    /// directory, or the working directory itself.
    pub fn project_root(&self) -> PathBuf {
        match self.values.get("project_root").and_then(Value::as_str) {
            Some(raw) if !raw.trim().is_empty() => resolve_path(raw.trim(), &self.cwd),
            _ => std::fs::canonicalize(&self.cwd).unwrap_or_else(|_| self.cwd.clone()),
        }
    }

    /// Provenance entries whose key starts with `prefix` (all when empty).
    pub fn provenance_for<'s>(
        &'s self,
        prefix: &'s str,
    ) -> impl Iterator<Item = (&'s String, &'s String)> + 's {
        self.provenance
            .iter()
            .filter(move |(key, _)| prefix.is_empty() || key.starts_with(prefix))
    }
}

/// Top-level settings that every tool reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub include_extensions: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub exclude_dirs: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub exclude_files: Vec<String>,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Fallback search terms when none are given.
    #[serde(default, deserialize_with = "nullable")]
    pub search_terms: Vec<String>,
    /// Preferred project for the UI.
    #[serde(default)]
    pub default_project: Option<String>,
    /// Preferred tool tab for the UI.
    #[serde(default)]
    pub default_tool: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            include_extensions: Vec::new(),
            exclude_dirs: Vec::new(),
            exclude_files: Vec::new(),
            case_insensitive: true,
            search_terms: Vec::new(),
            default_project: None,
            default_tool: None,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, value: Value) {
        write_json_pretty(path, &value).expect("write json");
    }

    #[test]
    fn deep_merge_is_recursive_for_objects_only() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "list": [1, 2]});
        deep_merge(&mut base, &json!({"a": {"y": 3}, "list": [9]}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "list": [9]}));
    }

    #[test]
    fn flatten_produces_dotted_keys() {
        let mut out = Vec::new();
        flatten(&json!({"format": {"black": {"line_length": 100}}, "k": [1]}), "", &mut out);
        let keys: Vec<_> = out.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"format.black.line_length"));
        assert!(keys.contains(&"k"));
    }

    #[test]
    fn project_override_beats_global_and_overrides_beat_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_dir = dir.path().join("configs");
        std::fs::create_dir_all(&cfg_dir).expect("mkdir");
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).expect("mkdir");

        write(
            &cfg_dir.join(GLOBAL_CONFIG),
            json!({"project_root": "/somewhere/else", "exclude_dirs": [".git"]}),
        );
        write(
            &cfg_dir.join("search_config.json"),
            json!({"search": {"include": ["*.py"], "exclude": []}}),
        );

        let paths = ConfigPaths::at(&cfg_dir);
        let cfg = ConfigLoader::new(&paths)
            .tool("search_config.json")
            .cwd(dir.path())
            .project(Some(project.clone()))
            .overrides(json!({"search": {"include": ["*.rs"]}}))
            .load();

        assert_eq!(
            cfg.project_root(),
            std::fs::canonicalize(&project).expect("canon")
        );
        assert_eq!(cfg.provenance["project_root"], "project_override");
        assert_eq!(cfg.get("search.include"), Some(&json!(["*.rs"])));
        assert_eq!(cfg.provenance["search.include"], "cli_overrides");
        assert_eq!(cfg.provenance["search.exclude"], "search_config.json");
        assert_eq!(cfg.provenance["exclude_dirs"], "global_config");
        assert_eq!(cfg.sources.tools_root, dir.path());
        assert!(cfg.warnings.is_empty());
    }

    #[test]
    fn defaults_are_filled_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("configs")).expect("mkdir");
        let paths = ConfigPaths::at(dir.path().join("configs"));
        let cfg = ConfigLoader::new(&paths).cwd(dir.path()).load();
        let global = cfg.global().expect("global");
        assert!(global.case_insensitive);
        assert!(global.include_extensions.is_empty());
        assert_eq!(cfg.provenance["case_insensitive"], "defaults");
    }

    #[test]
    fn missing_config_dir_warns_instead_of_failing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ConfigPaths::at(dir.path().join("nope"));
        let cfg = ConfigLoader::new(&paths)
            .tool("search_config.json")
            .cwd(dir.path())
            .load();
        assert_eq!(cfg.warnings.len(), 1);
        assert!(cfg.warnings[0].contains("rt init"));
        assert_eq!(cfg.get("case_insensitive"), Some(&json!(true)));
    }

    #[test]
    fn invalid_and_empty_layers_warn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_dir = dir.path().join("configs");
        std::fs::create_dir_all(&cfg_dir).expect("mkdir");
        std::fs::write(cfg_dir.join(GLOBAL_CONFIG), "{ not json").expect("write");
        std::fs::write(cfg_dir.join("paste_config.json"), "  \n").expect("write");

        let paths = ConfigPaths::at(&cfg_dir);
        let cfg = ConfigLoader::new(&paths)
            .tool("paste_config.json")
            .cwd(dir.path())
            .load();
        assert_eq!(cfg.warnings.len(), 2);
        assert!(cfg.warnings[0].starts_with("invalid JSON"));
        assert!(cfg.warnings[1].starts_with("ignored empty JSON file"));
    }

    #[test]
    fn project_file_in_cwd_is_a_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_dir = dir.path().join("configs");
        std::fs::create_dir_all(&cfg_dir).expect("mkdir");
        write(&cfg_dir.join(GLOBAL_CONFIG), json!({"case_insensitive": true}));
        write(
            &dir.path().join(PROJECT_FILE_NAME),
            json!({"case_insensitive": false}),
        );

        let paths = ConfigPaths::at(&cfg_dir);
        let cfg = ConfigLoader::new(&paths).cwd(dir.path()).load();
        assert_eq!(cfg.get("case_insensitive"), Some(&json!(false)));
        assert_eq!(cfg.provenance["case_insensitive"], PROJECT_FILE_NAME);
        assert!(cfg.sources.project_file.is_some());
    }

    #[test]
    fn whitelist_rejects_unknown_names() {
        let paths = ConfigPaths::at("/tmp/rtools-configs");
        assert!(paths.whitelisted("search_config.json").is_ok());
        assert!(paths.whitelisted("../secrets.json").is_err());
        assert!(paths.whitelisted("random.json").is_err());
    }

    #[test]
    fn nullable_fields_accept_null() {
        let settings: GlobalSettings =
            serde_json::from_value(json!({"search_terms": null, "exclude_dirs": ["target"]}))
                .expect("parse");
        assert!(settings.search_terms.is_empty());
        assert_eq!(settings.exclude_dirs, vec!["target"]);
    }
}
