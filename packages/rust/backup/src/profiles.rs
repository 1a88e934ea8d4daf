//! Backup profiles: named parameter sets in `backup_profiles.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rtools_shared::{ConfigPaths, Result, RtoolsError, read_json};
use serde_json::Value;
use tracing::warn;

pub const BACKUP_PROFILES: &str = "backup_profiles.json";
/// Accepted alias for the profiles file.
pub const PROFILES_ALIAS: &str = "profiles.json";

/// The parsed profiles file.
///
/// Profile bodies are kept as raw JSON: the backup script is what reads
/// their fields, so only names and `default` matter here.
#[derive(Debug, Clone, Default)]
pub struct ProfilesFile {
    pub path: PathBuf,
    pub default: Option<String>,
    pub profiles: BTreeMap<String, Value>,
}

impl ProfilesFile {
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// The `default` profile, when it names an entry of the map.
    pub fn default_profile(&self) -> Option<&str> {
        self.default.as_deref().filter(|name| self.contains(name))
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

/// First existing profiles file: `backup_profiles.json`, then `profiles.json`.
pub fn profiles_path(paths: &ConfigPaths) -> Option<PathBuf> {
    [BACKUP_PROFILES, PROFILES_ALIAS]
        .into_iter()
        .map(|name| paths.file(name))
        .find(|path| path.is_file())
}

/// Load the profiles file, if there is one.
pub fn load_profiles(paths: &ConfigPaths) -> Result<Option<ProfilesFile>> {
    let Some(path) = profiles_path(paths) else {
        return Ok(None);
    };
    let Some(doc) = read_json(&path)? else {
        return Ok(None);
    };

    let profiles = match doc.get("profiles") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .filter_map(|(name, body)| {
                if body.is_object() {
                    Some((name.clone(), body.clone()))
                } else {
                    warn!(
                        profile = %name,
                        path = %path.display(),
                        "skipping profile that is not an object"
                    );
                    None
                }
            })
            .collect(),
        Some(_) => {
            return Err(RtoolsError::config(format!(
                "{}: 'profiles' must be an object",
                path.display()
            )));
        }
    };
    let default = doc
        .get("default")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Ok(Some(ProfilesFile {
        path,
        default,
        profiles,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(dir: &std::path::Path) -> ConfigPaths {
        let paths = ConfigPaths::at(dir.join("configs"));
        std::fs::create_dir_all(&paths.config_dir).expect("mkdir");
        paths
    }

    #[test]
    fn alias_file_is_used_when_primary_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        std::fs::write(
            paths.file(PROFILES_ALIAS),
            json!({"profiles": {"work": {"format": "tar.gz", "keep": 5}}, "default": "work"})
                .to_string(),
        )
        .expect("write");

        let file = load_profiles(&paths).expect("load").expect("present");
        assert!(file.path.ends_with(PROFILES_ALIAS));
        assert_eq!(file.default_profile(), Some("work"));
        assert_eq!(file.profiles["work"]["format"], "tar.gz");
        assert_eq!(file.profiles["work"]["keep"], 5);
    }

    #[test]
    fn default_must_name_a_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        std::fs::write(
            paths.file(BACKUP_PROFILES),
            json!({"profiles": {"b": {}, "a": {}}, "default": "missing"}).to_string(),
        )
        .expect("write");

        let file = load_profiles(&paths).expect("load").expect("present");
        assert_eq!(file.default_profile(), None);
        assert_eq!(file.names(), vec!["a", "b"]);
    }

    #[test]
    fn field_types_are_left_to_the_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        std::fs::write(
            paths.file(BACKUP_PROFILES),
            json!({
                "profiles": {"home": {"keep": 5}, "work": {"keep": "5", "format": "rar"}, "odd": 3},
                "default": "home"
            })
            .to_string(),
        )
        .expect("write");

        let file = load_profiles(&paths).expect("load").expect("present");
        assert_eq!(file.names(), vec!["home", "work"]);
        assert_eq!(file.default_profile(), Some("home"));
        assert_eq!(file.profiles["work"]["keep"], "5");
    }

    #[test]
    fn profiles_must_be_an_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths(dir.path());
        std::fs::write(paths.file(BACKUP_PROFILES), json!({"profiles": []}).to_string())
            .expect("write");
        assert!(load_profiles(&paths).is_err());
    }
}
