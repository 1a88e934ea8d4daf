//! Typed view of the `format` config section.
//!
//! Keys follow the names used in `format_config.json` (prettier keeps its
//! camelCase option names). List-valued keys also accept a comma-separated
//! string.

use serde::{Deserialize, Deserializer, Serialize};

/// `format` section of the merged config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatSettings {
    /// Allow running with the home directory or `/` as project root.
    #[serde(default)]
    pub allow_home: bool,
    /// Explicit `npx` executable; auto-detected when unset or not executable.
    #[serde(default)]
    pub npx_path: Option<String>,
    #[serde(default)]
    pub prettier: PrettierSettings,
    #[serde(default)]
    pub black: BlackSettings,
    #[serde(default)]
    pub ruff: RuffSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrettierSettings {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "printWidth")]
    pub print_width: Option<u32>,
    #[serde(default, rename = "tabWidth")]
    pub tab_width: Option<u32>,
    #[serde(default, rename = "singleQuote")]
    pub single_quote: bool,
    /// `Some(false)` adds `--no-semi`.
    #[serde(default)]
    pub semi: Option<bool>,
    #[serde(default, rename = "trailingComma")]
    pub trailing_comma: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub extra_args: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub globs: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlackSettings {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub line_length: Option<u32>,
    /// Target versions, e.g. `py311`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub target: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuffSettings {
    #[serde(default)]
    pub enable: bool,
    /// When set, used verbatim instead of the generated `check` arguments.
    #[serde(default, deserialize_with = "string_or_list")]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub fix: bool,
    #[serde(default)]
    pub unsafe_fixes: bool,
    #[serde(default)]
    pub preview: bool,
    #[serde(default, deserialize_with = "string_or_list")]
    pub select: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub ignore: Vec<String>,
}

impl Default for RuffSettings {
    fn default() -> Self {
        Self {
            enable: false,
            args: Vec::new(),
            fix: true,
            unsafe_fixes: false,
            preview: false,
            select: Vec::new(),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default)]
    pub enable: bool,
    /// Files or directories relative to the project root; empty means the root.
    #[serde(default, deserialize_with = "string_or_list")]
    pub paths: Vec<String>,
    #[serde(default = "default_cleanup_exts", deserialize_with = "string_or_list")]
    pub exts: Vec<String>,
    /// Suffixes to skip; matched against the end of the file name so
    /// `.min.js` works.
    #[serde(default, deserialize_with = "string_or_list")]
    pub exclude_exts: Vec<String>,
    #[serde(default = "default_true")]
    pub compact_blocks: bool,
    #[serde(default = "default_max_blanks")]
    pub max_consecutive_blanks: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enable: false,
            paths: Vec::new(),
            exts: default_cleanup_exts(),
            exclude_exts: Vec::new(),
            compact_blocks: true,
            max_consecutive_blanks: default_max_blanks(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_blanks() -> usize {
    1
}

fn default_cleanup_exts() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".tsx", ".css", ".scss", ".html", ".json", ".sh", ".c", ".h", ".cpp",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Accept `["a", "b"]`, `"a, b"` or `null`; blank entries are dropped.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<serde_json::Value>),
        Csv(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    let items = match raw {
        None => Vec::new(),
        Some(Raw::Csv(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Some(Raw::List(values)) => values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect(),
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_shape_deserializes() {
        let settings: FormatSettings = serde_json::from_value(json!({
            "prettier": {"enable": true, "printWidth": 100, "semi": false, "globs": ["**/*.js"]},
            "black": {"enable": true, "target": "py311, py312"},
            "ruff": {"enable": true, "select": "E,F"},
            "cleanup": {"enable": true, "exts": null}
        }))
        .expect("deserialize");
        assert_eq!(settings.prettier.print_width, Some(100));
        assert_eq!(settings.prettier.semi, Some(false));
        assert_eq!(settings.black.target, vec!["py311", "py312"]);
        assert_eq!(settings.ruff.select, vec!["E", "F"]);
        assert!(settings.ruff.fix);
        assert!(settings.cleanup.exts.is_empty());
        assert_eq!(settings.cleanup.max_consecutive_blanks, 1);
    }
}
