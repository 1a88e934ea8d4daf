//! Removal of temporary and build artifacts (caches, coverage output,
//! editor droppings) from a project tree.
//!
//! Targets are switched on per key in `clean.targets`. Directory targets
//! are matched by name and removed whole; file targets are matched by
//! file-name patterns. Virtualenvs are never entered unless
//! `clean.allow_venv_clean` is set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rtools_files::glob::GlobSet;
use rtools_files::walk::rel_path;
use rtools_shared::{
    ConfigPaths, LoadedConfig, Report, Result, RtoolsError, nullable, read_json, write_json_pretty,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::instrument;
use walkdir::WalkDir;

pub const CLEAN_CONFIG: &str = "clean_config.json";

/// Directory targets: key and the directory names it removes.
pub const DIR_TARGETS: &[(&str, &[&str])] = &[
    ("pycache", &["__pycache__"]),
    ("pytest_cache", &[".pytest_cache"]),
    ("mypy_cache", &[".mypy_cache"]),
    ("ruff_cache", &[".ruff_cache"]),
    ("coverage", &["htmlcov"]),
    ("build", &["build"]),
    ("dist", &["dist"]),
    ("node_modules", &["node_modules"]),
];

/// File targets: key and the file-name patterns it removes.
pub const FILE_TARGETS: &[(&str, &[&str])] = &[
    ("coverage", &[".coverage", ".coverage.*"]),
    ("editor", &["*~", ".*.swp", ".*.swo", "*.tmp", "*.bak"]),
    ("ds_store", &[".DS_Store"]),
    ("thumbs_db", &["Thumbs.db", "ehthumbs.db"]),
];

/// Every known target key, sorted.
pub fn target_keys() -> Vec<&'static str> {
    let keys: BTreeSet<&str> = DIR_TARGETS
        .iter()
        .chain(FILE_TARGETS)
        .map(|(key, _)| *key)
        .collect();
    keys.into_iter().collect()
}

/// `clean` section of the merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanSettings {
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub allow_venv_clean: bool,
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<String, bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub extra_globs: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub skip_globs: Vec<String>,
}

impl Default for CleanSettings {
    fn default() -> Self {
        Self {
            enable: true,
            allow_venv_clean: false,
            targets: default_targets(),
            extra_globs: Vec::new(),
            skip_globs: Vec::new(),
        }
    }
}

fn default_enable() -> bool {
    true
}

/// Caches and editor files on; build output and `node_modules` off.
pub fn default_targets() -> BTreeMap<String, bool> {
    target_keys()
        .into_iter()
        .map(|key| {
            let on = !matches!(key, "build" | "dist" | "node_modules");
            (key.to_string(), on)
        })
        .collect()
}

/// Per-invocation arguments.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Restrict to these target keys.
    pub only: Vec<String>,
    /// Never run these target keys.
    pub skip: Vec<String>,
    pub dry_run: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            skip: Vec::new(),
            dry_run: true,
        }
    }
}

/// Directories and files selected for removal, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

fn check_keys(keys: &[String]) -> Result<()> {
    let known = target_keys();
    for key in keys {
        if !known.contains(&key.as_str()) {
            return Err(RtoolsError::validation(format!(
                "unknown clean target '{key}' (known: {})",
                known.join(", ")
            )));
        }
    }
    Ok(())
}

fn is_venv(dir: &Path) -> bool {
    dir.join("pyvenv.cfg").is_file()
}

/// Collect what a clean run would remove under `root`.
pub fn gather_targets(
    root: &Path,
    settings: &CleanSettings,
    options: &CleanOptions,
) -> Result<CleanPlan> {
    check_keys(&options.only)?;
    check_keys(&options.skip)?;

    let is_on = |key: &str| {
        !options.skip.iter().any(|s| s == key)
            && (options.only.is_empty() || options.only.iter().any(|o| o == key))
            && settings.targets.get(key).copied().unwrap_or(false)
    };
    let dir_names: BTreeSet<&str> = DIR_TARGETS
        .iter()
        .filter(|(key, _)| is_on(key))
        .flat_map(|(_, names)| names.iter().copied())
        .collect();
    let file_patterns: Vec<&str> = FILE_TARGETS
        .iter()
        .filter(|(key, _)| is_on(key))
        .flat_map(|(_, pats)| pats.iter().copied())
        .collect();
    let file_names = GlobSet::fnmatch(&file_patterns)?;
    let extra = GlobSet::path(&settings.extra_globs)?;
    let skip = GlobSet::path(&settings.skip_globs)?;

    let mut dirs = BTreeSet::new();
    let mut files = BTreeSet::new();
    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let Some(rel) = rel_path(root, path) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_dir() {
            if !settings.allow_venv_clean && is_venv(path) {
                tracing::debug!(dir = %rel, "not entering virtualenv");
                walker.skip_current_dir();
                continue;
            }
            if dir_names.contains(name.as_ref()) || extra.is_match(&rel) {
                dirs.insert(path.to_path_buf());
                walker.skip_current_dir();
            }
        } else if entry.file_type().is_file()
            && (file_names.is_match(&name) || extra.is_match(&rel))
        {
            files.insert(path.to_path_buf());
        }
    }

    let protected = |p: &PathBuf| {
        rel_path(root, p).is_some_and(|rel| {
            let mut prefix = String::new();
            rel.split('/').any(|part| {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                skip.is_match(&prefix)
            })
        })
    };
    Ok(CleanPlan {
        dirs: dirs.into_iter().filter(|d| !protected(d)).collect(),
        files: files.into_iter().filter(|f| !protected(f)).collect(),
    })
}

/// Clean the project root of `cfg`. Deletes only when `dry_run` is off.
#[instrument(skip_all, fields(dry_run = options.dry_run))]
pub fn run_clean(cfg: &LoadedConfig, options: &CleanOptions) -> Result<Report> {
    let root = cfg.project_root();
    let settings: CleanSettings = cfg.section("clean")?;
    let mut report = Report::new();
    if !settings.enable {
        report.line("Clean is disabled in config (clean.enable=false).");
        return Ok(report);
    }

    let plan = gather_targets(&root, &settings, options)?;
    let show = |p: &Path| rel_path(&root, p).unwrap_or_else(|| p.display().to_string());

    report.line(format!("Project: {}", root.display()));
    report.line(format!("Directories to remove: {}", plan.dirs.len()));
    for dir in &plan.dirs {
        report.line(format!("  DIR  {}", show(dir)));
    }
    report.line(format!("Files to remove: {}", plan.files.len()));
    for file in &plan.files {
        report.line(format!("  FILE {}", show(file)));
    }
    report.metric("clean_dirs", plan.dirs.len() as i64);
    report.metric("clean_files", plan.files.len() as i64);

    if options.dry_run {
        report.line("Dry-run: nothing was deleted. Use --yes to apply.");
        return Ok(report);
    }

    let (mut ok, mut failed) = (0i64, 0i64);
    let results = plan
        .dirs
        .iter()
        .map(|d| (d, std::fs::remove_dir_all(d)))
        .chain(plan.files.iter().map(|f| (f, std::fs::remove_file(f))));
    for (path, result) in results {
        match result {
            Ok(()) => ok += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "delete failed");
                failed += 1;
            }
        }
    }
    report.line(format!("Deleted: {ok}, failed: {failed}"));
    report.metric("deleted", ok);
    report.metric("failed", failed);
    if failed > 0 {
        report.set_rc(1);
    }
    tracing::info!(deleted = ok, failed, "clean finished");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Persisted targets (web UI)
// ---------------------------------------------------------------------------

/// Store `targets` in `clean_config.json`, keeping every other key.
pub fn save_targets(paths: &ConfigPaths, targets: &Map<String, Value>) -> Result<PathBuf> {
    for (key, value) in targets {
        if !value.is_boolean() {
            return Err(RtoolsError::validation(format!("target '{key}' must be true or false")));
        }
    }
    let path = paths.file(CLEAN_CONFIG);
    let mut doc = match read_json(&path)? {
        Some(Value::Object(map)) => Value::Object(map),
        _ => json!({}),
    };
    if !doc.get("clean").is_some_and(Value::is_object) {
        doc["clean"] = json!({});
    }
    doc["clean"]["targets"] = Value::Object(targets.clone());
    write_json_pretty(&path, &doc)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtools_shared::ConfigLoader;

    fn mkdir(root: &Path, rel: &str) {
        std::fs::create_dir_all(root.join(rel)).expect("mkdir");
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "x").expect("write");
    }

    fn config(root: &Path, overrides: Value) -> LoadedConfig {
        let paths = ConfigPaths::at(root.join(".no-configs"));
        ConfigLoader::new(&paths)
            .cwd(root)
            .project(Some(root.to_path_buf()))
            .overrides(overrides)
            .load()
    }

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical");
        (dir, root)
    }

    #[test]
    fn never_enters_virtualenvs() {
        let (_dir, root) = project();
        mkdir(&root, ".venv/Lib/site-packages/__pycache__");
        touch(&root, ".venv/pyvenv.cfg");
        mkdir(&root, "pkg/__pycache__");

        let cfg = config(&root, json!({}));
        let dry = run_clean(&cfg, &CleanOptions::default()).expect("clean");
        assert!(dry.text().contains("  DIR  pkg/__pycache__\n"));
        assert!(!dry.text().contains(".venv"));
        assert!(root.join("pkg/__pycache__").exists());

        let options = CleanOptions {
            dry_run: false,
            ..CleanOptions::default()
        };
        let report = run_clean(&cfg, &options).expect("clean");
        assert!(report.text().contains("Deleted: 1, failed: 0"));
        assert!(!root.join("pkg/__pycache__").exists());
        assert!(root.join(".venv/Lib/site-packages/__pycache__").exists());
    }

    #[test]
    fn venv_clean_can_be_allowed() {
        let (_dir, root) = project();
        mkdir(&root, "venv/lib/__pycache__");
        touch(&root, "venv/pyvenv.cfg");
        let settings = CleanSettings {
            allow_venv_clean: true,
            ..CleanSettings::default()
        };
        let plan = gather_targets(&root, &settings, &CleanOptions::default()).expect("plan");
        assert_eq!(plan.dirs, vec![root.join("venv/lib/__pycache__")]);
    }

    #[test]
    fn file_targets_only_skip_and_globs() {
        let (_dir, root) = project();
        touch(&root, ".coverage");
        touch(&root, "src/.main.py.swp");
        touch(&root, "src/notes.bak");
        touch(&root, "keep/old.bak");
        touch(&root, ".DS_Store");
        touch(&root, "logs/run.log");
        mkdir(&root, ".mypy_cache/3.11");

        let settings = CleanSettings {
            extra_globs: vec!["logs/*.log".into()],
            skip_globs: vec!["keep".into()],
            ..CleanSettings::default()
        };
        let plan = gather_targets(&root, &settings, &CleanOptions::default()).expect("plan");
        let rels: Vec<String> = plan.files.iter().filter_map(|p| rel_path(&root, p)).collect();
        assert_eq!(
            rels,
            vec![".DS_Store", ".coverage", "logs/run.log", "src/.main.py.swp", "src/notes.bak"]
        );
        assert_eq!(plan.dirs, vec![root.join(".mypy_cache")]);

        let options = CleanOptions {
            only: vec!["editor".into()],
            skip: Vec::new(),
            dry_run: true,
        };
        let plan = gather_targets(&root, &settings, &options).expect("plan");
        assert!(plan.dirs.is_empty());
        assert_eq!(plan.files.len(), 3);

        let options = CleanOptions {
            only: vec!["bogus".into()],
            ..CleanOptions::default()
        };
        assert!(gather_targets(&root, &settings, &options).is_err());
    }

    #[test]
    fn disabled_tool_does_nothing() {
        let (_dir, root) = project();
        mkdir(&root, "__pycache__");
        let cfg = config(&root, json!({"clean": {"enable": false}}));
        let report = run_clean(&cfg, &CleanOptions { dry_run: false, ..CleanOptions::default() })
            .expect("clean");
        assert!(report.text().starts_with("Clean is disabled"));
        assert!(root.join("__pycache__").exists());
    }

    #[test]
    fn save_targets_keeps_other_keys() {
        let (_dir, root) = project();
        let paths = ConfigPaths::at(root.join("configs"));
        write_json_pretty(&paths.file(CLEAN_CONFIG), &json!({"clean": {"enable": true}, "x": 1}))
            .expect("write");
        let mut targets = Map::new();
        targets.insert("pycache".into(), Value::Bool(false));
        save_targets(&paths, &targets).expect("save");
        let doc = read_json(&paths.file(CLEAN_CONFIG)).expect("read").expect("exists");
        assert_eq!(doc, json!({"clean": {"enable": true, "targets": {"pycache": false}}, "x": 1}));

        targets.insert("editor".into(), json!("yes"));
        assert!(save_targets(&paths, &targets).is_err());
    }
}
