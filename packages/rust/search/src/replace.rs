//! Search/replace across project files, dry-run by default.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};
use rtools_files::diff::unified_diff;
use rtools_files::glob::{GlobSet, has_wildcards, normalize_file_names};
use rtools_files::walk::{glob_files, rel_path};
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::DEFAULT_MAX_SIZE;

/// Include globs used when neither arguments nor config name any.
pub const DEFAULT_INCLUDE: [&str; 19] = [
    "**/*.py", "**/*.js", "**/*.ts", "**/*.tsx", "**/*.css", "**/*.scss", "**/*.html",
    "**/*.json", "**/*.md", "**/*.txt", "**/*.sh", "**/*.yml", "**/*.yaml", "**/*.toml",
    "**/*.ini", "**/*.cfg", "**/*.c", "**/*.h", "**/*.cpp",
];

/// `replace` section of the merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub include: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_true")]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub backup: bool,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub show_diff: bool,
    #[serde(default)]
    pub filename_search: bool,
}

impl Default for ReplaceSettings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_size: default_max_size(),
            regex: true,
            case_sensitive: false,
            backup: true,
            dry_run: true,
            show_diff: false,
            filename_search: false,
        }
    }
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}
fn default_true() -> bool {
    true
}

/// Per-invocation arguments. `None` falls back to [`ReplaceSettings`].
#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    pub find: String,
    pub replace: String,
    pub regex: Option<bool>,
    pub case_sensitive: Option<bool>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub filename_search: bool,
    pub max_size: Option<u64>,
    pub dry_run: Option<bool>,
    pub backup: Option<bool>,
    pub show_diff: Option<bool>,
}

/// Fully resolved replace plan.
#[derive(Debug, Clone)]
struct Plan {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
    max_size: u64,
    regex: bool,
    case_sensitive: bool,
    backup: bool,
    dry_run: bool,
    show_diff: bool,
    global_exclude_dirs: Vec<String>,
    global_exclude_files: Vec<String>,
}

fn resolve_plan(cfg: &LoadedConfig, options: &ReplaceOptions) -> Result<Plan> {
    let settings: ReplaceSettings = cfg.section("replace")?;
    let global = cfg.global()?;
    let filename_search = options.filename_search || settings.filename_search;

    let include = if options.include.is_empty() {
        settings.include
    } else {
        options.include.clone()
    };
    let mut include = normalize_file_names(&include, filename_search);
    if include.is_empty() {
        include = DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect();
    }
    let exclude = if options.exclude.is_empty() {
        settings.exclude
    } else {
        options.exclude.clone()
    };

    Ok(Plan {
        root: cfg.project_root(),
        include,
        exclude,
        max_size: options.max_size.unwrap_or(settings.max_size),
        regex: options.regex.unwrap_or(settings.regex),
        case_sensitive: options.case_sensitive.unwrap_or(settings.case_sensitive),
        backup: options.backup.unwrap_or(settings.backup),
        dry_run: options.dry_run.unwrap_or(settings.dry_run),
        show_diff: options.show_diff.unwrap_or(settings.show_diff),
        global_exclude_dirs: global.exclude_dirs,
        global_exclude_files: global.exclude_files,
    })
}

fn candidates(plan: &Plan) -> Result<Vec<PathBuf>> {
    let root = &plan.root;
    let pruned: Vec<PathBuf> = plan
        .global_exclude_dirs
        .iter()
        .filter(|d| !d.trim().is_empty())
        .map(|d| {
            let p = Path::new(d.trim());
            let joined = if p.is_absolute() { p.to_path_buf() } else { root.join(p) };
            std::fs::canonicalize(&joined).unwrap_or(joined)
        })
        .collect();

    let (glob_entries, names): (Vec<&String>, Vec<&String>) = plan
        .global_exclude_files
        .iter()
        .partition(|f| has_wildcards(f));
    let global_globs = GlobSet::fnmatch(&glob_entries)?;
    let names: BTreeSet<&str> = names.into_iter().map(String::as_str).collect();
    let local_globs = GlobSet::fnmatch(&plan.exclude)?;
    let include = GlobSet::path(&plan.include)?;

    let files = glob_files(root, &include, &pruned)
        .into_iter()
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if names.contains(name.as_str()) {
                return false;
            }
            let Some(rel) = rel_path(root, p) else {
                return false;
            };
            if global_globs.is_match(&rel) || local_globs.is_match(&rel) {
                return false;
            }
            std::fs::metadata(p)
                .map(|m| m.len() <= plan.max_size)
                .unwrap_or(false)
        })
        .collect();
    Ok(files)
}

/// Python-style `\1` back-references become `${1}`.
fn expand_backrefs(replacement: &str) -> Cow<'_, str> {
    static BACKREF: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\\(\d+)").expect("valid regex"));
    BACKREF.replace_all(replacement, "$${$1}")
}

fn header(report: &mut Report, plan: &Plan) {
    let on_off = |b: bool| if b { "on" } else { "off" };
    report.line(format!("Project: {}", plan.root.display()));
    report.line(format!(
        "Mode: {}  |  Backup: {}  |  Diff: {}",
        if plan.dry_run { "dry-run" } else { "apply" },
        on_off(plan.backup),
        on_off(plan.show_diff)
    ));
    report.line(format!(
        "Regex: {}  |  Case-sensitive: {}  |  Max size: {} bytes",
        plan.regex, plan.case_sensitive, plan.max_size
    ));
    report.line(format!("Include: {}", plan.include.join(", ")));
    let mut exclude = plan.exclude.clone();
    exclude.extend(plan.global_exclude_dirs.iter().map(|g| format!("(global) {g}")));
    exclude.extend(plan.global_exclude_files.iter().map(|g| format!("(global) {g}")));
    report.line(format!("Exclude: {}", exclude.join(", ")));
    report.blank();
}

/// Replace `find` with `replace` across the selected files.
///
/// Writes nothing in dry-run mode. In apply mode each changed file is first
/// copied to `<file>.bak` when backups are enabled.
#[instrument(skip_all, fields(find = %options.find))]
pub fn run_replace(cfg: &LoadedConfig, options: &ReplaceOptions) -> Result<Report> {
    let mut report = Report::new();
    if options.find.is_empty() {
        report.line("No 'find' given, aborting.");
        report.set_rc(2);
        return Ok(report);
    }

    let plan = resolve_plan(cfg, options)?;
    if !plan.root.is_dir() {
        return Err(RtoolsError::validation(format!(
            "project root is not a directory: {}",
            plan.root.display()
        )));
    }

    let source = if plan.regex {
        options.find.clone()
    } else {
        regex::escape(&options.find)
    };
    let pattern = RegexBuilder::new(&source)
        .case_insensitive(!plan.case_sensitive)
        .multi_line(true)
        .build()
        .map_err(|e| RtoolsError::validation(format!("invalid find pattern: {e}")))?;
    let replacement = expand_backrefs(&options.replace);

    header(&mut report, &plan);

    let (mut considered, mut changed, mut total) = (0usize, 0usize, 0usize);
    for path in candidates(&plan)? {
        considered += 1;
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        let before = String::from_utf8_lossy(&bytes);
        let hits = pattern.find_iter(&before).count();
        if hits == 0 {
            continue;
        }
        let after = if plan.regex {
            pattern.replace_all(&before, replacement.as_ref())
        } else {
            pattern.replace_all(&before, NoExpand(&options.replace))
        };
        changed += 1;
        total += hits;

        let rel = rel_path(&plan.root, &path).unwrap_or_else(|| path.display().to_string());
        report.line(format!("~ {rel}  ({hits} matches)"));
        if plan.show_diff {
            report.block(&unified_diff(
                &before,
                &after,
                &format!("{rel} (before)"),
                &format!("{rel} (after)"),
                3,
            ));
        }
        if plan.dry_run {
            continue;
        }
        if plan.backup {
            let mut bak = path.clone().into_os_string();
            bak.push(".bak");
            if let Err(e) = std::fs::write(&bak, &bytes) {
                report.line(format!("[warning] could not write backup for {rel}: {e}"));
            }
        }
        if let Err(e) = std::fs::write(&path, after.as_bytes()) {
            report.line(format!("[warning] could not write {rel}: {e}"));
        }
    }

    report.blank();
    report.line("=== Summary ===");
    report.line(format!("Files considered : {considered}"));
    report.line(format!("Files changed    : {changed}"));
    report.line(format!("Replacements     : {total}"));
    if plan.dry_run {
        report.line("Dry-run: no files were written. Use --apply (UI: turn off 'Dry-run') to write.");
    }
    report.metric("files_considered", considered as i64);
    report.metric("files_changed", changed as i64);
    report.metric("replacements", total as i64);
    tracing::info!(considered, changed, total, dry_run = plan.dry_run, "replace finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config, write};
    use serde_json::json;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.py", "old_name = 1\nprint(OLD_NAME)\n");
        write(dir.path(), "pkg/b.py", "from a import old_name\n");
        write(dir.path(), "vendor/c.py", "old_name\n");
        write(dir.path(), "notes.rs", "old_name\n");
        dir
    }

    #[test]
    fn dry_run_reports_but_writes_nothing() {
        let dir = project();
        let cfg = config(dir.path(), json!({"exclude_dirs": ["vendor"]}));
        let options = ReplaceOptions {
            find: "old_name".into(),
            replace: "new_name".into(),
            show_diff: Some(true),
            ..ReplaceOptions::default()
        };
        let report = run_replace(&cfg, &options).expect("replace");
        let text = report.text();
        assert!(text.contains("Mode: dry-run"));
        assert!(text.contains("~ a.py  (2 matches)"));
        assert!(text.contains("~ pkg/b.py  (1 matches)"));
        assert!(text.contains("--- a.py (before)"));
        assert!(text.contains("(global) vendor"));
        assert!(!text.contains("vendor/c.py"));
        assert!(!text.contains("notes.rs"));
        assert_eq!(report.metrics()["replacements"], 3);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).expect("read"),
            "old_name = 1\nprint(OLD_NAME)\n"
        );
    }

    #[test]
    fn apply_writes_changes_and_backups() {
        let dir = project();
        let cfg = config(dir.path(), json!({}));
        let options = ReplaceOptions {
            find: "old_name".into(),
            replace: "new_name".into(),
            case_sensitive: Some(true),
            dry_run: Some(false),
            include: vec!["a.py".into()],
            ..ReplaceOptions::default()
        };
        let report = run_replace(&cfg, &options).expect("replace");
        assert_eq!(report.metrics()["files_changed"], 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).expect("read"),
            "new_name = 1\nprint(OLD_NAME)\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py.bak")).expect("read"),
            "old_name = 1\nprint(OLD_NAME)\n"
        );
    }

    #[test]
    fn literal_mode_escapes_pattern_and_replacement() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "x.txt", "cost: a.b $1\n");
        let cfg = config(dir.path(), json!({}));
        let options = ReplaceOptions {
            find: "a.b".into(),
            replace: "$0".into(),
            regex: Some(false),
            dry_run: Some(false),
            backup: Some(false),
            ..ReplaceOptions::default()
        };
        run_replace(&cfg, &options).expect("replace");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("x.txt")).expect("read"),
            "cost: $0 $1\n"
        );
        assert!(!dir.path().join("x.txt.bak").exists());
    }

    #[test]
    fn regex_backreferences_in_both_styles() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "x.txt", "foo(1)\nfoo(2)\n");
        let cfg = config(dir.path(), json!({}));
        let options = ReplaceOptions {
            find: r"foo\((\d)\)".into(),
            replace: r"bar[\1]".into(),
            dry_run: Some(false),
            backup: Some(false),
            ..ReplaceOptions::default()
        };
        run_replace(&cfg, &options).expect("replace");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("x.txt")).expect("read"),
            "bar[1]\nbar[2]\n"
        );
    }

    #[test]
    fn empty_find_aborts() {
        let dir = project();
        let cfg = config(dir.path(), json!({}));
        let report = run_replace(&cfg, &ReplaceOptions::default()).expect("replace");
        assert_eq!(report.rc(), 2);
        assert!(report.text().contains("aborting"));
    }
}
