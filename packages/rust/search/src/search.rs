//! Line-oriented regex search across project files.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use rtools_files::glob::{GlobSet, normalize_globs};
use rtools_files::text::read_text_limited;
use rtools_files::walk::{
    WalkOptions, extension_of, glob_files, normalize_exts, rel_path, walk_files,
};
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::DEFAULT_MAX_SIZE;

/// `search` section of the merged config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub include: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub exclude: Vec<String>,
}

/// How `files_only` prints paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    #[default]
    Relative,
    Full,
}

/// Per-invocation search arguments.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Regex terms; empty falls back to `search_terms` from config.
    pub terms: Vec<String>,
    /// Include globs; when non-empty, candidates come from these globs only.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Rewrite patterns without `/` to `**/<pattern>`.
    pub filename_search: bool,
    pub limit_dirs: Option<Vec<String>>,
    /// Overrides `include_extensions` when non-empty.
    pub limit_exts: Vec<String>,
    /// Every term must match a line (default: any).
    pub require_all: bool,
    pub files_only: bool,
    pub path_mode: PathMode,
    pub max_size: u64,
    pub count: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            filename_search: false,
            limit_dirs: None,
            limit_exts: Vec::new(),
            require_all: false,
            files_only: false,
            path_mode: PathMode::Relative,
            max_size: DEFAULT_MAX_SIZE,
            count: false,
        }
    }
}

fn compile_terms(terms: &[String], case_insensitive: bool) -> Result<Vec<Regex>> {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            RegexBuilder::new(t)
                .case_insensitive(case_insensitive)
                .multi_line(true)
                .build()
                .map_err(|e| RtoolsError::validation(format!("invalid search term '{t}': {e}")))
        })
        .collect()
}

fn line_matches(line: &str, patterns: &[Regex], require_all: bool) -> bool {
    if patterns.is_empty() {
        return false;
    }
    if require_all {
        patterns.iter().all(|p| p.is_match(line))
    } else {
        patterns.iter().any(|p| p.is_match(line))
    }
}

/// Search the project and render the textual report.
#[instrument(skip_all, fields(terms = options.terms.len()))]
pub fn run_search(cfg: &LoadedConfig, options: &SearchOptions) -> Result<Report> {
    let root = cfg.project_root();
    let global = cfg.global()?;
    let settings: SearchSettings = cfg.section("search")?;
    let mut report = Report::new();

    if !root.is_dir() {
        return Err(RtoolsError::validation(format!(
            "project root is not a directory: {}",
            root.display()
        )));
    }

    let terms = if options.terms.iter().any(|t| !t.trim().is_empty()) {
        options.terms.clone()
    } else {
        global.search_terms.clone()
    };
    let patterns = compile_terms(&terms, global.case_insensitive)?;
    if patterns.is_empty() {
        report.line("No search terms given (and no search_terms in config).");
        report.set_rc(2);
        return Ok(report);
    }

    // arguments beat config
    let include = if options.include.is_empty() {
        settings.include
    } else {
        options.include.clone()
    };
    let exclude = if options.exclude.is_empty() {
        settings.exclude
    } else {
        options.exclude.clone()
    };
    let include = normalize_globs(&include, options.filename_search);
    let exclude = normalize_globs(&exclude, options.filename_search);
    let exclude_set = GlobSet::fnmatch(&exclude)?;

    let exts = normalize_exts(if options.limit_exts.is_empty() {
        &global.include_extensions
    } else {
        &options.limit_exts
    });

    let candidates: Vec<PathBuf> = if include.is_empty() {
        walk_files(
            &root,
            &WalkOptions {
                exclude_dirs: global.exclude_dirs.clone(),
                exclude_files: global.exclude_files.clone(),
                extensions: exts.clone(),
                limit_dirs: options.limit_dirs.clone(),
            },
        )?
    } else {
        let include_set = GlobSet::path(&include)?;
        glob_files(&root, &include_set, &[])
    };

    let files = candidates.into_iter().filter(|p| {
        if !exts.is_empty() && !exts.contains(&extension_of(p)) {
            return false;
        }
        match rel_path(&root, p) {
            Some(rel) => !exclude_set.is_match(&rel),
            None => false,
        }
    });

    let mut matched: Vec<PathBuf> = Vec::new();
    for file in files {
        let Some(text) = read_text_limited(&file, options.max_size) else {
            continue;
        };
        let hits: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| line_matches(line, &patterns, options.require_all))
            .map(|(idx, line)| (idx + 1, line))
            .collect();
        if hits.is_empty() {
            continue;
        }
        if !options.files_only {
            render_hits(&mut report, &root, &file, &hits);
        }
        matched.push(file);
    }

    if options.files_only {
        matched.dedup();
        for file in &matched {
            report.line(display_path(&root, file, options.path_mode));
        }
    }
    if options.count {
        report.blank();
        report.line(format!("Matching files: {}", matched.len()));
    }

    report.metric("matched_files", matched.len() as i64);
    tracing::info!(matched = matched.len(), root = %root.display(), "search finished");
    Ok(report)
}

fn render_hits(report: &mut Report, root: &Path, file: &Path, hits: &[(usize, &str)]) {
    report.line(format!("== {} ==", display_path(root, file, PathMode::Relative)));
    for (ln, text) in hits {
        report.line(format!("{ln:5}: {}", text.trim_end()));
    }
    report.blank();
}

fn display_path(root: &Path, file: &Path, mode: PathMode) -> String {
    match mode {
        PathMode::Full => file.to_string_lossy().into_owned(),
        PathMode::Relative => {
            rel_path(root, file).unwrap_or_else(|| file.to_string_lossy().into_owned())
        }
    }
}
