//! Whitespace cleanup for source files.
//!
//! Each pass is a function over the file's lines, applied in sequence:
//! trailing spaces, blank edges, optional block compaction, then blank-run
//! collapsing. Output always uses LF and ends with exactly one newline.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rtools_files::text::normalize_newlines;
use rtools_files::walk::{WalkOptions, extension_of, normalize_exts, rel_path, walk_files};
use rtools_shared::{GlobalSettings, Report, Result};

use crate::settings::CleanupSettings;

const BRACE_EXTS: &[&str] = &[
    ".js", ".ts", ".tsx", ".jsx", ".css", ".scss", ".json", ".c", ".h", ".cpp", ".rs", ".java",
    ".go",
];

const PY_FOLLOWUPS: &[&str] = &["else:", "elif ", "except", "finally:"];

/// Run the cleanup pipeline on one file's text.
pub fn cleanup_text(text: &str, ext: &str, compact_blocks: bool, max_blanks: usize) -> String {
    let normalized = normalize_newlines(text);
    let mut lines: Vec<&str> = normalized.split('\n').collect();

    lines = strip_trailing_spaces(lines);
    lines = trim_blank_edges(lines);
    if compact_blocks {
        let ext = ext.to_lowercase();
        if ext == ".py" {
            lines = py_no_blank_after_block_start(lines);
            lines = py_no_blank_before_followups(lines);
        } else if BRACE_EXTS.contains(&ext.as_str()) {
            lines = brace_no_blank_inside_edges(lines);
        }
    }
    lines = collapse_blank_runs(lines, max_blanks);
    lines = trim_blank_edges(lines);

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

// ---------------------------------------------------------------------------
// Generic passes
// ---------------------------------------------------------------------------

fn strip_trailing_spaces(lines: Vec<&str>) -> Vec<&str> {
    lines.into_iter().map(str::trim_end).collect()
}

fn trim_blank_edges(lines: Vec<&str>) -> Vec<&str> {
    let start = lines.iter().position(|l| !is_blank(l)).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !is_blank(l)).map_or(start, |i| i + 1);
    lines[start..end].to_vec()
}

/// Keep at most `keep` blank lines in a row.
fn collapse_blank_runs(lines: Vec<&str>, keep: usize) -> Vec<&str> {
    let mut out = Vec::with_capacity(lines.len());
    let mut streak = 0;
    for line in lines {
        if is_blank(line) {
            streak += 1;
            if streak <= keep {
                out.push("");
            }
        } else {
            streak = 0;
            out.push(line);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn is_docstring_start(line: &str) -> bool {
    let s = line.trim_start();
    s.starts_with("\"\"\"") || s.starts_with("'''")
}

/// Drop blank lines right after a line ending in `:`, unless the block
/// opens with a docstring.
fn py_no_blank_after_block_start(lines: Vec<&str>) -> Vec<&str> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        out.push(lines[i]);
        if lines[i].trim_end().ends_with(':') {
            let next_code = (i + 1..lines.len()).find(|&j| !is_blank(lines[j]));
            if let Some(j) = next_code.filter(|&j| j > i + 1 && !is_docstring_start(lines[j])) {
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out
}

fn py_no_blank_before_followups(lines: Vec<&str>) -> Vec<&str> {
    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let before_followup = lines.get(i + 1).is_some_and(|next| {
            let next = next.trim_start();
            PY_FOLLOWUPS.iter().any(|f| next.starts_with(f))
        });
        if is_blank(line) && before_followup {
            continue;
        }
        out.push(*line);
    }
    out
}

// ---------------------------------------------------------------------------
// Brace languages
// ---------------------------------------------------------------------------

/// Drop blank lines after `{` and before `}`.
fn brace_no_blank_inside_edges(lines: Vec<&str>) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if is_blank(line) {
            let prev_opens = out.last().is_some_and(|p| p.trim_end().ends_with('{'));
            let next_closes = lines[i + 1..]
                .iter()
                .find(|l| !is_blank(l))
                .is_some_and(|n| n.trim_start().starts_with('}'));
            if prev_opens || next_closes {
                continue;
            }
        }
        out.push(*line);
    }
    out
}

// ---------------------------------------------------------------------------
// Target selection and the cleanup run
// ---------------------------------------------------------------------------

/// Files the cleanup applies to, sorted and unique.
pub fn cleanup_targets(
    root: &Path,
    settings: &CleanupSettings,
    global: &GlobalSettings,
) -> Result<Vec<PathBuf>> {
    let exts = if settings.exts.is_empty() {
        normalize_exts(&CleanupSettings::default().exts)
    } else {
        normalize_exts(&settings.exts)
    };
    let excluded_suffixes: Vec<String> = settings
        .exclude_exts
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let mut dirs = Vec::new();
    let mut files = BTreeSet::new();
    for raw in &settings.paths {
        let candidate = rtools_shared::config::resolve_path(raw, root);
        if candidate.is_file() {
            files.insert(candidate);
        } else if candidate.is_dir() {
            dirs.push(candidate.to_string_lossy().into_owned());
        }
    }

    let options = WalkOptions {
        exclude_dirs: global.exclude_dirs.clone(),
        exclude_files: global.exclude_files.clone(),
        extensions: exts.clone(),
        limit_dirs: (!settings.paths.is_empty()).then_some(dirs),
    };
    let walked = walk_files(root, &options)?;

    let explicit = files
        .into_iter()
        .filter(|f| f.starts_with(root) && exts.contains(&extension_of(f)));
    let all: BTreeSet<PathBuf> = walked.into_iter().chain(explicit).collect();

    Ok(all
        .into_iter()
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            !excluded_suffixes.iter().any(|s| name.ends_with(s.as_str()))
        })
        .collect())
}

/// Clean every target, writing changes unless `dry_run`.
/// Appends `Cleanup: <changed>/<total> files changed` to the report.
pub fn run_cleanup(
    root: &Path,
    settings: &CleanupSettings,
    global: &GlobalSettings,
    dry_run: bool,
    report: &mut Report,
) -> Result<()> {
    let targets = cleanup_targets(root, settings, global)?;
    let mut changed = 0usize;
    for path in &targets {
        let rel = rel_path(root, path).unwrap_or_else(|| path.display().to_string());
        let original = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                report.line(format!("Cleanup failed for {rel}: {e}"));
                continue;
            }
        };
        let cleaned = cleanup_text(
            &original,
            &extension_of(path),
            settings.compact_blocks,
            settings.max_consecutive_blanks,
        );
        if cleaned == original {
            continue;
        }
        report.line(format!("~ cleanup {rel}"));
        changed += 1;
        if !dry_run {
            if let Err(e) = std::fs::write(path, &cleaned) {
                report.line(format!("Cleanup failed for {rel}: {e}"));
            }
        }
    }
    tracing::debug!(changed, total = targets.len(), dry_run, "cleanup finished");
    report.line(format!("Cleanup: {changed}/{} files changed", targets.len()));
    Ok(())
}
