//! Project file walking with directory pruning and exclusions.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rtools_shared::Result;
use walkdir::WalkDir;

use crate::glob::{GlobSet, has_wildcards};

/// Normalize extensions: trimmed, lowercase, leading dot, sorted, unique.
pub fn normalize_exts<S: AsRef<str>>(exts: &[S]) -> Vec<String> {
    let set: BTreeSet<String> = exts
        .iter()
        .map(|e| e.as_ref().trim())
        .filter(|e| !e.is_empty())
        .map(|e| {
            let lower = e.to_lowercase();
            if lower.starts_with('.') {
                lower
            } else {
                format!(".{lower}")
            }
        })
        .collect();
    set.into_iter().collect()
}

/// Lowercased extension including the dot (`".rs"`), or empty.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Relative `/`-separated path of `path` under `root`, if it is under it.
pub fn rel_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn absolutize(raw: &str, root: &Path) -> PathBuf {
    let p = Path::new(raw);
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

/// Options for [`walk_files`].
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Directories to prune, relative to the root or absolute.
    pub exclude_dirs: Vec<String>,
    /// Bare file names, or globs matched against the relative path.
    pub exclude_files: Vec<String>,
    /// Allowed extensions (any form); empty allows every file.
    pub extensions: Vec<String>,
    /// When set, only files under these directories. `Some(vec![])` yields nothing.
    pub limit_dirs: Option<Vec<String>>,
}

/// Walk `root` and return matching files, sorted.
///
/// Excluded directories are pruned so the walk never descends into them.
/// Symlinks are not followed.
pub fn walk_files(root: &Path, options: &WalkOptions) -> Result<Vec<PathBuf>> {
    let exts = normalize_exts(&options.extensions);
    let excluded: Vec<PathBuf> = options
        .exclude_dirs
        .iter()
        .filter(|d| !d.trim().is_empty())
        .map(|d| absolutize(d.trim(), root))
        .collect();

    let limits: Option<Vec<PathBuf>> = options.limit_dirs.as_ref().map(|dirs| {
        dirs.iter()
            .map(|d| absolutize(d.trim(), root))
            .filter(|p| p.is_dir())
            .collect()
    });
    if matches!(&limits, Some(l) if l.is_empty()) {
        return Ok(Vec::new());
    }

    let (glob_entries, names): (Vec<&String>, Vec<&String>) = options
        .exclude_files
        .iter()
        .partition(|f| has_wildcards(f));
    let file_globs = GlobSet::fnmatch(&glob_entries)?;
    let names: BTreeSet<&str> = names.into_iter().map(String::as_str).collect();

    let is_excluded_dir = |p: &Path| excluded.iter().any(|ex| p.starts_with(ex));
    // A directory stays on the walk if it is inside a limit, or is an
    // ancestor of one.
    let dir_on_limit_path = |p: &Path| match &limits {
        None => true,
        Some(limits) => limits.iter().any(|l| p.starts_with(l) || l.starts_with(p)),
    };
    let under_limit = |p: &Path| match &limits {
        None => true,
        Some(limits) => limits.iter().any(|l| p.starts_with(l)),
    };

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            !is_excluded_dir(entry.path()) && dir_on_limit_path(entry.path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !exts.is_empty() && !exts.contains(&extension_of(path)) {
            continue;
        }
        if !under_limit(path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if names.contains(name.as_ref()) {
            continue;
        }
        let Some(rel) = rel_path(root, path) else {
            continue;
        };
        if file_globs.is_match(&rel) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(files)
}

/// Collect files under `root` whose relative path matches any include glob.
///
/// Directories named in `prune` (relative to `root`) are never entered.
pub fn glob_files(root: &Path, include: &GlobSet, prune: &[PathBuf]) -> Vec<PathBuf> {
    if include.is_empty() {
        return Vec::new();
    }
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !prune.iter().any(|p| entry.path().starts_with(p))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            rel_path(root, entry.path())
                .map(|rel| include.is_match(&rel))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}
