//! Minimal `.env` handling for Dropbox credentials.
//!
//! Files are `KEY=VALUE` lines; `#` starts a comment, an optional `export `
//! prefix is ignored and matching outer quotes are stripped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{Result, RtoolsError};

/// Parse `.env` text into ordered key/value pairs.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(assignment)
        .map(|(_, key, value)| (key.to_string(), unquote(value.trim()).to_string()))
        .collect()
}

/// Split a `KEY=VALUE` line into `(export prefix, key, raw value)`.
fn assignment(line: &str) -> Option<(bool, &str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (exported, line) = match line.strip_prefix("export ") {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some((exported, key, value))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read a `.env` file; a missing file yields no variables.
pub fn read(path: &Path) -> Result<BTreeMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(RtoolsError::io(path, e)),
    }
}

/// Collect variables from several files. Earlier files win, and variables
/// already present in `existing` are never overridden.
pub fn collect<'a>(
    files: impl IntoIterator<Item = &'a Path>,
    existing: impl Fn(&str) -> bool,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for path in files {
        match read(path) {
            Ok(vars) => {
                for (key, value) in vars {
                    if existing(&key) || merged.contains_key(&key) {
                        continue;
                    }
                    merged.insert(key, value);
                }
            }
            Err(e) => tracing::warn!(?path, error = %e, "could not read .env file"),
        }
    }
    merged
}

/// Merge `updates` into the `.env` file at `path`.
///
/// Assignments to updated keys are rewritten in place; every other line
/// (comments, blanks, unrelated keys) is kept verbatim. Keys not yet in
/// the file are appended in sorted order. On unix the file is restricted
/// to mode 0600.
pub fn merge_into_file(path: &Path, updates: &BTreeMap<String, String>) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(RtoolsError::io(path, e)),
    };

    let mut written = BTreeSet::new();
    let mut text = String::new();
    for line in existing.lines() {
        match assignment(line) {
            Some((exported, key, _)) if updates.contains_key(key) => {
                if exported {
                    text.push_str("export ");
                }
                text.push_str(key);
                text.push('=');
                text.push_str(&updates[key]);
                written.insert(key.to_string());
            }
            _ => text.push_str(line),
        }
        text.push('\n');
    }
    for (key, value) in updates {
        if !written.contains(key) {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RtoolsError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| RtoolsError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| RtoolsError::io(path, e))?;
    }
    Ok(())
}
