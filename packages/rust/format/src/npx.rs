//! Locating `npx` for prettier.
//!
//! Lookup order: `format.npx_path`, `PATH`, `<project>/node_modules/.bin`,
//! `$NVM_DIR`, then `~/.nvm`. Within an nvm tree the highest installed
//! node version wins.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rtools_shared::config::expand_home;
use rtools_shared::process::{find_on_path, is_executable};

/// Where `npx` was found (or why it was not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpxLookup {
    pub path: Option<PathBuf>,
    pub note: String,
}

pub fn find_npx(project_root: &Path, override_path: Option<&str>) -> NpxLookup {
    find_npx_with(
        project_root,
        override_path,
        find_on_path("npx"),
        std::env::var_os("NVM_DIR").map(PathBuf::from),
        dirs::home_dir(),
    )
}

/// [`find_npx`] with the environment lookups passed in.
fn find_npx_with(
    project_root: &Path,
    override_path: Option<&str>,
    on_path: Option<PathBuf>,
    nvm_dir: Option<PathBuf>,
    home: Option<PathBuf>,
) -> NpxLookup {
    let mut notes: Vec<String> = Vec::new();

    if let Some(raw) = override_path.map(str::trim).filter(|s| !s.is_empty()) {
        let candidate = expand_home(raw);
        if is_executable(&candidate) {
            return NpxLookup {
                note: format!("Using npx from format.npx_path: {}", candidate.display()),
                path: Some(candidate),
            };
        }
        notes.push(format!(
            "format.npx_path is set to {raw} but is not an executable file, trying auto-detection"
        ));
    }

    let local = project_root.join("node_modules").join(".bin").join("npx");
    let candidates = [
        ("Found npx on PATH", on_path),
        ("Found local npx", is_executable(&local).then_some(local)),
        ("Found npx via $NVM_DIR", nvm_dir.as_deref().and_then(highest_nvm_npx)),
        (
            "Found npx via ~/.nvm",
            home.and_then(|h| highest_nvm_npx(&h.join(".nvm"))),
        ),
    ];
    // first hit wins
    let path = candidates.into_iter().find_map(|(how, found)| {
        let found = found?;
        notes.push(format!("{how}: {}", found.display()));
        Some(found)
    });

    if path.is_none() {
        notes.push("npx not found on PATH, in the project or via nvm".into());
    }
    NpxLookup {
        path,
        note: notes.join(", "),
    }
}

/// The `npx` of the highest `vX.Y.Z` under `<nvm_dir>/versions/node`.
fn highest_nvm_npx(nvm_dir: &Path) -> Option<PathBuf> {
    static VERSION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").expect("valid regex"));

    let entries = std::fs::read_dir(nvm_dir.join("versions").join("node")).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let caps = VERSION_RE.captures(&name)?;
            let key: (u64, u64, u64) = (
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            );
            let npx = entry.path().join("bin").join("npx");
            is_executable(&npx).then_some((key, npx))
        })
        .max_by_key(|(key, _)| *key)
        .map(|(_, npx)| npx)
}
