//! "Paste chunk" generation: bundles project files into numbered text files
//! with a per-file header, sized to paste into a chat window.

pub mod chunk;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rtools_files::glob::{GlobSet, normalize_file_names};
use rtools_files::text::{FileContent, read_classified};
use rtools_files::walk::{glob_files, rel_path};
use rtools_shared::config::resolve_path;
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub use chunk::ChunkWriter;
use chunk::{BEGIN_CODE, BEGIN_FILE, END_CODE};

/// `paste` section of the merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasteSettings {
    /// Root to collect from; defaults to the project root.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default)]
    pub allow_binary: bool,
    #[serde(default)]
    pub filename_search: bool,
    #[serde(default = "default_include", deserialize_with = "nullable")]
    pub include: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub exclude: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub only_globs: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub skip_globs: Vec<String>,
}

impl Default for PasteSettings {
    fn default() -> Self {
        Self {
            root: None,
            out_dir: default_out_dir(),
            max_lines: default_max_lines(),
            allow_binary: false,
            filename_search: false,
            include: default_include(),
            exclude: Vec::new(),
            only_globs: Vec::new(),
            skip_globs: Vec::new(),
        }
    }
}

fn default_out_dir() -> String {
    "paste_out".into()
}
fn default_max_lines() -> usize {
    4000
}
fn default_include() -> Vec<String> {
    vec!["*.*".into(), "**/*.*".into()]
}

/// Settings resolved against the filesystem.
#[derive(Debug, Clone)]
pub struct PastePlan {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub max_lines: usize,
    pub allow_binary: bool,
    include: Vec<String>,
    exclude: Vec<String>,
    only_globs: Vec<String>,
    skip_globs: Vec<String>,
}

impl PastePlan {
    pub fn from_config(cfg: &LoadedConfig) -> Result<Self> {
        let settings: PasteSettings = cfg.section("paste")?;
        let root = match settings.root.as_deref() {
            Some(raw) if !raw.trim().is_empty() => resolve_path(raw.trim(), &cfg.cwd),
            _ => cfg.project_root(),
        };
        let out_dir = resolve_path(&settings.out_dir, &root);
        let fs = settings.filename_search;
        let include = if settings.include.is_empty() {
            default_include()
        } else {
            settings.include
        };
        Ok(Self {
            out_dir,
            max_lines: settings.max_lines,
            allow_binary: settings.allow_binary,
            include: normalize_file_names(&include, fs),
            exclude: normalize_file_names(&settings.exclude, fs),
            only_globs: normalize_file_names(&settings.only_globs, fs),
            skip_globs: normalize_file_names(&settings.skip_globs, fs),
            root,
        })
    }

    /// Candidate files: include globs minus exclude/skip, narrowed by
    /// `only_globs` when set. The output directory is never a candidate.
    pub fn candidates(&self) -> Result<Vec<PathBuf>> {
        let include = GlobSet::path(&self.include)?;
        let exclude = GlobSet::fnmatch(&self.exclude)?;
        let skip = GlobSet::fnmatch(&self.skip_globs)?;
        let only = GlobSet::fnmatch(&self.only_globs)?;

        let prune = [self.out_dir.clone()];
        let files = glob_files(&self.root, &include, &prune)
            .into_iter()
            .filter(|p| match rel_path(&self.root, p) {
                Some(rel) => {
                    !exclude.is_match(&rel)
                        && !skip.is_match(&rel)
                        && (only.is_empty() || only.is_match(&rel))
                }
                None => false,
            })
            .collect();
        Ok(files)
    }
}

/// Remove stale `paste_*.txt` files from the output directory.
pub fn clear_out_dir(out_dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(out_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(RtoolsError::io(out_dir, e)),
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("paste_") && name.ends_with(".txt") {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = ?entry.path(), error = %e, "could not remove old paste file")
                }
            }
        }
    }
    Ok(removed)
}

fn binary_block(rel: &str, data: &[u8]) -> String {
    format!(
        "# BINARY FILE (base64) - {rel}\n# length={} bytes\n{}",
        data.len(),
        STANDARD.encode(data)
    )
}

/// Generate paste files, or only list candidates when `list_only` is set.
#[instrument(skip_all, fields(list_only))]
pub fn run_paste(cfg: &LoadedConfig, list_only: bool) -> Result<Report> {
    let plan = PastePlan::from_config(cfg)?;
    let mut report = Report::new();
    if !plan.root.is_dir() {
        report.line(format!("[paste] Invalid project root: {}", plan.root.display()));
        report.set_rc(2);
        return Ok(report);
    }

    let files = plan.candidates()?;
    if list_only {
        report.line(format!("[paste] Project: {}", plan.root.display()));
        report.line(format!("[paste] Matched files: {}", files.len()));
        for file in &files {
            report.line(rel_path(&plan.root, file).unwrap_or_else(|| file.display().to_string()));
        }
        report.metric("paste_candidates", files.len() as i64);
        return Ok(report);
    }

    let mut writer = ChunkWriter::new(&plan.out_dir, plan.max_lines)?;
    let mut skipped_binary = Vec::new();
    let mut written = 0usize;
    let total = files.len();

    for (idx, path) in files.iter().enumerate() {
        let Some(rel) = rel_path(&plan.root, path) else {
            continue;
        };
        let content = match read_classified(path) {
            Ok(content) => content,
            Err(e) => {
                report.line(format!("[paste] Could not read {rel}: {e}"));
                continue;
            }
        };
        let text = match content {
            FileContent::Text(text) => text,
            FileContent::Binary(_) if !plan.allow_binary => {
                skipped_binary.push(rel);
                continue;
            }
            FileContent::Binary(data) => binary_block(&rel, &data),
        };
        writer.write_block(&rel, text.trim_end_matches('\n'), idx + 1, total)?;
        written += 1;
    }
    let outputs = writer.finish()?;

    report.line(format!("[paste] Project: {}", plan.root.display()));
    report.line(format!("[paste] Files found  : {total}"));
    report.line(format!("[paste] Files written: {written}"));
    if !skipped_binary.is_empty() {
        report.line(format!(
            "[paste] Skipped binary (allow_binary=false): {}",
            skipped_binary.len()
        ));
        for rel in &skipped_binary {
            report.line(format!("  - {rel}"));
        }
    }
    if outputs.is_empty() {
        report.line("[paste] No output generated (no matching files).");
    } else {
        report.line("[paste] Output:");
        for out in &outputs {
            report.line(format!("  - {}", out.display()));
        }
    }

    let metrics = paste_metrics(&plan.out_dir)?;
    for (key, value) in &metrics {
        report.metric(key.clone(), *value);
    }
    tracing::info!(written, outputs = outputs.len(), "paste finished");
    Ok(report)
}

/// Count paste files, file sections and code lines in `out_dir`.
pub fn paste_metrics(out_dir: &Path) -> Result<BTreeMap<String, i64>> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(out_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| n.starts_with("paste_") && n.ends_with(".txt"))
            })
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(RtoolsError::io(out_dir, e)),
    };
    files.sort();

    let (mut sections, mut code_lines) = (0i64, 0i64);
    for file in &files {
        let Ok(bytes) = std::fs::read(file) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut in_code = false;
        for line in text.lines() {
            if line.starts_with(BEGIN_FILE) {
                sections += 1;
            }
            match line.trim() {
                BEGIN_CODE => in_code = true,
                END_CODE => in_code = false,
                _ if in_code => code_lines += 1,
                _ => {}
            }
        }
    }

    let mut metrics = BTreeMap::new();
    metrics.insert("paste_files".to_string(), files.len() as i64);
    metrics.insert("paste_file_sections".to_string(), sections);
    metrics.insert("paste_code_lines".to_string(), code_lines);
    Ok(metrics)
}

/// The summary block appended to paste output in the UI.
pub fn metrics_summary(metrics: &BTreeMap<String, i64>) -> String {
    let get = |k: &str| metrics.get(k).copied().unwrap_or(0);
    format!(
        "== Summary (paste) ==\nPaste files: {}\nSections   : {}\nCode lines : {}\n",
        get("paste_files"),
        get("paste_file_sections"),
        get("paste_code_lines")
    )
}
