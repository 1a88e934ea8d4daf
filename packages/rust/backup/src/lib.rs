//! Invocation of the external backup script.
//!
//! rtools does not archive anything itself: it resolves the script and the
//! profiles file, translates UI/CLI fields to script flags and reports the
//! script's combined output and exit code.

pub mod profiles;

use std::path::{Path, PathBuf};

use rtools_shared::config::{expand_home, resolve_path};
use rtools_shared::process::{display_command, run_captured};
use rtools_shared::{ConfigLoader, ConfigPaths, LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

pub use profiles::{BACKUP_PROFILES, PROFILES_ALIAS, ProfilesFile, load_profiles, profiles_path};

pub const BACKUP_CONFIG: &str = "backup_config.json";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// `backup` section of the merged config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Path to the script; defaults to `<tools_root>/backup_app/backup.py`.
    #[serde(default)]
    pub script: Option<String>,
    /// Program used to run the script; `python3` for `.py` when unset.
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl BackupSettings {
    /// Read the settings from the global and `backup_config.json` layers.
    pub fn load(paths: &ConfigPaths) -> Result<Self> {
        ConfigLoader::new(paths)
            .tool(BACKUP_CONFIG)
            .load()
            .section("backup")
    }

    /// Absolute script path.
    pub fn script_path(&self, paths: &ConfigPaths) -> PathBuf {
        match self.script.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => resolve_path(raw, &paths.tools_root),
            _ => paths.tools_root.join("backup_app").join("backup.py"),
        }
    }

    /// Program and leading arguments that run `script`.
    fn launcher(&self, script: &Path) -> (String, Vec<String>) {
        let script_arg = script.to_string_lossy().into_owned();
        if let Some(interp) = self.interpreter.as_deref().filter(|s| !s.trim().is_empty()) {
            let interp = expand_home(interp.trim()).to_string_lossy().into_owned();
            return (interp, vec![script_arg]);
        }
        let is_python = script
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
        if is_python {
            ("python3".into(), vec![script_arg])
        } else {
            (script_arg, Vec::new())
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Fields accepted from the CLI and the UI. Only fields that are set are
/// passed on to the script.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackupArgs {
    /// Explicit profiles file; skips the automatic lookup.
    #[serde(default, deserialize_with = "opt_string")]
    pub config: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub profile: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub dest: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub no_version: bool,
    #[serde(default, deserialize_with = "opt_string")]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub include_hidden: bool,
    #[serde(default, deserialize_with = "keep_count")]
    pub keep: Option<u32>,
    #[serde(default, deserialize_with = "nullable")]
    pub list: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub dry_run: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub no_verify: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub verbose: bool,
    #[serde(default, deserialize_with = "exclude_list")]
    pub exclude: Vec<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub dropbox_path: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub dropbox_mode: Option<String>,
}

/// Blank strings count as unset.
fn opt_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `keep` arrives as a number from profiles and as text from form fields.
fn keep_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u32>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid keep: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid keep: {s}"))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid keep: {other}"))),
    }
}

fn exclude_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::String(s)) => split_excludes(&s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    })
}

/// Split an exclude field typed as text on commas and newlines.
pub fn split_excludes(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl BackupArgs {
    /// Parse the JSON argument object sent by the UI or a recipe.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| RtoolsError::validation(format!("invalid backup arguments: {e}")))
    }
}

/// Script flags for `args`, in a fixed order. `profiles` is passed as
/// `--config` unless the caller named a config explicitly.
pub fn build_argv(args: &BackupArgs, profiles: Option<&Path>) -> Vec<String> {
    let mut argv = Vec::new();
    let profiles = profiles.map(|p| p.to_string_lossy().into_owned());

    push_value(&mut argv, "--config", args.config.as_deref().or(profiles.as_deref()));
    push_value(&mut argv, "--profile", args.profile.as_deref());
    push_value(&mut argv, "--project", args.project.as_deref());
    push_value(&mut argv, "--source", args.source.as_deref());
    push_value(&mut argv, "--dest", args.dest.as_deref());
    push_value(&mut argv, "--version", args.version.as_deref());
    push_switch(&mut argv, "--no-version", args.no_version);
    push_value(&mut argv, "--tag", args.tag.as_deref());
    push_value(&mut argv, "--format", args.format.as_deref());
    push_switch(&mut argv, "--include-hidden", args.include_hidden);
    let keep = args.keep.map(|k| k.to_string());
    push_value(&mut argv, "--keep", keep.as_deref());
    push_switch(&mut argv, "--list", args.list);
    push_switch(&mut argv, "--dry-run", args.dry_run);
    push_switch(&mut argv, "--no-verify", args.no_verify);
    push_switch(&mut argv, "--verbose", args.verbose);
    for pattern in &args.exclude {
        push_value(&mut argv, "--exclude", Some(pattern));
    }
    push_value(&mut argv, "--dropbox-path", args.dropbox_path.as_deref());
    push_value(&mut argv, "--dropbox-mode", args.dropbox_mode.as_deref());
    argv
}

fn push_value(argv: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        argv.push(flag.to_string());
        argv.push(value.to_string());
    }
}

fn push_switch(argv: &mut Vec<String>, flag: &str, on: bool) {
    if on {
        argv.push(flag.to_string());
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Pick the profile: the explicit one (which must exist in the profiles
/// map unless `--config` points elsewhere), else the file's default.
fn select_profile(args: &mut BackupArgs, profiles: Option<&ProfilesFile>) -> Result<()> {
    match (&args.profile, profiles) {
        (Some(name), Some(file)) if args.config.is_none() && !file.contains(name) => {
            Err(RtoolsError::validation(format!(
                "unknown backup profile '{name}' (known: {})",
                file.names().join(", ")
            )))
        }
        (Some(name), None) if args.config.is_none() => Err(RtoolsError::validation(format!(
            "unknown backup profile '{name}': no {BACKUP_PROFILES} in the config directory"
        ))),
        (None, Some(file)) => {
            args.profile = file.default_profile().map(String::from);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Run the backup script with `args`.
///
/// A missing script yields rc 127 and a hint; otherwise rc is the
/// script's exit code.
#[instrument(skip_all)]
pub fn run_backup(cfg: &LoadedConfig, paths: &ConfigPaths, args: &BackupArgs) -> Result<Report> {
    let settings: BackupSettings = cfg.section("backup")?;
    let mut report = Report::new();

    let profiles = load_profiles(paths)?;
    let mut args = args.clone();
    select_profile(&mut args, profiles.as_ref())?;

    let script = settings.script_path(paths);
    if !script.is_file() {
        report.line(format!("backup: script not found at {}", script.display()));
        report.line(format!(
            "Hint: set backup.script in {}",
            paths.file(BACKUP_CONFIG).display()
        ));
        report.set_rc(127);
        return Ok(report);
    }

    let (program, mut argv) = settings.launcher(&script);
    argv.extend(build_argv(&args, profiles.as_ref().map(|p| p.path.as_path())));
    report.line(format!("▶ {}", display_command(&program, &argv)));
    info!(profile = args.profile.as_deref().unwrap_or("-"), "running backup script");

    match run_captured(&program, &argv, &cfg.cwd) {
        Ok(out) => {
            report.block(&out.output);
            report.set_rc(out.code);
        }
        Err(e) => {
            warn!(error = %e, "backup script failed to start");
            report.line(format!("backup: could not start process: {e}"));
            report.set_rc(1);
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Info
// ---------------------------------------------------------------------------

/// What `rt list --tool backup` and `/api/backup-info` show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub script: String,
    pub script_exists: bool,
    pub profiles: Option<String>,
    pub profiles_exists: bool,
    pub profiles_default: Option<String>,
    pub profiles_names: Vec<String>,
    pub config_dir: String,
}

/// Describe the script and profiles. A malformed profiles file is logged
/// and reported as having no profiles.
pub fn backup_info(paths: &ConfigPaths, settings: &BackupSettings) -> BackupInfo {
    let script = settings.script_path(paths);
    let path = profiles_path(paths);
    let file = match load_profiles(paths) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "could not read backup profiles");
            None
        }
    };
    BackupInfo {
        script: script.to_string_lossy().into_owned(),
        script_exists: script.is_file(),
        profiles_exists: path.is_some(),
        profiles: path.map(|p| p.to_string_lossy().into_owned()),
        profiles_default: file.as_ref().and_then(|f| f.default.clone()),
        profiles_names: file.map(|f| f.names()).unwrap_or_default(),
        config_dir: paths.config_dir.to_string_lossy().into_owned(),
    }
}

impl BackupInfo {
    /// Text form for `rt list --tool backup`.
    pub fn render(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut out = String::new();
        out.push_str("== Backup ==\n");
        out.push_str(&format!(
            "script:   {} (exists: {})\n",
            self.script,
            yes_no(self.script_exists)
        ));
        out.push_str(&format!(
            "profiles: {} (exists: {})\n",
            self.profiles.as_deref().unwrap_or("-"),
            yes_no(self.profiles_exists)
        ));
        out.push_str(&format!(
            "default:  {}\n",
            self.profiles_default.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!("names:    {}\n", self.profiles_names.join(", ")));
        out.push_str(&format!("config:   {}\n", self.config_dir));
        out
    }
}
