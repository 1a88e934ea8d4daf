//! Code formatting pipeline: prettier (via npx), black, ruff, then an
//! optional whitespace cleanup.
//!
//! Formatters are external programs; their combined output becomes the
//! tool report. Metrics are scraped back out of that output so the CLI and
//! the web UI can show a short summary.

pub mod cleanup;
pub mod metrics;
pub mod npx;
pub mod settings;

use std::path::{Path, PathBuf};

use rtools_files::glob::Glob;
use rtools_files::unified_diff;
use rtools_files::walk::{extension_of, rel_path};
use rtools_shared::process::{display_command, find_on_path, run_captured};
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError};
use tracing::instrument;

pub use cleanup::{cleanup_text, run_cleanup};
pub use metrics::{format_summary, parse_format_metrics};
pub use settings::{BlackSettings, CleanupSettings, FormatSettings, PrettierSettings, RuffSettings};

/// Prettier globs used when `format.prettier.globs` is empty.
pub const DEFAULT_PRETTIER_GLOBS: &[&str] = &["**/*.{html,css,js,ts,tsx,json,yml,yaml,md}"];

/// Program plus arguments for one formatter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FormatCommand {
    fn display(&self) -> String {
        display_command(&self.program, &self.args)
    }
}

// ---------------------------------------------------------------------------
// Argument builders
// ---------------------------------------------------------------------------

pub fn prettier_command(npx: &Path, p: &PrettierSettings) -> FormatCommand {
    let mut args: Vec<String> = ["prettier", "--write", "--log-level", "warn"]
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(width) = p.print_width {
        args.extend(["--print-width".into(), width.to_string()]);
    }
    if let Some(width) = p.tab_width {
        args.extend(["--tab-width".into(), width.to_string()]);
    }
    if p.single_quote {
        args.push("--single-quote".into());
    }
    if p.semi == Some(false) {
        args.push("--no-semi".into());
    }
    if let Some(tc) = p.trailing_comma.as_deref().filter(|s| !s.is_empty()) {
        args.extend(["--trailing-comma".into(), tc.to_string()]);
    }
    args.extend(p.extra_args.iter().cloned());

    if p.globs.is_empty() {
        args.extend(DEFAULT_PRETTIER_GLOBS.iter().map(|g| g.to_string()));
    } else {
        args.extend(p.globs.iter().cloned());
    }
    for ignore in &p.ignore {
        if ignore.starts_with('!') {
            args.push(ignore.clone());
        } else {
            args.push(format!("!{ignore}"));
        }
    }
    args.extend(["!**/._*".into(), "!**/.DS_Store".into()]);

    FormatCommand {
        program: npx.to_string_lossy().into_owned(),
        args,
    }
}

/// `black`, or `python3 -m black` when black is not on `PATH`.
fn python_tool(name: &str) -> FormatCommand {
    match find_on_path(name) {
        Some(path) => FormatCommand {
            program: path.to_string_lossy().into_owned(),
            args: Vec::new(),
        },
        None => FormatCommand {
            program: "python3".into(),
            args: vec!["-m".into(), name.into()],
        },
    }
}

pub fn black_command(b: &BlackSettings) -> FormatCommand {
    let mut cmd = python_tool("black");
    if let Some(len) = b.line_length {
        cmd.args.extend(["--line-length".into(), len.to_string()]);
    }
    for target in &b.target {
        cmd.args.extend(["--target-version".into(), target.clone()]);
    }
    cmd.args.extend(b.args.iter().cloned());
    if b.paths.is_empty() {
        cmd.args.push("./".into());
    } else {
        cmd.args.extend(b.paths.iter().cloned());
    }
    cmd
}

pub fn ruff_command(r: &RuffSettings) -> FormatCommand {
    let mut cmd = python_tool("ruff");
    if !r.args.is_empty() {
        cmd.args.extend(r.args.iter().cloned());
        return cmd;
    }
    cmd.args.extend(["check".into(), "./".into()]);
    if r.fix {
        cmd.args.push("--fix".into());
    }
    if r.unsafe_fixes {
        cmd.args.push("--unsafe-fixes".into());
    }
    if r.preview {
        cmd.args.push("--preview".into());
    }
    if !r.select.is_empty() {
        cmd.args.extend(["--select".into(), r.select.join(",")]);
    }
    if !r.ignore.is_empty() {
        cmd.args.extend(["--ignore".into(), r.ignore.join(",")]);
    }
    cmd
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Why `root` is too broad to format, if it is.
fn danger_label(root: &Path) -> Option<&'static str> {
    if root.parent().is_none() {
        return Some("the filesystem root (/)");
    }
    let home = dirs::home_dir()?;
    let home = std::fs::canonicalize(&home).unwrap_or(home);
    (root == home).then_some("the home directory (~)")
}

/// Print the command, then run it unless `dry_run`. Returns the exit code;
/// a program that cannot be started yields 127.
fn execute(cmd: &FormatCommand, root: &Path, dry_run: bool, report: &mut Report) -> i32 {
    report.line(format!("▶ {}", cmd.display()));
    if dry_run {
        return 0;
    }
    match run_captured(&cmd.program, &cmd.args, root) {
        Ok(out) => {
            report.block(&out.output);
            out.code
        }
        Err(e) => {
            tracing::warn!(program = %cmd.program, error = %e, "formatter failed to start");
            report.line(format!("Tool not found: {}", cmd.program));
            127
        }
    }
}

/// Run the enabled formatters and the cleanup over the project root.
#[instrument(skip_all, fields(dry_run))]
pub fn run_format(cfg: &LoadedConfig, dry_run: bool) -> Result<Report> {
    let root = cfg.project_root();
    let settings: FormatSettings = cfg.section("format")?;
    let mut report = Report::new();

    if let Some(label) = danger_label(&root) {
        if !settings.allow_home {
            report.line(format!(
                "[format] Refusing to run: project_root is {label}, which would format the whole machine."
            ));
            report.line(
                "[format] Pass --project <dir> or set format.allow_home=true in format_config.json.",
            );
            report.set_rc(2);
            return Ok(report);
        }
    }

    let mut rc = 0;
    if settings.prettier.enable {
        let lookup = npx::find_npx(&root, settings.npx_path.as_deref());
        match &lookup.path {
            Some(npx) => {
                report.line(format!("[format] {}", lookup.note));
                let command = prettier_command(npx, &settings.prettier);
                rc |= execute(&command, &root, dry_run, &mut report);
            }
            None => report.line("[format] npx not found, skipping prettier."),
        }
    }
    if settings.black.enable {
        rc |= execute(&black_command(&settings.black), &root, dry_run, &mut report);
    }
    if settings.ruff.enable {
        rc |= execute(&ruff_command(&settings.ruff), &root, dry_run, &mut report);
    }
    if settings.cleanup.enable {
        let global = cfg.global()?;
        run_cleanup(&root, &settings.cleanup, &global, dry_run, &mut report)?;
    }
    if rc != 0 {
        report.line(format!("Some formatters exited with code {rc}"));
    }

    let metrics = parse_format_metrics(report.text());
    report.blank();
    report.block(&format_summary(&metrics));
    for (key, value) in metrics {
        report.metric(key, value);
    }
    if report.text().contains("[error]") {
        report.set_rc(2);
    }
    tracing::info!(root = %root.display(), rc, "format finished");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

fn resolve_target(root: &Path, rel: &str) -> Result<PathBuf> {
    let joined = root.join(rel.trim_start_matches("./"));
    let target = std::fs::canonicalize(&joined)
        .map_err(|_| RtoolsError::validation(format!("file not found: {rel}")))?;
    if !target.starts_with(root) {
        return Err(RtoolsError::validation("path must point inside the project root"));
    }
    if !target.is_file() {
        return Err(RtoolsError::validation(format!("file not found: {rel}")));
    }
    Ok(target)
}

/// Check a single file without modifying it: prettier `--check`, black and
/// ruff diffs, plus the diff the cleanup would apply.
#[instrument(skip(cfg))]
pub fn format_preview(cfg: &LoadedConfig, rel: &str) -> Result<Report> {
    let root = cfg.project_root();
    let settings: FormatSettings = cfg.section("format")?;
    let target = resolve_target(&root, rel)?;
    let rel = rel_path(&root, &target).unwrap_or_else(|| rel.to_string());
    let is_python = extension_of(&target) == ".py";
    let mut report = Report::new();

    if settings.prettier.enable {
        let globs: Vec<String> = if settings.prettier.globs.is_empty() {
            DEFAULT_PRETTIER_GLOBS.iter().map(|g| g.to_string()).collect()
        } else {
            settings.prettier.globs.clone()
        };
        let matched = globs.iter().any(|g| {
            Glob::path(g.trim_start_matches("./")).is_ok_and(|glob| glob.is_match(&rel))
        });
        match npx::find_npx(&root, settings.npx_path.as_deref()).path {
            Some(npx) if matched => {
                let code = run_captured(&npx, ["prettier", "--check", rel.as_str()], &root)
                    .map(|o| o.code)
                    .unwrap_or(127);
                report.line(match code {
                    0 => format!("[prettier] {rel}: no changes"),
                    1 => format!("[prettier] {rel}: would be reformatted (no diff shown)"),
                    _ => format!("[prettier] {rel}: could not determine (rc={code})"),
                });
            }
            Some(_) => {}
            None => report.line("[prettier] npx not found, skipping prettier check"),
        }
    }

    if settings.black.enable && is_python {
        let mut cmd = python_tool("black");
        cmd.args.extend(["--diff".into(), rel.clone()]);
        report.blank();
        report.line(format!("[black --diff] {rel}"));
        preview_output(&cmd, &root, &mut report);
    }

    if settings.ruff.enable && is_python {
        let mut cmd = python_tool("ruff");
        cmd.args
            .extend(["check".into(), rel.clone(), "--fix".into(), "--diff".into()]);
        if settings.ruff.preview {
            cmd.args.push("--preview".into());
        }
        if !settings.ruff.select.is_empty() {
            cmd.args.extend(["--select".into(), settings.ruff.select.join(",")]);
        }
        if !settings.ruff.ignore.is_empty() {
            cmd.args.extend(["--ignore".into(), settings.ruff.ignore.join(",")]);
        }
        report.blank();
        report.line(format!("[ruff --diff] {rel}"));
        preview_output(&cmd, &root, &mut report);
    }

    if settings.cleanup.enable {
        match std::fs::read(&target) {
            Ok(bytes) => {
                let before = String::from_utf8_lossy(&bytes);
                let after = cleanup_text(
                    &before,
                    &extension_of(&target),
                    settings.cleanup.compact_blocks,
                    settings.cleanup.max_consecutive_blanks,
                );
                report.blank();
                if before == after {
                    report.line(format!("[cleanup] {rel}: no changes"));
                } else {
                    report.line(format!("[cleanup diff] {rel}"));
                    report.block(&unified_diff(
                        &before,
                        &after,
                        &format!("{rel} (before)"),
                        &format!("{rel} (after)"),
                        3,
                    ));
                }
            }
            Err(e) => report.line(format!("[cleanup] failed for {rel}: {e}")),
        }
    }

    if report.text().trim().is_empty() {
        let mut empty = Report::new();
        empty.line(format!("No changes for {rel}"));
        return Ok(empty);
    }
    Ok(report)
}

fn preview_output(cmd: &FormatCommand, root: &Path, report: &mut Report) {
    match run_captured(&cmd.program, &cmd.args, root) {
        Ok(out) => report.block(&out.output),
        Err(e) => report.line(format!("could not run {}: {e}", cmd.program)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtools_shared::{ConfigLoader, ConfigPaths};
    use serde_json::{Value, json};

    fn config(root: &Path, overrides: Value) -> LoadedConfig {
        let paths = ConfigPaths::at(root.join(".no-configs"));
        ConfigLoader::new(&paths)
            .cwd(root)
            .project(Some(root.to_path_buf()))
            .overrides(overrides)
            .load()
    }

    #[test]
    fn prettier_arguments() {
        let settings = PrettierSettings {
            enable: true,
            print_width: Some(100),
            tab_width: Some(2),
            single_quote: true,
            semi: Some(false),
            trailing_comma: Some("all".into()),
            extra_args: vec!["--end-of-line".into(), "lf".into()],
            globs: Vec::new(),
            ignore: vec!["**/dist/**".into(), "!keep/**".into()],
        };
        let cmd = prettier_command(Path::new("/usr/bin/npx"), &settings);
        assert_eq!(cmd.program, "/usr/bin/npx");
        assert_eq!(
            cmd.args,
            vec![
                "prettier", "--write", "--log-level", "warn", "--print-width", "100",
                "--tab-width", "2", "--single-quote", "--no-semi", "--trailing-comma", "all",
                "--end-of-line", "lf", "**/*.{html,css,js,ts,tsx,json,yml,yaml,md}",
                "!**/dist/**", "!keep/**", "!**/._*", "!**/.DS_Store",
            ]
        );
    }

    #[test]
    fn black_and_ruff_arguments() {
        let black = black_command(&BlackSettings {
            enable: true,
            line_length: Some(88),
            target: vec!["py311".into(), "py312".into()],
            args: vec!["-q".into()],
            paths: Vec::new(),
        });
        let tail: Vec<&str> = black.args.iter().map(String::as_str).collect();
        assert!(tail.ends_with(&[
            "--line-length", "88", "--target-version", "py311", "--target-version", "py312",
            "-q", "./"
        ]));

        let ruff = ruff_command(&RuffSettings {
            enable: true,
            unsafe_fixes: true,
            select: vec!["E".into(), "F".into()],
            ..RuffSettings::default()
        });
        let tail: Vec<&str> = ruff.args.iter().map(String::as_str).collect();
        assert!(tail.ends_with(&["check", "./", "--fix", "--unsafe-fixes", "--select", "E,F"]));

        let explicit = ruff_command(&RuffSettings {
            args: vec!["format".into(), ".".into()],
            ..RuffSettings::default()
        });
        assert!(explicit.args.ends_with(&["format".to_string(), ".".to_string()]));
    }

    #[test]
    fn dry_run_prints_commands_and_cleans_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical");
        std::fs::write(root.join("a.py"), "x = 1   \n").expect("write");
        let cfg = config(
            &root,
            json!({"format": {
                "black": {"enable": true, "line_length": 100},
                "cleanup": {"enable": true}
            }}),
        );
        let report = run_format(&cfg, true).expect("format");
        let text = report.text();
        assert!(text.contains("▶ "));
        assert!(text.contains("--line-length 100 ./"));
        assert!(text.contains("~ cleanup a.py"));
        assert!(text.contains("Cleanup: 1/1 files changed"));
        assert_eq!(report.metrics()["cleanup_changed"], 1);
        assert_eq!(report.rc(), 0);
        assert_eq!(std::fs::read_to_string(root.join("a.py")).expect("read"), "x = 1   \n");
    }

    #[test]
    fn refuses_filesystem_root() {
        let cfg = config(Path::new("/"), json!({}));
        let report = run_format(&cfg, true).expect("format");
        assert_eq!(report.rc(), 2);
        assert!(report.text().contains("Refusing to run"));
    }

    #[test]
    fn preview_shows_cleanup_diff() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical");
        std::fs::create_dir_all(root.join("src")).expect("mkdir");
        std::fs::write(root.join("src/app.js"), "let a = 1;   \n").expect("write");
        let cfg = config(&root, json!({"format": {"cleanup": {"enable": true}}}));

        let report = format_preview(&cfg, "src/app.js").expect("preview");
        let text = report.text();
        assert!(text.contains("[cleanup diff] src/app.js"));
        assert!(text.contains("-let a = 1;   \n+let a = 1;\n"));

        assert!(format_preview(&cfg, "../outside.js").is_err());
        assert!(format_preview(&cfg, "missing.js").is_err());

        let cfg = config(&root, json!({}));
        let report = format_preview(&cfg, "src/app.js").expect("preview");
        assert_eq!(report.text(), "No changes for src/app.js\n");
    }
}
