//! Git workflow actions: status, branch management, commit-and-push with
//! protected-branch guards and an optional pre-push check.

pub mod repo;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rtools_files::glob::{Glob, has_wildcards};
use rtools_shared::process::run_captured;
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub use repo::{Repo, current_branch, list_branches, list_remotes};

// ---------------------------------------------------------------------------
// Settings & options
// ---------------------------------------------------------------------------

/// `git` section of the merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default = "default_remote")]
    pub default_remote: String,
    #[serde(default = "default_base")]
    pub default_base: String,
    #[serde(default = "default_protected", deserialize_with = "nullable")]
    pub protected_branches: Vec<String>,
    #[serde(default)]
    pub precheck: bool,
    #[serde(default)]
    pub precheck_tests: bool,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            default_remote: default_remote(),
            default_base: default_base(),
            protected_branches: default_protected(),
            precheck: false,
            precheck_tests: false,
        }
    }
}

fn default_remote() -> String {
    "origin".into()
}
fn default_base() -> String {
    "main".into()
}
fn default_protected() -> Vec<String> {
    vec!["main".into(), "master".into(), "release/*".into()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitAction {
    Status,
    Branches,
    Remotes,
    Fetch,
    Pull,
    Push,
    Switch,
    StashSwitch,
    Create,
    Merge,
    Acp,
    Diff,
    Log,
    Sync,
    Resolve,
}

impl GitAction {
    pub const ALL: [GitAction; 15] = [
        Self::Status,
        Self::Branches,
        Self::Remotes,
        Self::Fetch,
        Self::Pull,
        Self::Push,
        Self::Switch,
        Self::StashSwitch,
        Self::Create,
        Self::Merge,
        Self::Acp,
        Self::Diff,
        Self::Log,
        Self::Sync,
        Self::Resolve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Branches => "branches",
            Self::Remotes => "remotes",
            Self::Fetch => "fetch",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Switch => "switch",
            Self::StashSwitch => "stash_switch",
            Self::Create => "create",
            Self::Merge => "merge",
            Self::Acp => "acp",
            Self::Diff => "diff",
            Self::Log => "log",
            Self::Sync => "sync",
            Self::Resolve => "resolve",
        }
    }
}

impl fmt::Display for GitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GitAction {
    type Err = RtoolsError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| RtoolsError::validation(format!("unknown git action: {s}")))
    }
}

/// Per-invocation arguments. Unset fields fall back to config and the
/// current branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOptions {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_true")]
    pub ff_only: bool,
    #[serde(default)]
    pub staged: bool,
    #[serde(default = "default_log_count")]
    pub n: usize,
    /// Required to push, merge into or commit on a protected branch.
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub precheck: Option<bool>,
    #[serde(default)]
    pub precheck_tests: Option<bool>,
    /// Merge target; defaults to `branch`, then `base`.
    #[serde(default)]
    pub target: Option<String>,
    /// Merge source; defaults to the current branch.
    #[serde(default)]
    pub source: Option<String>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            remote: None,
            branch: None,
            base: None,
            message: None,
            ff_only: true,
            staged: false,
            n: default_log_count(),
            confirm: false,
            precheck: None,
            precheck_tests: None,
            target: None,
            source: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_log_count() -> usize {
    10
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Exact names, or globs such as `release/*`.
pub fn is_protected<S: AsRef<str>>(branch: &str, patterns: &[S]) -> bool {
    patterns.iter().map(|p| p.as_ref().trim()).any(|pat| {
        if pat.is_empty() {
            false
        } else if has_wildcards(pat) {
            Glob::fnmatch(pat).is_ok_and(|g| g.is_match(branch))
        } else {
            branch == pat
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `black --check .`, `ruff check .` and optionally `pytest -q`.
/// Returns the first non-zero exit code (or 0) and the combined output.
pub fn pre_push_check(root: &Path, run_tests: bool) -> (i32, String) {
    let mut steps: Vec<&[&str]> = Vec::new();
    steps.push(&["black", "--check", "."]);
    steps.push(&["ruff", "check", "."]);
    if run_tests {
        steps.push(&["pytest", "-q"]);
    }
    let mut rc_total = 0;
    let mut out = String::new();
    for step in steps {
        out.push_str(&format!("▶ {}\n", step.join(" ")));
        let (code, text) = match run_captured(step[0], &step[1..], root) {
            Ok(o) => (o.code, o.output),
            Err(e) => (127, format!("{e}\n")),
        };
        out.push_str(&text);
        if rc_total == 0 && code != 0 {
            rc_total = code;
        }
    }
    (rc_total, out)
}

fn stash_switch(repo: &Repo, branch: &str, message: Option<String>) -> Result<(i32, String)> {
    let msg = message.unwrap_or_else(|| format!("rt: auto-stash before switch to {branch}"));
    // an empty stash exits 0 with "No local changes to save"
    repo.git(["stash", "push", "-u", "-m", msg.as_str()])?;
    let out = repo.git(["switch", branch])?;
    Ok((out.code, format!("[git] stash push: {msg}\n{}", out.output)))
}

fn resolve_guide(files: &[String]) -> String {
    let mut guide = vec!["=== Merge conflicts ===".to_string()];
    if files.is_empty() {
        guide.push("No files in conflict.".into());
    } else {
        guide.extend(files.iter().map(|f| format!(" - {f}")));
        guide.extend(
            [
                "",
                "Steps:",
                "  1) Open the files above and resolve the marked sections (<<<<<<< ======= >>>>>>>).",
                "  2) Mark each file resolved:  git add <file>",
                "  3) Finish the merge:         git commit",
                "     (or abort:                git merge --abort)",
                "",
                "Tips:",
                "  - Show diff:                 git diff",
                "  - Show status:               git status -sb",
                "  - Take 'theirs':             git checkout --theirs <file> && git add <file>",
                "  - Take 'ours':               git checkout --ours <file> && git add <file>",
            ]
            .map(String::from),
        );
    }
    guide.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one git action against the project root of `cfg`.
#[instrument(skip_all, fields(action = %action))]
pub fn run_git(cfg: &LoadedConfig, action: GitAction, options: &GitOptions) -> Result<Report> {
    let settings: GitSettings = cfg.section("git")?;
    let repo = Repo::open(&cfg.project_root())?;

    let remote = non_empty(&options.remote).unwrap_or_else(|| settings.default_remote.clone());
    let base = non_empty(&options.base).unwrap_or_else(|| settings.default_base.clone());
    let branch = non_empty(&options.branch).unwrap_or_else(|| repo.current_branch());
    let precheck = options.precheck.unwrap_or(settings.precheck);
    let precheck_tests = options.precheck_tests.unwrap_or(settings.precheck_tests);
    let protected = |b: &str| is_protected(b, &settings.protected_branches) && !options.confirm;

    let mut report = Report::new();
    let pull_branch = if branch.is_empty() { base.clone() } else { branch.clone() };

    let (code, text) = match action {
        GitAction::Status => run(&repo, ["status", "-sb"])?,
        GitAction::Branches => {
            let current = repo.current_branch();
            let mut text = repo.branches()?.join("\n");
            if current.is_empty() {
                text.push('\n');
            } else {
                text.push_str(&format!("\n(current: {current})\n"));
            }
            (0, text)
        }
        GitAction::Remotes => (0, repo.remotes()?.join("\n") + "\n"),
        GitAction::Fetch => run(&repo, ["fetch", remote.as_str()])?,
        GitAction::Pull => run(
            &repo,
            ["pull", "--ff-only", remote.as_str(), pull_branch.as_str()],
        )?,
        GitAction::Push => {
            if protected(&branch) {
                refuse(
                    &mut report,
                    format!("[git] '{branch}' is protected. Set confirm=true to push."),
                );
                return Ok(report);
            }
            if precheck {
                let (rc, text) = pre_push_check(repo.root(), precheck_tests);
                if rc != 0 {
                    report.block(&text);
                    refuse(&mut report, "[git] Pre-push check failed. Push aborted.");
                    return Ok(report);
                }
                report.block(&text);
            }
            run(&repo, ["push", remote.as_str(), branch.as_str()])?
        }
        GitAction::Switch => run(&repo, ["switch", branch.as_str()])?,
        GitAction::StashSwitch => stash_switch(&repo, &branch, non_empty(&options.message))?,
        GitAction::Create => match non_empty(&options.base) {
            Some(from) => run(&repo, ["switch", "-c", branch.as_str(), from.as_str()])?,
            None => run(&repo, ["switch", "-c", branch.as_str()])?,
        },
        GitAction::Merge => {
            if !repo.is_clean() {
                refuse(
                    &mut report,
                    "[git] The working tree is not clean. Commit or stash changes before merging.",
                );
                return Ok(report);
            }
            let target = non_empty(&options.target).unwrap_or_else(|| pull_branch.clone());
            let source = non_empty(&options.source).unwrap_or_else(|| repo.current_branch());
            if protected(&target) {
                refuse(
                    &mut report,
                    format!("[git] Target '{target}' is protected. Set confirm=true to merge."),
                );
                return Ok(report);
            }
            let (code, mut text) = run(&repo, ["switch", target.as_str()])?;
            if code != 0 {
                (code, text)
            } else {
                let mut args = vec!["merge"];
                if options.ff_only {
                    args.push("--ff-only");
                }
                args.push(source.as_str());
                let merged = repo.git(&args)?;
                text.push_str(&merged.output);
                (merged.code, text)
            }
        }
        GitAction::Acp => {
            let message = non_empty(&options.message).unwrap_or_default();
            if protected(&branch) {
                refuse(
                    &mut report,
                    format!("[git] '{branch}' is protected. Set confirm=true for add-commit-push."),
                );
                return Ok(report);
            }
            if message.is_empty() {
                refuse(&mut report, "[git] Commit message cannot be empty.");
                return Ok(report);
            }
            let mut text = repo.text(["add", "-A"])?;
            // exits 1 when there is nothing to commit; the push still runs
            text.push_str(&repo.text(["commit", "-m", message.as_str()])?);
            if precheck {
                let (rc, check) = pre_push_check(repo.root(), precheck_tests);
                text.push_str(&check);
                if rc != 0 {
                    report.block(&text);
                    refuse(&mut report, "[git] Pre-push check failed. Push aborted.");
                    return Ok(report);
                }
            }
            let pushed = repo.git(["push", remote.as_str(), branch.as_str()])?;
            text.push_str(&pushed.output);
            text.push_str(&repo.text(["status", "-sb"])?);
            (pushed.code, text)
        }
        GitAction::Diff => {
            if options.staged {
                run(&repo, ["diff", "--cached"])?
            } else {
                run(&repo, ["diff"])?
            }
        }
        GitAction::Log => {
            let count = format!("-{}", options.n.max(1));
            run(&repo, ["log", count.as_str(), "--oneline", "--graph", "--decorate"])?
        }
        GitAction::Sync => {
            let (fetch_code, mut text) = run(&repo, ["fetch", remote.as_str()])?;
            let (pull_code, pulled) =
                run(&repo, ["pull", "--ff-only", remote.as_str(), pull_branch.as_str()])?;
            text.push_str(&pulled);
            (if fetch_code != 0 { fetch_code } else { pull_code }, text)
        }
        GitAction::Resolve => (0, resolve_guide(&repo.conflicted_files()?)),
    };

    report.block(&text);
    report.set_rc(code);
    tracing::info!(action = %action, code, "git action finished");
    Ok(report)
}

fn refuse(report: &mut Report, msg: impl AsRef<str>) {
    report.line(msg);
    report.set_rc(1);
}

fn run<const N: usize>(repo: &Repo, args: [&str; N]) -> Result<(i32, String)> {
    let out = repo.git(args)?;
    Ok((out.code, out.output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtools_shared::process::find_on_path;
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

    /// A repo on `main` with one commit, or `None` when git is unavailable.
    fn repo_fixture() -> Option<tempfile::TempDir> {
        find_on_path("git")?;
        let dir = tempfile::tempdir().expect("tempdir");
        let git = |args: &[&str]| {
            let out = run_captured("git", args, dir.path()).expect("git");
            assert!(out.success(), "git {args:?}: {}", out.output);
        };
        git(&["init", "-q"]);
        git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&["config", "user.email", "dev@example.com"]);
        git(&["config", "user.name", "Dev"]);
        git(&["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").expect("write");
        git(&["add", "-A"]);
        git(&["commit", "-q", "-m", "init"]);
        Some(dir)
    }

    #[test]
    fn protected_patterns() {
        let patterns = default_protected();
        assert!(is_protected("main", &patterns));
        assert!(is_protected("release/1.2", &patterns));
        assert!(!is_protected("feature/x", &patterns));
        assert!(!is_protected("mainline", &patterns));
    }

    #[test]
    fn action_names_round_trip() {
        for action in GitAction::ALL {
            assert_eq!(action.name().parse::<GitAction>().expect("parse"), action);
        }
        assert_eq!("stash-switch".parse::<GitAction>().expect("parse"), GitAction::StashSwitch);
        assert!("rebase".parse::<GitAction>().is_err());
    }

    #[test]
    fn not_a_repository() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path(), json!({}));
        assert!(run_git(&cfg, GitAction::Status, &GitOptions::default()).is_err());
    }

    #[test]
    fn push_to_protected_branch_needs_confirm() {
        let Some(dir) = repo_fixture() else { return };
        let cfg = config(dir.path(), json!({}));
        let report = run_git(&cfg, GitAction::Push, &GitOptions::default()).expect("push");
        assert_eq!(report.rc(), 1);
        assert!(report.text().contains("'main' is protected"));
    }

    #[test]
    fn branches_create_and_merge() {
        let Some(dir) = repo_fixture() else { return };
        let cfg = config(dir.path(), json!({}));

        let create = GitOptions {
            branch: Some("feature/x".into()),
            ..GitOptions::default()
        };
        let report = run_git(&cfg, GitAction::Create, &create).expect("create");
        assert_eq!(report.rc(), 0, "{}", report.text());

        let report = run_git(&cfg, GitAction::Branches, &GitOptions::default()).expect("branches");
        assert!(report.text().contains("feature/x\nmain\n(current: feature/x)\n"));

        std::fs::write(dir.path().join("new.txt"), "x\n").expect("write");
        let report = run_git(&cfg, GitAction::Merge, &GitOptions::default()).expect("merge");
        assert!(report.text().contains("not clean"));

        let repo = Repo::open(dir.path()).expect("repo");
        repo.git(["add", "-A"]).expect("add");
        repo.git(["commit", "-q", "-m", "feature"]).expect("commit");

        let merge = GitOptions {
            target: Some("main".into()),
            ..GitOptions::default()
        };
        let report = run_git(&cfg, GitAction::Merge, &merge).expect("merge");
        assert!(report.text().contains("Target 'main' is protected"));

        let merge = GitOptions {
            confirm: true,
            ..merge
        };
        let report = run_git(&cfg, GitAction::Merge, &merge).expect("merge");
        assert_eq!(report.rc(), 0, "{}", report.text());
        assert_eq!(repo.current_branch(), "main");
        assert!(dir.path().join("new.txt").exists());
    }

    #[test]
    fn resolve_without_conflicts() {
        let Some(dir) = repo_fixture() else { return };
        let cfg = config(dir.path(), json!({}));
        let report = run_git(&cfg, GitAction::Resolve, &GitOptions::default()).expect("resolve");
        assert_eq!(report.text(), "=== Merge conflicts ===\nNo files in conflict.\n");
    }
}
