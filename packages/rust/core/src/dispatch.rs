//! Tool dispatch: a tool name plus a JSON argument object becomes config
//! layers, typed options and one tool run.
//!
//! The CLI, recipes and `POST /api/run` all go through [`run_tool`], so a
//! given argument object behaves the same everywhere.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use rtools_backup::{BackupArgs, run_backup};
use rtools_clean::{CleanOptions, run_clean};
use rtools_format::{format_preview, run_format};
use rtools_git::{GitAction, GitOptions, run_git};
use rtools_paste::{PastePlan, clear_out_dir, metrics_summary, run_paste};
use rtools_remote::dropbox::{DropboxClient, DropboxCredentials, diag_dropbox, env_files};
use rtools_remote::github::{GitHubClient, run_gh_raw};
use rtools_search::{PathMode, ReplaceOptions, SearchOptions, run_replace, run_search};
use rtools_shared::{
    ConfigLoader, ConfigPaths, LoadedConfig, Report, Result, RtoolsError, RunId, RunSummary,
    Tool, ToolRun, deep_merge, find_project, find_recipe,
};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::args::Args;
use crate::progress::ProgressReporter;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a run needs besides its arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub paths: ConfigPaths,
    /// Working directory for the project file and relative paths.
    pub cwd: PathBuf,
    /// GitHub API base URL override.
    pub github_api: Option<String>,
    /// Dropbox API base URL override.
    pub dropbox_api: Option<String>,
}

impl ToolContext {
    pub fn new(paths: ConfigPaths) -> Self {
        Self {
            paths,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            github_api: None,
            dropbox_api: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_github_api(mut self, base: impl Into<String>) -> Self {
        self.github_api = Some(base.into());
        self
    }

    pub fn with_dropbox_api(mut self, base: impl Into<String>) -> Self {
        self.dropbox_api = Some(base.into());
        self
    }

    fn github_client(&self) -> Result<GitHubClient> {
        let client = GitHubClient::from_env()?;
        Ok(match &self.github_api {
            Some(base) => client.with_api_base(base),
            None => client,
        })
    }

    pub fn dropbox_client(&self) -> Result<DropboxClient> {
        let client = DropboxClient::new()?;
        Ok(match &self.dropbox_api {
            Some(base) => client.with_api_base(base),
            None => client,
        })
    }

    /// Resolve a project name or path; `None` or blank selects nothing.
    pub fn resolve_project(&self, project: Option<&str>) -> Result<Option<PathBuf>> {
        match project.map(str::trim) {
            Some(p) if !p.is_empty() => find_project(&self.paths, p).map(Some),
            _ => Ok(None),
        }
    }

    /// Merged config for `tool`, with an optional project and overrides.
    pub fn load_config(
        &self,
        tool: Option<Tool>,
        project: Option<PathBuf>,
        overrides: Value,
    ) -> LoadedConfig {
        let mut loader = ConfigLoader::new(&self.paths)
            .cwd(self.cwd.clone())
            .project(project)
            .overrides(overrides);
        if let Some(tool) = tool {
            loader = loader.tool(tool.config_file());
        }
        loader.load()
    }
}

// ---------------------------------------------------------------------------
// Argument translation
// ---------------------------------------------------------------------------

/// The typed work for one run.
enum Job {
    Search(SearchOptions),
    Replace(ReplaceOptions),
    Paste { list_only: bool, clear_out: bool },
    Format { dry_run: bool },
    Clean(CleanOptions),
    GhRaw,
    Git(GitAction, GitOptions),
    Backup(BackupArgs),
}

/// Config overrides plus the job they feed.
struct Prepared {
    overrides: Value,
    job: Job,
}

/// Copy `keys` that are present (and not blank strings or empty lists)
/// from the arguments into `section`.
fn copy_keys(args: &Args<'_>, section: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        let Some(value) = args.get(key) else {
            continue;
        };
        let empty = match value {
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if !empty {
            section.insert((*key).to_string(), value.clone());
        }
    }
}

fn with_section(name: &str, section: Map<String, Value>) -> Map<String, Value> {
    let mut root = Map::new();
    if !section.is_empty() {
        root.insert(name.to_string(), Value::Object(section));
    }
    root
}

fn prepare(tool: Tool, args: &Args<'_>) -> Result<Prepared> {
    let (overrides, job) = match tool {
        Tool::Search => {
            let mut root = Map::new();
            if let Some(cs) = args.bool("case_sensitive") {
                root.insert("case_insensitive".into(), Value::Bool(!cs));
            }
            let path_mode = match args.str("path_mode").as_deref() {
                Some("full") => PathMode::Full,
                _ => PathMode::Relative,
            };
            let limit_dirs = args.list("limit_dirs");
            let options = SearchOptions {
                terms: args.lines("terms"),
                include: args.list("include"),
                exclude: args.list("exclude"),
                filename_search: args.flag("filename_search", false),
                limit_dirs: (!limit_dirs.is_empty()).then_some(limit_dirs),
                limit_exts: args.list("limit_exts"),
                require_all: args.flag("all", false) || args.flag("require_all", false),
                files_only: args.flag("files_only", false),
                path_mode,
                max_size: args.u64("max_size").unwrap_or(rtools_search::DEFAULT_MAX_SIZE),
                count: args.flag("count", true),
            };
            (root, Job::Search(options))
        }
        Tool::Replace => {
            let options = ReplaceOptions {
                find: args.raw_str("find").unwrap_or_default(),
                replace: args.raw_str("replace").unwrap_or_default(),
                regex: args.bool("regex"),
                case_sensitive: args.bool("case_sensitive"),
                include: args.list("include"),
                exclude: args.list("exclude"),
                filename_search: args.flag("filename_search", false),
                max_size: args.u64("max_size"),
                dry_run: args.bool("dry_run"),
                backup: args.bool("backup"),
                show_diff: args.bool("show_diff"),
            };
            (Map::new(), Job::Replace(options))
        }
        Tool::Paste => {
            let mut section = Map::new();
            copy_keys(
                args,
                &mut section,
                &[
                    "root",
                    "out_dir",
                    "max_lines",
                    "include",
                    "exclude",
                    "only_globs",
                    "skip_globs",
                    "filename_search",
                    "allow_binary",
                ],
            );
            let job = Job::Paste {
                list_only: args.flag("list_only", false),
                clear_out: args.flag("clear_out", true),
            };
            (with_section("paste", section), job)
        }
        Tool::Format => (
            Map::new(),
            Job::Format {
                dry_run: args.flag("dry_run", false),
            },
        ),
        Tool::Clean => {
            let mut section = Map::new();
            if let Some(targets) = args.object("targets") {
                section.insert("targets".into(), Value::Object(targets.clone()));
            }
            for key in ["extra_globs", "skip_globs"] {
                if args.has(key) {
                    section.insert(key.into(), json!(args.list(key)));
                }
            }
            let mut only = args.list("what");
            only.extend(args.list("only"));
            let apply = args.str("mode").is_some_and(|m| m.eq_ignore_ascii_case("apply"))
                || args.flag("yes", false);
            let options = CleanOptions {
                only,
                skip: args.list("skip"),
                dry_run: !apply || args.flag("dry_run", false),
            };
            (with_section("clean", section), Job::Clean(options))
        }
        Tool::GhRaw => {
            let mut section = Map::new();
            copy_keys(
                args,
                &mut section,
                &["mode", "user", "repo", "branch", "remote"],
            );
            if let Some(prefix) = args.raw_str("path_prefix") {
                section.insert("path_prefix".into(), Value::String(prefix));
            }
            if args.flag("wrap_read", false) {
                section.insert("wrap_read".into(), Value::Bool(true));
            }
            (with_section("gh_raw", section), Job::GhRaw)
        }
        Tool::Git => {
            let action: GitAction = args.str("action").as_deref().unwrap_or("status").parse()?;
            let options = GitOptions {
                remote: args.str("remote"),
                branch: args.str("branch"),
                base: args.str("base"),
                message: args.str("message"),
                ff_only: args.flag("ff_only", true),
                staged: args.flag("staged", false),
                n: args.u64("n").map_or(10, |n| n as usize),
                confirm: args.flag("confirm", false),
                precheck: args.bool("precheck"),
                precheck_tests: args.bool("precheck_tests"),
                target: args.str("target"),
                source: args.str("source"),
            };
            (Map::new(), Job::Git(action, options))
        }
        Tool::Backup => (Map::new(), Job::Backup(BackupArgs::from_value(args.raw())?)),
    };

    // A free-form `override` object is merged last, e.g. format options.
    let mut merged = Value::Object(overrides);
    if let Some(extra) = args.object("override") {
        deep_merge(&mut merged, &Value::Object(extra.clone()));
    }
    Ok(Prepared {
        overrides: merged,
        job,
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn run_blocking(job: Job, cfg: &LoadedConfig, paths: &ConfigPaths) -> Result<Report> {
    match job {
        Job::Search(options) => run_search(cfg, &options),
        Job::Replace(options) => run_replace(cfg, &options),
        Job::Paste {
            list_only,
            clear_out,
        } => {
            if !list_only && clear_out {
                let plan = PastePlan::from_config(cfg)?;
                let removed = clear_out_dir(&plan.out_dir)?;
                if removed > 0 {
                    info!(removed, "cleared stale paste files");
                }
            }
            let mut report = run_paste(cfg, list_only)?;
            if !list_only && report.rc() == 0 {
                let summary = metrics_summary(report.metrics());
                report.blank();
                report.block(&summary);
            }
            Ok(report)
        }
        Job::Format { dry_run } => run_format(cfg, dry_run),
        Job::Clean(options) => run_clean(cfg, &options),
        Job::Git(action, options) => run_git(cfg, action, &options),
        Job::Backup(args) => run_backup(cfg, paths, &args),
        Job::GhRaw => Err(RtoolsError::validation("gh-raw does not run on a blocking thread")),
    }
}

/// Run one tool.
///
/// Config warnings are prepended to the output as `[config] ...` lines.
/// Tool failures that the tool reports itself (refusals, missing files)
/// come back as a run with a non-zero `rc`; argument and config errors
/// come back as `Err`.
#[instrument(skip_all, fields(tool = %tool, project = project.unwrap_or("-")))]
pub async fn run_tool(
    ctx: &ToolContext,
    tool: Tool,
    project: Option<&str>,
    args: &Value,
    progress: &dyn ProgressReporter,
) -> Result<ToolRun> {
    let started = Instant::now();
    let prepared = prepare(tool, &Args::new(args)?)?;
    let project_root = ctx.resolve_project(project)?;

    progress.phase("Loading config");
    let cfg = ctx.load_config(Some(tool), project_root, prepared.overrides);
    for warning in &cfg.warnings {
        warn!(%warning, "config warning");
    }

    progress.phase(&format!("Running {tool}"));
    let report = match prepared.job {
        Job::GhRaw => run_gh_raw(&cfg, &ctx.github_client()?).await?,
        job => {
            let task_cfg = cfg.clone();
            let paths = ctx.paths.clone();
            tokio::task::spawn_blocking(move || run_blocking(job, &task_cfg, &paths))
                .await
                .map_err(|e| RtoolsError::Process(format!("{tool} task failed: {e}")))??
        }
    };

    let (text, rc, metrics) = report.into_parts();
    let mut output = String::new();
    for warning in &cfg.warnings {
        output.push_str(&format!("[config] {warning}\n"));
    }
    output.push_str(&text);

    let duration_ms = started.elapsed().as_millis() as u64;
    let run = ToolRun {
        run_id: RunId::new(),
        tool,
        finished_at: Utc::now(),
        output,
        summary: RunSummary {
            rc,
            duration_ms,
            metrics,
        },
    };
    info!(run_id = %run.run_id, rc, duration_ms, "tool finished");
    progress.done(&run);
    Ok(run)
}

/// Run a named recipe from `recipes_config.json`.
pub async fn run_recipe(
    ctx: &ToolContext,
    name: &str,
    project: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<ToolRun> {
    let recipe = find_recipe(&ctx.paths, name)?;
    let tool: Tool = recipe.tool.parse()?;
    info!(recipe = %recipe.name, %tool, "running recipe");
    run_tool(ctx, tool, project, &recipe.args, progress).await
}

/// Single-file format preview under the selected project.
pub async fn preview_format(ctx: &ToolContext, project: Option<&str>, rel: &str) -> Result<Report> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Err(RtoolsError::validation("path is required"));
    }
    let project_root = ctx.resolve_project(project)?;
    let cfg = ctx.load_config(Some(Tool::Format), project_root, json!({}));
    let rel = rel.to_string();
    tokio::task::spawn_blocking(move || format_preview(&cfg, &rel))
        .await
        .map_err(|e| RtoolsError::Process(format!("format preview task failed: {e}")))?
}

/// `rt diag dropbox` / `GET /api/diag/dropbox`.
pub async fn dropbox_diag(ctx: &ToolContext) -> Result<Report> {
    let creds = DropboxCredentials::load(&env_files(&ctx.paths, &ctx.cwd));
    let client = ctx.dropbox_client()?;
    Ok(diag_dropbox(&client, &creds, Some(&ctx.paths)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use std::path::Path;
    use std::sync::Mutex;

    fn setup() -> (tempfile::TempDir, ToolContext, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let project = root.join("proj");
        std::fs::create_dir_all(project.join("src")).unwrap();
        let ctx = ToolContext::new(ConfigPaths::at(root.join("configs"))).with_cwd(&project);
        (dir, ctx, project)
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressReporter for Recorder {
        fn phase(&self, name: &str) {
            self.0.lock().unwrap().push(name.to_string());
        }
        fn done(&self, run: &ToolRun) {
            self.0.lock().unwrap().push(format!("done rc={}", run.summary.rc));
        }
    }

    #[tokio::test]
    async fn test_search_run_prepends_config_warning() {
        let (_dir, ctx, project) = setup();
        write(&project, "src/app.py", "import os\nprint('hello')\n");

        let progress = Recorder::default();
        let project_arg = project.to_string_lossy().into_owned();
        let run = run_tool(
            &ctx,
            Tool::Search,
            Some(&project_arg),
            &json!({"terms": ["hello"]}),
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(run.summary.rc, 0);
        assert!(run.output.starts_with("[config] config directory"));
        assert!(run.output.contains("== src/app.py =="));
        assert!(run.output.contains("Matching files: 1"));
        let phases = progress.0.lock().unwrap();
        assert_eq!(phases.last().map(String::as_str), Some("done rc=0"));
    }

    #[tokio::test]
    async fn test_unknown_tool_args_are_rejected() {
        let (_dir, ctx, _project) = setup();
        let err = run_tool(&ctx, Tool::Git, None, &json!({"action": "rebase"}), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        let err = run_tool(&ctx, Tool::Search, Some("no-such-project"), &json!({}), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown project"));
    }

    #[tokio::test]
    async fn test_paste_clears_stale_files_and_summarises() {
        let (_dir, ctx, project) = setup();
        write(&project, "src/main.py", "print(1)\n");
        write(&project, "paste_out/paste_0099.txt", "stale\n");

        let project_arg = project.to_string_lossy().into_owned();
        let run = run_tool(&ctx, Tool::Paste, Some(&project_arg), &json!({}), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(run.summary.rc, 0, "{}", run.output);
        assert!(!project.join("paste_out/paste_0099.txt").exists());
        assert!(project.join("paste_out/paste_0001.txt").exists());
        assert_eq!(run.summary.metrics["paste_files"], 1);
        assert_eq!(run.summary.metrics["paste_file_sections"], 1);
        assert!(run.output.contains("== Summary (paste) =="));
    }

    #[tokio::test]
    async fn test_replace_defaults_to_dry_run() {
        let (_dir, ctx, project) = setup();
        write(&project, "src/a.py", "old = 1\n");

        let project_arg = project.to_string_lossy().into_owned();
        let run = run_tool(
            &ctx,
            Tool::Replace,
            Some(&project_arg),
            &json!({"find": "old", "replace": "new"}),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(run.output.contains("~ src/a.py  (1 matches)"), "{}", run.output);
        assert_eq!(std::fs::read_to_string(project.join("src/a.py")).unwrap(), "old = 1\n");
    }

    #[tokio::test]
    async fn test_clean_apply_mode_deletes() {
        let (_dir, ctx, project) = setup();
        write(&project, "src/__pycache__/m.pyc", "x");

        let project_arg = project.to_string_lossy().into_owned();
        let dry = run_tool(&ctx, Tool::Clean, Some(&project_arg), &json!({}), &SilentProgress)
            .await
            .unwrap();
        assert!(dry.output.contains("Dry-run"));
        assert!(project.join("src/__pycache__").exists());

        let applied = run_tool(
            &ctx,
            Tool::Clean,
            Some(&project_arg),
            &json!({"mode": "apply"}),
            &SilentProgress,
        )
        .await
        .unwrap();
        assert_eq!(applied.summary.rc, 0);
        assert!(!project.join("src/__pycache__").exists());
    }

    #[tokio::test]
    async fn test_gh_raw_uses_args_over_config() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/git/trees/dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [{"path": "a.txt", "type": "blob"}],
                "truncated": false
            })))
            .mount(&server)
            .await;

        let (_dir, ctx, _project) = setup();
        let ctx = ctx.with_github_api(server.uri());
        let run = run_tool(
            &ctx,
            Tool::GhRaw,
            None,
            &json!({"user": "octo", "repo": "demo", "branch": "dev"}),
            &SilentProgress,
        )
        .await
        .unwrap();
        assert!(run
            .output
            .contains("https://raw.githubusercontent.com/octo/demo/dev/a.txt"));
    }

    #[tokio::test]
    async fn test_backup_without_script_is_127() {
        let (_dir, ctx, _project) = setup();
        let run = run_tool(&ctx, Tool::Backup, None, &json!({"dry_run": true}), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(run.summary.rc, 127);
    }

    #[tokio::test]
    async fn test_recipe_runs_through_dispatcher() {
        let (_dir, ctx, project) = setup();
        std::fs::create_dir_all(&ctx.paths.config_dir).unwrap();
        std::fs::write(
            ctx.paths.file("recipes_config.json"),
            json!({"recipes": [{"name": "Find TODO", "tool": "search", "args": {"terms": ["TODO"]}}]})
                .to_string(),
        )
        .unwrap();
        write(&project, "src/x.rs", "// TODO: later\n");

        let project_arg = project.to_string_lossy().into_owned();
        let run = run_recipe(&ctx, "find todo", Some(&project_arg), &SilentProgress)
            .await
            .unwrap();
        assert!(run.output.contains("== src/x.rs =="));
    }

    #[tokio::test]
    async fn test_preview_requires_path() {
        let (_dir, ctx, _project) = setup();
        assert!(preview_format(&ctx, None, "  ").await.is_err());
    }
}
