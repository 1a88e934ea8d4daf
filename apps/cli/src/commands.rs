//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use rtools_core::{
    ProgressReporter, ToolContext, dropbox_diag, list_config, preview_format, run_recipe, run_tool,
};
use rtools_remote::{DropboxCredentials, env_files, run_wizard};
use rtools_shared::{ConfigPaths, TemplateOutcome, Tool, ToolRun, init_templates};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::prompt::TerminalPrompt;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// rtools: search, replace, paste, format, clean and more, from one command.
#[derive(Parser)]
#[command(
    name = "rt",
    version,
    about = "Developer tools for a selectable project, plus a local web UI.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration directory (default: ~/.rtools/configs).
    #[arg(long, env = "RTOOLS_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// GitHub API base URL.
    #[arg(long, env = "RTOOLS_GITHUB_API", global = true, hide = true)]
    pub github_api: Option<String>,

    /// Dropbox API base URL.
    #[arg(long, env = "RTOOLS_DROPBOX_API", global = true, hide = true)]
    pub dropbox_api: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Project selection shared by the tool commands.
#[derive(ClapArgs, Debug, Clone, Default)]
pub(crate) struct ProjectArg {
    /// Project name from projects_config.json, or a path.
    #[arg(short, long)]
    pub project: Option<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search project files for regex terms.
    Search {
        /// Regex terms (default: search_terms from config).
        terms: Vec<String>,
        /// Include glob (repeatable).
        #[arg(long)]
        include: Vec<String>,
        /// Exclude glob (repeatable).
        #[arg(long)]
        exclude: Vec<String>,
        /// Treat bare names as **/<name>.
        #[arg(long)]
        filename_search: bool,
        /// Only walk these directories.
        #[arg(long)]
        limit_dirs: Vec<String>,
        /// Only these extensions.
        #[arg(long)]
        limit_exts: Vec<String>,
        #[arg(long)]
        case_sensitive: bool,
        /// Every term must match the line.
        #[arg(long)]
        all: bool,
        /// Print matching paths only.
        #[arg(long)]
        files_only: bool,
        /// relative or full.
        #[arg(long, default_value = "relative")]
        path_mode: String,
        /// Skip files larger than this many bytes.
        #[arg(long)]
        max_size: Option<u64>,
        /// Do not print the matching file count.
        #[arg(long)]
        no_count: bool,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Find and replace across project files (dry-run unless --apply).
    Replace {
        #[arg(long)]
        find: String,
        #[arg(long, default_value = "")]
        replace: String,
        /// Treat --find as plain text.
        #[arg(long)]
        literal: bool,
        #[arg(long)]
        case_sensitive: bool,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        filename_search: bool,
        #[arg(long)]
        max_size: Option<u64>,
        /// Write the changes.
        #[arg(long)]
        apply: bool,
        /// Do not write <file>.bak before changing a file.
        #[arg(long)]
        no_backup: bool,
        /// Print a unified diff per file.
        #[arg(long)]
        diff: bool,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Bundle project files into numbered paste_NNNN.txt chunks.
    Paste {
        #[arg(long)]
        out_dir: Option<String>,
        #[arg(long)]
        max_lines: Option<u64>,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        /// Keep only files matching these globs.
        #[arg(long)]
        only: Vec<String>,
        /// Drop files matching these globs.
        #[arg(long)]
        skip: Vec<String>,
        #[arg(long)]
        filename_search: bool,
        /// Write binary files as base64 blocks.
        #[arg(long)]
        allow_binary: bool,
        /// List candidate files without writing.
        #[arg(long)]
        list: bool,
        /// Remove old paste_*.txt files first.
        #[arg(long)]
        clear: bool,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Run prettier, black and ruff, then clean up whitespace.
    Format {
        /// Print commands without running them.
        #[arg(long)]
        dry_run: bool,
        /// Preview formatting of one file (path relative to the project).
        #[arg(long, value_name = "REL")]
        preview: Option<String>,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Remove caches and temporary files (dry-run unless --yes).
    Clean {
        /// Only these target keys (repeatable).
        #[arg(long)]
        only: Vec<String>,
        /// Skip these target keys (repeatable).
        #[arg(long)]
        skip: Vec<String>,
        /// Extra globs to remove.
        #[arg(long)]
        extra_glob: Vec<String>,
        /// Globs to protect.
        #[arg(long)]
        skip_glob: Vec<String>,
        /// Delete instead of listing.
        #[arg(long)]
        yes: bool,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// List raw.githubusercontent.com links for a repository tree.
    #[command(name = "gh-raw")]
    GhRaw {
        /// manual or project.
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Only paths under this prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// Print a /read(urls: [...]) block pinned to the commit.
        #[arg(long)]
        wrap_read: bool,
        #[arg(long)]
        remote: Option<String>,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Run the backup script, or the Dropbox refresh-token wizard.
    Backup(BackupCommand),

    /// Diagnostics.
    Diag {
        #[command(subcommand)]
        target: DiagTarget,
    },

    /// Git branch operations with a protected-branch guard.
    Git {
        /// status, branches, remotes, fetch, pull, push, switch, stash_switch,
        /// create, merge, acp, diff, log, sync, resolve.
        #[arg(default_value = "status")]
        action: String,
        #[arg(long)]
        remote: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        base: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
        /// Allow non fast-forward merges and pulls.
        #[arg(long)]
        no_ff_only: bool,
        #[arg(long)]
        staged: bool,
        /// Log entries.
        #[arg(short)]
        n: Option<u64>,
        /// Confirm operations on protected branches.
        #[arg(long, alias = "yes")]
        confirm: bool,
        /// Run black/ruff before pushing.
        #[arg(long)]
        precheck: bool,
        /// Also run pytest in the precheck.
        #[arg(long)]
        precheck_tests: bool,
        /// Merge target branch.
        #[arg(long)]
        into: Option<String>,
        /// Merge source branch.
        #[arg(long)]
        from: Option<String>,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Show config sources, effective values and provenance.
    List {
        #[arg(long)]
        tool: Option<String>,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Run a recipe from recipes_config.json.
    Recipe {
        name: String,
        #[command(flatten)]
        target: ProjectArg,
    },

    /// Create the config directory with default templates.
    Init {
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Serve the web UI and JSON API.
    Serve {
        #[arg(long, default_value = rtools_server::DEFAULT_HOST)]
        host: String,
        #[arg(long, default_value_t = rtools_server::DEFAULT_PORT)]
        port: u16,
    },
}

/// `rt backup` flags; forwarded to the backup script.
#[derive(ClapArgs, Debug, Clone)]
pub(crate) struct BackupCommand {
    /// Obtain a Dropbox refresh token interactively instead.
    #[arg(long)]
    wizard: bool,
    /// Profiles file to pass as --config.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    dest: Option<String>,
    #[arg(long = "version")]
    archive_version: Option<String>,
    #[arg(long)]
    no_version: bool,
    #[arg(long)]
    tag: Option<String>,
    /// zip, tar.gz or tgz.
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    include_hidden: bool,
    #[arg(long)]
    keep: Option<u32>,
    /// List existing archives.
    #[arg(long)]
    list: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_verify: bool,
    /// Pass --verbose to the script.
    #[arg(long)]
    script_verbose: bool,
    /// Exclude pattern (repeatable, or comma separated).
    #[arg(long)]
    exclude: Vec<String>,
    #[arg(long)]
    dropbox_path: Option<String>,
    #[arg(long)]
    dropbox_mode: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum DiagTarget {
    /// Check Dropbox credentials and the API.
    Dropbox,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so reports on
/// stdout stay clean.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "rtools=info",
        1 => "rtools=debug",
        _ => "rtools=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Argument objects
// ---------------------------------------------------------------------------

/// Builds the JSON argument object the dispatcher takes, skipping unset
/// values so config layers keep their say.
#[derive(Default)]
struct ArgMap(Map<String, Value>);

impl ArgMap {
    fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn opt<T: Into<Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    fn flag(self, key: &str, on: bool) -> Self {
        if on { self.set(key, true) } else { self }
    }

    fn list(self, key: &str, items: Vec<String>) -> Self {
        if items.is_empty() {
            self
        } else {
            self.set(key, items)
        }
    }

    fn build(self) -> Value {
        Value::Object(self.0)
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command; the result is the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<i32> {
    let paths = ConfigPaths::resolve(cli.config_dir.as_deref())?;
    let mut ctx = ToolContext::new(paths);
    if let Some(base) = cli.github_api.as_deref() {
        ctx = ctx.with_github_api(base);
    }
    if let Some(base) = cli.dropbox_api.as_deref() {
        ctx = ctx.with_dropbox_api(base);
    }

    match cli.command {
        Command::Search {
            terms,
            include,
            exclude,
            filename_search,
            limit_dirs,
            limit_exts,
            case_sensitive,
            all,
            files_only,
            path_mode,
            max_size,
            no_count,
            target,
        } => {
            let args = ArgMap::default()
                .list("terms", terms)
                .list("include", include)
                .list("exclude", exclude)
                .flag("filename_search", filename_search)
                .list("limit_dirs", limit_dirs)
                .list("limit_exts", limit_exts)
                .flag("case_sensitive", case_sensitive)
                .flag("all", all)
                .flag("files_only", files_only)
                .set("path_mode", path_mode)
                .opt("max_size", max_size)
                .set("count", !no_count)
                .build();
            cmd_tool(&ctx, Tool::Search, &target, args).await
        }
        Command::Replace {
            find,
            replace,
            literal,
            case_sensitive,
            include,
            exclude,
            filename_search,
            max_size,
            apply,
            no_backup,
            diff,
            target,
        } => {
            let args = ArgMap::default()
                .set("find", find)
                .set("replace", replace)
                .set("regex", !literal)
                .set("case_sensitive", case_sensitive)
                .list("include", include)
                .list("exclude", exclude)
                .flag("filename_search", filename_search)
                .opt("max_size", max_size)
                .set("dry_run", !apply)
                .set("backup", !no_backup)
                .set("show_diff", diff)
                .build();
            cmd_tool(&ctx, Tool::Replace, &target, args).await
        }
        Command::Paste {
            out_dir,
            max_lines,
            include,
            exclude,
            only,
            skip,
            filename_search,
            allow_binary,
            list,
            clear,
            target,
        } => {
            let args = ArgMap::default()
                .opt("out_dir", out_dir)
                .opt("max_lines", max_lines)
                .list("include", include)
                .list("exclude", exclude)
                .list("only_globs", only)
                .list("skip_globs", skip)
                .flag("filename_search", filename_search)
                .flag("allow_binary", allow_binary)
                .set("list_only", list)
                .set("clear_out", clear)
                .build();
            cmd_tool(&ctx, Tool::Paste, &target, args).await
        }
        Command::Format {
            dry_run,
            preview,
            target,
        } => match preview {
            Some(rel) => {
                let report = preview_format(&ctx, target.project.as_deref(), &rel).await?;
                print!("{}", report.text());
                Ok(report.rc())
            }
            None => {
                let args = ArgMap::default().set("dry_run", dry_run).build();
                cmd_tool(&ctx, Tool::Format, &target, args).await
            }
        },
        Command::Clean {
            only,
            skip,
            extra_glob,
            skip_glob,
            yes,
            target,
        } => {
            let args = ArgMap::default()
                .list("only", only)
                .list("skip", skip)
                .list("extra_globs", extra_glob)
                .list("skip_globs", skip_glob)
                .set("mode", if yes { "apply" } else { "dry-run" })
                .build();
            cmd_tool(&ctx, Tool::Clean, &target, args).await
        }
        Command::GhRaw {
            mode,
            user,
            repo,
            branch,
            prefix,
            wrap_read,
            remote,
            target,
        } => {
            let args = ArgMap::default()
                .opt("mode", mode)
                .opt("user", user)
                .opt("repo", repo)
                .opt("branch", branch)
                .opt("path_prefix", prefix)
                .flag("wrap_read", wrap_read)
                .opt("remote", remote)
                .build();
            cmd_tool(&ctx, Tool::GhRaw, &target, args).await
        }
        Command::Backup(backup) => cmd_backup(&ctx, backup).await,
        Command::Diag {
            target: DiagTarget::Dropbox,
        } => {
            let report = dropbox_diag(&ctx).await?;
            print!("{}", report.text());
            Ok(report.rc())
        }
        Command::Git {
            action,
            remote,
            branch,
            base,
            message,
            no_ff_only,
            staged,
            n,
            confirm,
            precheck,
            precheck_tests,
            into,
            from,
            target,
        } => {
            let args = ArgMap::default()
                .set("action", action)
                .opt("remote", remote)
                .opt("branch", branch)
                .opt("base", base)
                .opt("message", message)
                .set("ff_only", !no_ff_only)
                .flag("staged", staged)
                .opt("n", n)
                .flag("confirm", confirm)
                .flag("precheck", precheck)
                .flag("precheck_tests", precheck_tests)
                .opt("target", into)
                .opt("source", from)
                .build();
            cmd_tool(&ctx, Tool::Git, &target, args).await
        }
        Command::List { tool, target } => {
            let tool = tool.map(|t| t.parse::<Tool>()).transpose()?;
            print!("{}", list_config(&ctx, tool, target.project.as_deref())?);
            Ok(0)
        }
        Command::Recipe { name, target } => {
            let progress = CliProgress::new();
            let run = run_recipe(&ctx, &name, target.project.as_deref(), &progress).await?;
            Ok(print_run(&run))
        }
        Command::Init { force } => cmd_init(&ctx.paths, force),
        Command::Serve { host, port } => {
            info!(%host, port, config_dir = %ctx.paths.config_dir.display(), "starting server");
            println!("Serving rtools UI on http://{host}:{port}/");
            rtools_server::serve(ctx, &host, port).await?;
            Ok(0)
        }
    }
}

async fn cmd_tool(ctx: &ToolContext, tool: Tool, target: &ProjectArg, args: Value) -> Result<i32> {
    let progress = CliProgress::new();
    let run = run_tool(ctx, tool, target.project.as_deref(), &args, &progress).await;
    progress.clear();
    Ok(print_run(&run?))
}

fn print_run(run: &ToolRun) -> i32 {
    print!("{}", run.output);
    if !run.output.is_empty() && !run.output.ends_with('\n') {
        println!();
    }
    run.summary.rc
}

async fn cmd_backup(ctx: &ToolContext, backup: BackupCommand) -> Result<i32> {
    if backup.wizard {
        let env_path = ctx.paths.tools_root.join(".env");
        let current = DropboxCredentials::load(&env_files(&ctx.paths, &ctx.cwd));
        let client = ctx.dropbox_client()?;
        let mut prompt = TerminalPrompt::new();
        return Ok(run_wizard(&client, &mut prompt, &current, &env_path).await?);
    }

    let args = ArgMap::default()
        .opt("config", backup.config)
        .opt("profile", backup.profile)
        .opt("project", backup.project)
        .opt("source", backup.source)
        .opt("dest", backup.dest)
        .opt("version", backup.archive_version)
        .flag("no_version", backup.no_version)
        .opt("tag", backup.tag)
        .opt("format", backup.format)
        .flag("include_hidden", backup.include_hidden)
        .opt("keep", backup.keep)
        .flag("list", backup.list)
        .flag("dry_run", backup.dry_run)
        .flag("no_verify", backup.no_verify)
        .flag("verbose", backup.script_verbose)
        .set("exclude", backup.exclude.join(","))
        .opt("dropbox_path", backup.dropbox_path)
        .opt("dropbox_mode", backup.dropbox_mode)
        .build();
    cmd_tool(ctx, Tool::Backup, &ProjectArg::default(), args).await
}

fn cmd_init(paths: &ConfigPaths, force: bool) -> Result<i32> {
    let outcomes = init_templates(paths, force)?;
    for outcome in &outcomes {
        match outcome {
            TemplateOutcome::Created(path) => println!("created     {}", path.display()),
            TemplateOutcome::Overwritten(path) => println!("overwritten {}", path.display()),
            TemplateOutcome::Kept(path) => println!("kept        {}", path.display()),
        }
    }
    println!("Config directory: {}", paths.config_dir.display());
    if !paths.exists() {
        return Err(eyre!("config directory was not created: {}", paths.config_dir.display()));
    }
    Ok(0)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner on stderr while a tool runs.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, run: &ToolRun) {
        self.spinner.finish_and_clear();
        info!(
            tool = %run.tool,
            rc = run.summary.rc,
            duration_ms = run.summary.duration_ms,
            "done"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_map_skips_unset_values() {
        let args = ArgMap::default()
            .opt::<String>("user", None)
            .flag("wrap_read", false)
            .list("include", Vec::new())
            .set("count", true)
            .opt("max_size", Some(10u64))
            .build();
        assert_eq!(args, json!({"count": true, "max_size": 10}));
    }

    #[test]
    fn cli_parses_tool_commands() {
        let cli = Cli::try_parse_from([
            "rt", "-vv", "search", "foo", "bar", "--include", "src/**/*.rs", "-p", "demo",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Search { terms, include, target, .. } => {
                assert_eq!(terms, vec!["foo", "bar"]);
                assert_eq!(include, vec!["src/**/*.rs"]);
                assert_eq!(target.project.as_deref(), Some("demo"));
            }
            _ => panic!("expected search"),
        }

        let cli = Cli::try_parse_from([
            "rt", "git", "merge", "--into", "main", "--from", "dev", "--yes",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Git { confirm: true, .. }));

        let cli = Cli::try_parse_from(["rt", "serve"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: 8765, .. }));
    }

    #[test]
    fn backup_version_flag_does_not_clash() {
        let cli = Cli::try_parse_from(["rt", "backup", "--version", "1.2", "--profile", "work"])
            .unwrap();
        match cli.command {
            Command::Backup(b) => {
                assert_eq!(b.archive_version.as_deref(), Some("1.2"));
                assert_eq!(b.profile.as_deref(), Some("work"));
            }
            _ => panic!("expected backup"),
        }
    }
}
