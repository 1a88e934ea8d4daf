//! Request routing and the `/api/*` handlers.

use std::path::PathBuf;
use std::time::Instant;

use rtools_backup::{BackupSettings, backup_info, load_profiles};
use rtools_clean::{CLEAN_CONFIG, CleanSettings, save_targets, target_keys};
use rtools_core::{ProgressReporter, debug_config, dropbox_diag, preview_format, run_tool};
use rtools_git::{current_branch, list_branches, list_remotes};
use rtools_remote::repo_info;
use rtools_shared::{
    CONFIG_WHITELIST, Result, RtoolsError, Tool, ToolRun, UiSettings, load_projects, load_recipes,
    load_ui_settings, save_ui_settings, write_json_pretty,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::assets;
use crate::http::{HttpRequest, Response};
use crate::state::AppState;

/// Every routed path with the methods it accepts.
const ROUTES: &[(&str, &[&str])] = &[
    ("/", &["GET"]),
    ("/index.html", &["GET"]),
    ("/app.js", &["GET"]),
    ("/app.css", &["GET"]),
    ("/favicon.ico", &["GET"]),
    ("/api/projects", &["GET"]),
    ("/api/recipes", &["GET"]),
    ("/api/run", &["POST"]),
    ("/api/config", &["GET", "POST"]),
    ("/api/config-files", &["GET"]),
    ("/api/settings", &["GET", "POST"]),
    ("/api/clean-config", &["GET"]),
    ("/api/clean-targets", &["GET", "POST"]),
    ("/api/backup-info", &["GET"]),
    ("/api/backup-profiles", &["GET"]),
    ("/api/git/branches", &["GET"]),
    ("/api/git/remotes", &["GET"]),
    ("/api/gh-raw/repo-info", &["GET"]),
    ("/api/format-preview", &["POST"]),
    ("/api/diag/dropbox", &["GET"]),
    ("/api/debug-config", &["GET"]),
    ("/api/last-summaries", &["GET"]),
];

/// Logs tool phases for runs started from the UI.
struct LogProgress;

impl ProgressReporter for LogProgress {
    fn phase(&self, name: &str) {
        debug!(phase = name, "run phase");
    }
    fn done(&self, run: &ToolRun) {
        debug!(run_id = %run.run_id, rc = run.summary.rc, "run done");
    }
}

fn error_response(e: &RtoolsError) -> Response {
    let status = if e.is_client_error() { 400 } else { 500 };
    if status == 500 {
        warn!(error = %e, "request failed");
    }
    Response::error(status, &e.to_string())
}

fn respond(result: Result<Value>) -> Response {
    match result {
        Ok(value) => Response::ok(&value),
        Err(e) => error_response(&e),
    }
}

/// Run synchronous work (subprocesses, file walks) off the reactor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RtoolsError::Process(format!("worker task failed: {e}")))?
}

fn body_str(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Effective project root for `project` (registry name or path).
fn project_root(state: &AppState, project: Option<&str>) -> Result<PathBuf> {
    let selected = state.ctx.resolve_project(project)?;
    Ok(state.ctx.load_config(None, selected, json!({})).project_root())
}

pub async fn route(state: &AppState, req: &HttpRequest) -> Response {
    let path = req.path();
    let method = if req.method == "HEAD" { "GET" } else { req.method.as_str() };
    let Some((_, methods)) = ROUTES.iter().find(|(p, _)| *p == path) else {
        return Response::error(404, &format!("not found: {path}"));
    };
    if !methods.contains(&method) {
        return Response::error(405, "method not allowed");
    }

    match (method, path.as_str()) {
        ("GET", "/" | "/index.html") => {
            Response::asset("text/html; charset=utf-8", assets::INDEX_HTML.as_bytes())
        }
        ("GET", "/app.js") => {
            Response::asset("text/javascript; charset=utf-8", assets::APP_JS.as_bytes())
        }
        ("GET", "/app.css") => {
            Response::asset("text/css; charset=utf-8", assets::APP_CSS.as_bytes())
        }
        ("GET", "/favicon.ico") => {
            Response::asset("image/svg+xml", assets::FAVICON_SVG.as_bytes())
        }
        ("GET", "/api/projects") => projects(state),
        ("GET", "/api/recipes") => recipes(state),
        ("POST", "/api/run") => run(state, req).await,
        ("GET", "/api/config") => respond(read_config(state, req)),
        ("POST", "/api/config") => write_config(state, req),
        ("GET", "/api/config-files") => Response::ok(&config_files(state)),
        ("GET", "/api/settings") => Response::ok(&json!(load_ui_settings(&state.ctx.paths))),
        ("POST", "/api/settings") => save_settings(state, req),
        ("GET", "/api/clean-config") => respond(clean_config(state, req)),
        ("GET", "/api/clean-targets") => respond(
            clean_settings(state, req).map(|s| json!({ "targets": s.targets })),
        ),
        ("POST", "/api/clean-targets") => save_clean_targets(state, req),
        ("GET", "/api/backup-info") => respond(
            BackupSettings::load(&state.ctx.paths)
                .map(|s| json!(backup_info(&state.ctx.paths, &s))),
        ),
        ("GET", "/api/backup-profiles") => respond(backup_profiles(state)),
        ("GET", "/api/git/branches") => git_branches(state, req).await,
        ("GET", "/api/git/remotes") => git_remotes(state, req).await,
        ("GET", "/api/gh-raw/repo-info") => respond(gh_repo_info(state, req).await),
        ("POST", "/api/format-preview") => format_preview(state, req).await,
        ("GET", "/api/diag/dropbox") => respond(
            dropbox_diag(&state.ctx)
                .await
                .map(|report| json!({ "rc": report.rc(), "output": report.text() })),
        ),
        ("GET", "/api/debug-config") => respond(debug_info(state, req)),
        ("GET", "/api/last-summaries") => Response::ok(&json!(state.summaries())),
        _ => Response::error(405, "method not allowed"),
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

fn projects(state: &AppState) -> Response {
    let config = state.ctx.paths.file("projects_config.json");
    match load_projects(&state.ctx.paths) {
        Ok(projects) => Response::ok(&json!({ "projects": projects, "config": config })),
        Err(e) => Response::ok(&json!({
            "projects": [],
            "error": e.to_string(),
            "config": config,
        })),
    }
}

fn recipes(state: &AppState) -> Response {
    match load_recipes(&state.ctx.paths) {
        Ok(recipes) => Response::ok(&json!({ "recipes": recipes })),
        Err(e) => Response::ok(&json!({ "recipes": [], "error": e.to_string() })),
    }
}

// ---------------------------------------------------------------------------
// Tool runs
// ---------------------------------------------------------------------------

async fn run(state: &AppState, req: &HttpRequest) -> Response {
    let started = Instant::now();
    let body = match req.json() {
        Ok(body) => body,
        Err(response) => return response,
    };
    let Some(tool_name) = body_str(&body, "tool") else {
        return Response::error(400, "tool is required");
    };
    let tool: Tool = match tool_name.parse() {
        Ok(tool) => tool,
        Err(_) => return Response::error(400, &format!("unknown tool: {tool_name}")),
    };
    let project = body_str(&body, "project");
    let args = body.get("args").cloned().unwrap_or_else(|| json!({}));

    match run_tool(&state.ctx, tool, project.as_deref(), &args, &LogProgress).await {
        Ok(run) => {
            state.record(&run);
            Response::ok(&json!({
                "run_id": run.run_id,
                "tool": run.tool,
                "finished_at": run.finished_at,
                "output": run.output,
                "summary": run.summary,
            }))
        }
        Err(e) => {
            let status = if e.is_client_error() { 400 } else { 500 };
            warn!(%tool, error = %e, "run failed");
            Response::json(
                status,
                &json!({
                    "error": e.to_string(),
                    "summary": {
                        "rc": 1,
                        "duration_ms": started.elapsed().as_millis() as u64,
                    },
                }),
            )
        }
    }
}

async fn format_preview(state: &AppState, req: &HttpRequest) -> Response {
    let body = match req.json() {
        Ok(body) => body,
        Err(response) => return response,
    };
    let project = body_str(&body, "project");
    let rel = body_str(&body, "path").unwrap_or_default();
    respond(
        preview_format(&state.ctx, project.as_deref(), &rel)
            .await
            .map(|report| json!({ "rc": report.rc(), "output": report.text() })),
    )
}

// ---------------------------------------------------------------------------
// Config files
// ---------------------------------------------------------------------------

fn config_name(req: &HttpRequest, body: Option<&Value>) -> Result<String> {
    req.query("name")
        .or_else(|| body.and_then(|b| body_str(b, "name")))
        .ok_or_else(|| RtoolsError::validation("name is required"))
}

fn read_config(state: &AppState, req: &HttpRequest) -> Result<Value> {
    let name = config_name(req, None)?;
    let path = state.ctx.paths.whitelisted(&name)?;
    let (exists, content) = match std::fs::read_to_string(&path) {
        Ok(content) => (true, content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (false, String::new()),
        Err(e) => return Err(RtoolsError::io(&path, e)),
    };
    let mut out = json!({
        "name": name,
        "path": path,
        "exists": exists,
        "content": content,
    });
    if !content.trim().is_empty() {
        if let Err(e) = serde_json::from_str::<Value>(&content) {
            out["json_error"] = Value::String(e.to_string());
        }
    }
    Ok(out)
}

fn write_config(state: &AppState, req: &HttpRequest) -> Response {
    let body = match req.json() {
        Ok(body) => body,
        Err(response) => return response,
    };
    let result = config_name(req, Some(&body)).and_then(|name| {
        let path = state.ctx.paths.whitelisted(&name)?;
        let value = match body.get("content") {
            Some(Value::String(text)) => serde_json::from_str::<Value>(text)
                .map_err(|e| RtoolsError::validation(format!("invalid JSON: {e}")))?,
            Some(other) => other.clone(),
            None => return Err(RtoolsError::validation("content is required")),
        };
        write_json_pretty(&path, &value)?;
        debug!(name = %name, "config file saved");
        Ok(json!({ "ok": true, "name": name, "path": path }))
    });
    respond(result)
}

fn config_files(state: &AppState) -> Value {
    let files: Vec<Value> = CONFIG_WHITELIST
        .iter()
        .map(|name| {
            let path = state.ctx.paths.file(name);
            json!({ "name": name, "exists": path.is_file(), "path": path })
        })
        .collect();
    json!({ "config_dir": state.ctx.paths.config_dir, "files": files })
}

fn save_settings(state: &AppState, req: &HttpRequest) -> Response {
    let body = match req.json() {
        Ok(body) => body,
        Err(response) => return response,
    };
    let settings: UiSettings = match serde_json::from_value(body) {
        Ok(settings) => settings,
        Err(e) => return Response::error(400, &format!("invalid settings: {e}")),
    };
    respond(
        save_ui_settings(&state.ctx.paths, &settings)
            .map(|()| json!(load_ui_settings(&state.ctx.paths))),
    )
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

/// Effective clean settings, including the `?project=` layers.
fn clean_settings(state: &AppState, req: &HttpRequest) -> Result<CleanSettings> {
    let selected = state.ctx.resolve_project(req.query("project").as_deref())?;
    state
        .ctx
        .load_config(Some(Tool::Clean), selected, json!({}))
        .section("clean")
}

fn clean_config(state: &AppState, req: &HttpRequest) -> Result<Value> {
    let settings = clean_settings(state, req)?;
    Ok(json!({
        "clean": settings,
        "target_keys": target_keys(),
        "path": state.ctx.paths.file(CLEAN_CONFIG),
    }))
}

fn save_clean_targets(state: &AppState, req: &HttpRequest) -> Response {
    let body = match req.json() {
        Ok(body) => body,
        Err(response) => return response,
    };
    let Some(targets) = body.get("targets").and_then(Value::as_object) else {
        return Response::error(400, "targets must be an object");
    };
    let known = target_keys();
    if let Some(unknown) = targets.keys().find(|k| !known.contains(&k.as_str())) {
        return Response::error(400, &format!("unknown clean target: {unknown}"));
    }
    respond(
        save_targets(&state.ctx.paths, targets)
            .map(|path| json!({ "ok": true, "path": path, "targets": targets })),
    )
}

// ---------------------------------------------------------------------------
// Backup, git, gh-raw
// ---------------------------------------------------------------------------

fn backup_profiles(state: &AppState) -> Result<Value> {
    Ok(match load_profiles(&state.ctx.paths)? {
        Some(file) => json!({
            "path": file.path,
            "default": file.default_profile(),
            "names": file.names(),
            "profiles": file.profiles,
        }),
        None => json!({
            "path": Value::Null,
            "default": Value::Null,
            "names": [],
            "profiles": {},
        }),
    })
}

// Non-repositories answer 200 with an `error` and empty lists.

async fn git_branches(state: &AppState, req: &HttpRequest) -> Response {
    let root = match project_root(state, req.query("project").as_deref()) {
        Ok(root) => root,
        Err(e) => return error_response(&e),
    };
    let listed = blocking(move || {
        let branches = list_branches(&root)?;
        let current = current_branch(&root)?;
        Ok(json!({ "branches": branches, "current": current }))
    })
    .await;
    Response::ok(&listed.unwrap_or_else(|e| {
        json!({ "error": e.to_string(), "branches": [], "current": Value::Null })
    }))
}

async fn git_remotes(state: &AppState, req: &HttpRequest) -> Response {
    let root = match project_root(state, req.query("project").as_deref()) {
        Ok(root) => root,
        Err(e) => return error_response(&e),
    };
    let listed = blocking(move || Ok(json!({ "remotes": list_remotes(&root)? }))).await;
    Response::ok(&listed.unwrap_or_else(|e| json!({ "error": e.to_string(), "remotes": [] })))
}

async fn gh_repo_info(state: &AppState, req: &HttpRequest) -> Result<Value> {
    let selected = state.ctx.resolve_project(req.query("project").as_deref())?;
    let cfg = state.ctx.load_config(Some(Tool::GhRaw), selected, json!({}));
    let remote = req
        .query("remote")
        .or_else(|| {
            cfg.get("gh_raw.remote")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| "origin".to_string());
    let root = cfg.project_root();
    blocking(move || Ok(json!(repo_info(&root, &remote)))).await
}

fn debug_info(state: &AppState, req: &HttpRequest) -> Result<Value> {
    let tool = req.query("tool").map(|t| t.parse::<Tool>()).transpose()?;
    debug_config(&state.ctx, tool, req.query("project").as_deref())
}
