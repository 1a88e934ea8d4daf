use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use rtools_core::ToolContext;
use rtools_server::Server;
use rtools_shared::ConfigPaths;
use serde_json::{Value, json};

struct Harness {
    _dir: tempfile::TempDir,
    base: String,
    root: PathBuf,
    project: PathBuf,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical");
        let project = root.join("proj");
        std::fs::create_dir_all(project.join("src")).expect("mkdir");
        let paths = ConfigPaths::at(root.join("configs"));
        std::fs::create_dir_all(&paths.config_dir).expect("mkdir configs");

        let ctx = ToolContext::new(paths).with_cwd(&project);
        let server = Server::bind(ctx, "127.0.0.1:0").await.expect("bind");
        let addr: SocketAddr = server.local_addr().expect("addr");
        tokio::spawn(server.run());

        Self {
            _dir: dir,
            base: format!("http://{addr}"),
            root,
            project,
            client: reqwest::Client::new(),
        }
    }

    fn config_file(&self, name: &str) -> PathBuf {
        self.root.join("configs").join(name)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("send");
        let status = res.status().as_u16();
        (status, res.json().await.expect("json body"))
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .expect("send");
        let status = res.status().as_u16();
        (status, res.json().await.expect("json body"))
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, text).expect("write");
}

#[tokio::test]
async fn serves_embedded_ui() {
    let h = Harness::start().await;
    let res = h.client.get(format!("{}/", h.base)).send().await.expect("send");
    assert_eq!(res.status().as_u16(), 200);
    let content_type = res.headers()["content-type"].to_str().expect("header").to_string();
    assert!(content_type.starts_with("text/html"));
    assert_eq!(res.headers()["cache-control"], "no-store");
    assert!(res.text().await.expect("text").contains("/app.js"));

    let js = h.client.get(format!("{}/app.js", h.base)).send().await.expect("send");
    assert_eq!(js.status().as_u16(), 200);
}

#[tokio::test]
async fn unknown_paths_and_methods() {
    let h = Harness::start().await;
    let (status, body) = h.get("/api/nope").await;
    assert_eq!(status, 404);
    assert!(body["error"].as_str().expect("error").contains("/api/nope"));

    let (status, _) = h.post("/api/projects", json!({})).await;
    assert_eq!(status, 405);
}

#[tokio::test]
async fn projects_report_missing_registry() {
    let h = Harness::start().await;
    let (status, body) = h.get("/api/projects").await;
    assert_eq!(status, 200);
    assert_eq!(body["projects"], json!([]));
    assert!(body["error"].as_str().expect("error").contains("not found"));

    std::fs::write(
        h.config_file("projects_config.json"),
        json!({"projects": [{"name": "demo", "path": "proj"}]}).to_string(),
    )
    .expect("write registry");
    let (_, body) = h.get("/api/projects").await;
    assert_eq!(body["projects"][0]["name"], "demo");
    assert_eq!(body["projects"][0]["exists"], true);
}

#[tokio::test]
async fn run_search_and_reject_unknown_tool() {
    let h = Harness::start().await;
    write(&h.project, "src/lib.rs", "fn needle() {}\n");
    std::fs::write(
        h.config_file("projects_config.json"),
        json!({"projects": [{"name": "demo", "path": "proj"}]}).to_string(),
    )
    .expect("write registry");

    let (status, body) = h
        .post(
            "/api/run",
            json!({"tool": "search", "project": "demo", "args": {"terms": "needle"}}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["summary"]["rc"], 0);
    assert!(body["output"].as_str().expect("output").contains("== src/lib.rs =="));
    assert!(body["summary"]["duration_ms"].is_u64());

    let (status, body) = h.post("/api/run", json!({"tool": "deploy"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "unknown tool: deploy");
}

#[tokio::test]
async fn config_round_trip_and_validation() {
    let h = Harness::start().await;

    let (status, body) = h
        .post(
            "/api/config?name=search_config.json",
            json!({"content": "{\"search\": {\"include\": [\"*.rs\"]}}"}),
        )
        .await;
    assert_eq!(status, 200, "{body}");

    let (status, body) = h.get("/api/config?name=search_config.json").await;
    assert_eq!(status, 200);
    assert_eq!(body["exists"], true);
    let saved: Value =
        serde_json::from_str(body["content"].as_str().expect("content")).expect("json");
    assert_eq!(saved["search"]["include"][0], "*.rs");
    assert!(body.get("json_error").is_none());

    let (status, _) = h
        .post("/api/config?name=search_config.json", json!({"content": "{broken"}))
        .await;
    assert_eq!(status, 400);
    let on_disk = std::fs::read_to_string(h.config_file("search_config.json")).expect("read");
    assert!(on_disk.contains("*.rs"));

    let (status, _) = h.get("/api/config?name=..%2Fsecrets.json").await;
    assert_eq!(status, 400);

    let (_, files) = h.get("/api/config-files").await;
    let listed = files["files"].as_array().expect("files");
    assert_eq!(listed.len(), 12);
    assert!(listed.iter().any(|f| f["name"] == "search_config.json" && f["exists"] == true));
}

#[tokio::test]
async fn settings_round_trip() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/api/settings",
            json!({"default_project": "demo", "default_tool": "paste", "backup_script": ""}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["default_tool"], "paste");

    let (_, body) = h.get("/api/settings").await;
    assert_eq!(body["default_project"], "demo");
    assert_eq!(body["backup_script"], Value::Null);
}

#[tokio::test]
async fn clean_targets_persist() {
    let h = Harness::start().await;
    let (status, _) = h
        .post("/api/clean-targets", json!({"targets": {"pycache": false, "dist": true}}))
        .await;
    assert_eq!(status, 200);

    let (_, body) = h.get("/api/clean-targets").await;
    assert_eq!(body["targets"]["pycache"], false);
    assert_eq!(body["targets"]["dist"], true);

    let (status, _) = h
        .post("/api/clean-targets", json!({"targets": {"bogus": true}}))
        .await;
    assert_eq!(status, 400);

    let (_, config) = h.get("/api/clean-config").await;
    assert!(config["target_keys"].as_array().expect("keys").contains(&json!("editor")));
}

#[tokio::test]
async fn paste_run_updates_last_summaries() {
    let h = Harness::start().await;
    write(&h.project, "src/main.py", "print('hi')\n");
    let project = h.project.to_string_lossy().into_owned();

    let (status, body) = h
        .post("/api/run", json!({"tool": "paste", "project": project, "args": {}}))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["summary"]["paste_files"], 1);

    let (_, last) = h.get("/api/last-summaries").await;
    assert_eq!(last["paste"]["paste_files"], 1);
    assert_eq!(last["format"], Value::Null);
    assert_eq!(last["runs"][0]["tool"], "paste");
}

#[tokio::test]
async fn backup_endpoints_without_files() {
    let h = Harness::start().await;
    let (_, info) = h.get("/api/backup-info").await;
    assert_eq!(info["script_exists"], false);
    assert!(info["script"].as_str().expect("script").ends_with("backup.py"));

    let (_, profiles) = h.get("/api/backup-profiles").await;
    assert_eq!(profiles["names"], json!([]));
}

#[tokio::test]
async fn format_preview_requires_path() {
    let h = Harness::start().await;
    let (status, body) = h.post("/api/format-preview", json!({})).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().expect("error").contains("path is required"));
}

#[tokio::test]
async fn clean_endpoints_resolve_project() {
    let h = Harness::start().await;
    let project = h.project.to_string_lossy().into_owned();

    let (status, body) = h.get(&format!("/api/clean-targets?project={project}")).await;
    assert_eq!(status, 200, "{body}");
    assert!(body["targets"].is_object());

    let (status, body) = h.get("/api/clean-config?project=nowhere").await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().expect("error").contains("unknown project"));
}

#[tokio::test]
async fn git_lists_outside_a_repository_are_empty() {
    let h = Harness::start().await;
    let project = h.project.to_string_lossy().into_owned();

    let (status, body) = h.get(&format!("/api/git/branches?project={project}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["branches"], json!([]));
    assert_eq!(body["current"], Value::Null);
    assert!(body["error"].as_str().expect("error").contains("not a git repository"));

    let (status, body) = h.get(&format!("/api/git/remotes?project={project}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["remotes"], json!([]));
    assert!(body.get("error").is_some());
}
