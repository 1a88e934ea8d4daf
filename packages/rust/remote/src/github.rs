//! GitHub raw-link listing.
//!
//! Fetches the recursive git tree of a branch through the GitHub REST API
//! and prints one `raw.githubusercontent.com` URL per blob, or a
//! `/read(urls: [...])` block of commit-pinned blob URLs when `wrap_read`
//! is set. The repository is either configured by hand (`manual` mode) or
//! derived from the git remote of the selected project (`project` mode).

use std::path::Path;

use reqwest::{Client, Response, StatusCode};
use rtools_git::Repo;
use rtools_shared::{LoadedConfig, Report, Result, RtoolsError, nullable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{http_client, trim_base};

pub const GITHUB_API: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";
const BLOB_BASE: &str = "https://github.com";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where the repository coordinates come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GhRawMode {
    #[default]
    Manual,
    Project,
}

/// `gh_raw` section of the merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhRawSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub user: String,
    #[serde(default, deserialize_with = "nullable")]
    pub repo: String,
    /// Blank means the project's current branch in `project` mode and
    /// `main` otherwise.
    #[serde(default, deserialize_with = "nullable")]
    pub branch: String,
    #[serde(default, deserialize_with = "nullable")]
    pub path_prefix: String,
    #[serde(default)]
    pub wrap_read: bool,
    #[serde(default)]
    pub mode: GhRawMode,
    /// Remote consulted in `project` mode.
    #[serde(default = "default_remote", deserialize_with = "nullable")]
    pub remote: String,
}

impl Default for GhRawSettings {
    fn default() -> Self {
        Self {
            user: String::new(),
            repo: String::new(),
            branch: String::new(),
            path_prefix: String::new(),
            wrap_read: false,
            mode: GhRawMode::Manual,
            remote: default_remote(),
        }
    }
}

fn default_branch() -> String {
    "main".into()
}

fn default_remote() -> String {
    "origin".into()
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// One entry of a git tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Response of `GET /repos/{owner}/{repo}/git/trees/{ref}?recursive=1`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitTree {
    #[serde(default)]
    pub tree: Vec<TreeNode>,
    #[serde(default)]
    pub truncated: bool,
}

/// Minimal GitHub REST client. Sends `GITHUB_TOKEN` as a bearer token
/// when one is configured.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_base: GITHUB_API.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Client authenticated with `GITHUB_TOKEN`, if set.
    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var("GITHUB_TOKEN").ok())
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = trim_base(base);
        self
    }

    async fn send(&self, url: &str) -> Result<Response> {
        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: {e}")))
    }

    async fn json<T: serde::de::DeserializeOwned>(url: &str, response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: invalid response: {e}")))
    }

    /// Fetch the recursive tree of `git_ref` (branch name or commit).
    #[instrument(skip(self))]
    pub async fn fetch_tree(&self, user: &str, repo: &str, git_ref: &str) -> Result<GitTree> {
        let url = format!(
            "{}/repos/{user}/{repo}/git/trees/{git_ref}?recursive=1",
            self.api_base
        );
        let response = self.send(&url).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RtoolsError::Network(format!(
                "{url}: HTTP 404. Check that user/repo/branch are correct and that the \
                 branch exists. Private repository? Set GITHUB_TOKEN in the environment."
            )));
        }
        if !status.is_success() {
            return Err(RtoolsError::Network(format!("{url}: HTTP {status}")));
        }
        let tree: GitTree = Self::json(&url, response).await?;
        debug!(entries = tree.tree.len(), truncated = tree.truncated, "fetched tree");
        Ok(tree)
    }

    /// Latest commit SHA of `branch`. Falls back to `/commits/{ref}` when
    /// the branches endpoint answers 404 (e.g. for tags).
    #[instrument(skip(self))]
    pub async fn resolve_commit_sha(&self, user: &str, repo: &str, branch: &str) -> Result<String> {
        let url = format!("{}/repos/{user}/{repo}/branches/{branch}", self.api_base);
        let response = self.send(&url).await?;
        let status = response.status();
        if status.is_success() {
            let data: Value = Self::json(&url, response).await?;
            return data
                .pointer("/commit/sha")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| {
                    RtoolsError::Network(format!("{url}: unexpected response (missing commit.sha)"))
                });
        }
        if status != StatusCode::NOT_FOUND {
            return Err(RtoolsError::Network(format!("{url}: HTTP {status}")));
        }

        let url = format!("{}/repos/{user}/{repo}/commits/{branch}", self.api_base);
        let response = self.send(&url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RtoolsError::Network(format!("{url}: HTTP {status}")));
        }
        let data: Value = Self::json(&url, response).await?;
        data.get("sha")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                RtoolsError::Network(format!("{url}: unexpected response (missing sha)"))
            })
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Blob paths equal to `prefix` or below it. An empty prefix keeps all.
pub fn filter_paths(nodes: &[TreeNode], prefix: &str) -> Vec<String> {
    let prefix = prefix.trim().trim_end_matches('/');
    nodes
        .iter()
        .filter(|n| n.kind == "blob" && !n.path.is_empty())
        .filter(|n| {
            prefix.is_empty()
                || n.path == prefix
                || n.path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .map(|n| n.path.clone())
        .collect()
}

/// Owner and repository name from a GitHub remote URL.
///
/// Accepts `https://github.com/o/r(.git)`, `ssh://git@github.com/o/r.git`
/// and the scp form `git@github.com:o/r.git`.
pub fn parse_github_remote(remote: &str) -> Result<(String, String)> {
    let remote = remote.trim();
    let (host, path) = match scp_form(remote) {
        Some(parts) => parts,
        None => {
            let url = Url::parse(remote).map_err(|e| {
                RtoolsError::validation(format!("cannot parse remote {remote:?}: {e}"))
            })?;
            let host = url.host_str().unwrap_or_default().to_string();
            (host, url.path().to_string())
        }
    };
    let host = host.to_ascii_lowercase();
    if host != "github.com" && !host.ends_with(".github.com") {
        return Err(RtoolsError::validation(format!(
            "not a GitHub remote: {remote}"
        )));
    }

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return Err(RtoolsError::validation(format!(
            "remote has no owner/repo path: {remote}"
        )));
    }
    Ok((owner.to_string(), repo.to_string()))
}

/// `user@host:path` without a scheme.
fn scp_form(remote: &str) -> Option<(String, String)> {
    if remote.contains("://") {
        return None;
    }
    let (user_host, path) = remote.split_once(':')?;
    let host = user_host.rsplit('@').next().unwrap_or(user_host);
    Some((host.to_string(), path.to_string()))
}

/// Resolved repository coordinates for one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    user: String,
    repo: String,
    branch: String,
}

fn resolve_target(cfg: &LoadedConfig, settings: &GhRawSettings) -> Result<Target> {
    match settings.mode {
        GhRawMode::Manual => {
            if settings.user.trim().is_empty() || settings.repo.trim().is_empty() {
                return Err(RtoolsError::validation(
                    "missing 'user' or 'repo' in gh_raw config",
                ));
            }
            Ok(Target {
                user: settings.user.trim().to_string(),
                repo: settings.repo.trim().to_string(),
                branch: non_empty(&settings.branch).unwrap_or_else(default_branch),
            })
        }
        GhRawMode::Project => {
            let repo = Repo::open(&cfg.project_root())?;
            let remote_url = repo.remote_url(&settings.remote).ok_or_else(|| {
                RtoolsError::validation(format!("remote '{}' not found", settings.remote))
            })?;
            let (user, name) = parse_github_remote(&remote_url)?;
            let branch = non_empty(&settings.branch)
                .or_else(|| non_empty(&repo.current_branch()))
                .unwrap_or_else(default_branch);
            Ok(Target {
                user,
                repo: name,
                branch,
            })
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Run `gh-raw` with the merged config.
///
/// Missing coordinates produce a message and rc 2; API failures are
/// returned as errors.
#[instrument(skip_all)]
pub async fn run_gh_raw(cfg: &LoadedConfig, client: &GitHubClient) -> Result<Report> {
    let settings: GhRawSettings = cfg.section("gh_raw")?;
    let mut report = Report::new();

    let target = match resolve_target(cfg, &settings) {
        Ok(target) => target,
        Err(e) => {
            report.line(format!("gh-raw: {e}"));
            report.set_rc(2);
            return Ok(report);
        }
    };
    info!(user = %target.user, repo = %target.repo, branch = %target.branch, "listing tree");

    let tree = client
        .fetch_tree(&target.user, &target.repo, &target.branch)
        .await?;
    if tree.tree.is_empty() {
        report.line("gh-raw: empty tree or missing 'tree' in response.");
        return Ok(report);
    }

    let paths = filter_paths(&tree.tree, &settings.path_prefix);
    if tree.truncated {
        report.line("⚠ gh-raw: Result list is truncated by GitHub API; output may be incomplete.");
    }
    report.metric("gh_raw_paths", paths.len() as i64);

    if !settings.wrap_read {
        let base = format!(
            "{RAW_BASE}/{}/{}/{}/",
            target.user, target.repo, target.branch
        );
        for path in &paths {
            report.line(format!("{base}{path}"));
        }
        return Ok(report);
    }

    let sha = client
        .resolve_commit_sha(&target.user, &target.repo, &target.branch)
        .await?;
    let base = format!("{BLOB_BASE}/{}/{}/blob/{sha}/", target.user, target.repo);
    report.line("/read(urls: [");
    for (i, path) in paths.iter().enumerate() {
        let sep = if i + 1 < paths.len() { "," } else { "" };
        report.line(format!("  \"{base}{path}\"{sep}"));
    }
    report.line("])");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Repo info
// ---------------------------------------------------------------------------

/// GitHub coordinates and branches of a local checkout, for the UI.
/// `error` is set (and the rest left empty) when they cannot be derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoInfo {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub remote_url: Option<String>,
    pub current_branch: Option<String>,
    pub branches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoInfo {
    fn failed(error: impl Into<String>, remote_url: Option<String>) -> Self {
        Self {
            remote_url,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub fn repo_info(root: &Path, remote: &str) -> RepoInfo {
    let repo = match Repo::open(root) {
        Ok(repo) => repo,
        Err(_) => {
            return RepoInfo::failed(format!("not a git repository: {}", root.display()), None);
        }
    };
    let Some(remote_url) = repo.remote_url(remote) else {
        return RepoInfo::failed(format!("remote '{remote}' not found"), None);
    };
    let (owner, name) = match parse_github_remote(&remote_url) {
        Ok(parts) => parts,
        Err(e) => {
            return RepoInfo::failed(format!("cannot parse GitHub remote: {e}"), Some(remote_url));
        }
    };
    RepoInfo {
        owner: Some(owner),
        repo: Some(name),
        remote_url: Some(remote_url),
        current_branch: non_empty(&repo.current_branch()),
        branches: repo.branches().unwrap_or_default(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtools_shared::process::{find_on_path, run_captured};
    use rtools_shared::{ConfigLoader, ConfigPaths};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(root: &Path, overrides: Value) -> LoadedConfig {
        let paths = ConfigPaths::at(root.join(".no-configs"));
        ConfigLoader::new(&paths)
            .cwd(root)
            .project(Some(root.to_path_buf()))
            .overrides(overrides)
            .load()
    }

    fn tree_body(truncated: bool) -> Value {
        json!({
            "sha": "abc",
            "truncated": truncated,
            "tree": [
                {"path": "README.md", "type": "blob"},
                {"path": "src", "type": "tree"},
                {"path": "src/main.rs", "type": "blob"},
                {"path": "src/lib.rs", "type": "blob"},
                {"path": "srcx/other.rs", "type": "blob"}
            ]
        })
    }

    #[test]
    fn test_filter_paths_prefix() {
        let nodes: Vec<TreeNode> =
            serde_json::from_value(tree_body(false)["tree"].clone()).expect("nodes");
        assert_eq!(filter_paths(&nodes, "src/"), vec!["src/main.rs", "src/lib.rs"]);
        assert_eq!(filter_paths(&nodes, "README.md"), vec!["README.md"]);
        assert_eq!(filter_paths(&nodes, "").len(), 4);
    }

    #[test]
    fn test_parse_github_remote_forms() {
        let expected = ("octo".to_string(), "demo".to_string());
        assert_eq!(parse_github_remote("https://github.com/octo/demo.git").unwrap(), expected);
        assert_eq!(parse_github_remote("https://github.com/octo/demo").unwrap(), expected);
        assert_eq!(parse_github_remote("git@github.com:octo/demo.git").unwrap(), expected);
        assert_eq!(
            parse_github_remote("ssh://git@github.com/octo/demo.git").unwrap(),
            expected
        );
        assert!(parse_github_remote("https://gitlab.com/octo/demo.git").is_err());
        assert!(parse_github_remote("https://github.com/octo").is_err());
    }

    #[tokio::test]
    async fn test_raw_urls_with_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_body(false)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            dir.path(),
            json!({"gh_raw": {"user": "octo", "repo": "demo", "path_prefix": "src"}}),
        );
        let client = GitHubClient::new(None).unwrap().with_api_base(&server.uri());
        let report = run_gh_raw(&cfg, &client).await.unwrap();

        assert_eq!(report.rc(), 0);
        assert_eq!(
            report.text(),
            "https://raw.githubusercontent.com/octo/demo/main/src/main.rs\n\
             https://raw.githubusercontent.com/octo/demo/main/src/lib.rs\n"
        );
        assert_eq!(report.metrics()["gh_raw_paths"], 2);
    }

    #[tokio::test]
    async fn test_wrap_read_falls_back_to_commits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/git/trees/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tree_body(true)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/branches/v1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/commits/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "deadbeef"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            dir.path(),
            json!({"gh_raw": {
                "user": "octo", "repo": "demo", "branch": "v1",
                "path_prefix": "src", "wrap_read": true
            }}),
        );
        let client = GitHubClient::new(None).unwrap().with_api_base(&server.uri());
        let report = run_gh_raw(&cfg, &client).await.unwrap();

        let text = report.text();
        assert!(text.starts_with("⚠ gh-raw: Result list is truncated"));
        assert!(text.contains(
            "/read(urls: [\n  \"https://github.com/octo/demo/blob/deadbeef/src/main.rs\",\n  \
             \"https://github.com/octo/demo/blob/deadbeef/src/lib.rs\"\n])\n"
        ));
    }

    #[tokio::test]
    async fn test_branch_sha_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/branches/main"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"commit": {"sha": "cafe"}})),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::new(Some("secret".into()))
            .unwrap()
            .with_api_base(&server.uri());
        let sha = client.resolve_commit_sha("octo", "demo", "main").await.unwrap();
        assert_eq!(sha, "cafe");
    }

    #[tokio::test]
    async fn test_missing_tree_explains_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/gone/git/trees/main"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::new(None).unwrap().with_api_base(&server.uri());
        let err = client.fetch_tree("octo", "gone", "main").await.unwrap_err();
        assert!(err.to_string().contains("Set GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn test_missing_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), json!({"gh_raw": {"user": "octo"}}));
        let client = GitHubClient::new(None).unwrap().with_api_base("http://127.0.0.1:9");
        let report = run_gh_raw(&cfg, &client).await.unwrap();
        assert_eq!(report.rc(), 2);
        assert!(report.text().contains("missing 'user' or 'repo'"));
    }

    #[test]
    fn test_project_mode_uses_current_branch() {
        if find_on_path("git").is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = |args: &[&str]| {
            let out = run_captured("git", args, dir.path()).expect("git");
            assert!(out.success(), "git {args:?}: {}", out.output);
        };
        git(&["init", "-q"]);
        git(&["symbolic-ref", "HEAD", "refs/heads/feature"]);
        git(&["remote", "add", "origin", "https://github.com/octo/demo.git"]);

        let cfg = config(dir.path(), json!({"gh_raw": {"mode": "project"}}));
        let settings: GhRawSettings = cfg.section("gh_raw").unwrap();
        let target = resolve_target(&cfg, &settings).unwrap();
        assert_eq!(target.user, "octo");
        assert_eq!(target.branch, "feature");

        let cfg = config(
            dir.path(),
            json!({"gh_raw": {"mode": "project", "branch": "release"}}),
        );
        let settings: GhRawSettings = cfg.section("gh_raw").unwrap();
        assert_eq!(resolve_target(&cfg, &settings).unwrap().branch, "release");

        let cfg = config(dir.path(), json!({"gh_raw": {"user": "octo", "repo": "demo"}}));
        let settings: GhRawSettings = cfg.section("gh_raw").unwrap();
        assert_eq!(resolve_target(&cfg, &settings).unwrap().branch, "main");
    }

    #[test]
    fn test_repo_info_from_remote() {
        if find_on_path("git").is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = |args: &[&str]| {
            let out = run_captured("git", args, dir.path()).expect("git");
            assert!(out.success(), "git {args:?}: {}", out.output);
        };
        git(&["init", "-q"]);
        git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&["remote", "add", "origin", "git@github.com:octo/demo.git"]);

        let info = repo_info(dir.path(), "origin");
        assert_eq!(info.owner.as_deref(), Some("octo"));
        assert_eq!(info.repo.as_deref(), Some("demo"));
        assert_eq!(info.error, None);

        let missing = repo_info(dir.path(), "upstream");
        assert_eq!(missing.error.as_deref(), Some("remote 'upstream' not found"));
    }
}
