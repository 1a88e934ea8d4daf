//! Tools that talk to remote HTTP services.
//!
//! - [`github`]: list raw or blob URLs for files in a GitHub repository
//!   tree (`rt gh-raw`).
//! - [`dropbox`]: check the Dropbox credentials used by the backup script
//!   (`rt diag dropbox`) and obtain a refresh token (`rt backup --wizard`).
//!
//! Base URLs are injectable so tests can point the clients at a mock server.

pub mod dropbox;
pub mod github;

use std::time::Duration;

use reqwest::Client;
use rtools_shared::{Result, RtoolsError};

pub use dropbox::{
    DROPBOX_KEYS, DropboxClient, DropboxCredentials, WizardPrompt, diag_dropbox, env_files,
    run_wizard,
};
pub use github::{
    GhRawMode, GhRawSettings, GitHubClient, RepoInfo, filter_paths, parse_github_remote,
    repo_info, run_gh_raw,
};

/// Default timeout in seconds for outbound requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("rtools/", env!("CARGO_PKG_VERSION"));

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| RtoolsError::Network(format!("failed to build HTTP client: {e}")))
}

/// Strip trailing slashes so paths can be appended with `/`.
fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}
