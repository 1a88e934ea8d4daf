//! Dropbox credential diagnostics and the refresh-token wizard.
//!
//! The backup script uploads with a long-lived refresh token. `diag`
//! checks that the three credentials are present and that they can be
//! exchanged for an access token; the wizard walks the user through the
//! OAuth code flow and stores the result in `<tools_root>/.env`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use rtools_shared::{ConfigPaths, Report, Result, RtoolsError, dotenv};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;
use url::form_urlencoded;

use crate::{http_client, trim_base};

pub const DROPBOX_API: &str = "https://api.dropboxapi.com";
pub const DROPBOX_WWW: &str = "https://www.dropbox.com";

/// Environment keys the backup script reads.
pub const DROPBOX_KEYS: [&str; 3] = [
    "DROPBOX_APP_KEY",
    "DROPBOX_APP_SECRET",
    "DROPBOX_REFRESH_TOKEN",
];

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// `.env` files consulted, in priority order: working directory, tools
/// root, `backup_app/` under the tools root, then `$HOME`.
pub fn env_files(paths: &ConfigPaths, cwd: &Path) -> Vec<PathBuf> {
    let mut files = vec![
        cwd.join(".env"),
        paths.tools_root.join(".env"),
        stray_env_file(paths),
    ];
    if let Some(home) = dirs::home_dir() {
        files.push(home.join(".env"));
    }
    let mut seen = Vec::new();
    files.retain(|f| {
        if seen.contains(f) {
            return false;
        }
        seen.push(f.clone());
        true
    });
    files
}

/// Credentials stored next to the backup script instead of the tools root.
fn stray_env_file(paths: &ConfigPaths) -> PathBuf {
    paths.tools_root.join("backup_app").join(".env")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropboxCredentials {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub refresh_token: Option<String>,
}

impl DropboxCredentials {
    /// Build from a key lookup; blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            app_key: get(DROPBOX_KEYS[0]),
            app_secret: get(DROPBOX_KEYS[1]),
            refresh_token: get(DROPBOX_KEYS[2]),
        }
    }

    /// Process environment first, then the `.env` files. File values never
    /// override variables already set in the environment.
    pub fn load(files: &[PathBuf]) -> Self {
        let from_files = dotenv::collect(files.iter().map(PathBuf::as_path), |key| {
            std::env::var_os(key).is_some_and(|v| !v.is_empty())
        });
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| from_files.get(key).cloned())
        })
    }

    fn present(&self) -> [bool; 3] {
        [
            self.app_key.is_some(),
            self.app_secret.is_some(),
            self.refresh_token.is_some(),
        ]
    }

    /// Names of the keys that are not set.
    pub fn missing(&self) -> Vec<&'static str> {
        DROPBOX_KEYS
            .iter()
            .zip(self.present())
            .filter(|(_, present)| !present)
            .map(|(key, _)| *key)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountName {
    pub display_name: String,
}

/// Subset of `users/get_current_account`.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub name: AccountName,
}

#[derive(Debug, Clone)]
pub struct DropboxClient {
    http: Client,
    api_base: String,
    www_base: String,
}

impl DropboxClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_base: DROPBOX_API.to_string(),
            www_base: DROPBOX_WWW.to_string(),
        })
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = trim_base(base);
        self
    }

    pub fn with_www_base(mut self, base: &str) -> Self {
        self.www_base = trim_base(base);
        self
    }

    /// Page where the user approves the app and receives a code.
    /// Requests offline access so the exchange yields a refresh token.
    pub fn authorize_url(&self, app_key: &str) -> Result<Url> {
        let raw = format!("{}/oauth2/authorize", self.www_base);
        let mut url = Url::parse(&raw)
            .map_err(|e| RtoolsError::config(format!("invalid Dropbox URL {raw}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", app_key)
            .append_pair("response_type", "code")
            .append_pair("token_access_type", "offline");
        Ok(url)
    }

    async fn token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/oauth2/token", self.api_base);
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().copied())
            .finish();
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RtoolsError::Network(format!(
                "{url}: HTTP {status} {}",
                detail.trim()
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: invalid response: {e}")))
    }

    /// Exchange an authorization code for a refresh token.
    #[instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        app_key: &str,
        app_secret: &str,
        code: &str,
    ) -> Result<String> {
        let tokens = self
            .token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", app_key),
                ("client_secret", app_secret),
            ])
            .await?;
        tokens.refresh_token.ok_or_else(|| {
            RtoolsError::Network(
                "no refresh token received; check that the app is scoped and requests offline access"
                    .into(),
            )
        })
    }

    /// Short-lived access token from a refresh token.
    #[instrument(skip_all)]
    pub async fn access_token(
        &self,
        app_key: &str,
        app_secret: &str,
        refresh_token: &str,
    ) -> Result<String> {
        let tokens = self
            .token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", app_key),
                ("client_secret", app_secret),
            ])
            .await?;
        tokens
            .access_token
            .ok_or_else(|| RtoolsError::Network("token response without access_token".into()))
    }

    #[instrument(skip_all)]
    pub async fn current_account(&self, access_token: &str) -> Result<Account> {
        let url = format!("{}/2/users/get_current_account", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/json")
            .body("null")
            .send()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RtoolsError::Network(format!("{url}: HTTP {status}")));
        }
        response
            .json::<Account>()
            .await
            .map_err(|e| RtoolsError::Network(format!("{url}: invalid response: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Check presence of the credentials, then the account they unlock.
///
/// rc 0 when the account answers, 2 when a key is missing, 3 when the API
/// check fails. `paths` is used to flag a stray `backup_app/.env`.
#[instrument(skip_all)]
pub async fn diag_dropbox(
    client: &DropboxClient,
    creds: &DropboxCredentials,
    paths: Option<&ConfigPaths>,
) -> Report {
    let mut report = Report::new();
    report.line("== Dropbox diag ==");
    let [key, secret, refresh] = creds.present();
    report.line(format!(
        "APP_KEY: {key}, APP_SECRET: {secret}, REFRESH_TOKEN: {refresh}"
    ));

    if let Some(paths) = paths {
        let stray = stray_env_file(paths);
        if stray.is_file() {
            report.line(format!(
                "⚠ Found {}; prefer deleting it and keeping credentials in {}",
                stray.display(),
                paths.tools_root.join(".env").display()
            ));
        }
    }

    let missing = creds.missing();
    if !missing.is_empty() {
        report.line(format!("Missing keys: {}", missing.join(", ")));
        report.set_rc(2);
        return report;
    }

    let (Some(app_key), Some(app_secret), Some(refresh_token)) =
        (&creds.app_key, &creds.app_secret, &creds.refresh_token)
    else {
        report.set_rc(2);
        return report;
    };
    let account = match client.access_token(app_key, app_secret, refresh_token).await {
        Ok(access) => client.current_account(&access).await,
        Err(e) => Err(e),
    };
    match account {
        Ok(account) => {
            info!(account_id = %account.account_id, "dropbox account ok");
            report.line(format!(
                "Account OK: {} ({})",
                account.name.display_name, account.account_id
            ));
        }
        Err(e) => {
            warn!(error = %e, "dropbox api check failed");
            report.line(format!("API check failed: {e}"));
            report.set_rc(3);
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Wizard
// ---------------------------------------------------------------------------

/// Terminal interaction used by [`run_wizard`].
pub trait WizardPrompt {
    /// Show a line of instructions.
    fn say(&mut self, text: &str);

    /// Ask for a value. An empty answer yields `default` (or empty).
    fn ask(&mut self, label: &str, default: Option<&str>, secret: bool) -> Result<String>;
}

/// Obtain a refresh token and merge the three keys into `env_path`.
///
/// Returns 0 on success, 2 when input is missing, 3 when the OAuth
/// exchange fails. `current` supplies defaults for key and secret.
#[instrument(skip_all, fields(env = %env_path.display()))]
pub async fn run_wizard(
    client: &DropboxClient,
    prompt: &mut impl WizardPrompt,
    current: &DropboxCredentials,
    env_path: &Path,
) -> Result<i32> {
    prompt.say("=== Dropbox wizard (refresh token) ===");
    prompt.say("You need APP_KEY and APP_SECRET from the Dropbox App Console (scoped app).");
    prompt.say(&format!(
        "They are stored in {} together with the refresh token.",
        env_path.display()
    ));

    let app_key = prompt.ask("APP_KEY", current.app_key.as_deref(), false)?;
    let app_secret = prompt.ask("APP_SECRET", current.app_secret.as_deref(), true)?;
    let (app_key, app_secret) = (app_key.trim(), app_secret.trim());
    if app_key.is_empty() || app_secret.is_empty() {
        prompt.say("APP_KEY and APP_SECRET are required.");
        return Ok(2);
    }

    let url = client.authorize_url(app_key)?;
    prompt.say("1) Open this URL in a browser, log in and approve access:");
    prompt.say(url.as_str());
    prompt.say("2) Copy the authorization code from the page and paste it below.");

    let code = prompt.ask("CODE", None, false)?;
    let code = code.trim();
    if code.is_empty() {
        prompt.say("CODE is missing.");
        return Ok(2);
    }

    let refresh_token = match client.exchange_code(app_key, app_secret, code).await {
        Ok(token) => token,
        Err(e) => {
            prompt.say(&format!("Could not complete OAuth: {e}"));
            return Ok(3);
        }
    };

    let updates = BTreeMap::from([
        (DROPBOX_KEYS[0].to_string(), app_key.to_string()),
        (DROPBOX_KEYS[1].to_string(), app_secret.to_string()),
        (DROPBOX_KEYS[2].to_string(), refresh_token),
    ]);
    dotenv::merge_into_file(env_path, &updates)?;
    info!("stored dropbox credentials");

    prompt.say(&format!("Done. Saved credentials to {}", env_path.display()));
    prompt.say("Try: rt backup --dry-run --profile <profile> --tag test");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn full_creds() -> DropboxCredentials {
        DropboxCredentials {
            app_key: Some("key".into()),
            app_secret: Some("secret".into()),
            refresh_token: Some("refresh".into()),
        }
    }

    struct Scripted {
        answers: VecDeque<&'static str>,
        said: Vec<String>,
    }

    impl WizardPrompt for Scripted {
        fn say(&mut self, text: &str) {
            self.said.push(text.to_string());
        }

        fn ask(&mut self, _label: &str, default: Option<&str>, _secret: bool) -> Result<String> {
            let answer = self.answers.pop_front().unwrap_or("");
            if answer.is_empty() {
                return Ok(default.unwrap_or_default().to_string());
            }
            Ok(answer.to_string())
        }
    }

    #[test]
    fn test_missing_keys_listed() {
        let creds = DropboxCredentials::from_lookup(|key| {
            (key == "DROPBOX_APP_KEY").then(|| "k".to_string())
        });
        assert_eq!(
            creds.missing(),
            vec!["DROPBOX_APP_SECRET", "DROPBOX_REFRESH_TOKEN"]
        );
    }

    #[test]
    fn test_authorize_url_requests_offline_access() {
        let client = DropboxClient::new().unwrap();
        let url = client.authorize_url("abc").unwrap();
        assert_eq!(url.host_str(), Some("www.dropbox.com"));
        assert_eq!(url.path(), "/oauth2/authorize");
        let query = url.query().unwrap_or_default();
        assert!(query.contains("client_id=abc"));
        assert!(query.contains("token_access_type=offline"));
    }

    #[tokio::test]
    async fn test_diag_missing_keys_rc2() {
        let client = DropboxClient::new().unwrap().with_api_base("http://127.0.0.1:9");
        let creds = DropboxCredentials {
            refresh_token: None,
            ..full_creds()
        };
        let report = diag_dropbox(&client, &creds, None).await;
        assert_eq!(report.rc(), 2);
        assert!(report.text().contains("APP_KEY: true, APP_SECRET: true, REFRESH_TOKEN: false"));
        assert!(report.text().contains("Missing keys: DROPBOX_REFRESH_TOKEN"));
    }

    #[tokio::test]
    async fn test_diag_account_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "at-1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/users/get_current_account"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "account_id": "dbid:1",
                "name": {"display_name": "Ada"}
            })))
            .mount(&server)
            .await;

        let client = DropboxClient::new().unwrap().with_api_base(&server.uri());
        let report = diag_dropbox(&client, &full_creds(), None).await;
        assert_eq!(report.rc(), 0, "{}", report.text());
        assert!(report.text().contains("Account OK: Ada (dbid:1)"));
    }

    #[tokio::test]
    async fn test_diag_api_failure_rc3() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let client = DropboxClient::new().unwrap().with_api_base(&server.uri());
        let report = diag_dropbox(&client, &full_creds(), None).await;
        assert_eq!(report.rc(), 3);
        assert!(report.text().contains("API check failed"));
    }

    #[tokio::test]
    async fn test_wizard_stores_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at", "refresh_token": "rt-9"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "OTHER=1\n").unwrap();

        let client = DropboxClient::new().unwrap().with_api_base(&server.uri());
        let mut prompt = Scripted {
            answers: VecDeque::from(["", "s3cret", "the-code"]),
            said: Vec::new(),
        };
        let current = DropboxCredentials {
            app_key: Some("key-from-env".into()),
            ..DropboxCredentials::default()
        };
        let rc = run_wizard(&client, &mut prompt, &current, &env_path).await.unwrap();
        assert_eq!(rc, 0);
        assert!(prompt.said.iter().any(|l| l.contains("/oauth2/authorize?client_id=key-from-env")));

        let text = std::fs::read_to_string(&env_path).unwrap();
        assert_eq!(
            text,
            "OTHER=1\nDROPBOX_APP_KEY=key-from-env\nDROPBOX_APP_SECRET=s3cret\nDROPBOX_REFRESH_TOKEN=rt-9\n"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&env_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_wizard_requires_secret() {
        let dir = tempfile::tempdir().unwrap();
        let client = DropboxClient::new().unwrap();
        let mut prompt = Scripted {
            answers: VecDeque::from(["key", ""]),
            said: Vec::new(),
        };
        let rc = run_wizard(
            &client,
            &mut prompt,
            &DropboxCredentials::default(),
            &dir.path().join(".env"),
        )
        .await
        .unwrap();
        assert_eq!(rc, 2);
        assert!(!dir.path().join(".env").exists());
    }
}
