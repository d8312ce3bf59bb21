//! GitHub integration: webhook validation, app authentication, issues, README badges.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::TesterConfig;
use crate::models::repository::Repository;

type HmacSha256 = Hmac<Sha256>;

const USER_AGENT: &str = "compiler-tester";
const API_VERSION: &str = "2022-11-28";
const MAX_ISSUE_BODY_CHARS: usize = 60_000;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Cap an issue body to what the issues API accepts.
pub fn truncate_issue_body(body: &str) -> String {
    if body.chars().count() <= MAX_ISSUE_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ISSUE_BODY_CHARS).collect();
    truncated.push_str("\nMessage Truncated.");
    truncated
}

/// Opens issues on student repositories. Callers treat failures as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns the issue URL, or `None` when the issue could not be opened.
    async fn open_issue(
        &self,
        repository: &Repository,
        title: &str,
        body: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Open an issue, giving up once `budget` elapses.
pub async fn open_issue_within(
    notifier: &dyn Notifier,
    budget: Duration,
    repository: &Repository,
    title: &str,
    body: &str,
) -> anyhow::Result<Option<String>> {
    match tokio::time::timeout(budget, notifier.open_issue(repository, title, body)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("issue creation timed out after {}ms", budget.as_millis()),
    }
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationResponse {
    account: Account,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationRepositoriesResponse {
    #[serde(default)]
    repositories: Vec<InstallationRepository>,
}

/// An installation's account and the repositories it grants access to.
#[derive(Debug, Clone)]
pub struct InstallationDetails {
    pub account: Account,
    pub repositories: Vec<InstallationRepository>,
}

#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    html_url: Option<String>,
}

/// GitHub App client: signs app JWTs and exchanges them for installation tokens.
pub struct GitHubApp {
    app_id: String,
    private_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl GitHubApp {
    pub fn from_config(config: &TesterConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.github_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build GitHub client: {e}"))?;

        Ok(Self {
            app_id: config.github_app_id.clone(),
            private_key: config.github_app_private_key.clone(),
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, bearer: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    /// Short-lived RS256 JWT identifying the app itself.
    fn app_jwt(&self) -> anyhow::Result<String> {
        if self.app_id.is_empty() || self.private_key.is_empty() {
            anyhow::bail!("GitHub App credentials not configured");
        }

        // Backdate iat to absorb clock drift against GitHub.
        let now = chrono::Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid GitHub App private key: {e}"))?;
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;
        Ok(token)
    }

    /// Exchange the app JWT for an installation access token.
    pub async fn installation_token(&self, installation_id: i64) -> anyhow::Result<String> {
        let jwt = self.app_jwt()?;
        tracing::debug!(installation_id, "Requesting installation access token");

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/app/installations/{installation_id}/access_tokens"),
                &jwt,
            )
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::CREATED || status.is_success() {
            let body: AccessTokenResponse = resp.json().await?;
            return Ok(body.token);
        }

        let text = resp.text().await.unwrap_or_default();
        match status {
            reqwest::StatusCode::UNAUTHORIZED => {
                anyhow::bail!("GitHub App authentication failed: {text}")
            }
            reqwest::StatusCode::NOT_FOUND => {
                anyhow::bail!("installation {installation_id} not found; app may not be installed")
            }
            _ => anyhow::bail!("GitHub API error {status}: {text}"),
        }
    }

    /// Account and accessible repositories of an installation.
    pub async fn installation_details(
        &self,
        installation_id: i64,
    ) -> anyhow::Result<InstallationDetails> {
        let jwt = self.app_jwt()?;
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/app/installations/{installation_id}"),
                &jwt,
            )
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("failed to get installation {installation_id}: {status}");
        }
        let installation: InstallationResponse = resp.json().await?;

        let token = self.installation_token(installation_id).await?;
        let resp = self
            .request(reqwest::Method::GET, "/installation/repositories", &token)
            .send()
            .await?;
        let repositories = if resp.status().is_success() {
            resp.json::<InstallationRepositoriesResponse>()
                .await?
                .repositories
        } else {
            tracing::warn!(
                installation_id,
                status = %resp.status(),
                "Could not list installation repositories"
            );
            Vec::new()
        };

        Ok(InstallationDetails {
            account: installation.account,
            repositories,
        })
    }

    /// Open an issue and return its URL. Non-2xx answers yield `Ok(None)`.
    pub async fn create_issue(
        &self,
        installation_id: i64,
        full_name: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<Option<String>> {
        let token = self.installation_token(installation_id).await?;
        let payload = serde_json::json!({
            "title": title,
            "body": truncate_issue_body(body),
        });

        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{full_name}/issues"), &token)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(repo = full_name, %status, "GitHub issue creation failed: {text}");
            return Ok(None);
        }

        let issue: IssueResponse = resp.json().await?;
        if let Some(url) = &issue.html_url {
            tracing::info!(repo = full_name, url = %url, "GitHub issue created");
        }
        Ok(issue.html_url)
    }

    /// Insert the status badge into the repository README (creating one if missing).
    /// A README that already carries the badge is left untouched.
    pub async fn add_badge_to_readme(
        &self,
        token: &str,
        git_username: &str,
        repository_name: &str,
        base_url: &str,
    ) -> anyhow::Result<()> {
        let badge_url = crate::services::badge_service::badge_url(base_url, git_username, repository_name);
        let full_name = format!("{git_username}/{repository_name}");

        let resp = self
            .request(reqwest::Method::GET, &format!("/repos/{full_name}/readme"), token)
            .send()
            .await?;

        let (current, sha) = match resp.status() {
            s if s.is_success() => {
                let readme: ReadmeResponse = resp.json().await?;
                // The contents API wraps base64 at 60 columns.
                let encoded: String = readme.content.split_whitespace().collect();
                let bytes = STANDARD.decode(encoded)?;
                (Some(String::from_utf8(bytes)?), Some(readme.sha))
            }
            reqwest::StatusCode::NOT_FOUND => (None, None),
            status => anyhow::bail!("failed to read README of {full_name}: {status}"),
        };

        let Some(updated) = crate::services::badge_service::readme_with_badge(
            current.as_deref(),
            repository_name,
            &badge_url,
        ) else {
            tracing::info!(repo = %full_name, "Badge already present in README");
            return Ok(());
        };

        let mut payload = serde_json::json!({
            "message": "Add compilation status badge",
            "content": STANDARD.encode(updated.as_bytes()),
            "committer": {
                "name": "Compiler Tester Bot",
                "email": "compiler-tester@users.noreply.github.com",
            },
        });
        if let Some(sha) = sha {
            payload["sha"] = serde_json::Value::String(sha);
        }

        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{full_name}/contents/README.md"),
                token,
            )
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to update README of {full_name}: {status} {text}");
        }

        tracing::info!(repo = %full_name, "Badge added to README");
        Ok(())
    }
}

#[async_trait]
impl Notifier for GitHubApp {
    async fn open_issue(
        &self,
        repository: &Repository,
        title: &str,
        body: &str,
    ) -> anyhow::Result<Option<String>> {
        let Some(installation_id) = repository.installation_id else {
            tracing::warn!(
                repo = %repository.full_name(),
                "No installation id, cannot open issue"
            );
            return Ok(None);
        };
        self.create_issue(installation_id, &repository.full_name(), title, body)
            .await
    }
}


/// RSA key used only to sign app JWTs in tests.
#[cfg(test)]
pub(crate) const TEST_APP_KEY: &str = include_str!("../../tests/fixtures/test_app_key.pem");
