//! Tester configuration: loaded once from environment variables at start-up.

#[derive(Clone, Debug)]
pub struct TesterConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// Shared secret runner containers send back in `X-API-Secret`.
    pub api_secret: String,
    /// GitHub App id (JWT issuer).
    pub github_app_id: String,
    /// GitHub App private key, PEM encoded.
    pub github_app_private_key: String,
    /// GitHub REST API base URL.
    pub github_api_url: String,
    /// Public base URL of this service, used in badge links.
    pub base_url: String,
    /// Result callback URL handed to runner containers.
    pub callback_url: String,
    /// Link rendered on the login page.
    pub app_install_url: String,
    /// Per-request timeout for GitHub API calls, in seconds.
    pub github_timeout_secs: u64,
    /// Budget for opening an issue while a webhook or callback waits, in milliseconds.
    pub issue_timeout_ms: u64,
    /// Wall-clock ceiling for a single runner container, in seconds.
    pub build_timeout_secs: u64,
    /// Maximum errors the runner reports per release.
    pub runner_max_errors: u32,
    /// Per-test timeout passed to the runner, in seconds.
    pub runner_test_timeout_secs: u64,
    /// Container CLI binary.
    pub docker_bin: String,
    /// Database pool size.
    pub database_max_connections: usize,
}

impl TesterConfig {
    pub fn issue_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.issue_timeout_ms)
    }

    pub fn from_env() -> Self {
        let github_webhook_secret = std::env::var("TESTER_WEBHOOK_SECRET").unwrap_or_default();
        let api_secret = std::env::var("TESTER_API_SECRET").unwrap_or_default();
        let github_app_id = std::env::var("TESTER_GITHUB_APP_ID").unwrap_or_default();
        let github_app_private_key =
            std::env::var("TESTER_GITHUB_APP_PRIVATE_KEY").unwrap_or_default();
        let github_api_url = std::env::var("TESTER_GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string());
        let base_url = std::env::var("TESTER_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:9090".to_string());
        let callback_url = std::env::var("TESTER_CALLBACK_URL")
            .unwrap_or_else(|_| format!("{}/api/test-result", base_url.trim_end_matches('/')));
        let app_install_url = std::env::var("TESTER_APP_INSTALL_URL").unwrap_or_else(|_| {
            "https://github.com/apps/compiler-tester/installations/new".to_string()
        });
        let github_timeout_secs = std::env::var("TESTER_GITHUB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let issue_timeout_ms = std::env::var("TESTER_ISSUE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);
        let build_timeout_secs = std::env::var("TESTER_BUILD_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600);
        let runner_max_errors = std::env::var("TESTER_RUNNER_MAX_ERRORS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let runner_test_timeout_secs = std::env::var("TESTER_RUNNER_TEST_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let docker_bin = std::env::var("TESTER_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string());
        let database_max_connections = std::env::var("TESTER_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        if github_webhook_secret.is_empty() {
            tracing::warn!("TESTER_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if api_secret.is_empty() {
            tracing::warn!("TESTER_API_SECRET not set -- all result callbacks will be rejected");
        }
        if github_app_id.is_empty() || github_app_private_key.is_empty() {
            tracing::warn!(
                "TESTER_GITHUB_APP_ID / TESTER_GITHUB_APP_PRIVATE_KEY not set -- builds and issues disabled"
            );
        }

        Self {
            github_webhook_secret,
            api_secret,
            github_app_id,
            github_app_private_key,
            github_api_url,
            base_url,
            callback_url,
            app_install_url,
            github_timeout_secs,
            issue_timeout_ms,
            build_timeout_secs,
            runner_max_errors,
            runner_test_timeout_secs,
            docker_bin,
            database_max_connections,
        }
    }
}

impl Default for TesterConfig {
    /// Offline configuration: no secrets, nothing reachable.
    fn default() -> Self {
        Self {
            github_webhook_secret: String::new(),
            api_secret: String::new(),
            github_app_id: String::new(),
            github_app_private_key: String::new(),
            github_api_url: "https://api.github.com".to_string(),
            base_url: "http://localhost:9090".to_string(),
            callback_url: "http://localhost:9090/api/test-result".to_string(),
            app_install_url: "https://github.com/apps/compiler-tester/installations/new"
                .to_string(),
            github_timeout_secs: 10,
            issue_timeout_ms: 5_000,
            build_timeout_secs: 600,
            runner_max_errors: 5,
            runner_test_timeout_secs: 30,
            docker_bin: "docker".to_string(),
            database_max_connections: 10,
        }
    }
}
