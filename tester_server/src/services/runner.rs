//! Build dispatcher: launches the language runner container for an admitted tag.
//!
//! Dispatch never blocks the webhook: the container is started and supervised
//! from a background task. Results come back through the callback endpoint;
//! the supervisor only steps in when the container outlives its deadline.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::config::TesterConfig;
use crate::models::repository::Repository;
use crate::models::test_result::{NewTestResult, TestStatus};
use crate::services::admission::Admission;
use crate::services::github_service::{GitHubApp, Notifier};
use crate::store::Store;

/// Stderr kept for logging when a container fails.
const STDERR_TAIL_BYTES: usize = 4096;

/// What the runner needs to test one release.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub repository: Repository,
    pub semester_name: String,
    /// Language of the semester's reference compiler.
    pub language: String,
    pub file_extension: String,
    pub version_name: String,
    pub release: String,
}

impl BuildRequest {
    pub fn from_admission(admission: &Admission) -> Self {
        Self {
            repository: admission.repository.clone(),
            semester_name: admission.semester.name.clone(),
            language: admission.semester.language.clone(),
            file_extension: admission.semester.extension.clone(),
            version_name: admission.version.version_name.clone(),
            release: admission.tag.as_str().to_string(),
        }
    }

    /// Language the student's repository is written in, which selects the image.
    pub fn repository_language(&self) -> &str {
        self.repository.language.as_deref().unwrap_or(&self.language)
    }
}

/// Starts builds. Implementations must return without waiting for the build.
pub trait BuildDispatcher: Send + Sync {
    fn dispatch(&self, request: BuildRequest);
}

/// Runner image for a repository language: `C#` -> `compiler-testing-lib-cs`.
pub fn runner_image(language: &str) -> String {
    let suffix = language.to_lowercase().replace('#', "s").replace("++", "pp");
    format!("compiler-testing-lib-{suffix}")
}

/// Container name derived from the release, so a stuck build can be killed by name.
pub fn container_name(request: &BuildRequest) -> String {
    let raw = format!(
        "tester-{}-{}-{}",
        request.repository.git_username, request.repository.repository_name, request.release
    );
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Arguments understood by the runner entrypoint. Contains secrets: never log.
pub fn runner_args(request: &BuildRequest, token: &str, config: &TesterConfig) -> Vec<String> {
    let pairs: [(&str, String); 12] = [
        ("--git_username", request.repository.git_username.clone()),
        ("--git_repository", request.repository.repository_name.clone()),
        ("--language", request.language.clone()),
        ("--version", request.version_name.clone()),
        ("--file_extension", request.file_extension.clone()),
        ("--max_errors", config.runner_max_errors.to_string()),
        ("--timeout", config.runner_test_timeout_secs.to_string()),
        ("--command_template", request.repository.program_call.clone()),
        ("--token", token.to_string()),
        ("--release", request.release.clone()),
        ("--callback_url", config.callback_url.clone()),
        ("--api_secret", config.api_secret.clone()),
    ];
    pairs
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value])
        .collect()
}

/// Full `docker run` argument list (everything after the binary).
fn docker_args(request: &BuildRequest, token: &str, config: &TesterConfig) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container_name(request),
        "-e".to_string(),
        "DOTNET_SKIP_FIRST_TIME_EXPERIENCE=1".to_string(),
        "-e".to_string(),
        "DOTNET_NOLOGO=1".to_string(),
        "-e".to_string(),
        "DOTNET_CLI_TELEMETRY_OPTOUT=1".to_string(),
        runner_image(request.repository_language()),
    ];
    args.extend(runner_args(request, token, config));
    args
}

/// Lifecycle of a supervised container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Running,
    /// Exited on its own; `None` when killed by a signal.
    Completed(Option<i32>),
    TimedOut,
    /// Timed out and the owner was told.
    Notified,
}

impl BuildState {
    pub fn on_exit(self, code: Option<i32>) -> Self {
        match self {
            Self::Running => Self::Completed(code),
            other => other,
        }
    }

    pub fn on_deadline(self) -> Self {
        match self {
            Self::Running => Self::TimedOut,
            other => other,
        }
    }

    pub fn on_notified(self) -> Self {
        match self {
            Self::TimedOut => Self::Notified,
            other => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed(_) | Self::Notified)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed(Some(0)) => write!(f, "completed"),
            Self::Completed(Some(code)) => write!(f, "exited({code})"),
            Self::Completed(None) => write!(f, "killed"),
            Self::TimedOut => write!(f, "timed-out"),
            Self::Notified => write!(f, "notified"),
        }
    }
}

/// Runs each build as `docker run --rm` on the local host.
#[derive(Clone)]
pub struct DockerDispatcher {
    config: Arc<TesterConfig>,
    github: Arc<GitHubApp>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl DockerDispatcher {
    pub fn new(
        config: Arc<TesterConfig>,
        github: Arc<GitHubApp>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            github,
            store,
            notifier,
        }
    }

    /// `None` when the container never started.
    async fn run(&self, request: BuildRequest) -> Option<BuildState> {
        let full_name = request.repository.full_name();
        let Some(installation_id) = request.repository.installation_id else {
            tracing::warn!(repo = %full_name, release = %request.release, "No installation id, build skipped");
            crate::metrics::build_status_changed("skipped");
            return None;
        };

        let token = match self.github.installation_token(installation_id).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(
                    repo = %full_name,
                    release = %request.release,
                    "Could not obtain installation token, build lost: {e}"
                );
                crate::metrics::build_status_changed("lost");
                return None;
            }
        };

        let child = Command::new(&self.config.docker_bin)
            .args(docker_args(&request, &token, &self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(repo = %full_name, release = %request.release, "Failed to start runner: {e}");
                crate::metrics::build_status_changed("spawn-failed");
                return None;
            }
        };

        tracing::info!(
            repo = %full_name,
            release = %request.release,
            image = %runner_image(request.repository_language()),
            pid = child.id(),
            "Runner container started"
        );

        let state = self.supervise(&request, child).await;
        tracing::debug!(repo = %full_name, release = %request.release, %state, "Runner supervision finished");
        Some(state)
    }

    /// Wait for the container or its deadline, whichever comes first.
    async fn supervise(&self, request: &BuildRequest, mut child: Child) -> BuildState {
        let started = Instant::now();
        let mut state = BuildState::Running;
        crate::metrics::build_status_changed(&state.to_string());

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
                String::from_utf8_lossy(&buf[start..]).into_owned()
            })
        });

        let deadline = Duration::from_secs(self.config.build_timeout_secs);
        let exit = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(deadline) => None,
        };

        let full_name = request.repository.full_name();
        match exit {
            Some(Ok(status)) => {
                state = state.on_exit(status.code());
                if !status.success() {
                    let stderr = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    tracing::warn!(
                        repo = %full_name,
                        release = %request.release,
                        %state,
                        "Runner exited with failure: {}",
                        stderr.trim()
                    );
                } else {
                    tracing::info!(repo = %full_name, release = %request.release, "Runner completed");
                }
            }
            Some(Err(e)) => {
                tracing::error!(repo = %full_name, release = %request.release, "Failed to wait on runner: {e}");
                state = state.on_exit(None);
            }
            None => {
                state = state.on_deadline();
                tracing::warn!(
                    repo = %full_name,
                    release = %request.release,
                    timeout_secs = self.config.build_timeout_secs,
                    "Runner exceeded its deadline, killing"
                );
                self.kill(request, &mut child).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                self.report_timeout(request).await;
                state = state.on_notified();
            }
        }

        crate::metrics::build_status_changed(&state.to_string());
        crate::metrics::build_duration(started.elapsed().as_millis() as u64);
        state
    }

    async fn kill(&self, request: &BuildRequest, child: &mut Child) {
        // Killing the client alone leaves the container running under the daemon.
        let name = container_name(request);
        match Command::new(&self.config.docker_bin)
            .args(["kill", &name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if !status.success() => {
                tracing::debug!(container = %name, "docker kill returned {status}");
            }
            Err(e) => tracing::debug!(container = %name, "docker kill failed: {e}"),
            Ok(_) => {}
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(container = %name, "Failed to kill runner process: {e}");
        }
    }

    async fn report_timeout(&self, request: &BuildRequest) {
        let message = format!(
            "Testing of release {} did not finish within {} seconds and was stopped.",
            request.release, self.config.build_timeout_secs
        );

        let result = NewTestResult {
            semester_name: request.semester_name.clone(),
            version_name: request.version_name.clone(),
            git_username: request.repository.git_username.clone(),
            repository_name: request.repository.repository_name.clone(),
            release_name: request.release.clone(),
            date_run: chrono::Utc::now(),
            test_status: TestStatus::Failed.as_str().to_string(),
            issue_text: Some(message.clone()),
        };
        match self.store.record_test_result(result).await {
            Ok(()) => crate::metrics::test_result_recorded(TestStatus::Failed.as_str()),
            Err(e) => tracing::error!(
                repo = %request.repository.full_name(),
                release = %request.release,
                "Failed to record timeout result: {e}"
            ),
        }

        let title = format!("Release {} timed out", request.release);
        match self
            .notifier
            .open_issue(&request.repository, &title, &message)
            .await
        {
            Ok(Some(_)) => crate::metrics::issue_opened("timeout"),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                repo = %request.repository.full_name(),
                "Failed to open timeout issue: {e}"
            ),
        }
    }
}

impl BuildDispatcher for DockerDispatcher {
    fn dispatch(&self, request: BuildRequest) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run(request).await;
        });
    }
}
