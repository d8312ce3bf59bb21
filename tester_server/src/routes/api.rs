//! Result callback API used by runner containers.

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::test_result::{NewTestResult, TestStatus};
use crate::routes::AppState;
use crate::services::github_service;

/// Body posted by the runner once a release has been tested.
#[derive(Debug, Clone, Deserialize)]
pub struct TestResultPayload {
    pub version_name: String,
    pub release_name: String,
    pub git_username: String,
    pub repository_name: String,
    pub test_status: TestStatus,
    #[serde(default)]
    pub issue_text: Option<String>,
}

/// Compare the shared secret without leaking where the first mismatch is.
/// An unset secret matches nothing.
pub fn secret_matches(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.ct_eq(&b).into()
}

/// Upsert the reported result, then open an issue for failures that carry a report.
pub async fn record_test_result(
    state: &AppState,
    payload: TestResultPayload,
) -> Result<Value, StatusCode> {
    let full_name = format!("{}/{}", payload.git_username, payload.repository_name);

    let repository = state
        .store
        .find_repository(&payload.git_username, &payload.repository_name)
        .await
        .map_err(|e| {
            tracing::error!(repo = %full_name, "Repository lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            tracing::warn!(repo = %full_name, "Result for unknown repository");
            StatusCode::NOT_FOUND
        })?;

    let Some(semester_name) = repository.semester_name.clone() else {
        tracing::warn!(repo = %full_name, "Result for repository without semester");
        return Err(StatusCode::NOT_FOUND);
    };

    let status = payload.test_status;
    let result = NewTestResult {
        semester_name,
        version_name: payload.version_name.clone(),
        git_username: payload.git_username.clone(),
        repository_name: payload.repository_name.clone(),
        release_name: payload.release_name.clone(),
        date_run: chrono::Utc::now(),
        test_status: status.as_str().to_string(),
        issue_text: payload.issue_text.clone(),
    };
    state.store.record_test_result(result).await.map_err(|e| {
        tracing::error!(repo = %full_name, release = %payload.release_name, "Failed to record result: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    crate::metrics::test_result_recorded(status.as_str());
    tracing::info!(
        repo = %full_name,
        release = %payload.release_name,
        version = %payload.version_name,
        %status,
        "Test result recorded"
    );

    let mut body = json!({
        "status": "success",
        "message": format!("Test result recorded for {full_name} {}", payload.release_name),
    });

    let report = payload
        .issue_text
        .as_deref()
        .filter(|text| !text.trim().is_empty());
    if let (true, Some(report)) = (status.is_failure(), report) {
        let title = format!("Release {} finished with status {status}", payload.release_name);
        let issue = github_service::open_issue_within(
            state.notifier.as_ref(),
            state.config.issue_timeout(),
            &repository,
            &title,
            report,
        )
        .await;
        match issue {
            Ok(Some(url)) => {
                crate::metrics::issue_opened(status.as_str());
                body["issue_url"] = Value::String(url);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(repo = %full_name, "Failed to open result issue: {e}"),
        }
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_comparison() {
        assert!(secret_matches("s3cret", Some("s3cret")));
        assert!(!secret_matches("s3cret", Some("s3cre")));
        assert!(!secret_matches("s3cret", None));
        assert!(!secret_matches("", Some("")));
    }

    #[test]
    fn payload_rejects_unknown_status() {
        let ok: Result<TestResultPayload, _> = serde_json::from_str(
            r#"{"version_name":"v1.0","release_name":"v1.0.0","git_username":"a","repository_name":"b","test_status":"FAILED"}"#,
        );
        assert_eq!(ok.unwrap().test_status, TestStatus::Failed);

        let bad: Result<TestResultPayload, _> = serde_json::from_str(
            r#"{"version_name":"v1.0","release_name":"v1.0.0","git_username":"a","repository_name":"b","test_status":"SKIPPED"}"#,
        );
        assert!(bad.is_err());
    }
}
