//! Tag event handling: runs admission, then notifies or dispatches.
//!
//! Shared by `create` and `push` webhooks. Notifier and dispatcher failures are
//! logged and never change the decision already taken. Rejection issues are
//! opened within `issue_timeout`, so a stalled GitHub cannot hold the webhook
//! answer past GitHub's own delivery timeout.

use std::time::Duration;

use serde::Serialize;

use crate::models::release_tag::TAG_GRAMMAR;
use crate::models::repository::Repository;
use crate::services::admission::{AdmissionController, Decision, RejectReason, Rejection};
use crate::services::github_service::{self, Notifier};
use crate::services::runner::{BuildDispatcher, BuildRequest};
use crate::store::Store;

/// Webhook answer for a tag event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagEventOutcome {
    pub status: &'static str,
    pub message: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,
}

pub async fn process_tag_event(
    store: &dyn Store,
    notifier: &dyn Notifier,
    dispatcher: &dyn BuildDispatcher,
    issue_timeout: Duration,
    git_username: &str,
    repository_name: &str,
    tag: &str,
) -> TagEventOutcome {
    let full_name = format!("{git_username}/{repository_name}");
    let outcome = |status: &'static str, message: String| TagEventOutcome {
        status,
        message,
        repository: full_name.clone(),
        reason: None,
        tag: tag.to_string(),
        issue_url: None,
    };

    let decision = match AdmissionController::new(store)
        .evaluate(git_username, repository_name, tag)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(repo = %full_name, tag, "Admission failed: {e}");
            crate::metrics::admission_decided("store-error");
            return outcome("error", "Could not evaluate tag".to_string());
        }
    };
    crate::metrics::admission_decided(decision.outcome());

    match decision {
        Decision::Ignored(reason) => {
            tracing::info!(repo = %full_name, tag, "Tag event ignored: {}", reason.message());
            outcome("ignored", reason.message().to_string())
        }
        Decision::Rejected {
            repository,
            rejection,
        } => {
            tracing::info!(
                repo = %full_name,
                tag,
                reason = %rejection.reason,
                "Tag rejected: {}",
                rejection.detail
            );
            let issue_url = if rejection.reason.notifies() {
                notify_rejection(notifier, issue_timeout, &repository, tag, &rejection).await
            } else {
                None
            };
            TagEventOutcome {
                reason: Some(rejection.reason),
                issue_url,
                ..outcome("error", rejection.detail)
            }
        }
        Decision::Admitted(admission) => {
            tracing::info!(
                repo = %full_name,
                tag,
                version = %admission.version.version_name,
                semester = %admission.semester.name,
                window_open = admission.version.is_open(chrono::Utc::now()),
                "Tag admitted, dispatching build"
            );
            dispatcher.dispatch(BuildRequest::from_admission(&admission));
            outcome("success", format!("Tag event processed: {tag}"))
        }
    }
}

/// Issue title and body explaining a rejection to the repository owner.
pub fn rejection_issue(tag: &str, rejection: &Rejection) -> (String, String) {
    match rejection.reason {
        RejectReason::MalformedTag => (
            format!("Invalid tag name: {tag}"),
            format!(
                "The tag `{tag}` was not tested because its name is not a valid release version.\n\n\
                 Release tags must follow the pattern {TAG_GRAMMAR}, with each number \
                 at most {}.\n\n\
                 Details: {}",
                u64::MAX,
                rejection.detail
            ),
        ),
        RejectReason::NonMonotonicTag => (
            format!("Tag {tag} does not advance the release"),
            format!(
                "The tag `{tag}` was not tested because it does not move past the \
                 latest tested release of the same version.\n\n\
                 Increase the PATCH number and tag again.\n\n\
                 Details: {}",
                rejection.detail
            ),
        ),
        RejectReason::UnmappedVersion => (
            format!("Version of tag {tag} is not configured"),
            format!(
                "The tag `{tag}` was not tested because its version is not part of \
                 the semester's schedule.\n\n\
                 Details: {}",
                rejection.detail
            ),
        ),
        RejectReason::DuplicateTag => (
            format!("Tag {tag} was already tested"),
            rejection.detail.clone(),
        ),
    }
}

async fn notify_rejection(
    notifier: &dyn Notifier,
    issue_timeout: Duration,
    repository: &Repository,
    tag: &str,
    rejection: &Rejection,
) -> Option<String> {
    let (title, body) = rejection_issue(tag, rejection);
    match github_service::open_issue_within(notifier, issue_timeout, repository, &title, &body).await
    {
        Ok(Some(url)) => {
            crate::metrics::issue_opened(rejection.reason.as_str());
            Some(url)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(
                repo = %repository.full_name(),
                tag,
                "Failed to open rejection issue: {e}"
            );
            None
        }
    }
}
