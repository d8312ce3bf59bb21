//! Tag admission: decides whether an incoming tag is built.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. the repository is registered and set up (otherwise the event is ignored),
//! 2. the tag matches `vX.Y.Z`,
//! 3. the tag text was never recorded before for this repository,
//! 4. the tag advances the PATCH of the reference release when it shares its MAJOR.MINOR,
//! 5. its MAJOR.MINOR maps to a version window of the repository's semester.
//!
//! The controller only reads from the store. Rejections are values, not errors;
//! `Err` is reserved for store failures.

use std::fmt;

use serde::Serialize;

use crate::models::release_tag::{ReleaseTag, TAG_GRAMMAR};
use crate::models::repository::Repository;
use crate::models::semester::Semester;
use crate::models::version::Version;
use crate::services::ledger::{self, ReleaseLedger};
use crate::services::version_resolver;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    MalformedTag,
    DuplicateTag,
    NonMonotonicTag,
    UnmappedVersion,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedTag => "malformed-tag",
            Self::DuplicateTag => "duplicate-tag",
            Self::NonMonotonicTag => "non-monotonic-tag",
            Self::UnmappedVersion => "unmapped-version",
        }
    }

    /// Whether the repository owner gets an issue for this rejection.
    /// Duplicates are what webhook redelivery produces, so they stay silent.
    pub fn notifies(self) -> bool {
        !matches!(self, Self::DuplicateTag)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not one of our repositories.
    UnknownRepository,
    /// Installed, but the setup form was never completed (or its semester is gone).
    SetupIncomplete,
}

impl IgnoreReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::UnknownRepository => "Repository is not registered",
            Self::SetupIncomplete => "Repository setup is incomplete",
        }
    }
}

/// Everything the build dispatcher needs for an admitted tag.
#[derive(Debug, Clone)]
pub struct Admission {
    pub repository: Repository,
    pub semester: Semester,
    pub tag: ReleaseTag,
    pub version: Version,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Ignored(IgnoreReason),
    Rejected {
        repository: Repository,
        rejection: Rejection,
    },
    Admitted(Admission),
}

impl Decision {
    /// Label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ignored(_) => "ignored",
            Self::Rejected { rejection, .. } => rejection.reason.as_str(),
            Self::Admitted(_) => "admitted",
        }
    }
}

pub struct AdmissionController<'a> {
    store: &'a dyn Store,
}

impl<'a> AdmissionController<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn evaluate(
        &self,
        git_username: &str,
        repository_name: &str,
        tag: &str,
    ) -> Result<Decision, StoreError> {
        let Some(repository) = self
            .store
            .find_repository(git_username, repository_name)
            .await?
        else {
            return Ok(Decision::Ignored(IgnoreReason::UnknownRepository));
        };

        let semester = match repository.semester_name.as_deref() {
            Some(name) => self.store.find_semester(name).await?,
            None => None,
        };
        let Some(semester) = semester else {
            return Ok(Decision::Ignored(IgnoreReason::SetupIncomplete));
        };

        let reject = |reason: RejectReason, detail: String| Decision::Rejected {
            repository: repository.clone(),
            rejection: Rejection { reason, detail },
        };

        let candidate = match ReleaseTag::parse(tag) {
            Ok(candidate) => candidate,
            Err(e) => {
                return Ok(reject(
                    RejectReason::MalformedTag,
                    format!("{e}; expected {TAG_GRAMMAR}"),
                ))
            }
        };

        let ledger = ReleaseLedger::new(self.store);
        if ledger
            .has_release_tag(git_username, repository_name, candidate.as_str())
            .await?
        {
            return Ok(reject(
                RejectReason::DuplicateTag,
                format!("tag {candidate} was already tested"),
            ));
        }

        // A reference on a different MAJOR.MINOR never constrains the candidate.
        let recorded = ledger.release_tags(git_username, repository_name).await?;
        if let Some(reference) = ledger::reference_tag(&recorded) {
            if candidate.same_line(&reference) && candidate.patch <= reference.patch {
                return Ok(reject(
                    RejectReason::NonMonotonicTag,
                    format!("tag {candidate} does not advance past {reference}"),
                ));
            }
        }

        let version_name = candidate.version_name();
        let Some(version) =
            version_resolver::resolve_version(self.store, &semester.name, version_name).await?
        else {
            return Ok(reject(
                RejectReason::UnmappedVersion,
                format!(
                    "version {version_name} is not configured for semester {}",
                    semester.name
                ),
            ));
        };

        Ok(Decision::Admitted(Admission {
            repository,
            semester,
            tag: candidate,
            version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::test_result::{NewTestResult, TestStatus};
    use crate::store::MemoryStore;

    const SEMESTER: &str = "BCC-2025-2";

    fn store_with(versions: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_semester(Semester {
            name: SEMESTER.to_string(),
            language: "python".to_string(),
            extension: ".py".to_string(),
            secret: "s3cret".to_string(),
        });
        let now = Utc::now();
        for name in versions {
            store.insert_version(Version {
                semester_name: SEMESTER.to_string(),
                version_name: name.to_string(),
                direct_input: false,
                date_from: now - Duration::days(7),
                date_to: now + Duration::days(7),
            });
        }
        store.insert_repository(Repository {
            git_username: "alice".to_string(),
            repository_name: "proj".to_string(),
            semester_name: Some(SEMESTER.to_string()),
            language: Some("Python".to_string()),
            program_call: "python3 main.py".to_string(),
            compiled: false,
            installation_id: Some(42),
            create_date: None,
            write_date: None,
        });
        store
    }

    async fn record(store: &MemoryStore, version: &str, release: &str) {
        store
            .record_test_result(NewTestResult {
                semester_name: SEMESTER.to_string(),
                version_name: version.to_string(),
                git_username: "alice".to_string(),
                repository_name: "proj".to_string(),
                release_name: release.to_string(),
                date_run: Utc::now(),
                test_status: TestStatus::Pass.as_str().to_string(),
                issue_text: None,
            })
            .await
            .unwrap();
    }

    async fn evaluate(store: &MemoryStore, tag: &str) -> Decision {
        AdmissionController::new(store)
            .evaluate("alice", "proj", tag)
            .await
            .unwrap()
    }

    fn reason(decision: &Decision) -> Option<RejectReason> {
        match decision {
            Decision::Rejected { rejection, .. } => Some(rejection.reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn first_tag_is_admitted_with_truncated_version() {
        let store = store_with(&["v1.0"]);
        match evaluate(&store, "v1.0.0").await {
            Decision::Admitted(admission) => {
                assert_eq!(admission.version.version_name, "v1.0");
                assert_eq!(admission.tag.as_str(), "v1.0.0");
                assert_eq!(admission.semester.name, SEMESTER);
            }
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_repository_is_ignored() {
        let store = store_with(&["v1.0"]);
        let decision = AdmissionController::new(&store)
            .evaluate("mallory", "proj", "v1.0.0")
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Ignored(IgnoreReason::UnknownRepository)
        ));
    }

    #[tokio::test]
    async fn repository_without_semester_is_ignored() {
        let store = store_with(&["v1.0"]);
        store
            .save_repository_installation("bob", "pending", 7)
            .await
            .unwrap();
        let decision = AdmissionController::new(&store)
            .evaluate("bob", "pending", "v1.0.0")
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Ignored(IgnoreReason::SetupIncomplete)
        ));
    }

    #[tokio::test]
    async fn malformed_tags_are_rejected() {
        let store = store_with(&["v1.0"]);
        for tag in ["1.0.0", "v1.0", "release-1", "", "not-a-version", "v1.0.0-beta"] {
            let decision = evaluate(&store, tag).await;
            assert_eq!(reason(&decision), Some(RejectReason::MalformedTag), "{tag:?}");
        }
        assert_eq!(store.test_result_count(), 0);
    }

    #[tokio::test]
    async fn recorded_tag_is_duplicate_every_time() {
        let store = store_with(&["v1.0"]);
        record(&store, "v1.0", "v1.0.0").await;
        for _ in 0..3 {
            assert_eq!(
                reason(&evaluate(&store, "v1.0.0").await),
                Some(RejectReason::DuplicateTag)
            );
        }
    }

    #[tokio::test]
    async fn duplicate_check_ignores_version_and_semester() {
        let store = store_with(&["v1.0"]);
        // Recorded under an unrelated version row; the ledger matches on text only.
        record(&store, "v9.9", "v1.0.0").await;
        assert_eq!(
            reason(&evaluate(&store, "v1.0.0").await),
            Some(RejectReason::DuplicateTag)
        );
    }

    #[tokio::test]
    async fn patch_must_advance_within_reference_line() {
        let store = store_with(&["v1.2", "v1.3"]);
        record(&store, "v1.2", "v1.2.5").await;

        assert_eq!(
            reason(&evaluate(&store, "v1.2.4").await),
            Some(RejectReason::NonMonotonicTag)
        );
        assert!(matches!(evaluate(&store, "v1.2.6").await, Decision::Admitted(_)));
        assert!(matches!(evaluate(&store, "v1.3.0").await, Decision::Admitted(_)));
    }

    #[tokio::test]
    async fn lower_line_passes_when_reference_has_higher_minor() {
        // The reference is the highest MINOR (v1.3.0), so a
        // PATCH regression on v1.2 is not caught.
        let store = store_with(&["v1.2", "v1.3"]);
        record(&store, "v1.2", "v1.2.5").await;
        record(&store, "v1.3", "v1.3.0").await;

        assert!(matches!(evaluate(&store, "v1.2.4").await, Decision::Admitted(_)));
    }

    #[tokio::test]
    async fn other_major_with_same_minor_is_unconstrained() {
        // v0.2.1 is older than v1.2.5 by semver but shares
        // no MAJOR.MINOR with the reference.
        let store = store_with(&["v0.2", "v1.2"]);
        record(&store, "v1.2", "v1.2.5").await;

        assert!(matches!(evaluate(&store, "v0.2.1").await, Decision::Admitted(_)));
    }

    #[tokio::test]
    async fn unmapped_version_is_rejected() {
        let store = store_with(&["v1.0"]);
        let decision = evaluate(&store, "v9.9.9").await;
        assert_eq!(reason(&decision), Some(RejectReason::UnmappedVersion));
        match decision {
            Decision::Rejected { rejection, .. } => assert!(rejection.detail.contains("v9.9")),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn monotonicity_runs_before_version_mapping() {
        let store = store_with(&["v1.0"]);
        record(&store, "v1.2", "v1.2.5").await;
        // v1.2 is not configured, but the PATCH regression is reported first.
        assert_eq!(
            reason(&evaluate(&store, "v1.2.1").await),
            Some(RejectReason::NonMonotonicTag)
        );
    }

    #[test]
    fn reasons_serialize_kebab_case() {
        let json = serde_json::to_string(&RejectReason::NonMonotonicTag).unwrap();
        assert_eq!(json, "\"non-monotonic-tag\"");
        assert!(!RejectReason::DuplicateTag.notifies());
        assert!(RejectReason::UnmappedVersion.notifies());
    }
}
