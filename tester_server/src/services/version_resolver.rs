//! Version window lookup.

use chrono::{DateTime, Utc};

use crate::models::version::Version;
use crate::store::{Store, StoreError};

/// Look up the grading window `(semester_name, major_minor)`.
///
/// Pure lookup: the window's dates are not checked here.
pub async fn resolve_version(
    store: &dyn Store,
    semester_name: &str,
    major_minor: &str,
) -> Result<Option<Version>, StoreError> {
    store.find_version(semester_name, major_minor).await
}

/// Windows of the semester whose `date_from` is already in the past, ordered by name.
pub async fn opened_versions(
    store: &dyn Store,
    semester_name: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Version>, StoreError> {
    let mut versions: Vec<Version> = store
        .versions_for_semester(semester_name)
        .await?
        .into_iter()
        .filter(|v| v.has_opened(now))
        .collect();
    versions.sort_by(|a, b| a.version_name.cmp(&b.version_name));
    Ok(versions)
}
