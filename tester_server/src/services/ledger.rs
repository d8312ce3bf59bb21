//! Release ledger: read-only view of the tags already recorded for a repository.

use crate::models::release_tag::ReleaseTag;
use crate::store::{Store, StoreError};

pub struct ReleaseLedger<'a> {
    store: &'a dyn Store,
}

impl<'a> ReleaseLedger<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Exact text match against every recorded release, ignoring version and semester.
    pub async fn has_release_tag(
        &self,
        git_username: &str,
        repository_name: &str,
        tag: &str,
    ) -> Result<bool, StoreError> {
        self.store
            .has_release_tag(git_username, repository_name, tag)
            .await
    }

    /// All recorded release names, unfiltered.
    pub async fn release_tags(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.store.release_tags(git_username, repository_name).await
    }
}

/// Pick the monotonicity reference among recorded tags.
///
/// Only well-formed tags take part. The reference is the tag with the
/// highest MINOR component, regardless of MAJOR; ties on MINOR go to the
/// higher MAJOR, then the higher PATCH.
pub fn reference_tag<S: AsRef<str>>(tags: &[S]) -> Option<ReleaseTag> {
    tags.iter()
        .filter_map(|t| ReleaseTag::parse(t.as_ref()).ok())
        .max_by_key(|t| (t.minor, t.major, t.patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_ignores_malformed_tags() {
        let tags = ["release-1.0", "v1.0.3", "v1.0", "junk"];
        assert_eq!(reference_tag(&tags).unwrap().as_str(), "v1.0.3");
        assert!(reference_tag(&["release-1.0", ""]).is_none());
        assert!(reference_tag::<&str>(&[]).is_none());
    }

    #[test]
    fn reference_is_highest_minor_not_highest_version() {
        // v2.0.9 is the newest release by semver, but v1.3.0 carries the larger MINOR.
        let tags = ["v2.0.9", "v1.3.0", "v1.2.5"];
        assert_eq!(reference_tag(&tags).unwrap().as_str(), "v1.3.0");
    }

    #[test]
    fn minor_ties_prefer_higher_major_then_patch() {
        let tags = ["v1.2.5", "v1.2.7", "v0.2.9"];
        assert_eq!(reference_tag(&tags).unwrap().as_str(), "v1.2.7");

        let tags = ["v1.2.5", "v2.2.0"];
        assert_eq!(reference_tag(&tags).unwrap().as_str(), "v2.2.0");
    }
}
