//! Store abstraction over users, semesters, repositories, versions and test results.
//!
//! Business logic only talks to [`Store`]; [`PgStore`] backs production and
//! [`MemoryStore`] backs tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{connect_pool, PgPool, PgStore};

use async_trait::async_trait;

use crate::models::repository::{Repository, RepositoryDetails};
use crate::models::semester::Semester;
use crate::models::test_result::{NewTestResult, TestResult};
use crate::models::user::User;
use crate::models::version::Version;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database pool unavailable: {0}")]
    Pool(String),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("tester migration failed: {0}")]
    Migration(String),
}

/// (git_username, repository_name)
pub type RepoId = (String, String);

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Option<Repository>, StoreError>;

    async fn find_semester(&self, name: &str) -> Result<Option<Semester>, StoreError>;

    /// Every release name ever recorded for the repository, across versions and semesters.
    async fn release_tags(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<String>, StoreError>;

    async fn has_release_tag(
        &self,
        git_username: &str,
        repository_name: &str,
        release_name: &str,
    ) -> Result<bool, StoreError>;

    async fn find_version(
        &self,
        semester_name: &str,
        version_name: &str,
    ) -> Result<Option<Version>, StoreError>;

    async fn versions_for_semester(&self, semester_name: &str) -> Result<Vec<Version>, StoreError>;

    async fn test_results_for_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<TestResult>, StoreError>;

    /// Upsert keyed by the full (semester, version, user, repository, release) tuple.
    async fn record_test_result(&self, result: NewTestResult) -> Result<(), StoreError>;

    async fn save_user(&self, user: User) -> Result<(), StoreError>;

    /// Register (or re-register) a repository under an installation, keeping any setup details.
    async fn save_repository_installation(
        &self,
        git_username: &str,
        repository_name: &str,
        installation_id: i64,
    ) -> Result<(), StoreError>;

    /// Returns `false` when the repository is not registered.
    async fn update_repository_details(
        &self,
        git_username: &str,
        repository_name: &str,
        details: RepositoryDetails,
    ) -> Result<bool, StoreError>;

    /// Removes the repository and its test results. Returns `false` if it did not exist.
    async fn remove_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<bool, StoreError>;

    /// Removes every repository of an installation (with results) and returns their ids.
    async fn remove_installation(&self, installation_id: i64) -> Result<Vec<RepoId>, StoreError>;

    /// Removes users that no longer own a registered repository.
    async fn remove_orphaned_users(&self) -> Result<usize, StoreError>;
}
