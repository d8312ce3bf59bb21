//! In-memory store for tests and local experiments.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RepoId, Store, StoreError};
use crate::models::repository::{Repository, RepositoryDetails};
use crate::models::semester::Semester;
use crate::models::test_result::{NewTestResult, TestResult};
use crate::models::user::User;
use crate::models::version::Version;

type ResultKey = (String, String, String, String, String);

#[derive(Default)]
struct State {
    users: BTreeMap<String, User>,
    semesters: BTreeMap<String, Semester>,
    repositories: BTreeMap<RepoId, Repository>,
    versions: BTreeMap<(String, String), Version>,
    test_results: BTreeMap<ResultKey, TestResult>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_semester(&self, semester: Semester) {
        self.lock().semesters.insert(semester.name.clone(), semester);
    }

    pub fn insert_version(&self, version: Version) {
        let key = (version.semester_name.clone(), version.version_name.clone());
        self.lock().versions.insert(key, version);
    }

    pub fn insert_repository(&self, repository: Repository) {
        let key = (repository.git_username.clone(), repository.repository_name.clone());
        self.lock().repositories.insert(key, repository);
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().users.values().cloned().collect()
    }

    pub fn test_result_count(&self) -> usize {
        self.lock().test_results.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Option<Repository>, StoreError> {
        let key = (git_username.to_string(), repository_name.to_string());
        Ok(self.lock().repositories.get(&key).cloned())
    }

    async fn find_semester(&self, name: &str) -> Result<Option<Semester>, StoreError> {
        Ok(self.lock().semesters.get(name).cloned())
    }

    async fn release_tags(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let mut tags: Vec<String> = state
            .test_results
            .values()
            .filter(|r| r.git_username == git_username && r.repository_name == repository_name)
            .map(|r| r.release_name.clone())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn has_release_tag(
        &self,
        git_username: &str,
        repository_name: &str,
        release_name: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.lock().test_results.values().any(|r| {
            r.git_username == git_username
                && r.repository_name == repository_name
                && r.release_name == release_name
        }))
    }

    async fn find_version(
        &self,
        semester_name: &str,
        version_name: &str,
    ) -> Result<Option<Version>, StoreError> {
        let key = (semester_name.to_string(), version_name.to_string());
        Ok(self.lock().versions.get(&key).cloned())
    }

    async fn versions_for_semester(&self, semester_name: &str) -> Result<Vec<Version>, StoreError> {
        Ok(self
            .lock()
            .versions
            .values()
            .filter(|v| v.semester_name == semester_name)
            .cloned()
            .collect())
    }

    async fn test_results_for_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<TestResult>, StoreError> {
        let mut results: Vec<TestResult> = self
            .lock()
            .test_results
            .values()
            .filter(|r| r.git_username == git_username && r.repository_name == repository_name)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.date_run);
        Ok(results)
    }

    async fn record_test_result(&self, result: NewTestResult) -> Result<(), StoreError> {
        let key = (
            result.semester_name.clone(),
            result.version_name.clone(),
            result.git_username.clone(),
            result.repository_name.clone(),
            result.release_name.clone(),
        );
        self.lock().test_results.insert(key, result.into_result());
        Ok(())
    }

    async fn save_user(&self, user: User) -> Result<(), StoreError> {
        self.lock().users.insert(user.git_username.clone(), user);
        Ok(())
    }

    async fn save_repository_installation(
        &self,
        git_username: &str,
        repository_name: &str,
        installation_id: i64,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now();
        let key = (git_username.to_string(), repository_name.to_string());
        let mut state = self.lock();
        let repo = state.repositories.entry(key).or_insert_with(|| Repository {
            git_username: git_username.to_string(),
            repository_name: repository_name.to_string(),
            semester_name: None,
            language: None,
            program_call: String::new(),
            compiled: false,
            installation_id: None,
            create_date: Some(now),
            write_date: Some(now),
        });
        repo.installation_id = Some(installation_id);
        repo.write_date = Some(now);
        Ok(())
    }

    async fn update_repository_details(
        &self,
        git_username: &str,
        repository_name: &str,
        details: RepositoryDetails,
    ) -> Result<bool, StoreError> {
        let key = (git_username.to_string(), repository_name.to_string());
        let mut state = self.lock();
        let Some(repo) = state.repositories.get_mut(&key) else {
            return Ok(false);
        };
        if details.semester_name.is_some() {
            repo.semester_name = details.semester_name;
        }
        if details.language.is_some() {
            repo.language = details.language;
        }
        repo.program_call = details.program_call;
        repo.compiled = details.compiled;
        repo.write_date = Some(chrono::Utc::now());
        Ok(true)
    }

    async fn remove_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state
            .test_results
            .retain(|_, r| !(r.git_username == git_username && r.repository_name == repository_name));
        let key = (git_username.to_string(), repository_name.to_string());
        Ok(state.repositories.remove(&key).is_some())
    }

    async fn remove_installation(&self, installation_id: i64) -> Result<Vec<RepoId>, StoreError> {
        let removed: Vec<RepoId> = self
            .lock()
            .repositories
            .iter()
            .filter(|(_, r)| r.installation_id == Some(installation_id))
            .map(|(key, _)| key.clone())
            .collect();

        for (git_username, repository_name) in &removed {
            self.remove_repository(git_username, repository_name).await?;
        }
        Ok(removed)
    }

    async fn remove_orphaned_users(&self) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let owners: Vec<String> = state
            .repositories
            .keys()
            .map(|(owner, _)| owner.clone())
            .collect();
        let before = state.users.len();
        state.users.retain(|name, _| owners.contains(name));
        Ok(before - state.users.len())
    }
}
