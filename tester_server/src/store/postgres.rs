//! Postgres-backed store (diesel-async over a deadpool pool).

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use super::{RepoId, Store, StoreError};
use crate::models::repository::{NewRepository, Repository, RepositoryDetails};
use crate::models::semester::Semester;
use crate::models::test_result::{NewTestResult, TestResult};
use crate::models::user::User;
use crate::models::version::Version;
use crate::schema::{repositories, semesters, test_results, users, versions};

pub type PgPool = Pool<AsyncPgConnection>;

/// Build a connection pool for `database_url`.
pub fn connect_pool(database_url: &str, max_size: usize) -> anyhow::Result<PgPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Option<Repository>, StoreError> {
        let mut conn = self.conn().await?;
        let result = repositories::table
            .find((git_username, repository_name))
            .select(Repository::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn find_semester(&self, name: &str) -> Result<Option<Semester>, StoreError> {
        let mut conn = self.conn().await?;
        let result = semesters::table
            .find(name)
            .select(Semester::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn release_tags(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let tags = test_results::table
            .filter(test_results::git_username.eq(git_username))
            .filter(test_results::repository_name.eq(repository_name))
            .select(test_results::release_name)
            .distinct()
            .load::<String>(&mut conn)
            .await?;
        Ok(tags)
    }

    async fn has_release_tag(
        &self,
        git_username: &str,
        repository_name: &str,
        release_name: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let count: i64 = test_results::table
            .filter(test_results::git_username.eq(git_username))
            .filter(test_results::repository_name.eq(repository_name))
            .filter(test_results::release_name.eq(release_name))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn find_version(
        &self,
        semester_name: &str,
        version_name: &str,
    ) -> Result<Option<Version>, StoreError> {
        let mut conn = self.conn().await?;
        let result = versions::table
            .find((semester_name, version_name))
            .select(Version::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn versions_for_semester(&self, semester_name: &str) -> Result<Vec<Version>, StoreError> {
        let mut conn = self.conn().await?;
        let results = versions::table
            .filter(versions::semester_name.eq(semester_name))
            .order(versions::version_name.asc())
            .select(Version::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn test_results_for_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<Vec<TestResult>, StoreError> {
        let mut conn = self.conn().await?;
        let results = test_results::table
            .filter(test_results::git_username.eq(git_username))
            .filter(test_results::repository_name.eq(repository_name))
            .order(test_results::date_run.asc())
            .select(TestResult::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn record_test_result(&self, result: NewTestResult) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(test_results::table)
            .values(&result)
            .on_conflict((
                test_results::semester_name,
                test_results::version_name,
                test_results::git_username,
                test_results::repository_name,
                test_results::release_name,
            ))
            .do_update()
            .set((
                test_results::date_run.eq(excluded(test_results::date_run)),
                test_results::test_status.eq(excluded(test_results::test_status)),
                test_results::issue_text.eq(excluded(test_results::issue_text)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn save_user(&self, user: User) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(users::table)
            .values(&user)
            .on_conflict(users::git_username)
            .do_update()
            .set((
                users::name.eq(excluded(users::name)),
                users::email.eq(excluded(users::email)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn save_repository_installation(
        &self,
        git_username: &str,
        repository_name: &str,
        installation_id: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let new_repo = NewRepository {
            git_username: git_username.to_string(),
            repository_name: repository_name.to_string(),
            installation_id: Some(installation_id),
        };
        diesel::insert_into(repositories::table)
            .values(&new_repo)
            .on_conflict((repositories::git_username, repositories::repository_name))
            .do_update()
            .set((
                repositories::installation_id.eq(Some(installation_id)),
                repositories::write_date.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_repository_details(
        &self,
        git_username: &str,
        repository_name: &str,
        details: RepositoryDetails,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(repositories::table.find((git_username, repository_name)))
            .set((&details, repositories::write_date.eq(chrono::Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn remove_repository(
        &self,
        git_username: &str,
        repository_name: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        diesel::delete(
            test_results::table
                .filter(test_results::git_username.eq(git_username))
                .filter(test_results::repository_name.eq(repository_name)),
        )
        .execute(&mut conn)
        .await?;
        let removed = diesel::delete(repositories::table.find((git_username, repository_name)))
            .execute(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn remove_installation(&self, installation_id: i64) -> Result<Vec<RepoId>, StoreError> {
        let repos: Vec<RepoId> = {
            let mut conn = self.conn().await?;
            repositories::table
                .filter(repositories::installation_id.eq(installation_id))
                .select((repositories::git_username, repositories::repository_name))
                .load(&mut conn)
                .await?
        };

        for (git_username, repository_name) in &repos {
            self.remove_repository(git_username, repository_name).await?;
        }

        Ok(repos)
    }

    async fn remove_orphaned_users(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        let removed = diesel::sql_query(
            "DELETE FROM users WHERE git_username NOT IN (SELECT git_username FROM repositories)",
        )
        .execute(&mut conn)
        .await?;
        Ok(removed)
    }
}
