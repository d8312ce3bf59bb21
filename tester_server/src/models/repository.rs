//! repositories: A GitHub repository registered through the app installation.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::repositories;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = repositories)]
pub struct Repository {
    pub git_username: String,
    pub repository_name: String,
    /// `None` until the owner completes the setup form.
    pub semester_name: Option<String>,
    pub language: Option<String>,
    pub program_call: String,
    pub compiled: bool,
    pub installation_id: Option<i64>,
    pub create_date: Option<DateTime<Utc>>,
    pub write_date: Option<DateTime<Utc>>,
}

impl Repository {
    /// `owner/name` as GitHub spells it.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.git_username, self.repository_name)
    }
}

/// Row written when the app is installed on a repository.
#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = repositories)]
pub struct NewRepository {
    pub git_username: String,
    pub repository_name: String,
    pub installation_id: Option<i64>,
}

/// Fields filled in by the setup form.
#[derive(Debug, Clone, PartialEq, Eq, AsChangeset, Deserialize)]
#[diesel(table_name = repositories)]
pub struct RepositoryDetails {
    pub semester_name: Option<String>,
    pub language: Option<String>,
    pub program_call: String,
    pub compiled: bool,
}

/// Split a GitHub `owner/name` into its two halves.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let (owner, name) = full_name.split_once('/')?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some((owner, name))
}
