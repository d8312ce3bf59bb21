//! test_results: One row per (semester, version, user, repository, release).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::test_results;

/// Outcome reported by a runner container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    // Declaration order is the ranking used when several results exist for one version.
    Error,
    Failed,
    Pass,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Error => "ERROR",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown test status: {0}")]
pub struct UnknownTestStatus(pub String);

impl FromStr for TestStatus {
    type Err = UnknownTestStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "ERROR" => Ok(Self::Error),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownTestStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = test_results)]
pub struct TestResult {
    pub semester_name: String,
    pub version_name: String,
    pub git_username: String,
    pub repository_name: String,
    pub release_name: String,
    pub date_run: DateTime<Utc>,
    pub test_status: String,
    pub issue_text: Option<String>,
}

impl TestResult {
    /// Parsed status; rows are constrained by a CHECK so this only fails on a corrupt table.
    pub fn status(&self) -> Option<TestStatus> {
        self.test_status.parse().ok()
    }
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = test_results)]
pub struct NewTestResult {
    pub semester_name: String,
    pub version_name: String,
    pub git_username: String,
    pub repository_name: String,
    pub release_name: String,
    pub date_run: DateTime<Utc>,
    pub test_status: String,
    pub issue_text: Option<String>,
}

impl NewTestResult {
    pub fn into_result(self) -> TestResult {
        TestResult {
            semester_name: self.semester_name,
            version_name: self.version_name,
            git_username: self.git_username,
            repository_name: self.repository_name,
            release_name: self.release_name,
            date_run: self.date_run,
            test_status: self.test_status,
            issue_text: self.issue_text,
        }
    }
}
