//! Idempotent DDL for the tester tables, applied at start-up.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

use crate::store::StoreError;

/// SQL migration for the tester tables.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    git_username    VARCHAR(255) PRIMARY KEY,
    name            VARCHAR(255) NOT NULL DEFAULT '',
    email           VARCHAR(255) NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS semesters (
    name            VARCHAR(64) PRIMARY KEY,
    language        VARCHAR(64) NOT NULL,
    extension       VARCHAR(32) NOT NULL,
    secret          VARCHAR(255) NOT NULL
);

CREATE TABLE IF NOT EXISTS repositories (
    git_username    VARCHAR(255) NOT NULL,
    repository_name VARCHAR(255) NOT NULL,
    semester_name   VARCHAR(64) REFERENCES semesters(name),
    language        VARCHAR(64),
    program_call    TEXT NOT NULL DEFAULT '',
    compiled        BOOLEAN NOT NULL DEFAULT FALSE,
    installation_id BIGINT,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_date      TIMESTAMPTZ DEFAULT NOW(),
    PRIMARY KEY (git_username, repository_name)
);

CREATE INDEX IF NOT EXISTS idx_repositories_installation ON repositories (installation_id);

CREATE TABLE IF NOT EXISTS versions (
    semester_name   VARCHAR(64) NOT NULL REFERENCES semesters(name),
    version_name    VARCHAR(32) NOT NULL,
    direct_input    BOOLEAN NOT NULL DEFAULT FALSE,
    date_from       TIMESTAMPTZ NOT NULL,
    date_to         TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (semester_name, version_name)
);

CREATE TABLE IF NOT EXISTS test_results (
    semester_name   VARCHAR(64) NOT NULL,
    version_name    VARCHAR(32) NOT NULL,
    git_username    VARCHAR(255) NOT NULL,
    repository_name VARCHAR(255) NOT NULL,
    release_name    VARCHAR(64) NOT NULL,
    date_run        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    test_status     VARCHAR(16) NOT NULL CHECK (test_status IN ('PASS', 'ERROR', 'FAILED')),
    issue_text      TEXT,
    PRIMARY KEY (semester_name, version_name, git_username, repository_name, release_name),
    FOREIGN KEY (git_username, repository_name)
        REFERENCES repositories(git_username, repository_name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_test_results_repo ON test_results (git_username, repository_name);
"#;

/// Run the tester migration (idempotent).
pub async fn run_migration(conn: &mut AsyncPgConnection) -> Result<(), StoreError> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))
}
