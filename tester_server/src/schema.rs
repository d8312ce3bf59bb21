//! Diesel table definitions for the tester store.
//!
//! Tables: users, semesters, repositories, versions, test_results.
//! `test_results` is the release ledger; its primary key is the full
//! (semester, version, user, repository, release) tuple.

diesel::table! {
    users (git_username) {
        git_username -> Varchar,
        name -> Varchar,
        email -> Varchar,
    }
}

diesel::table! {
    semesters (name) {
        name -> Varchar,
        language -> Varchar,
        extension -> Varchar,
        secret -> Varchar,
    }
}

diesel::table! {
    repositories (git_username, repository_name) {
        git_username -> Varchar,
        repository_name -> Varchar,
        semester_name -> Nullable<Varchar>,
        language -> Nullable<Varchar>,
        program_call -> Varchar,
        compiled -> Bool,
        installation_id -> Nullable<Int8>,
        create_date -> Nullable<Timestamptz>,
        write_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    versions (semester_name, version_name) {
        semester_name -> Varchar,
        version_name -> Varchar,
        direct_input -> Bool,
        date_from -> Timestamptz,
        date_to -> Timestamptz,
    }
}

diesel::table! {
    test_results (semester_name, version_name, git_username, repository_name, release_name) {
        semester_name -> Varchar,
        version_name -> Varchar,
        git_username -> Varchar,
        repository_name -> Varchar,
        release_name -> Varchar,
        date_run -> Timestamptz,
        test_status -> Varchar,
        issue_text -> Nullable<Text>,
    }
}

diesel::joinable!(versions -> semesters (semester_name));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    semesters,
    repositories,
    versions,
    test_results,
);
