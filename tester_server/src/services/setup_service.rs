//! Repository setup: turns the setup form into users and repository details.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};

use crate::models::repository::RepositoryDetails;
use crate::models::user::User;
use crate::services::github_service::GitHubApp;
use crate::store::Store;

/// One repository row of the setup form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupEntry {
    pub git_username: String,
    pub repository_name: String,
    pub email: String,
    pub name: String,
    pub language: String,
    /// `EngComp` or `CieComp`; the radio button is named after the repository.
    pub course: Option<String>,
}

impl SetupEntry {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.git_username, self.repository_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupForm {
    pub installation_id: Option<i64>,
    pub entries: Vec<SetupEntry>,
    pub add_badges: bool,
}

impl SetupForm {
    /// Parse an `application/x-www-form-urlencoded` body with repeated `field[]` keys.
    pub fn parse(body: &[u8]) -> Self {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            fields
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        let list = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let first = |key: &str| fields.get(key).and_then(|v| v.first()).cloned();

        let usernames = list("git_username[]");
        let repositories = list("repository_name[]");
        let emails = list("email[]");
        let names = list("name[]");
        let languages = list("language[]");
        let at = |values: &[String], i: usize| values.get(i).cloned().unwrap_or_default();

        let entries = usernames
            .iter()
            .enumerate()
            .map(|(i, git_username)| {
                let repository_name = at(&repositories, i);
                SetupEntry {
                    git_username: git_username.clone(),
                    course: first(format!("course_{repository_name}").as_str()),
                    repository_name,
                    email: at(&emails, i),
                    name: at(&names, i),
                    language: at(&languages, i),
                }
            })
            .collect();

        Self {
            installation_id: first("installation_id").and_then(|s| s.trim().parse().ok()),
            entries,
            add_badges: first("add_badges").as_deref() == Some("true"),
        }
    }
}

/// `ENG-2025-2` / `BCC-2025-1`: course prefix, year, and half of the year.
pub fn semester_name(course: &str, now: DateTime<Utc>) -> Option<String> {
    let prefix = match course {
        "EngComp" => "ENG",
        "CieComp" => "BCC",
        _ => return None,
    };
    let half = if now.month() <= 6 { 1 } else { 2 };
    Some(format!("{prefix}-{}-{half}", now.year()))
}

pub fn program_call(language: &str) -> &'static str {
    match language {
        "Python" => "python3 main.py",
        "JavaScript" | "TypeScript" => "node main.js",
        "C++" => "g++ main.cpp -o main && ./main",
        "C#" => "dotnet run main.csproj",
        _ => "",
    }
}

pub fn is_compiled(language: &str) -> bool {
    matches!(language, "Java" | "C++" | "C#")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub configured: Vec<String>,
    /// `owner/name - reason`
    pub failed: Vec<String>,
    pub add_badges: bool,
    /// `(owner/name, added)` for each badge attempt.
    pub badges: Vec<(String, bool)>,
}

/// Save every entry of the form; one bad entry never blocks the others.
pub async fn save_setup(store: &dyn Store, form: &SetupForm, now: DateTime<Utc>) -> SetupReport {
    let mut report = SetupReport {
        add_badges: form.add_badges,
        ..SetupReport::default()
    };

    for entry in &form.entries {
        let full_name = entry.full_name();
        let fail = |reason: &str| format!("{full_name} - {reason}");

        let Some(course) = entry.course.as_deref() else {
            report.failed.push(fail("Missing course"));
            continue;
        };
        let Some(semester) = semester_name(course, now) else {
            report.failed.push(fail("Invalid course"));
            continue;
        };

        match save_entry(store, entry, &semester).await {
            Ok(None) => {
                tracing::info!(repo = %full_name, semester = %semester, "Repository configured");
                report.configured.push(full_name);
            }
            Ok(Some(reason)) => report.failed.push(fail(&reason)),
            Err(e) => {
                tracing::error!(repo = %full_name, "Setup save failed: {e}");
                report.failed.push(fail("Database error"));
            }
        }
    }
    report
}

/// `Ok(Some(reason))` for entries that cannot be saved as submitted.
async fn save_entry(
    store: &dyn Store,
    entry: &SetupEntry,
    semester: &str,
) -> anyhow::Result<Option<String>> {
    if store.find_semester(semester).await?.is_none() {
        return Ok(Some(format!("Semester {semester} is not open")));
    }

    store
        .save_user(User {
            git_username: entry.git_username.clone(),
            name: entry.name.clone(),
            email: entry.email.clone(),
        })
        .await?;

    let details = RepositoryDetails {
        semester_name: Some(semester.to_string()),
        language: Some(entry.language.clone()),
        program_call: program_call(&entry.language).to_string(),
        compiled: is_compiled(&entry.language),
    };
    let updated = store
        .update_repository_details(&entry.git_username, &entry.repository_name, details)
        .await?;
    if !updated {
        return Ok(Some("Repository is not part of an installation".to_string()));
    }
    Ok(None)
}

/// Insert the status badge into the README of each configured repository.
pub async fn add_badges(
    github: &GitHubApp,
    installation_id: i64,
    repositories: &[String],
    base_url: &str,
) -> Vec<(String, bool)> {
    let token = match github.installation_token(installation_id).await {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(installation_id, "Cannot add badges: {e}");
            return repositories.iter().map(|r| (r.clone(), false)).collect();
        }
    };

    let mut results = Vec::with_capacity(repositories.len());
    for full_name in repositories {
        let Some((owner, name)) = crate::models::repository::split_full_name(full_name) else {
            results.push((full_name.clone(), false));
            continue;
        };
        let added = match github.add_badge_to_readme(&token, owner, name, base_url).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(repo = %full_name, "Failed to add badge: {e}");
                false
            }
        };
        results.push((full_name.clone(), added));
    }
    results
}
