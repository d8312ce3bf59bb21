//! GitHub App installation lifecycle: registers and forgets repositories.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::repository::split_full_name;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallationAccount {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: i64,
    #[serde(default)]
    pub account: InstallationAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryRef {
    pub full_name: String,
}

/// Body of `installation` and `installation_repositories` events.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationEvent {
    pub action: String,
    pub installation: Installation,
    #[serde(default)]
    pub repositories: Vec<RepositoryRef>,
    #[serde(default)]
    pub repositories_added: Vec<RepositoryRef>,
    #[serde(default)]
    pub repositories_removed: Vec<RepositoryRef>,
}

fn full_names(repos: &[RepositoryRef]) -> Vec<&str> {
    repos.iter().map(|r| r.full_name.as_str()).collect()
}

async fn register(
    store: &dyn Store,
    installation_id: i64,
    repos: &[RepositoryRef],
) -> Result<(), StoreError> {
    for repo in repos {
        let Some((owner, name)) = split_full_name(&repo.full_name) else {
            tracing::warn!(full_name = %repo.full_name, "Skipping repository with invalid name");
            continue;
        };
        store
            .save_repository_installation(owner, name, installation_id)
            .await?;
    }
    Ok(())
}

async fn unregister(store: &dyn Store, repos: &[RepositoryRef]) -> Result<usize, StoreError> {
    let mut removed = 0;
    for repo in repos {
        if let Some((owner, name)) = split_full_name(&repo.full_name) {
            if store.remove_repository(owner, name).await? {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

pub async fn process_installation_event(store: &dyn Store, event: &InstallationEvent) -> Value {
    let installation_id = event.installation.id;
    let account = event.installation.account.login.as_str();
    tracing::info!(
        installation_id,
        account,
        action = %event.action,
        "Installation event"
    );

    match handle(store, event).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(installation_id, action = %event.action, "Installation event failed: {e}");
            json!({
                "status": "error",
                "message": format!("Failed to process installation {}", event.action),
                "installation_id": installation_id,
            })
        }
    }
}

async fn handle(store: &dyn Store, event: &InstallationEvent) -> Result<Value, StoreError> {
    let installation_id = event.installation.id;
    let account = &event.installation.account.login;

    let body = match event.action.as_str() {
        "created" => {
            register(store, installation_id, &event.repositories).await?;
            tracing::info!(
                installation_id,
                count = event.repositories.len(),
                "App installed, repositories pending setup"
            );
            json!({
                "status": "success",
                "message": "App installation detected",
                "installation_id": installation_id,
                "account": account,
                "repositories": full_names(&event.repositories),
                "next_step": "User should complete setup form",
            })
        }
        "deleted" => {
            let removed = store.remove_installation(installation_id).await?;
            let users = store.remove_orphaned_users().await?;
            tracing::info!(
                installation_id,
                repositories = removed.len(),
                users,
                "App uninstalled, data removed"
            );
            let removed: Vec<String> = removed
                .into_iter()
                .map(|(owner, name)| format!("{owner}/{name}"))
                .collect();
            json!({
                "status": "success",
                "message": "App uninstallation processed",
                "installation_id": installation_id,
                "account": account,
                "removed_repositories": removed,
            })
        }
        "added" | "removed" => {
            register(store, installation_id, &event.repositories_added).await?;
            let removed = unregister(store, &event.repositories_removed).await?;
            if removed > 0 {
                store.remove_orphaned_users().await?;
            }
            json!({
                "status": "success",
                "message": "Repository access updated",
                "installation_id": installation_id,
                "repositories_added": full_names(&event.repositories_added),
                "repositories_removed": full_names(&event.repositories_removed),
            })
        }
        other => json!({
            "status": "acknowledged",
            "message": format!("Installation action '{other}' acknowledged"),
        }),
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::User;
    use crate::store::MemoryStore;

    fn event(value: Value) -> InstallationEvent {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn created_registers_pending_repositories() {
        let store = MemoryStore::new();
        let body = process_installation_event(
            &store,
            &event(json!({
                "action": "created",
                "installation": {"id": 77, "account": {"login": "alice"}},
                "repositories": [{"full_name": "alice/proj"}, {"full_name": "bogus"}],
            })),
        )
        .await;

        assert_eq!(body["status"], "success");
        assert_eq!(body["repositories"], json!(["alice/proj", "bogus"]));
        let repo = store.find_repository("alice", "proj").await.unwrap().unwrap();
        assert_eq!(repo.installation_id, Some(77));
        assert!(repo.semester_name.is_none());
    }

    #[tokio::test]
    async fn deleted_removes_repositories_and_orphans() {
        let store = MemoryStore::new();
        store.save_repository_installation("alice", "a", 5).await.unwrap();
        store.save_repository_installation("alice", "b", 5).await.unwrap();
        store.save_repository_installation("bob", "c", 6).await.unwrap();
        for login in ["alice", "bob"] {
            store
                .save_user(User {
                    git_username: login.to_string(),
                    name: login.to_string(),
                    email: format!("{login}@example.com"),
                })
                .await
                .unwrap();
        }

        let body = process_installation_event(
            &store,
            &event(json!({
                "action": "deleted",
                "installation": {"id": 5, "account": {"login": "alice"}},
            })),
        )
        .await;

        assert_eq!(body["removed_repositories"], json!(["alice/a", "alice/b"]));
        assert!(store.find_repository("alice", "a").await.unwrap().is_none());
        assert!(store.find_repository("bob", "c").await.unwrap().is_some());
        let users: Vec<String> = store.users().into_iter().map(|u| u.git_username).collect();
        assert_eq!(users, vec!["bob"]);
    }

    #[tokio::test]
    async fn added_and_removed_update_access() {
        let store = MemoryStore::new();
        store.save_repository_installation("alice", "old", 9).await.unwrap();

        let body = process_installation_event(
            &store,
            &event(json!({
                "action": "added",
                "installation": {"id": 9},
                "repositories_added": [{"full_name": "alice/new"}],
                "repositories_removed": [{"full_name": "alice/old"}],
            })),
        )
        .await;

        assert_eq!(body["status"], "success");
        assert!(store.find_repository("alice", "new").await.unwrap().is_some());
        assert!(store.find_repository("alice", "old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_actions_are_acknowledged() {
        let store = MemoryStore::new();
        let body = process_installation_event(
            &store,
            &event(json!({"action": "suspend", "installation": {"id": 1}})),
        )
        .await;
        assert_eq!(body["status"], "acknowledged");
    }
}
