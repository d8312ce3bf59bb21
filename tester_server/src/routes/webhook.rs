//! GitHub webhook handler: tag events, installation lifecycle, pings.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde_json::{json, Value};

use crate::models::repository::split_full_name;
use crate::routes::AppState;
use crate::services::installation_service::{self, InstallationEvent};
use crate::services::{github_service, tag_event};

/// Handle an incoming GitHub webhook payload.
///
/// Only transport problems (signature, header, JSON) produce non-2xx answers;
/// every business outcome is reported in the body.
pub async fn handle_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Value, StatusCode> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let Some(event_type) = headers.get("x-github-event").and_then(|v| v.to_str().ok()) else {
        tracing::warn!("Webhook without X-GitHub-Event header");
        return Err(StatusCode::BAD_REQUEST);
    };

    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    tracing::info!(event = event_type, "Received GitHub webhook");

    match event_type {
        "create" if payload["ref_type"] == "tag" => {
            let tag = payload["ref"].as_str().unwrap_or_default();
            Ok(handle_tag(state, &payload, tag).await)
        }
        "push" => {
            let tag = payload["ref"]
                .as_str()
                .and_then(|r| r.strip_prefix("refs/tags/"));
            match tag {
                // Tag deletions arrive as pushes too.
                Some(_) if payload["deleted"].as_bool() == Some(true) => {
                    Ok(acknowledged(event_type))
                }
                Some(tag) => Ok(handle_tag(state, &payload, tag).await),
                None => Ok(acknowledged(event_type)),
            }
        }
        "installation" | "installation_repositories" => {
            let event: InstallationEvent = serde_json::from_value(payload).map_err(|e| {
                tracing::warn!("Malformed installation payload: {e}");
                StatusCode::BAD_REQUEST
            })?;
            Ok(installation_service::process_installation_event(state.store.as_ref(), &event).await)
        }
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            Ok(json!({"status": "success", "message": "pong"}))
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(acknowledged(event_type))
        }
    }
}

fn acknowledged(event_type: &str) -> Value {
    json!({
        "status": "acknowledged",
        "event_type": event_type,
        "message": "Webhook received but not processed",
    })
}

async fn handle_tag(state: &AppState, payload: &Value, tag: &str) -> Value {
    let full_name = payload["repository"]["full_name"].as_str().unwrap_or_default();
    let Some((git_username, repository_name)) = split_full_name(full_name) else {
        tracing::warn!(full_name, "Tag event with invalid repository name");
        return json!({
            "status": "ignored",
            "message": "Invalid repository name",
            "repository": full_name,
            "tag": tag,
        });
    };

    let outcome = tag_event::process_tag_event(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.dispatcher.as_ref(),
        state.config.issue_timeout(),
        git_username,
        repository_name,
        tag,
    )
    .await;

    serde_json::to_value(outcome).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize tag outcome: {e}");
        json!({"status": "error", "message": "Internal error"})
    })
}
