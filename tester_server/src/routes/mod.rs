//! Tester HTTP routes: webhook, result callback, badge, setup pages.

pub mod api;
pub mod pages;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::TesterConfig;
use crate::services::badge_service;
use crate::services::github_service::{GitHubApp, Notifier};
use crate::services::runner::BuildDispatcher;
use crate::services::setup_service::{self, SetupForm};
use crate::store::Store;

/// Upper bound for any single request, webhook deliveries included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TesterConfig>,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatcher: Arc<dyn BuildDispatcher>,
    pub github: Arc<GitHubApp>,
}

/// Build the tester's Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // GitHub
        .route("/webhook", post(webhook_handler))
        // Runner callback
        .route("/api/test-result", post(test_result_handler))
        // Badge
        .route("/svg/{user}/{repo}", get(badge_handler))
        // Installation flow
        .route("/login", get(login))
        .route("/setup", get(setup))
        .route("/setup/save", post(setup_save))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Compiler Tester API is running"}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, &headers, body).await.map(Json)
}

// ── Result callback ──

async fn test_result_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<api::TestResultPayload>, JsonRejection>,
) -> Result<Json<Value>, StatusCode> {
    let provided = headers.get("x-api-secret").and_then(|v| v.to_str().ok());
    if !api::secret_matches(&state.config.api_secret, provided) {
        tracing::warn!("Result callback with missing or invalid API secret");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let Json(payload) = payload.map_err(|e| {
        tracing::warn!("Malformed result callback: {e}");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    api::record_test_result(&state, payload).await.map(Json)
}

// ── Badge ──

async fn badge_handler(
    State(state): State<AppState>,
    Path((user, repo)): Path<(String, String)>,
) -> Response {
    let now = chrono::Utc::now();
    let svg = match badge_service::repository_badge(state.store.as_ref(), &user, &repo, now).await
    {
        Ok(svg) => svg,
        Err(e) => {
            tracing::error!(repo = %format!("{user}/{repo}"), "Badge query failed: {e}");
            badge_service::render_svg(&[])
        }
    };
    tracing::debug!(user = %user, repo = %repo, "Generated badge");

    (
        [
            (header::CONTENT_TYPE, "image/svg+xml".to_string()),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
            (header::ETAG, badge_service::badge_etag(&user, &repo, now)),
        ],
        svg,
    )
        .into_response()
}

// ── Installation flow ──

async fn login(State(state): State<AppState>) -> Html<String> {
    Html(pages::login_page(&state.config.app_install_url))
}

#[derive(serde::Deserialize)]
pub struct SetupQuery {
    pub installation_id: Option<i64>,
}

async fn setup(
    State(state): State<AppState>,
    Query(query): Query<SetupQuery>,
) -> (StatusCode, Html<String>) {
    let Some(installation_id) = query.installation_id else {
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::error_page("Missing installation_id parameter")),
        );
    };

    match state.github.installation_details(installation_id).await {
        Ok(details) => (
            StatusCode::OK,
            Html(pages::setup_page(installation_id, &details)),
        ),
        Err(e) => {
            tracing::error!(installation_id, "Failed to load installation: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Html(pages::error_page(
                    "Could not load the installation from GitHub. Please try again.",
                )),
            )
        }
    }
}

async fn setup_save(State(state): State<AppState>, body: Bytes) -> Html<String> {
    let form = SetupForm::parse(&body);
    tracing::info!(
        installation_id = form.installation_id,
        repositories = form.entries.len(),
        "Saving setup"
    );

    let mut report = setup_service::save_setup(state.store.as_ref(), &form, chrono::Utc::now()).await;

    if form.add_badges && !report.configured.is_empty() {
        match form.installation_id {
            Some(installation_id) => {
                report.badges = setup_service::add_badges(
                    &state.github,
                    installation_id,
                    &report.configured,
                    &state.config.base_url,
                )
                .await;
            }
            None => tracing::warn!("Badges requested without installation id"),
        }
    }

    Html(pages::setup_report_page(&report))
}
