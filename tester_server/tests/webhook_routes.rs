//! Router tests: webhook admission flow, result callback and badge endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use compiler_tester_server::config::TesterConfig;
use compiler_tester_server::models::repository::Repository;
use compiler_tester_server::models::semester::Semester;
use compiler_tester_server::models::version::Version;
use compiler_tester_server::routes::{router, AppState};
use compiler_tester_server::services::github_service::{GitHubApp, Notifier};
use compiler_tester_server::services::runner::{BuildDispatcher, BuildRequest};
use compiler_tester_server::store::{MemoryStore, Store};

const API_SECRET: &str = "runner-secret";
const SEMESTER: &str = "BCC-2025-2";

#[derive(Default)]
struct FakeNotifier {
    issues: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn open_issue(
        &self,
        repository: &Repository,
        title: &str,
        _body: &str,
    ) -> anyhow::Result<Option<String>> {
        let mut issues = self.issues.lock().unwrap();
        issues.push((repository.full_name(), title.to_string()));
        Ok(Some(format!(
            "https://github.com/{}/issues/{}",
            repository.full_name(),
            issues.len()
        )))
    }
}

#[derive(Default)]
struct FakeDispatcher {
    builds: Mutex<Vec<BuildRequest>>,
}

impl BuildDispatcher for FakeDispatcher {
    fn dispatch(&self, request: BuildRequest) {
        self.builds.lock().unwrap().push(request);
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    notifier: Arc<FakeNotifier>,
    dispatcher: Arc<FakeDispatcher>,
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_semester(Semester {
        name: SEMESTER.to_string(),
        language: "python".to_string(),
        extension: ".py".to_string(),
        secret: String::new(),
    });
    let now = Utc::now();
    for (name, from, to) in [
        ("v1.0", now - Duration::days(30), now - Duration::days(20)),
        ("v1.1", now - Duration::days(2), now + Duration::days(5)),
        ("v1.2", now + Duration::days(10), now + Duration::days(20)),
    ] {
        store.insert_version(Version {
            semester_name: SEMESTER.to_string(),
            version_name: name.to_string(),
            direct_input: false,
            date_from: from,
            date_to: to,
        });
    }
    store.insert_repository(Repository {
        git_username: "alice".to_string(),
        repository_name: "proj".to_string(),
        semester_name: Some(SEMESTER.to_string()),
        language: Some("Python".to_string()),
        program_call: "python3 main.py".to_string(),
        compiled: false,
        installation_id: Some(42),
        create_date: None,
        write_date: None,
    });
    store
}

fn harness_with(config: TesterConfig) -> Harness {
    let store = seeded_store();
    let notifier = Arc::new(FakeNotifier::default());
    let dispatcher = Arc::new(FakeDispatcher::default());
    let github = Arc::new(GitHubApp::from_config(&config).unwrap());
    let state = AppState {
        config: Arc::new(config),
        store: store.clone(),
        notifier: notifier.clone(),
        dispatcher: dispatcher.clone(),
        github,
    };

    Harness {
        app: router(state),
        store,
        notifier,
        dispatcher,
    }
}

fn harness() -> Harness {
    let mut config = TesterConfig::default();
    config.api_secret = API_SECRET.to_string();
    harness_with(config)
}

fn create_tag(tag: &str) -> Value {
    json!({
        "ref": tag,
        "ref_type": "tag",
        "repository": {"full_name": "alice/proj"},
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn webhook(app: &Router, event: &str, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn callback(app: &Router, secret: Option<&str>, body: String) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/test-result")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-api-secret", secret);
    }
    let (status, body) = send(app, builder.body(Body::from(body)).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn result_body(release: &str, status: &str, issue_text: Option<&str>) -> String {
    json!({
        "version_name": &release[..4],
        "release_name": release,
        "git_username": "alice",
        "repository_name": "proj",
        "test_status": status,
        "issue_text": issue_text,
    })
    .to_string()
}

#[tokio::test]
async fn first_release_is_admitted_and_dispatched() {
    let h = harness();
    let (status, body) = webhook(&h.app, "create", &create_tag("v1.1.0")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["repository"], "alice/proj");
    let builds = h.dispatcher.builds.lock().unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].release, "v1.1.0");
    assert_eq!(builds[0].version_name, "v1.1");
    assert_eq!(builds[0].language, "python");
}

#[tokio::test]
async fn push_of_tag_ref_goes_through_admission() {
    let h = harness();
    let payload = json!({
        "ref": "refs/tags/v1.1.0",
        "repository": {"full_name": "alice/proj"},
    });
    let (status, body) = webhook(&h.app, "push", &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let branch_push = json!({"ref": "refs/heads/main", "repository": {"full_name": "alice/proj"}});
    let (_, body) = webhook(&h.app, "push", &branch_push).await;
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(h.dispatcher.builds.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_tag_is_rejected_with_issue() {
    let h = harness();
    let (status, body) = webhook(&h.app, "create", &create_tag("final-version")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["reason"], "malformed-tag");
    assert_eq!(body["issue_url"], "https://github.com/alice/proj/issues/1");
    assert!(h.dispatcher.builds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn redelivered_tag_is_a_silent_duplicate() {
    let h = harness();
    webhook(&h.app, "create", &create_tag("v1.1.0")).await;
    let (status, _) = callback(&h.app, Some(API_SECRET), result_body("v1.1.0", "PASS", None)).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..2 {
        let (status, body) = webhook(&h.app, "create", &create_tag("v1.1.0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reason"], "duplicate-tag");
        assert!(body.get("issue_url").is_none());
    }
    assert_eq!(h.dispatcher.builds.lock().unwrap().len(), 1);
    assert!(h.notifier.issues.lock().unwrap().is_empty());
}

#[tokio::test]
async fn patch_regression_is_rejected() {
    let h = harness();
    callback(&h.app, Some(API_SECRET), result_body("v1.1.5", "PASS", None)).await;

    let (_, body) = webhook(&h.app, "create", &create_tag("v1.1.3")).await;
    assert_eq!(body["reason"], "non-monotonic-tag");

    let (_, body) = webhook(&h.app, "create", &create_tag("v1.1.6")).await;
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn unconfigured_version_is_rejected() {
    let h = harness();
    let (_, body) = webhook(&h.app, "create", &create_tag("v3.0.0")).await;
    assert_eq!(body["reason"], "unmapped-version");
    assert_eq!(h.notifier.issues.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_repository_is_ignored() {
    let h = harness();
    let payload = json!({
        "ref": "v1.1.0",
        "ref_type": "tag",
        "repository": {"full_name": "mallory/proj"},
    });
    let (status, body) = webhook(&h.app, "create", &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.notifier.issues.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transport_errors_are_not_2xx() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-github-event", "create")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Issue creation that never returns, like a GitHub that stopped answering.
struct StalledNotifier;

#[async_trait]
impl Notifier for StalledNotifier {
    async fn open_issue(
        &self,
        _repository: &Repository,
        _title: &str,
        _body: &str,
    ) -> anyhow::Result<Option<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(None)
    }
}

#[tokio::test]
async fn rejection_is_acknowledged_when_issue_creation_stalls() {
    let mut config = TesterConfig::default();
    config.issue_timeout_ms = 100;
    let github = Arc::new(GitHubApp::from_config(&config).unwrap());
    let dispatcher = Arc::new(FakeDispatcher::default());
    let app = router(AppState {
        config: Arc::new(config),
        store: seeded_store(),
        notifier: Arc::new(StalledNotifier),
        dispatcher: dispatcher.clone(),
        github,
    });

    let started = std::time::Instant::now();
    let (status, body) = webhook(&app, "create", &create_tag("not-a-version")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(body["status"], "error");
    assert_eq!(body["reason"], "malformed-tag");
    assert!(body.get("issue_url").is_none());
    assert!(dispatcher.builds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_signature_is_enforced_when_configured() {
    let mut config = TesterConfig::default();
    config.github_webhook_secret = "hook-secret".to_string();
    let h = harness_with(config);
    let payload = create_tag("v1.1.0").to_string();

    let mut mac = Hmac::<Sha256>::new_from_slice(b"hook-secret").unwrap();
    mac.update(payload.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let request = |sig: &str| {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "create")
            .header("x-hub-signature-256", sig)
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, _) = send(&h.app, request("sha256=deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.dispatcher.builds.lock().unwrap().is_empty());

    let (status, _) = send(&h.app, request(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.dispatcher.builds.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn installation_then_uninstallation() {
    let h = harness();
    let created = json!({
        "action": "created",
        "installation": {"id": 99, "account": {"login": "bob"}},
        "repositories": [{"full_name": "bob/compiler"}],
    });
    let (status, body) = webhook(&h.app, "installation", &created).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next_step"], "User should complete setup form");
    assert!(h.store.find_repository("bob", "compiler").await.unwrap().is_some());

    // Not set up yet: tags are ignored.
    let payload = json!({
        "ref": "v1.1.0",
        "ref_type": "tag",
        "repository": {"full_name": "bob/compiler"},
    });
    let (_, body) = webhook(&h.app, "create", &payload).await;
    assert_eq!(body["status"], "ignored");

    let deleted = json!({"action": "deleted", "installation": {"id": 99}});
    let (_, body) = webhook(&h.app, "installation", &deleted).await;
    assert_eq!(body["removed_repositories"], json!(["bob/compiler"]));
    assert!(h.store.find_repository("bob", "compiler").await.unwrap().is_none());
}

#[tokio::test]
async fn ping_and_other_events() {
    let h = harness();
    let (_, body) = webhook(&h.app, "ping", &json!({"zen": "Keep it simple."})).await;
    assert_eq!(body["message"], "pong");

    let (status, body) = webhook(&h.app, "issues", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(body["event_type"], "issues");
}

#[tokio::test]
async fn callback_requires_secret() {
    let h = harness();
    let body = result_body("v1.1.0", "PASS", None);

    let (status, _) = callback(&h.app, None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = callback(&h.app, Some("wrong"), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.store.test_result_count(), 0);
}

#[tokio::test]
async fn callback_without_configured_secret_rejects_everything() {
    let h = harness_with(TesterConfig::default());
    let (status, _) = callback(&h.app, Some(""), result_body("v1.1.0", "PASS", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn callback_validates_body_and_repository() {
    let h = harness();

    let (status, _) = callback(
        &h.app,
        Some(API_SECRET),
        result_body("v1.1.0", "SKIPPED", None),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = callback(&h.app, Some(API_SECRET), "{\"release_name\":1}".to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let unknown = json!({
        "version_name": "v1.1",
        "release_name": "v1.1.0",
        "git_username": "mallory",
        "repository_name": "proj",
        "test_status": "PASS",
    })
    .to_string();
    let (status, _) = callback(&h.app, Some(API_SECRET), unknown).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_result_opens_issue_and_upserts() {
    let h = harness();

    let (status, body) = callback(
        &h.app,
        Some(API_SECRET),
        result_body("v1.1.0", "FAILED", Some("test 3: expected 7, got 8")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["issue_url"].is_string());

    // Same key reported again: overwritten in place, no issue for a pass.
    let (_, body) = callback(&h.app, Some(API_SECRET), result_body("v1.1.0", "PASS", None)).await;
    assert!(body.get("issue_url").is_none());

    let results = h
        .store
        .test_results_for_repository("alice", "proj")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].test_status, "PASS");
    assert_eq!(h.notifier.issues.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn badge_is_uncached_svg() {
    let h = harness();
    callback(&h.app, Some(API_SECRET), result_body("v1.1.0", "PASS", None)).await;

    let request = Request::builder()
        .uri("/svg/alice/proj")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["content-type"], "image/svg+xml");
    assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "0");
    assert!(headers.contains_key("etag"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let svg = String::from_utf8(body.to_vec()).unwrap();
    // v1.0 and v1.1 have opened, v1.2 has not.
    assert_eq!(svg.matches("fill=\"#595959\"").count(), 2);
    assert!(svg.contains(">v1.0</text>"));
    assert!(svg.contains(">v1.1</text>"));
    assert!(!svg.contains(">v1.2</text>"));
    assert!(svg.contains(">Pass</text>"));
    assert!(svg.contains(">To do</text>"));
}

#[tokio::test]
async fn badge_for_unknown_repository_is_empty() {
    let h = harness();
    let request = Request::builder()
        .uri("/svg/nobody/nothing")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    let svg = String::from_utf8(body).unwrap();
    assert!(svg.contains("width=\"0\""));
    assert!(!svg.contains("<rect"));
}

#[tokio::test]
async fn service_pages() {
    let h = harness();

    let (status, body) = send(&h.app, Request::builder().uri("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["message"], "Compiler Tester API is running");

    let (_, body) = send(&h.app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&h.app, Request::builder().uri("/login").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("installations/new"));

    let (status, _) = send(&h.app, Request::builder().uri("/setup").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn setup_save_configures_repository() {
    let h = harness();
    h.store
        .save_repository_installation("alice", "fresh", 42)
        .await
        .unwrap();
    let now = Utc::now();
    let half = if chrono::Datelike::month(&now) <= 6 { 1 } else { 2 };
    let semester = format!("BCC-{}-{half}", chrono::Datelike::year(&now));
    h.store.insert_semester(Semester {
        name: semester.clone(),
        language: "python".to_string(),
        extension: ".py".to_string(),
        secret: String::new(),
    });

    let form = "installation_id=42&git_username%5B%5D=alice&repository_name%5B%5D=fresh\
&email%5B%5D=alice%40example.com&name%5B%5D=Alice&language%5B%5D=Python&course_fresh=CieComp";
    let request = Request::builder()
        .method("POST")
        .uri("/setup/save")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("alice/fresh"));

    let repo = h.store.find_repository("alice", "fresh").await.unwrap().unwrap();
    assert_eq!(repo.semester_name.as_deref(), Some(semester.as_str()));
    assert_eq!(repo.program_call, "python3 main.py");
    assert_eq!(h.store.users().len(), 1);
}
