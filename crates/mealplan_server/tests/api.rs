//! HTTP-level tests for the backup endpoints.
//!
//! These drive the router in-process with `oneshot`; no socket is bound.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use mealplan_server::{BackupServer, Role, ServerConfig, AUDIT_COLLECTION};
use mealplan_store::{
    Document, DocumentStore, EngineInfo, Filter, FindOptions, IndexSpec, MemoryStore, StoreResult,
    Update, UpdateOutcome,
};
use mealplan_testkit::fixtures::{seeded_memory_store, UnavailableStore};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &[u8] = b"api-test-secret";

// ── Test app builder ───────────────────────────────────────────

fn config() -> ServerConfig {
    ServerConfig::default().with_auth_secret(SECRET.to_vec())
}

struct TestApp {
    server: BackupServer,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: ServerConfig) -> Self {
        let store = seeded_memory_store();
        let server = BackupServer::new(config, store.clone());
        Self { server, store }
    }

    fn router(&self) -> Router {
        self.server.router()
    }

    fn token(&self, role: Role) -> String {
        self.server.issue_token(Uuid::new_v4(), role).unwrap()
    }

    fn audit_count(&self) -> u64 {
        self.store.count(AUDIT_COLLECTION, &Filter::All).unwrap()
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.4")
        .header(header::USER_AGENT, "api-tests");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header("x-forwarded-for", "198.51.100.4")
        .header(header::USER_AGENT, "api-tests")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Helpers to read response bodies ────────────────────────────

async fn body_text(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

async fn execute(app: &TestApp, script: Value) -> (StatusCode, Value) {
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post("/backup/execute-script", &token, json!({ "script": script })))
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

// ── Auth gate ──────────────────────────────────────────────────

#[tokio::test]
async fn test_health_no_auth() {
    let app = TestApp::new();
    let resp = app.router().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();
    let resp = app
        .router()
        .oneshot(get("/backup/database-info", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Authentication required");
}

#[tokio::test]
async fn test_forged_token_is_unauthorized() {
    let app = TestApp::new();
    let other = BackupServer::new(
        ServerConfig::default().with_auth_secret(b"someone-else".to_vec()),
        Arc::new(MemoryStore::new()),
    );
    let forged = other.issue_token(Uuid::new_v4(), Role::Admin).unwrap();

    let resp = app
        .router()
        .oneshot(get("/backup/database-info", Some(&forged)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let app = TestApp::with_config(config().with_token_expiry(Duration::from_secs(0)));
    let token = app.token(Role::Admin);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let resp = app
        .router()
        .oneshot(get("/backup/database-info", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["message"], "Token expired");
}

#[tokio::test]
async fn test_non_admin_is_forbidden_on_every_endpoint() {
    let app = TestApp::new();
    let token = app.token(Role::User);

    let resp = app
        .router()
        .oneshot(get("/backup/database-info", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["message"], "Admin access required");

    for uri in [
        "/backup/generate-script",
        "/backup/validate-compatibility",
        "/backup/execute-script",
    ] {
        let resp = app
            .router()
            .oneshot(post(uri, &token, json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
    }
}

// ── Database info ──────────────────────────────────────────────

#[tokio::test]
async fn test_database_info() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(get("/backup/database-info", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert!(data["appVersion"].is_string());
    assert_eq!(data["collections"]["Meal"]["count"], 3);
    assert_eq!(data["collections"]["Meal"]["hasData"], true);
    assert_eq!(data["collections"]["ShoppingList"]["hasData"], false);
    assert_eq!(data["totalDocuments"], 11);
    assert_eq!(data["database"]["name"], "memory");
}

// ── Script generation ──────────────────────────────────────────

#[tokio::test]
async fn test_generate_mongodb_script() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post(
            "/backup/generate-script",
            &token,
            json!({"format": "mongodb", "includeIndexes": true}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "application/javascript"
    );
    let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\""));
    assert!(disposition.ends_with(".js\""));

    let script = body_text(resp).await;
    assert!(script.contains("Generated backup script for Meal Planner App"));
    assert!(script.contains("if (!db)"));
    assert!(script.contains("getIndexes"));
    assert!(script.contains("========== RESTORATION INSTRUCTIONS =========="));
}

#[tokio::test]
async fn test_generate_script_without_indexes() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post(
            "/backup/generate-script",
            &token,
            json!({"format": "mongodb", "includeIndexes": false}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!body_text(resp).await.contains("getIndexes"));
}

#[tokio::test]
async fn test_generate_json_subset() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post(
            "/backup/generate-script",
            &token,
            json!({"format": "json", "collections": ["Meal", "Unknown"]}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.ends_with(".json\""));

    let doc = body_json(resp).await;
    assert_eq!(doc["metadata"]["type"], "json_export");
    let data = doc["data"].as_object().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data["Meal"]["count"], 3);
    assert_eq!(data["Meal"]["records"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_generate_rejects_unknown_format() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post("/backup/generate-script", &token, json!({"format": "xml"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Validation failed");
    assert_eq!(body["errors"][0]["field"], "format");
}

// ── Compatibility ──────────────────────────────────────────────

#[tokio::test]
async fn test_validate_requires_backup_version() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post("/backup/validate-compatibility", &token, json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["message"], "Validation failed");
    assert_eq!(body["errors"][0]["field"], "backupVersion");
}

#[tokio::test]
async fn test_validate_future_major_is_incompatible() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post(
            "/backup/validate-compatibility",
            &token,
            json!({"backupVersion": "99.0.0"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let report = &body["data"]["compatibility"];
    assert_eq!(report["isCompatible"], false);
    assert!(!report["errors"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["backupVersion"], "99.0.0");
    assert!(body["data"]["currentVersion"].is_string());
}

#[tokio::test]
async fn test_validate_reports_foreign_collections() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let resp = app
        .router()
        .oneshot(post(
            "/backup/validate-compatibility",
            &token,
            json!({
                "backupVersion": "0.9.0",
                "backupData": {"metadata": {"statistics": {"recipes": {"schema": ["title"]}}}},
            }),
        ))
        .await
        .unwrap();
    let body = body_json(resp).await;
    let warnings: Vec<&str> = body["data"]["compatibility"]["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(warnings.iter().any(|w| w.contains("pre-1.0 version")));
    assert!(warnings.iter().any(|w| w.contains("recipes")));
}

// ── Script execution ───────────────────────────────────────────

#[tokio::test]
async fn test_execute_captures_output() {
    let app = TestApp::new();
    let (status, body) = execute(&app, json!("console.log('x'); console.log('y')")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let output: Vec<&str> = body["output"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(output[0].contains("Script execution initiated"));
    assert_eq!(&output[1..], &["x", "y"]);
}

#[tokio::test]
async fn test_execute_writes_through_db_proxy() {
    let app = TestApp::new();
    let (status, body) = execute(
        &app,
        json!("db.meals.insertOne({name: 'Chili', servings: 5}); print(db.meals.countDocuments({}))"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["output"][1], "4");
    assert_eq!(app.store.count("meals", &Filter::All).unwrap(), 4);
}

#[tokio::test]
async fn test_execute_runtime_error() {
    let app = TestApp::new();
    let (status, body) = execute(&app, json!("print('before'); throw new Error('boom')")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Script execution failed");
    assert!(body["error"].as_str().unwrap().contains("boom"));
    assert_eq!(body["errorKind"], "RuntimeError");
    assert_eq!(body["output"][1], "before");
}

#[tokio::test]
async fn test_execute_syntax_error() {
    let app = TestApp::new();
    let (status, body) = execute(&app, json!("not valid syntax !!!")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Script execution failed");
    assert!(!body["error"].as_str().unwrap().is_empty());
    assert_eq!(body["errorKind"], "SyntaxError");
}

#[tokio::test]
async fn test_execute_rejects_non_string_script() {
    let app = TestApp::new();
    for script in [json!(42), json!({"code": "print(1)"}), Value::Null] {
        let (status, body) = execute(&app, script).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("Script must be a string"));
    }
}

// ── Audit trail ────────────────────────────────────────────────

#[tokio::test]
async fn test_requests_are_audited() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    app.router()
        .oneshot(get("/backup/database-info", Some(&token)))
        .await
        .unwrap();
    app.router()
        .oneshot(get("/backup/database-info", None))
        .await
        .unwrap();

    let entries = app
        .store
        .find(AUDIT_COLLECTION, &Filter::All, &Default::default())
        .unwrap();
    assert_eq!(entries.len(), 2);
    let actions: Vec<&str> = entries.iter().filter_map(|e| e["action"].as_str()).collect();
    assert!(actions.contains(&"backup.database_info"));
    assert!(actions.contains(&"auth.denied"));
    assert!(entries.iter().all(|e| e["ipAddress"] == "198.51.100.4"));
}

#[tokio::test]
async fn test_audit_without_ip_is_dropped() {
    let app = TestApp::new();
    let token = app.token(Role::Admin);
    let request = Request::builder()
        .uri("/backup/database-info")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let resp = app.router().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(app.audit_count(), 0);
}

// ── Failure modes ──────────────────────────────────────────────

#[tokio::test]
async fn test_store_outage_detail_depends_on_mode() {
    for production in [false, true] {
        let server = BackupServer::new(
            config().with_production(production),
            Arc::new(UnavailableStore),
        );
        let token = server.issue_token(Uuid::new_v4(), Role::Admin).unwrap();
        let resp = server
            .router()
            .oneshot(get("/backup/database-info", Some(&token)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body.get("error").is_some(), !production);
        if !production {
            assert!(body["error"].as_str().unwrap().contains("connection refused"));
        }
    }
}

// ── Blocking work placement ────────────────────────────────────

/// Wraps a store and remembers which threads called into it.
struct ThreadRecordingStore {
    inner: Arc<MemoryStore>,
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadRecordingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            threads: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) {
        self.threads.lock().unwrap().push(thread::current().id());
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }
}

impl DocumentStore for ThreadRecordingStore {
    fn engine(&self) -> EngineInfo {
        self.inner.engine()
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        self.seen();
        self.inner.collection_names()
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.seen();
        self.inner.count(collection, filter)
    }

    fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> StoreResult<Vec<Document>> {
        self.seen();
        self.inner.find(collection, filter, options)
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> StoreResult<Vec<Value>> {
        self.seen();
        self.inner.insert_many(collection, docs)
    }

    fn update(&self, collection: &str, filter: &Filter, update: &Update, multi: bool) -> StoreResult<UpdateOutcome> {
        self.seen();
        self.inner.update(collection, filter, update, multi)
    }

    fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> StoreResult<u64> {
        self.seen();
        self.inner.delete(collection, filter, multi)
    }

    fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        self.seen();
        self.inner.drop_collection(collection)
    }

    fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        self.seen();
        self.inner.indexes(collection)
    }

    fn create_index(&self, collection: &str, spec: IndexSpec) -> StoreResult<String> {
        self.seen();
        self.inner.create_index(collection, spec)
    }
}

#[tokio::test]
async fn test_store_calls_run_off_the_async_worker() {
    // The default test runtime is single-threaded and drives this thread.
    let worker = thread::current().id();
    let store = Arc::new(ThreadRecordingStore::new(seeded_memory_store()));
    let server = BackupServer::new(config(), store.clone());
    let token = server.issue_token(Uuid::new_v4(), Role::Admin).unwrap();

    let requests = [
        get("/backup/database-info", Some(&token)),
        post("/backup/generate-script", &token, json!({"format": "mongodb", "includeIndexes": true})),
        post("/backup/validate-compatibility", &token, json!({"backupVersion": "1.0.0"})),
        post("/backup/execute-script", &token, json!({"script": "db.meals.countDocuments({})"})),
        get("/backup/database-info", Some("not-a-token")),
    ];
    for request in requests {
        let resp = server.router().oneshot(request).await.unwrap();
        assert_ne!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let threads = store.threads();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|t| *t != worker));
}
