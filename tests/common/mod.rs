//! Shared helpers for the integration test suite.
//!
//! Tests are serialized because they share a global test pool: the DI
//! container always constructs `DatabaseConnection` itself, so each test
//! installs its own in-memory pool via `DatabaseConnection::set_test_pool()`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use di::{Injectable, ServiceCollection, injectable};
use di_axum::RouterServiceProviderExtensions;
use futures_util::stream::BoxStream;
use parley_api::api;
use parley_api::core::assistant::{ChatMessage, ModelClient, StreamEvent};
use parley_api::core::services::{
    LogNotifier, MyAccountService, MyBillingService, MyConversationService, MyMemoryService,
    MyUsageService,
};
use parley_api::infrastructure::database::DatabaseConnection;
use parley_api::infrastructure::repositories::{
    DbConversationRepository, DbMemoryRepository, DbSessionRepository, DbUserRepository,
    DbWebhookEventRepository,
};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use tower::ServiceExt;
use uuid::Uuid;

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns pool.
/// Uses shared-cache in-memory SQLite so the DI-created connections see the
/// same data as the test's own pool.
pub async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_url = format!("sqlite:file:testdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();

    DatabaseConnection::set_test_pool(pool.clone());

    pool
}

/// Canned upstream: two text deltas and fixed token counts (12 in, 5 out).
#[injectable(ModelClient)]
pub struct MockModelClient;

impl ModelClient for MockModelClient {
    fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
        _system: Option<String>,
    ) -> BoxStream<'static, parley_api::error::Result<StreamEvent>> {
        Box::pin(futures_util::stream::iter(vec![
            Ok(StreamEvent::Start { input_tokens: 12 }),
            Ok(StreamEvent::Delta { text: "Hello ".to_owned() }),
            Ok(StreamEvent::Delta { text: "there!".to_owned() }),
            Ok(StreamEvent::Done { output_tokens: 5 }),
        ]))
    }
}

/// Create test app - uses the global test pool set by setup_test_db()
pub fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::transient())
        .add(MockModelClient::singleton())
        .add(LogNotifier::singleton())
        .add(DbUserRepository::scoped())
        .add(DbSessionRepository::scoped())
        .add(DbConversationRepository::scoped())
        .add(DbMemoryRepository::scoped())
        .add(DbWebhookEventRepository::scoped())
        .add(MyAccountService::scoped())
        .add(MyConversationService::scoped())
        .add(MyUsageService::scoped())
        .add(MyMemoryService::scoped())
        .add(MyBillingService::scoped())
        .build_provider()
        .unwrap();

    axum::Router::new()
        .nest("/auth", api::auth::router())
        .nest("/projects", api::projects::router())
        .nest("/conversations", api::conversations::router())
        .nest("/billing", api::billing::router())
        .nest("/admin", api::admin::router())
        .with_provider(provider)
}

fn request(method: &str, uri: &str, token: Option<Uuid>) -> axum::http::request::Builder {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Session-Token", token.to_string());
    }
    builder
}

pub async fn get(app: &axum::Router, uri: &str, token: Option<Uuid>) -> Response {
    app.clone()
        .oneshot(request("GET", uri, token).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn delete(app: &axum::Router, uri: &str, token: Option<Uuid>) -> Response {
    app.clone()
        .oneshot(request("DELETE", uri, token).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(
    app: &axum::Router,
    uri: &str,
    token: Option<Uuid>,
    body: serde_json::Value,
) -> Response {
    app.clone()
        .oneshot(
            request("POST", uri, token)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn put_json(
    app: &axum::Router,
    uri: &str,
    token: Option<Uuid>,
    body: serde_json::Value,
) -> Response {
    app.clone()
        .oneshot(
            request("PUT", uri, token)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Registers an account and returns its session token.
pub async fn register(app: &axum::Router, email: &str, password: &str) -> Uuid {
    let response = post_json(
        app,
        "/auth/register",
        None,
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);

    let body = body_json(response).await;
    body["token"].as_str().unwrap().parse().unwrap()
}
