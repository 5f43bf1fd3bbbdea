//! Plan limit enforcement and usage accounting tests
//!
//! Tests are serialized because they share a global test pool.

mod common;

use axum::http::StatusCode;
use common::{body_json, body_text, create_test_app, register, setup_test_db};
use serial_test::serial;

async fn set_messages_used(pool: &sqlx::SqlitePool, email: &str, used: i64) {
    sqlx::query("UPDATE users SET messages_used = ? WHERE email = ?")
        .bind(used)
        .bind(email)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_message_below_quota_is_accepted() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "ada@example.com", "pa55word!").await;

    // One short of the free quota of 25.
    set_messages_used(&pool, "ada@example.com", 24).await;

    let response = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "last one" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("event: message_done"));

    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["messages_used"], 25);
}

#[tokio::test]
#[serial]
async fn test_message_at_quota_is_rejected_with_the_fixed_message() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "ada@example.com", "pa55word!").await;

    set_messages_used(&pool, "ada@example.com", 25).await;

    let response = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "one too many" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(
        body["error"],
        "Monthly message limit of 25 reached. Upgrade your plan to continue."
    );

    // The rejected call must not create a conversation.
    let list = body_json(common::get(&app, "/conversations", Some(token)).await).await;
    assert_eq!(list["conversations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
#[serial]
async fn test_over_quota_counter_still_rejects() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "ada@example.com", "pa55word!").await;

    set_messages_used(&pool, "ada@example.com", 31).await;

    let response = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "hello?" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
#[serial]
async fn test_quota_follows_the_plan() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "pro@example.com", "pa55word!").await;

    sqlx::query("UPDATE users SET plan = 2, messages_used = 25 WHERE email = ?")
        .bind("pro@example.com")
        .execute(&pool)
        .await
        .unwrap();

    // 25 used is over the free quota but far under the pro one.
    let response = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "still going" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    // Accounting settles as the stream is consumed.
    body_text(response).await;

    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["message_quota"], 1000);
    assert_eq!(me["messages_used"], 26);
}

#[tokio::test]
#[serial]
async fn test_usage_alert_state_is_derived_from_counters() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "ada@example.com", "pa55word!").await;

    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert!(me["usage_alert"].is_null());

    set_messages_used(&pool, "ada@example.com", 20).await;
    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["usage_alert"], 80);
    assert_eq!(me["percent_used"], 80);

    set_messages_used(&pool, "ada@example.com", 24).await;
    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["usage_alert"], 95);

    set_messages_used(&pool, "ada@example.com", 25).await;
    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["usage_alert"], 100);
    assert_eq!(me["percent_used"], 100);
}

#[tokio::test]
#[serial]
async fn test_token_counters_accumulate() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let token = register(&app, "ada@example.com", "pa55word!").await;

    let first = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "one" }),
    )
    .await;
    body_text(first).await;
    let second = common::post_json(
        &app,
        "/conversations",
        Some(token),
        serde_json::json!({ "message": "two" }),
    )
    .await;
    body_text(second).await;

    // The canned model reports 12 input and 5 output tokens per call.
    let me = body_json(common::get(&app, "/auth/me", Some(token)).await).await;
    assert_eq!(me["messages_used"], 2);
    assert_eq!(me["tokens_used"], 34);
}
