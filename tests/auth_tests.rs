//! Session-token extractor and account endpoint tests

mod common;

use axum::extract::FromRequestParts;
use axum::http::{Request, StatusCode};
use common::{body_json, create_test_app, post_json, setup_test_db};
use parley_api::api::ExtractToken;
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
async fn test_extract_token_valid_uuid() {
    let token = Uuid::new_v4();
    let req = Request::builder()
        .header("X-Session-Token", token.to_string())
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = ExtractToken::from_request_parts(&mut parts, &()).await;

    assert!(result.is_ok());
    assert_eq!(result.unwrap().0, token);
}

#[tokio::test]
async fn test_extract_token_missing_header() {
    let req = Request::builder().body(()).unwrap();

    let (mut parts, _) = req.into_parts();
    let result = ExtractToken::from_request_parts(&mut parts, &()).await;

    let (status, message) = result.unwrap_err();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(message.contains("missing"));
}

#[tokio::test]
async fn test_extract_token_invalid_uuid() {
    let req = Request::builder()
        .header("X-Session-Token", "not-a-uuid")
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = ExtractToken::from_request_parts(&mut parts, &()).await;

    let (status, message) = result.unwrap_err();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(message.contains("invalid"));
}

#[tokio::test]
#[serial]
async fn test_register_returns_profile_and_token() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let response = post_json(
        &app,
        "/auth/register",
        None,
        serde_json::json!({ "email": "ada@example.com", "password": "correct horse" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["plan"], "free");
    assert_eq!(body["user"]["role"], "user");
    assert_eq!(body["user"]["message_quota"], 25);
    assert!(body["token"].as_str().unwrap().parse::<Uuid>().is_ok());
}

#[tokio::test]
#[serial]
async fn test_register_rejects_duplicates_and_weak_passwords() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let first = post_json(
        &app,
        "/auth/register",
        None,
        serde_json::json!({ "email": "bo@example.com", "password": "long enough" }),
    )
    .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let duplicate = post_json(
        &app,
        "/auth/register",
        None,
        serde_json::json!({ "email": "bo@example.com", "password": "long enough" }),
    )
    .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let weak = post_json(
        &app,
        "/auth/register",
        None,
        serde_json::json!({ "email": "cy@example.com", "password": "short" }),
    )
    .await;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    let invalid = post_json(
        &app,
        "/auth/register",
        None,
        serde_json::json!({ "email": "not-an-email", "password": "long enough" }),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn test_login_round_trip() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    common::register(&app, "maria@example.com", "pa55word!").await;

    let wrong = post_json(
        &app,
        "/auth/login",
        None,
        serde_json::json!({ "email": "maria@example.com", "password": "nope nope" }),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = post_json(
        &app,
        "/auth/login",
        None,
        serde_json::json!({ "email": "maria@example.com", "password": "pa55word!" }),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body = body_json(ok).await;
    assert_eq!(body["user"]["email"], "maria@example.com");
}

#[tokio::test]
#[serial]
async fn test_me_requires_a_valid_session() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let anonymous = common::get(&app, "/auth/me", None).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let stale = common::get(&app, "/auth/me", Some(Uuid::new_v4())).await;
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

    let token = common::register(&app, "zed@example.com", "pa55word!").await;
    let me = common::get(&app, "/auth/me", Some(token)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_json(me).await;
    assert_eq!(body["email"], "zed@example.com");
    assert_eq!(body["messages_used"], 0);
}

#[tokio::test]
#[serial]
async fn test_logout_invalidates_the_session() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let token = common::register(&app, "kim@example.com", "pa55word!").await;

    let logout = post_json(&app, "/auth/logout", Some(token), serde_json::json!({})).await;
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let me = common::get(&app, "/auth/me", Some(token)).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}
