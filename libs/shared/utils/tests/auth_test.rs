use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::Extension,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use tower::ServiceExt;

use shared_models::auth::User;
use shared_utils::extractor::auth_middleware;
use shared_utils::jwt::validate_token;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn secret() -> String {
    TestConfig::default().auth_jwt_secret
}

#[test]
fn test_valid_token_yields_user() {
    let token = JwtTestUtils::create_test_token(&TestUser::doctor(7), &secret(), None);

    let user = validate_token(&token, &secret()).unwrap();

    assert_eq!(user.numeric_id(), Some(7));
    assert!(user.is_doctor(7));
    assert!(user.created_at.is_some());
}

#[test]
fn test_rejected_tokens() {
    let patient = TestUser::patient(42);

    let expired = JwtTestUtils::create_expired_token(&patient, &secret());
    assert_eq!(validate_token(&expired, &secret()).unwrap_err(), "Token expired");

    let forged = JwtTestUtils::create_invalid_signature_token(&patient);
    assert_eq!(validate_token(&forged, &secret()).unwrap_err(), "Invalid token signature");

    assert_eq!(validate_token("abc", &secret()).unwrap_err(), "Invalid token format");

    let valid = JwtTestUtils::create_test_token(&patient, &secret(), None);
    assert!(validate_token(&valid, "").is_err());
}

async fn whoami(Extension(user): Extension<User>) -> String {
    user.id
}

fn app() -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .layer(middleware::from_fn_with_state(TestConfig::default().to_arc(), auth_middleware))
}

#[tokio::test]
async fn test_middleware_attaches_user() {
    let request = Request::builder()
        .uri("/whoami")
        .header(AUTHORIZATION, JwtTestUtils::bearer(&TestUser::admin(3), &secret()))
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"3");
}

#[tokio::test]
async fn test_middleware_rejects_missing_or_malformed_header() {
    let missing = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
    assert_eq!(app().oneshot(missing).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let token = JwtTestUtils::create_test_token(&TestUser::admin(3), &secret(), None);
    let no_scheme = Request::builder()
        .uri("/whoami")
        .header(AUTHORIZATION, token)
        .body(Body::empty())
        .unwrap();
    assert_eq!(app().oneshot(no_scheme).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}
