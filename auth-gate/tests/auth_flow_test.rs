mod common;

use auth_gate::db::IdentityStore;
use axum::http::StatusCode;
use common::{spawn_app, PASSWORD};
use serde_json::json;
use totp_rs::{Algorithm, Secret, TOTP};

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some("AuthGate".to_string()),
        "test".to_string(),
    )
    .unwrap()
    .generate_current()
    .unwrap()
}

#[tokio::test]
async fn test_register_rejects_invalid_payload() {
    let app = spawn_app().await;
    let (status, body) = app
        .post(
            "/api/register",
            json!({ "name": "X", "email": "not-an-email", "password": "short" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = spawn_app().await;
    app.verified_identity("dup@example.com").await;

    let (status, body) = app
        .post(
            "/api/register",
            json!({ "name": "Again", "email": "DUP@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "email_already_registered");
}

#[tokio::test]
async fn test_login_requires_verified_email() {
    let app = spawn_app().await;
    app.post(
        "/api/register",
        json!({ "name": "New", "email": "new@example.com", "password": PASSWORD }),
        None,
    )
    .await;

    let (status, body) = app
        .post(
            "/api/login",
            json!({ "email": "new@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "email_not_verified");
}

#[tokio::test]
async fn test_login_without_second_factor_issues_token() {
    let app = spawn_app().await;
    let id = app.verified_identity("simple@example.com").await;

    let (status, body) = app
        .post(
            "/api/login",
            json!({ "email": "simple@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");

    let token = body["token"].as_str().unwrap();
    assert_eq!(app.state.tokens.validate(token).unwrap(), id);

    let (status, body) = app
        .post(
            "/api/login",
            json!({ "email": "simple@example.com", "password": "wrong-password" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_credentials");
}

#[tokio::test]
async fn test_second_factor_gates_login_once_enabled() {
    let app = spawn_app().await;
    app.verified_identity("mfa@example.com").await;
    let token = app.login("mfa@example.com").await;

    let (status, body) = app.post("/api/2fa/setup", json!({}), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["provisioning_uri"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));
    assert!(body["qr_code_url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    let secret = body["secret"].as_str().unwrap().to_string();

    // Pending secret does not gate login yet.
    app.login("mfa@example.com").await;

    let (status, body) = app
        .post("/api/2fa/verify", json!({ "code": "000000" }), Some(&token))
        .await;
    if status != StatusCode::OK {
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "two_factor_invalid");
    }

    let (status, _) = app
        .post(
            "/api/2fa/verify",
            json!({ "code": current_code(&secret) }),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/login",
            json!({ "email": "mfa@example.com", "password": PASSWORD }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "two_factor_required");

    let (status, body) = app
        .post(
            "/api/login",
            json!({
                "email": "mfa@example.com",
                "password": PASSWORD,
                "two_fa_code": current_code(&secret),
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());

    let (status, body) = app.get("/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["two_fa_enabled"], true);
}

#[tokio::test]
async fn test_verify_before_setup_is_rejected() {
    let app = spawn_app().await;
    app.verified_identity("nosetup@example.com").await;
    let token = app.login("nosetup@example.com").await;

    let (status, body) = app
        .post("/api/2fa/verify", json!({ "code": "123456" }), Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "two_factor_not_setup");
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = spawn_app().await;
    let id = app.verified_identity("reset@example.com").await;

    let (status, _) = app
        .post(
            "/api/forgot-password",
            json!({ "email": "reset@example.com" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/reset-password",
            json!({ "email": "reset@example.com", "code": "abcdef", "new_password": "new-password-1" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_reset_code");

    let code = app
        .store
        .find_identity_by_id(id)
        .await
        .unwrap()
        .reset_code
        .unwrap();
    let (status, _) = app
        .post(
            "/api/reset-password",
            json!({ "email": "reset@example.com", "code": code, "new_password": "new-password-1" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/api/login",
            json!({ "email": "reset@example.com", "password": "new-password-1" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_verify_email_twice_is_rejected() {
    let app = spawn_app().await;
    app.verified_identity("twice@example.com").await;

    let (status, body) = app
        .post(
            "/api/resend-verification",
            json!({ "email": "twice@example.com" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "email_already_verified");
}
