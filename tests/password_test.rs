//! Password self-service: forgot/reset flow, change flow, reuse policy.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

fn reset_token(app: &TestApp) -> String {
    let mail = app.communicator.last_email().expect("no reset mail");
    assert!(mail.body.contains("/auth/reset-password?token="));
    mail.body.split("token=").nth(1).unwrap().to_string()
}

#[tokio::test]
async fn forgot_password_flow_resets_and_invalidates_the_link() {
    let app = TestApp::spawn();
    app.registered_user("alice", "alice@example.com", "correct-horse-1")
        .await;

    let (status, _) = app
        .post_json("/auth/forgot-password", json!({ "email": "alice@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = reset_token(&app);

    let (status, body) = app
        .post_json(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "correct-horse-2" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // The link is single-use.
    let (status, _) = app
        .post_json(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "correct-horse-3" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Only the new password works.
    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "alice@example.com", "password": "correct-horse-2" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn forgot_password_never_reveals_registration_state() {
    let app = TestApp::spawn();
    let (status, body) = app
        .post_json("/auth/forgot-password", json!({ "email": "ghost@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("if the address"));
    assert!(app.communicator.last_email().is_none());
}

#[tokio::test]
async fn recent_passwords_cannot_be_reused() {
    let app = TestApp::spawn();
    app.registered_user("bob", "bob@example.com", "correct-horse-1")
        .await;

    let (status, _) = app
        .post_json(
            "/auth/change-password",
            json!({
                "email": "bob@example.com",
                "current_password": "correct-horse-1",
                "new_password": "correct-horse-2",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The previous password is retained in history.
    let (status, body) = app
        .post_json(
            "/auth/change-password",
            json!({
                "email": "bob@example.com",
                "current_password": "correct-horse-2",
                "new_password": "correct-horse-1",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Password reuse");

    // Re-setting the current password is refused the same way.
    let (status, _) = app
        .post_json(
            "/auth/change-password",
            json!({
                "email": "bob@example.com",
                "current_password": "correct-horse-2",
                "new_password": "correct-horse-2",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn short_new_passwords_fail_validation() {
    let app = TestApp::spawn();
    app.registered_user("carol", "carol@example.com", "correct-horse-1")
        .await;

    let (status, _) = app
        .post_json(
            "/auth/change-password",
            json!({
                "email": "carol@example.com",
                "current_password": "correct-horse-1",
                "new_password": "short",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
