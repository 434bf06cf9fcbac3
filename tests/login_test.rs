//! Password and directory login paths through the HTTP surface.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::TestApp;
use identity_service::models::AuthMethod;
use serde_json::json;

#[tokio::test]
async fn password_login_succeeds_for_confirmed_user() {
    let app = TestApp::spawn();
    app.registered_user("alice", "alice@example.com", "correct-horse-1")
        .await;

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "alice@example.com", "password": "correct-horse-1" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["requires_two_factor"], false);
    assert!(body["tokens"]["access_token"].as_str().unwrap().len() > 20);
    assert!(body["tokens"]["refresh_token"].as_str().is_some());
}

#[tokio::test]
async fn email_lookup_is_case_insensitive() {
    let app = TestApp::spawn();
    app.registered_user("alice", "Alice@Example.com", "correct-horse-1")
        .await;

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "ALICE@EXAMPLE.COM", "password": "correct-horse-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn wrong_password_is_rejected_uniformly() {
    let app = TestApp::spawn();
    app.registered_user("alice", "alice@example.com", "correct-horse-1")
        .await;

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "alice@example.com", "password": "wrong" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "invalid_credentials");
    assert!(body["tokens"].is_null());

    // Unknown address produces the identical outcome.
    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "nobody@example.com", "password": "whatever" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "invalid_credentials");
}

#[tokio::test]
async fn unconfirmed_email_cannot_log_in() {
    let app = TestApp::spawn();
    let account = app.create_user_account("bob").await;
    app.create_email_auth(
        account["id"].as_str().unwrap(),
        "bob@example.com",
        "correct-horse-1",
    )
    .await;
    // No confirmation step.

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "bob@example.com", "password": "correct-horse-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "email_not_confirmed");
}

#[tokio::test]
async fn expired_password_cannot_log_in() {
    let app = TestApp::spawn();
    let (_account, auth) = app
        .registered_user("dave", "dave@example.com", "correct-horse-1")
        .await;

    // Back-date the expiry window directly through the store.
    let mut record = app
        .store
        .get_auth(auth["id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    if let AuthMethod::Email(email) = &mut record.method {
        email.password_expires_at = Utc::now().date_naive() - Duration::days(1);
    }
    let etag = record.etag.clone();
    app.store.update_auth(&etag, record).await.unwrap();

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "dave@example.com", "password": "correct-horse-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "password_expired");
    assert!(body["tokens"].is_null());

    // The wrong password still reads as invalid credentials, not expiry.
    let (_, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "dave@example.com", "password": "wrong" }),
        )
        .await;
    assert_eq!(body["status"], "invalid_credentials");
}

#[tokio::test]
async fn deactivated_account_cannot_log_in() {
    let app = TestApp::spawn();
    let (account, _auth) = app
        .registered_user("carol", "carol@example.com", "correct-horse-1")
        .await;

    let (status, updated) = app
        .put_json(
            &format!("/admin/accounts/{}", account["id"].as_str().unwrap()),
            json!({
                "etag": account["etag"],
                "name": account["name"],
                "is_active": false,
                "contacts": [],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", updated);

    let (status, body) = app
        .post_json(
            "/auth/login",
            json!({ "email": "carol@example.com", "password": "correct-horse-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "account_inactive");
}

#[tokio::test]
async fn directory_login_maps_the_resolved_user() {
    let app = TestApp::spawn();
    let account = app.create_user_account("dora").await;

    let (status, domain) = app
        .post_json(
            "/admin/domains",
            json!({
                "name": "corp.example.com",
                "netbios_name": "CORP",
                "domain_controllers": [{ "host": "dc1.corp.example.com", "port": 636 }],
                "base_dn": "DC=corp,DC=example,DC=com",
                "use_secure_ldap": true,
                "service_account_username": "svc-bind",
                "service_account_password": "svc-secret",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", domain);

    let (status, _auth) = app
        .post_json(
            &format!(
                "/admin/accounts/{}/auths/directory",
                account["id"].as_str().unwrap()
            ),
            json!({
                "ldap_domain_id": domain["id"],
                "directory_username": "dora",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.directory.register_user("corp.example.com", "dora", "dir-pass-1");

    // NETBIOS name resolves the same domain.
    let (status, body) = app
        .post_json(
            "/auth/login/directory",
            json!({ "domain": "CORP", "username": "dora", "password": "dir-pass-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["account_id"], account["id"]);
}

#[tokio::test]
async fn directory_login_failure_statuses_are_distinguished() {
    let app = TestApp::spawn();

    // No domain supplied.
    let (status, body) = app
        .post_json(
            "/auth/login/directory",
            json!({ "domain": null, "username": "x", "password": "y" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "domain_not_specified");

    // Unregistered domain.
    let (_, body) = app
        .post_json(
            "/auth/login/directory",
            json!({ "domain": "nowhere.example.com", "username": "x", "password": "y" }),
        )
        .await;
    assert_eq!(body["status"], "domain_not_registered");

    // Registered domain, bind succeeds, but no local mapping.
    let (_, domain) = app
        .post_json(
            "/admin/domains",
            json!({
                "name": "corp.example.com",
                "netbios_name": "CORP",
                "domain_controllers": [{ "host": "dc1", "port": 389 }],
                "base_dn": "DC=corp",
                "use_secure_ldap": false,
                "service_account_username": "svc",
                "service_account_password": "svc",
            }),
        )
        .await;
    assert!(domain["id"].is_string());
    app.directory.register_user("corp.example.com", "ghost", "pw");

    let (_, body) = app
        .post_json(
            "/auth/login/directory",
            json!({ "domain": "corp.example.com", "username": "ghost", "password": "pw" }),
        )
        .await;
    assert_eq!(body["status"], "domain_user_not_registered");
}
