//! CLI integration tests against a mock Fixly API.
//!
//! Each test runs the compiled binary with its own HOME, so the credential
//! file written by one command is picked up by the next.

mod common;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{run_cli_with_env, run_cli_with_env_failure, run_cli_with_env_success, stored_entries};

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_json(json!({"email": "ada@example.com", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "token_type": "Bearer",
            "user_type": "provider",
            "user": {"id": 7, "email": "ada@example.com", "full_name": "Ada Lovelace"}
        })))
        .mount(server)
        .await;
}

fn login(home: &std::path::Path, server: &MockServer) -> String {
    run_cli_with_env_success(
        &["login", "--email", "ada@example.com", "--password", "hunter2"],
        home,
        &server.uri(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_persists_credentials() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let home = TempDir::new().unwrap();

    let stdout = login(home.path(), &server);
    assert!(stdout.contains("Logged in successfully"));
    assert!(stdout.contains("provider"));

    let entries = stored_entries(home.path());
    assert_eq!(entries["access_token"], "A1");
    assert_eq!(entries["refresh_token"], "R1");
    assert_eq!(entries["user_type"], "provider");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_failure_reports_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect email or password"})),
        )
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    let stderr = run_cli_with_env_failure(
        &["login", "--email", "ada@example.com", "--password", "nope"],
        home.path(),
        &server.uri(),
    );
    assert!(stderr.contains("Incorrect email or password"));
    assert!(stored_entries(home.path()).get("access_token").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_whoami_uses_stored_session() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "email": "ada@example.com",
            "full_name": "Ada Lovelace",
            "user_type": "provider"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    login(home.path(), &server);
    let stdout = run_cli_with_env_success(&["whoami"], home.path(), &server.uri());

    assert!(stdout.contains("ada@example.com"));
    assert!(stdout.contains("Ada Lovelace"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_whoami_without_session_fails() {
    let server = MockServer::start().await;
    let home = TempDir::new().unwrap();

    let stderr = run_cli_with_env_failure(&["whoami"], home.path(), &server.uri());
    assert!(stderr.contains("fixly login"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_recovers_from_expired_token() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/services"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/services"))
        .and(query_param("status", "open"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "Leaky tap"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({"refresh_token": "R1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "A2"})))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    login(home.path(), &server);
    let stdout = run_cli_with_env_success(
        &["request", "get", "/services", "--query", "status=open"],
        home.path(),
        &server.uri(),
    );
    assert!(stdout.contains("Leaky tap"));

    let entries = stored_entries(home.path());
    assert_eq!(entries["access_token"], "A2");
    assert_eq!(entries["refresh_token"], "R1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_refresh_ends_session() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    login(home.path(), &server);
    let stderr = run_cli_with_env_failure(&["refresh"], home.path(), &server.uri());
    assert!(stderr.contains("Failed to refresh session"));

    let entries = stored_entries(home.path());
    assert!(entries.get("access_token").is_none());
    assert!(entries.get("refresh_token").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_after_failed_renewal_asks_for_login() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/addresses/default"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not Found"})))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    login(home.path(), &server);
    let stderr = run_cli_with_env_failure(
        &["request", "get", "/addresses/default"],
        home.path(),
        &server.uri(),
    );
    assert!(stderr.contains("Session expired"));
    assert!(stderr.contains("fixly login"));

    let entries = stored_entries(home.path());
    assert!(entries.get("access_token").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_logout_clears_credentials() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/logout"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    login(home.path(), &server);
    let stdout = run_cli_with_env_success(&["logout"], home.path(), &server.uri());
    assert!(stdout.contains("Logged out"));

    let entries = stored_entries(home.path());
    assert_eq!(entries, json!({}));

    let output = run_cli_with_env(&["whoami"], home.path(), &server.uri());
    assert!(!output.status.success());
}
