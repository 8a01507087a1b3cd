// Integration tests for esign-oauth
//
// These tests drive the credential manager end to end against stub
// authorization servers: mockito for fixed responses, and a small axum
// server for the stateful refresh-token rotation contract.

use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

use esign_oauth::auth::{
    AuthState, BrowserLauncher, CredentialManager, GrantKind, IdentityConfig, ManagerOptions,
    RecordingBrowser,
};
use esign_oauth::error::AuthError;

const PRIVATE_KEY: &[u8] = include_bytes!("fixtures/test_rsa_private.pem");

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn identity(base: &str) -> IdentityConfig {
    IdentityConfig {
        integration_key: "ik-123".to_string(),
        impersonation_user_guid: Some("user-guid".to_string()),
        secret_key: Some("secret".to_string()),
        scopes: vec!["signature".to_string(), "organization_read".to_string()],
        redirect_uri: "https://httpbin.org/get".to_string(),
        oauth_base: Url::parse(base).unwrap(),
    }
}

fn options() -> ManagerOptions {
    ManagerOptions {
        callback_timeout: Duration::from_secs(5),
        ..ManagerOptions::default()
    }
}

/// Browser stand-in that follows the login page's redirect with a fixed code
struct CallbackBrowser {
    code: &'static str,
    opened: Mutex<Vec<String>>,
}

impl CallbackBrowser {
    fn new(code: &'static str) -> Self {
        Self {
            code,
            opened: Mutex::new(Vec::new()),
        }
    }
}

impl BrowserLauncher for CallbackBrowser {
    fn open(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());

        let redirect = Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.replace("localhost", "127.0.0.1"))
            .unwrap();
        let code = self.code;

        tokio::spawn(async move {
            let client = reqwest::Client::new();
            // A stray request without a code must not complete the flow
            client.get(format!("{}/favicon.ico", redirect)).send().await.unwrap();
            let response = client
                .get(format!("{}/?code={}", redirect, code))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
        });
    }
}

/// Token endpoint that issues codes and rotates refresh tokens, rejecting reuse
#[derive(Default)]
struct StubAuthServer {
    live_refresh_tokens: HashSet<String>,
    issued: u32,
}

async fn stub_token(
    State(state): State<Arc<Mutex<StubAuthServer>>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") if form.get("code").map(String::as_str) == Some("abc123") => {
            state.live_refresh_tokens.insert("ref2".to_string());
            (
                StatusCode::OK,
                Json(json!({"access_token": "tok2", "refresh_token": "ref2", "expires_in": 28800})),
            )
        }
        Some("refresh_token") => {
            let presented = form.get("refresh_token").cloned().unwrap_or_default();
            if !state.live_refresh_tokens.remove(&presented) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "refresh token consumed"})),
                );
            }
            state.issued += 1;
            let next = format!("ref{}", state.issued + 2);
            state.live_refresh_tokens.insert(next.clone());
            (
                StatusCode::OK,
                Json(json!({
                    "access_token": format!("tok{}", state.issued + 2),
                    "refresh_token": next,
                    "expires_in": 28800
                })),
            )
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"}))),
    }
}

async fn start_stub_server() -> (String, Arc<Mutex<StubAuthServer>>) {
    let state = Arc::new(Mutex::new(StubAuthServer::default()));
    let app = Router::new()
        .route("/oauth/token", post(stub_token))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://127.0.0.1:{}", port), state)
}

// ==================================================================================================
// Service account (JWT) grant
// ==================================================================================================

#[tokio::test]
async fn test_jwt_grant_returns_service_account_credential() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/oauth/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "urn:ietf:params:oauth:grant-type:jwt-bearer".into(),
            ),
            mockito::Matcher::Regex("assertion=".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"tok1","expires_in":3600}"#)
        .create_async()
        .await;

    let mut manager = CredentialManager::new(identity(&server.url()), options()).unwrap();
    let credential = manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap();

    assert_eq!(credential.access_token, "tok1");
    assert_eq!(credential.expires_in, 3600);
    assert_eq!(credential.grant_kind(), GrantKind::ServiceAccount);
    assert!(credential.refresh_token().is_none());
    assert_eq!(manager.state(), &AuthState::Active(credential));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_jwt_grant_consent_required() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_body(r#"{"error":"consent_required"}"#)
        .create_async()
        .await;

    let browser = Arc::new(RecordingBrowser::new());
    let mut manager = CredentialManager::new(identity(&server.url()), options())
        .unwrap()
        .with_browser(browser.clone());

    let err = manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap_err();

    let expected = format!(
        "{}/oauth/auth?response_type=code&scope=impersonation+signature+organization_read\
         &client_id=ik-123&redirect_uri=https://httpbin.org/get",
        server.url()
    );
    match &err {
        AuthError::ConsentRequired { consent_url } => assert_eq!(consent_url, &expected),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.exit_code(), 0);
    assert!(manager.credential().is_none());

    assert_eq!(manager.open_consent_page().as_deref(), Some(expected.as_str()));
    assert_eq!(browser.opened(), vec![expected]);
}

#[tokio::test]
async fn test_jwt_grant_retry_after_consent() {
    let mut server = mockito::Server::new_async().await;
    let denied = server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_body(r#"{"error":"consent_required"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut manager = CredentialManager::new(identity(&server.url()), options()).unwrap();
    assert!(manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap_err()
        .is_consent_required());
    denied.assert_async().await;
    denied.remove_async().await;

    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(r#"{"access_token":"tok1","expires_in":3600}"#)
        .create_async()
        .await;

    let credential = manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap();
    assert_eq!(credential.access_token, "tok1");
}

#[tokio::test]
async fn test_jwt_grant_other_error_propagates_payload() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant","error_description":"no_valid_keys_or_signatures"}"#)
        .create_async()
        .await;

    let mut manager = CredentialManager::new(identity(&server.url()), options()).unwrap();
    let err = manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap_err();

    match err {
        AuthError::AuthServer { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("no_valid_keys_or_signatures"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(manager.credential().is_none());
    assert!(matches!(manager.state(), AuthState::Failed { last_valid: None }));
}

#[tokio::test]
async fn test_jwt_grant_unreachable_server() {
    // Nothing listens on the discard port
    let mut manager = CredentialManager::new(identity("http://127.0.0.1:9"), options()).unwrap();
    let err = manager
        .acquire_service_account_token(PRIVATE_KEY, 3600)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Transport(_)));
    assert_eq!(err.exit_code(), 1);
}

// ==================================================================================================
// Authorization code grant and refresh rotation
// ==================================================================================================

#[tokio::test]
async fn test_authorization_code_flow_end_to_end() {
    let (base, _state) = start_stub_server().await;
    let browser = Arc::new(CallbackBrowser::new("abc123"));
    let mut manager = CredentialManager::new(identity(&base), options())
        .unwrap()
        .with_browser(browser.clone());

    let credential = manager.acquire_authorization_code_token(0).await.unwrap();

    assert_eq!(credential.access_token, "tok2");
    assert_eq!(credential.refresh_token(), Some("ref2"));
    assert_eq!(credential.expires_in, 28800);
    assert_eq!(credential.grant_kind(), GrantKind::AuthorizationCode);

    let opened = browser.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].starts_with(&format!(
        "{}/oauth/auth?response_type=code&scope=signature+organization_read&client_id=ik-123&redirect_uri=http://localhost:",
        base
    )));
}

#[tokio::test]
async fn test_refresh_rotates_and_consumes_old_token() {
    let (base, state) = start_stub_server().await;
    let browser = Arc::new(CallbackBrowser::new("abc123"));
    let mut manager = CredentialManager::new(identity(&base), options())
        .unwrap()
        .with_browser(browser);

    manager.acquire_authorization_code_token(0).await.unwrap();

    let refreshed = manager.refresh().await.unwrap();
    assert_eq!(refreshed.access_token, "tok3");
    assert_eq!(refreshed.refresh_token(), Some("ref3"));
    assert_eq!(refreshed.grant_kind(), GrantKind::AuthorizationCode);
    assert!(!state.lock().unwrap().live_refresh_tokens.contains("ref2"));

    // The stale token is rejected by the server, on a fresh manager
    let mut other = CredentialManager::new(identity(&base), options()).unwrap();
    let err = other.refresh_with("ref2").await.unwrap_err();
    match err {
        AuthError::AuthServer { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // The rotated token still works
    let again = manager.refresh().await.unwrap();
    assert_eq!(again.refresh_token(), Some("ref4"));
}

#[tokio::test]
async fn test_authorization_code_flow_times_out() {
    let (base, _state) = start_stub_server().await;
    let browser = Arc::new(RecordingBrowser::new());
    let mut manager = CredentialManager::new(
        identity(&base),
        ManagerOptions {
            callback_timeout: Duration::from_millis(100),
            ..ManagerOptions::default()
        },
    )
    .unwrap()
    .with_browser(browser.clone());

    let err = manager.acquire_authorization_code_token(0).await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout(_)));
    assert_eq!(browser.opened().len(), 1);
    assert!(manager.credential().is_none());
}

#[tokio::test]
async fn test_authorization_code_exchange_failure_yields_no_credential() {
    let (base, _state) = start_stub_server().await;
    // The stub only accepts "abc123"
    let browser = Arc::new(CallbackBrowser::new("wrong-code"));
    let mut manager = CredentialManager::new(identity(&base), options())
        .unwrap()
        .with_browser(browser);

    let err = manager.acquire_authorization_code_token(0).await.unwrap_err();
    assert!(matches!(err, AuthError::AuthServer { status: 400, .. }));
    assert!(manager.credential().is_none());
}
