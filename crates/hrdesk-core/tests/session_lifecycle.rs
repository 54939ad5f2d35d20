//! End-to-end session lifecycle tests against a mocked auth backend.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use cookie::Key;
use hrdesk_core::api::ApiClient;
use hrdesk_core::auth::store::{SESSION_KEY, TOKEN_KEY};
use hrdesk_core::auth::{
    AuthError, CredentialVerifier, Credentials, GuardState, RequestError, RetryPolicy, SessionError,
    SessionGuard, SessionManager, SignOutReason, TokenRefresher, TokenStore, SIGN_IN_PATH,
};
use hrdesk_core::storage::{CookieOptions, CookieSink, LocalStorage, StorageSink};
use hrdesk_core::{Config, Session};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), StdDuration::from_secs(5)).unwrap()
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: StdDuration::from_millis(10),
    }
}

fn store() -> Arc<TokenStore> {
    let cookies: Arc<dyn StorageSink> =
        Arc::new(CookieSink::new(Key::generate(), CookieOptions::default()));
    let local: Arc<dyn StorageSink> = Arc::new(LocalStorage::in_memory());
    Arc::new(TokenStore::new(cookies, local))
}

fn login_body() -> serde_json::Value {
    json!({
        "user": {"_id": "1", "email": "a@b.com", "name": "A", "role": "Employee"},
        "tokens": {"access_token": "AT1", "refresh_token": "RT1"}
    })
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({
            "email": "a@b.com",
            "password": "validpass",
            "role": "Employee"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body()))
        .mount(server)
        .await;
}

fn credentials() -> Credentials {
    Credentials::new("a@b.com", "validpass", "Employee")
}

async fn signed_in(server: &MockServer) -> Session {
    mount_login(server).await;
    CredentialVerifier::new(api(server), Duration::hours(24))
        .verify(&credentials())
        .await
        .unwrap()
}

fn expired(mut session: Session) -> Session {
    session.access_token_expiry = Utc::now() - Duration::minutes(1);
    session
}

// ============================================================================
// Credential verifier
// ============================================================================

#[tokio::test]
async fn test_login_builds_session() {
    let server = MockServer::start().await;
    let before = Utc::now();
    let session = signed_in(&server).await;

    assert_eq!(session.access_token, "AT1");
    assert_eq!(session.refresh_token, "RT1");
    assert_eq!(session.user.id, "1");
    assert_eq!(session.user.email, "a@b.com");
    assert_eq!(session.user.role, "Employee");
    assert!(session.error.is_none());

    let lifetime = session.access_token_expiry - before;
    assert!(lifetime > Duration::hours(23) && lifetime <= Duration::hours(24) + Duration::seconds(5));
}

#[tokio::test]
async fn test_login_uses_server_declared_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"_id": "1", "email": "a@b.com", "name": "A", "role": "Employee"},
            "tokens": {"access_token": "AT1", "refresh_token": "RT1", "expires_in": 600}
        })))
        .mount(&server)
        .await;

    let session = CredentialVerifier::new(api(&server), Duration::hours(24))
        .verify(&credentials())
        .await
        .unwrap();
    assert!(session.access_token_expiry - Utc::now() <= Duration::seconds(600));
}

#[tokio::test]
async fn test_login_rejected_is_invalid_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Wrong password for a@b.com"})))
        .mount(&server)
        .await;

    let result = CredentialVerifier::new(api(&server), Duration::hours(24))
        .verify(&Credentials::new("a@b.com", "wrong", "Employee"))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(err.user_message(), "Invalid email or password");
}

#[tokio::test]
async fn test_login_server_error_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = CredentialVerifier::new(api(&server), Duration::hours(24))
        .verify(&credentials())
        .await;
    assert!(matches!(result, Err(AuthError::Unreachable(_))));
}

#[tokio::test]
async fn test_login_without_refresh_token_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"_id": "1", "email": "a@b.com", "name": "A", "role": "Employee"},
            "tokens": {"access_token": "AT1"}
        })))
        .mount(&server)
        .await;

    let result = CredentialVerifier::new(api(&server), Duration::hours(24))
        .verify(&credentials())
        .await;
    assert!(matches!(result, Err(AuthError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_login_with_wrong_shape_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "AT1"})))
        .mount(&server)
        .await;

    let result = CredentialVerifier::new(api(&server), Duration::hours(24))
        .verify(&credentials())
        .await;
    assert!(matches!(result, Err(AuthError::MalformedResponse(_))));
}

// ============================================================================
// Token refresher
// ============================================================================

#[tokio::test]
async fn test_refresh_without_rotation_keeps_refresh_token() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("authorization", "Bearer RT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": {"access_token": "AT2"}})))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none());
    let refreshed = refresher.refresh(&session).await;

    assert_eq!(refreshed.access_token, "AT2");
    assert_eq!(refreshed.refresh_token, "RT1");
    assert!(refreshed.error.is_none());
    assert!(refreshed.access_token_expiry > session.access_token_expiry);
}

#[tokio::test]
async fn test_refresh_rotation_and_identity_update() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tokens": {"access_token": "AT2", "refresh_token": "RT2"},
            "user": {"_id": "1", "email": "a@b.com", "name": "A. Person", "role": "HR"}
        })))
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none());
    let refreshed = refresher.try_refresh(&session).await.unwrap();
    assert_eq!(refreshed.refresh_token, "RT2");
    assert_eq!(refreshed.user.name, "A. Person");
    assert_eq!(refreshed.user.role, "HR");
}

#[tokio::test]
async fn test_refresh_rejected_marks_error_and_keeps_token() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1) // rejections are never retried
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), fast_retry(3));
    let result = refresher.refresh(&session).await;

    assert_eq!(result.error, Some(SessionError::RefreshAccessTokenError));
    assert_eq!(result.access_token, "AT1");
    assert_eq!(result.refresh_token, "RT1");
    assert_eq!(result.access_token_expiry, session.access_token_expiry);
}

#[tokio::test]
async fn test_refresh_retries_transient_failure_once() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": {"access_token": "AT2"}})))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), fast_retry(1));
    let refreshed = refresher.refresh(&session).await;
    assert_eq!(refreshed.access_token, "AT2");
    assert!(refreshed.error.is_none());
}

#[tokio::test]
async fn test_refresh_retry_is_bounded() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2) // first attempt plus one retry
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), fast_retry(1));
    let result = refresher.refresh(&session).await;
    assert!(result.is_terminal());
}

#[tokio::test]
async fn test_refresh_timeout_is_a_failure() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"tokens": {"access_token": "AT2"}}))
                .set_delay(StdDuration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let slow_api = ApiClient::new(&server.uri(), StdDuration::from_millis(200)).unwrap();
    let refresher = TokenRefresher::new(slow_api, Duration::hours(24), RetryPolicy::none());
    let result = refresher.try_refresh(&session).await;
    assert!(matches!(result, Err(AuthError::RefreshAccessTokenError(_))));
}

#[tokio::test]
async fn test_refresh_malformed_payload_is_a_failure() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "AT2"})))
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none());
    let result = refresher.refresh(&session).await;
    assert!(result.is_terminal());
    assert_eq!(result.access_token, "AT1");
}

// ============================================================================
// Session guard
// ============================================================================

#[tokio::test]
async fn test_guard_passes_valid_session_without_refresh() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = store();
    store.write(session);
    let guard = SessionGuard::new(
        Arc::clone(&store),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );

    assert_eq!(guard.state(), Some(GuardState::Valid));
    assert_eq!(guard.authorize().await.unwrap().access_token, "AT1");
}

#[tokio::test]
async fn test_guard_refreshes_expired_session() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": {"access_token": "AT2"}})))
        .expect(1)
        .mount(&server)
        .await;

    let store = store();
    let stale = store.write(expired(session));
    let guard = SessionGuard::new(
        Arc::clone(&store),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );
    assert_eq!(guard.state(), Some(GuardState::NeedsRefresh));

    let fresh = guard.authorize().await.unwrap();
    assert_ne!(fresh.access_token, stale.access_token);
    assert_eq!(fresh.access_token, "AT2");
    assert!(fresh.access_token_expiry > stale.access_token_expiry);
    assert_eq!(guard.state(), Some(GuardState::Valid));
    assert_eq!(store.read().unwrap().access_token, "AT2");
}

#[tokio::test]
async fn test_guard_single_flight_refresh() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"tokens": {"access_token": "AT2"}}))
                .set_delay(StdDuration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store();
    store.write(expired(session));
    let guard = SessionGuard::new(
        Arc::clone(&store),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );

    let results = futures::future::join_all((0..8).map(|_| guard.authorize())).await;
    for result in results {
        assert_eq!(result.unwrap().access_token, "AT2");
    }
}

#[tokio::test]
async fn test_guard_refresh_failure_is_terminal_and_absorbing() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = store();
    store.write(expired(session));
    let guard = SessionGuard::new(
        Arc::clone(&store),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );

    let first = guard.authorize().await;
    assert!(matches!(first, Err(AuthError::RefreshAccessTokenError(_))));

    let stored = store.read().unwrap();
    assert_eq!(stored.error, Some(SessionError::RefreshAccessTokenError));
    assert_eq!(stored.access_token, "AT1");
    assert_eq!(guard.state(), Some(GuardState::Terminal));

    // No second refresh attempt
    let second = guard.authorize().await;
    assert!(matches!(second, Err(AuthError::SessionExpired)));
}

#[tokio::test]
async fn test_guard_reports_the_refresh_failure_cause() {
    let server = MockServer::start().await;
    let session = signed_in(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
        .mount(&server)
        .await;

    let store = store();
    store.write(expired(session));
    let guard = SessionGuard::new(
        Arc::clone(&store),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );

    match guard.authorize().await {
        Err(AuthError::RefreshAccessTokenError(detail)) => {
            assert!(detail.contains("Server error"), "unexpected detail: {detail}");
            assert!(detail.contains("maintenance window"), "unexpected detail: {detail}");
        }
        other => panic!("expected a refresh failure, got {other:?}"),
    }
    assert_eq!(guard.state(), Some(GuardState::Terminal));
}

#[tokio::test]
async fn test_guard_without_session() {
    let server = MockServer::start().await;
    let guard = SessionGuard::new(
        store(),
        TokenRefresher::new(api(&server), Duration::hours(24), RetryPolicy::none()),
    );
    assert_eq!(guard.state(), None);
    assert!(matches!(guard.authorize().await, Err(AuthError::NotSignedIn)));
}

// ============================================================================
// Session manager
// ============================================================================

fn manager(server: &MockServer) -> (SessionManager, Arc<dyn StorageSink>, Arc<dyn StorageSink>) {
    let config = Config {
        api_base_url: server.uri(),
        retry_backoff_ms: 10,
        ..Config::default()
    };
    let cookies: Arc<dyn StorageSink> =
        Arc::new(CookieSink::new(Key::generate(), CookieOptions::default()));
    let local: Arc<dyn StorageSink> = Arc::new(LocalStorage::in_memory());
    let manager = SessionManager::with_sinks(&config, cookies.clone(), local.clone()).unwrap();
    (manager, cookies, local)
}

#[tokio::test]
async fn test_manager_sign_in_persists_session() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (manager, cookies, local) = manager(&server);

    let session = manager.sign_in(&credentials()).await.unwrap();
    assert_eq!(session.access_token, "AT1");
    assert_eq!(manager.current().unwrap().access_token, "AT1");
    assert_eq!(cookies.get(TOKEN_KEY).unwrap().as_deref(), Some("AT1"));
    assert_eq!(local.get(TOKEN_KEY).unwrap().as_deref(), Some("AT1"));
}

#[tokio::test]
async fn test_manager_invalid_credentials_store_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (manager, cookies, _) = manager(&server);

    let result = manager.sign_in(&credentials()).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(manager.current().is_none());
    assert_eq!(cookies.get(SESSION_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_manager_guarded_get_sends_access_token() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/employees/me"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "A"})))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, _, _) = manager(&server);
    manager.sign_in(&credentials()).await.unwrap();

    let profile: serde_json::Value = manager.get_json("/employees/me").await.unwrap();
    assert_eq!(profile["name"], "A");
}

#[tokio::test]
async fn test_manager_guarded_get_refreshes_first() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": {"access_token": "AT2"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/announcements"))
        .and(header("authorization", "Bearer AT2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, _, _) = manager(&server);
    let session = manager.sign_in(&credentials()).await.unwrap();
    manager.store().write(expired(session));

    let items: Vec<serde_json::Value> = manager.get_json("/announcements").await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_manager_terminal_refresh_forces_sign_out() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (manager, cookies, local) = manager(&server);
    let session = manager.sign_in(&credentials()).await.unwrap();
    manager.store().write(expired(session));

    let result: Result<serde_json::Value, RequestError> = manager.get_json("/employees").await;
    match result {
        Err(RequestError::Auth(e)) => {
            assert!(e.is_terminal());
            assert_eq!(e.user_message(), "Your session has expired. Please sign in again.");
        }
        other => panic!("expected an auth failure, got {other:?}"),
    }

    assert!(manager.current().is_none());
    assert_eq!(cookies.get(SESSION_KEY).unwrap(), None);
    assert_eq!(local.get(TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_manager_refresh_now() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": {"access_token": "AT2"}})))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, _, _) = manager(&server);
    let before = manager.sign_in(&credentials()).await.unwrap();

    let after = manager.refresh_now().await.unwrap();
    assert_eq!(after.access_token, "AT2");
    assert!(after.access_token_expiry > before.access_token_expiry);
}

#[tokio::test]
async fn test_manager_early_refresh_with_shorter_lifetime_keeps_expiry_increasing() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tokens": {"access_token": "AT2", "expires_in": 900}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (manager, _, _) = manager(&server);
    let before = manager.sign_in(&credentials()).await.unwrap();

    let after = manager.refresh_now().await.unwrap();
    assert_eq!(after.access_token, "AT2");
    assert!(after.access_token_expiry > before.access_token_expiry);
    assert_eq!(manager.current().unwrap().access_token_expiry, after.access_token_expiry);
}

#[tokio::test]
async fn test_manager_sign_out() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let (manager, _, _) = manager(&server);
    manager.sign_in(&credentials()).await.unwrap();

    let outcome = manager.sign_out(SignOutReason::UserRequested);
    assert_eq!(outcome.redirect_to, SIGN_IN_PATH);
    assert_eq!(outcome.notice, None);
    assert!(manager.current().is_none());

    // Signing out twice is harmless
    let again = manager.sign_out(SignOutReason::SessionExpired);
    assert!(again.notice.is_some());
}
