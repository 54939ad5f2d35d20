//! Composition root for the session lifecycle.
//!
//! `SessionManager` wires the API client, token store, credential verifier
//! and session guard together and owns the sign-out path.

use std::sync::Arc;

use chrono::Duration;
use cookie::Key;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::storage::cookies::COOKIE_JAR_FILE;
use crate::storage::local::LOCAL_STORAGE_FILE;
use crate::storage::{CookieOptions, CookieSink, LocalStorage, StorageSink};

use super::credentials::CredentialStore;
use super::error::{AuthError, RequestError, SESSION_EXPIRED_MESSAGE};
use super::guard::{GuardState, SessionGuard};
use super::refresher::{RetryPolicy, TokenRefresher};
use super::session::Session;
use super::store::TokenStore;
use super::verifier::{CredentialVerifier, Credentials};

/// Path of the credential-entry surface users are sent to after sign-out
pub const SIGN_IN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    UserRequested,
    SessionExpired,
}

/// Where to send the user after sign-out, and what to tell them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOut {
    pub redirect_to: &'static str,
    pub notice: Option<&'static str>,
}

pub struct SessionManager {
    api: ApiClient,
    store: Arc<TokenStore>,
    verifier: CredentialVerifier,
    guard: SessionGuard,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Arc<TokenStore>, lifetime: Duration, policy: RetryPolicy) -> Self {
        let verifier = CredentialVerifier::new(api.clone(), lifetime);
        let refresher = TokenRefresher::new(api.clone(), lifetime, policy);
        let guard = SessionGuard::new(Arc::clone(&store), refresher);
        Self {
            api,
            store,
            verifier,
            guard,
        }
    }

    /// Build a manager over explicit sinks, e.g. in-memory ones
    pub fn with_sinks(
        config: &Config,
        cookies: Arc<dyn StorageSink>,
        local: Arc<dyn StorageSink>,
    ) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config.api_base_url, config.request_timeout())?;
        let store = Arc::new(TokenStore::new(cookies, local));
        store.init();
        Ok(Self::new(api, store, config.session_lifetime(), config.retry_policy()))
    }

    /// Build a manager whose cookie jar and local storage live in the cache directory
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let cache_dir = config.cache_dir()?;
        let options = CookieOptions {
            secure: config.secure_cookies,
            max_age: time::Duration::seconds(config.session_lifetime().num_seconds()),
            ..CookieOptions::default()
        };

        let cookies = CookieSink::open(
            Self::cookie_key(config)?,
            options,
            cache_dir.join(COOKIE_JAR_FILE),
        )?;
        let local = LocalStorage::open(cache_dir.join(LOCAL_STORAGE_FILE))?;

        Self::with_sinks(config, Arc::new(cookies), Arc::new(local))
    }

    /// Signing key from the configured secret, else the keychain, else a
    /// throwaway key (cookies then do not survive a restart).
    fn cookie_key(config: &Config) -> anyhow::Result<Key> {
        if let Some(ref secret) = config.cookie_secret {
            return Ok(CookieSink::key_from_secret(secret.as_bytes())?);
        }
        match CredentialStore::signing_key() {
            Ok(key) => Ok(key),
            Err(e) => {
                warn!(error = %e, "Keychain unavailable, using an ephemeral cookie key");
                Ok(Key::generate())
            }
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Stored session, if any, without running the guard
    pub fn current(&self) -> Option<Session> {
        self.store.read()
    }

    pub fn state(&self) -> Option<GuardState> {
        self.guard.state()
    }

    /// Verify credentials and persist the resulting session.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let session = self.verifier.verify(credentials).await?;
        let session = self.store.write(session);
        info!(user_id = %session.user.id, role = %session.user.role, "Signed in");
        Ok(session)
    }

    /// Run the session guard. A terminal outcome signs the user out before
    /// the error is returned.
    pub async fn authorize(&self) -> Result<Session, AuthError> {
        let result = self.guard.authorize().await;
        self.sign_out_if_terminal(result)
    }

    /// Refresh the access token now, whether or not it has expired
    pub async fn refresh_now(&self) -> Result<Session, AuthError> {
        let result = self.guard.force_refresh().await;
        self.sign_out_if_terminal(result)
    }

    /// Authenticated GET through the session guard
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let session = self.authorize().await?;
        let value: T = self.api.with_token(session.access_token).get(path).await?;
        Ok(value)
    }

    /// Tear the session down everywhere and say where the user goes next.
    pub fn sign_out(&self, reason: SignOutReason) -> SignOut {
        let user_id = self.store.cached().map(|s| s.user.id);
        self.store.clear();
        info!(?reason, user_id = ?user_id, "Signed out");

        SignOut {
            redirect_to: SIGN_IN_PATH,
            notice: match reason {
                SignOutReason::UserRequested => None,
                SignOutReason::SessionExpired => Some(SESSION_EXPIRED_MESSAGE),
            },
        }
    }

    fn sign_out_if_terminal(&self, result: Result<Session, AuthError>) -> Result<Session, AuthError> {
        if let Err(ref e) = result {
            if e.is_terminal() {
                self.sign_out(SignOutReason::SessionExpired);
            }
        }
        result
    }
}
