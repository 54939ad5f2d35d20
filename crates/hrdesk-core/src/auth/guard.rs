use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::AuthError;
use super::refresher::TokenRefresher;
use super::session::Session;
use super::store::TokenStore;

/// Where a session stands when a protected action is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Access token is still within its lifetime
    Valid,
    /// Access token expired, a refresh token is available
    NeedsRefresh,
    /// Refresh failed or is impossible; only a new sign-in helps
    Terminal,
}

impl GuardState {
    pub fn of(session: &Session, now: DateTime<Utc>) -> Self {
        if session.is_terminal() {
            GuardState::Terminal
        } else if !session.is_expired_at(now) {
            GuardState::Valid
        } else if session.refresh_token.is_empty() {
            GuardState::Terminal
        } else {
            GuardState::NeedsRefresh
        }
    }
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GuardState::Valid => "valid",
            GuardState::NeedsRefresh => "needs refresh",
            GuardState::Terminal => "terminal",
        };
        f.write_str(label)
    }
}

/// Expiry gate run before every authenticated request.
///
/// Expiry is evaluated lazily on each call. Concurrent callers that find
/// the same expired session share a single refresh: they queue on
/// `refresh_lock` and re-read the store once they hold it.
pub struct SessionGuard {
    store: Arc<TokenStore>,
    refresher: TokenRefresher,
    refresh_lock: Mutex<()>,
}

impl SessionGuard {
    pub fn new(store: Arc<TokenStore>, refresher: TokenRefresher) -> Self {
        Self {
            store,
            refresher,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current state of the stored session, `None` when signed out
    pub fn state(&self) -> Option<GuardState> {
        self.store
            .read()
            .map(|session| GuardState::of(&session, Utc::now()))
    }

    /// Return a session that is safe to use for a request, refreshing it
    /// first when it has expired.
    pub async fn authorize(&self) -> Result<Session, AuthError> {
        let session = self.store.read().ok_or(AuthError::NotSignedIn)?;

        match GuardState::of(&session, Utc::now()) {
            GuardState::Valid => Ok(session),
            GuardState::Terminal => {
                debug!(user_id = %session.user.id, "Guarded access on terminal session");
                Err(AuthError::SessionExpired)
            }
            GuardState::NeedsRefresh => self.refresh_once(false).await,
        }
    }

    /// Refresh even if the token has not expired yet.
    pub async fn force_refresh(&self) -> Result<Session, AuthError> {
        self.refresh_once(true).await
    }

    async fn refresh_once(&self, force: bool) -> Result<Session, AuthError> {
        let before = self.store.read().ok_or(AuthError::NotSignedIn)?;
        let _flight = self.refresh_lock.lock().await;

        // Another caller may have finished a refresh while we waited
        let session = self.store.read().ok_or(AuthError::NotSignedIn)?;
        let state = GuardState::of(&session, Utc::now());
        let already_refreshed = session.access_token != before.access_token;
        match state {
            GuardState::Terminal => return Err(AuthError::SessionExpired),
            GuardState::Valid if !force || already_refreshed => {
                debug!(version = session.version, "Session already refreshed by another caller");
                return Ok(session);
            }
            _ => {}
        }
        if session.refresh_token.is_empty() {
            return Err(AuthError::SessionExpired);
        }

        debug!(user_id = %session.user.id, force, "Refreshing access token");
        match self.refresher.try_refresh(&session).await {
            Ok(refreshed) => Ok(self.store.write(refreshed)),
            Err(e) => {
                warn!(user_id = %session.user.id, error = %e, "Token refresh failed, session is now terminal");
                self.store.write(session.failed());
                Err(e)
            }
        }
    }
}
