use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};

use super::error::AuthError;
use super::session::{grant_lifetime, Session};

/// Transient refresh failures are retried this many times by default.
pub const DEFAULT_REFRESH_RETRIES: u32 = 1;

/// Initial backoff before the first refresh retry.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Bounded retry for refresh calls. Only transient failures (network,
/// timeout, 5xx, 429) are retried; a rejected refresh token never is.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_REFRESH_RETRIES,
            initial_backoff: StdDuration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: StdDuration::ZERO,
        }
    }
}

/// Mints new access tokens via `POST /auth/refresh`.
#[derive(Clone)]
pub struct TokenRefresher {
    api: ApiClient,
    lifetime: Duration,
    policy: RetryPolicy,
}

impl TokenRefresher {
    pub fn new(api: ApiClient, lifetime: Duration, policy: RetryPolicy) -> Self {
        Self {
            api,
            lifetime,
            policy,
        }
    }

    /// Refresh `session`. On any failure the input comes back unchanged
    /// except for the `RefreshAccessTokenError` marker.
    pub async fn refresh(&self, session: &Session) -> Session {
        match self.try_refresh(session).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(user_id = %session.user.id, error = %e, "Token refresh failed, session is now terminal");
                session.failed()
            }
        }
    }

    /// Refresh `session`, returning the typed failure instead of a marked session.
    pub async fn try_refresh(&self, session: &Session) -> Result<Session, AuthError> {
        if session.refresh_token.is_empty() {
            return Err(AuthError::RefreshAccessTokenError(
                "session has no refresh token".to_string(),
            ));
        }

        let response = self.call_with_retry(&session.refresh_token).await?;

        if response.tokens.access_token.is_empty() {
            return Err(AuthError::RefreshAccessTokenError(
                "refresh response has an empty access token".to_string(),
            ));
        }

        let user = match response.user {
            Some(api_user) => Some(
                api_user
                    .into_snapshot()
                    .map_err(AuthError::RefreshAccessTokenError)?,
            ),
            None => None,
        };

        let lifetime = grant_lifetime(&response.tokens, self.lifetime);
        let refreshed = session.refreshed(response.tokens, user, lifetime, Utc::now());

        info!(
            user_id = %refreshed.user.id,
            expires_at = %refreshed.access_token_expiry,
            rotated = refreshed.refresh_token != session.refresh_token,
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    async fn call_with_retry(
        &self,
        refresh_token: &str,
    ) -> Result<crate::api::RefreshResponse, AuthError> {
        let mut retries = 0;
        let mut backoff = self.policy.initial_backoff;

        loop {
            match self.api.refresh(refresh_token).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && retries < self.policy.max_retries => {
                    retries += 1;
                    warn!(retry = retries, backoff_ms = backoff.as_millis() as u64, error = %e, "Refresh failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2; // Exponential backoff
                }
                Err(e) => {
                    debug!(retries, error = %e, "Giving up on refresh");
                    return Err(Self::classify(e));
                }
            }
        }
    }

    fn classify(err: ApiError) -> AuthError {
        AuthError::RefreshAccessTokenError(err.to_string())
    }
}
