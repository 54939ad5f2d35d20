use std::fmt;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::api::ApiClient;

use super::error::AuthError;
use super::session::{grant_lifetime, Session};

/// What the user typed on the sign-in form.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Role the user is signing in as (e.g. "Employee", "HR", "Admin")
    pub role: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            role: role.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Exchanges credentials for a session via `POST /auth/login`.
#[derive(Clone)]
pub struct CredentialVerifier {
    api: ApiClient,
    lifetime: Duration,
}

impl CredentialVerifier {
    pub fn new(api: ApiClient, lifetime: Duration) -> Self {
        Self { api, lifetime }
    }

    /// Verify credentials and build a normalized session.
    ///
    /// Failures are logged here and returned as an [`AuthError`]; nothing
    /// from the transport escapes unclassified.
    pub async fn verify(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if credentials.email.trim().is_empty() || credentials.password.is_empty() {
            warn!("Login attempted with empty email or password");
            return Err(AuthError::InvalidCredentials);
        }

        let response = self
            .api
            .login(&credentials.email, &credentials.password, &credentials.role)
            .await
            .map_err(|e| {
                warn!(email = %credentials.email, error = %e, "Login request failed");
                AuthError::from_login(e)
            })?;

        let refresh_token = response
            .tokens
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                warn!("Login response carried no refresh token");
                AuthError::MalformedResponse("login response has no refresh token".to_string())
            })?;
        if response.tokens.access_token.is_empty() {
            warn!("Login response carried an empty access token");
            return Err(AuthError::MalformedResponse(
                "login response has an empty access token".to_string(),
            ));
        }

        let user = response.user.into_snapshot().map_err(|detail| {
            warn!(%detail, "Login response carried an invalid user");
            AuthError::MalformedResponse(detail)
        })?;

        let lifetime = grant_lifetime(&response.tokens, self.lifetime);
        let session = Session::issue(
            response.tokens.access_token,
            refresh_token,
            user,
            lifetime,
            Utc::now(),
        );

        info!(user_id = %session.user.id, role = %session.user.role, "Credentials verified");
        Ok(session)
    }
}
