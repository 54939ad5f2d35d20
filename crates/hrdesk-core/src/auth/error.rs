use thiserror::Error;

use crate::api::ApiError;

/// Message shown for rejected logins. Never echoes backend detail.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

/// Notice shown after a forced sign-out.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

const UNREACHABLE_MESSAGE: &str = "Unable to reach the server. Check your connection and try again.";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("RefreshAccessTokenError: {0}")]
    RefreshAccessTokenError(String),

    #[error("Failed to persist session: {0}")]
    StorageWriteFailure(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Not signed in")]
    NotSignedIn,
}

/// Failure of a guarded API request: either the session gate or the call itself.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    /// Classify a login failure. Any rejection of the request reads as bad
    /// credentials; transport and server failures stay distinguishable.
    pub fn from_login(err: ApiError) -> Self {
        if err.is_rejection() {
            AuthError::InvalidCredentials
        } else if let ApiError::InvalidResponse(detail) = err {
            AuthError::MalformedResponse(detail)
        } else {
            AuthError::Unreachable(err.to_string())
        }
    }

    /// Text suitable for showing to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE,
            AuthError::Unreachable(_) | AuthError::MalformedResponse(_) => UNREACHABLE_MESSAGE,
            AuthError::RefreshAccessTokenError(_)
            | AuthError::SessionExpired
            | AuthError::NotSignedIn => SESSION_EXPIRED_MESSAGE,
            AuthError::StorageWriteFailure(_) => "Could not save your session on this device.",
        }
    }

    /// Whether the failure ends the session and requires a fresh sign-in
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshAccessTokenError(_) | AuthError::SessionExpired
        )
    }
}
