//! Authentication module: the session token lifecycle.
//!
//! This module provides:
//! - `Session`: access/refresh token pair, expiry and identity snapshot
//! - `CredentialVerifier`: exchanges credentials for a session
//! - `TokenStore`: persists the session to the cookie and local sinks
//! - `TokenRefresher`: mints new access tokens, with bounded retry
//! - `SessionGuard`: per-request expiry gate with single-flight refresh
//! - `SessionManager`: wires the above together and owns sign-out
//! - `CredentialStore`: remembered passwords in the OS keychain
//!
//! Access tokens live for 24 hours unless the server declares otherwise.

pub mod credentials;
pub mod error;
pub mod guard;
pub mod manager;
pub mod refresher;
pub mod session;
pub mod store;
pub mod verifier;

pub use credentials::CredentialStore;
pub use error::{AuthError, RequestError};
pub use guard::{GuardState, SessionGuard};
pub use manager::{SessionManager, SignOut, SignOutReason, SIGN_IN_PATH};
pub use refresher::{RetryPolicy, TokenRefresher};
pub use session::{Session, SessionError};
pub use store::TokenStore;
pub use verifier::{CredentialVerifier, Credentials};
