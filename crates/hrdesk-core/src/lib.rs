//! hrdesk core library.
//!
//! Client-side session lifecycle for the hrdesk HR backend: sign-in, token
//! persistence in signed cookies and local storage, lazy expiry checks and
//! access token refresh.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;

pub use auth::{AuthError, Credentials, Session, SessionManager};
pub use config::Config;
