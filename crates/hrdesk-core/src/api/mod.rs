//! REST API client module for the HR backend.
//!
//! This module provides the `ApiClient` for the authentication endpoints
//! (login and token refresh) and for bearer-authenticated GET requests.

pub mod client;
pub mod error;

pub use client::{ApiClient, LoginResponse, RefreshResponse, TokenGrant, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
