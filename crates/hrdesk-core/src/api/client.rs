//! API client for the HR backend's REST endpoints.
//!
//! Covers the two auth endpoints the session lifecycle consumes
//! (`POST /auth/login`, `POST /auth/refresh`) and a generic authenticated
//! GET used for guarded requests.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::ApiUser;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// A stalled login or refresh is treated the same as a network failure.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Maximum number of retries for rate-limited (429) GET requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    role: &'a str,
}

/// Token pair as issued by the backend. `refresh_token` is optional on
/// refresh because rotation is up to the server.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Server-declared access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user: ApiUser,
    pub tokens: TokenGrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub tokens: TokenGrant,
    #[serde(default)]
    pub user: Option<ApiUser>,
}

/// API client for the HR backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client for `base_url` (e.g. `https://hr.example.com/api`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        if base_url.trim().is_empty() {
            return Err(ApiError::InvalidRequest("API base URL is empty".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            token: Some(token.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Exchange credentials for a token pair and the user's identity
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<LoginResponse, ApiError> {
        let url = self.url(LOGIN_PATH);
        debug!(%url, email, role, "Sending login request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest {
                email,
                password,
                role,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "login").await
    }

    /// Mint a new access token, presenting the refresh token as the bearer credential
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let url = self.url(REFRESH_PATH);
        debug!(%url, "Sending token refresh request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(refresh_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, "refresh").await
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid bearer token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Authenticated GET against `path`, retrying on rate limits
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_json(response, path).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}
