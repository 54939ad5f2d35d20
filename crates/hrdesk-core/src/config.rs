//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend URL, session and retry tuning, cookie settings, and the last
//! identity used to sign in.
//!
//! Configuration is stored at `~/.config/hrdesk/config.json`; a few fields
//! can be overridden from the environment (see [`Config::apply_env`]).

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::refresher::{RetryPolicy, DEFAULT_REFRESH_RETRIES, DEFAULT_RETRY_BACKOFF_MS};
use crate::auth::session::DEFAULT_SESSION_LIFETIME_HOURS;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "hrdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

pub const ENV_API_URL: &str = "HRDESK_API_URL";
pub const ENV_ENVIRONMENT: &str = "HRDESK_ENV";
pub const ENV_COOKIE_SECRET: &str = "HRDESK_COOKIE_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub session_lifetime_hours: i64,
    pub request_timeout_secs: u64,
    pub refresh_retries: u32,
    pub retry_backoff_ms: u64,
    /// Mark cookies `Secure` (production)
    pub secure_cookies: bool,
    /// Cookie signing secret, at least 64 bytes. A random key is used when unset.
    pub cookie_secret: Option<String>,
    pub last_email: Option<String>,
    pub last_role: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            session_lifetime_hours: DEFAULT_SESSION_LIFETIME_HOURS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_retries: DEFAULT_REFRESH_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            secure_cookies: false,
            cookie_secret: None,
            last_email: None,
            last_role: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay environment overrides onto the loaded file values
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(env) = lookup(ENV_ENVIRONMENT) {
            self.secure_cookies = env.eq_ignore_ascii_case("production");
        }
        if let Some(secret) = lookup(ENV_COOKIE_SECRET).filter(|v| !v.is_empty()) {
            self.cookie_secret = Some(secret);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::hours(self.session_lifetime_hours.max(1))
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.refresh_retries,
            initial_backoff: StdDuration::from_millis(self.retry_backoff_ms),
        }
    }
}
