use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use cookie::{Cookie, CookieJar, Key, SameSite};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ChangeFeed, StorageError, StorageEvent, StorageSink};

/// Cookie jar file name in cache directory
pub const COOKIE_JAR_FILE: &str = "cookies.txt";

/// Attributes applied to every cookie the sink writes.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// Set the `Secure` attribute (production deployments)
    pub secure: bool,
    /// `Max-Age`, normally the session lifetime
    pub max_age: time::Duration,
    pub path: String,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            secure: false,
            max_age: time::Duration::hours(24),
            path: "/".to_string(),
        }
    }
}

/// Signed cookie set.
///
/// Values are HMAC-signed with the sink's key; a cookie whose signature does
/// not verify reads as absent. Cookies are readable by client scripts
/// (`HttpOnly` is off) and use `SameSite=Lax`.
pub struct CookieSink {
    jar: Mutex<CookieJar>,
    key: Key,
    options: CookieOptions,
    path: Option<PathBuf>,
    feed: ChangeFeed,
}

impl CookieSink {
    pub fn new(key: Key, options: CookieOptions) -> Self {
        Self {
            jar: Mutex::new(CookieJar::new()),
            key,
            options,
            path: None,
            feed: ChangeFeed::new("cookie"),
        }
    }

    /// Build a signing key from a secret of at least 64 bytes
    pub fn key_from_secret(secret: &[u8]) -> Result<Key, StorageError> {
        Key::try_from(secret).map_err(|e| StorageError::InvalidKey(e.to_string()))
    }

    /// Open a jar persisted at `path` (one `name=value` pair per cookie).
    pub fn open(key: Key, options: CookieOptions, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let sink = Self {
            path: Some(path.clone()),
            ..Self::new(key, options)
        };

        if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read cookie jar")?;
            sink.absorb_request_header(contents.trim())?;
        }
        Ok(sink)
    }

    /// Seed the jar from a `Cookie:` request header
    pub fn absorb_request_header(&self, header: &str) -> Result<(), StorageError> {
        let mut jar = self.jar.lock().map_err(|_| StorageError::Poisoned)?;
        for parsed in Cookie::split_parse_encoded(header.to_string()) {
            match parsed {
                Ok(cookie) => jar.add_original(cookie),
                Err(e) => debug!(error = %e, "Skipping unparsable cookie"),
            }
        }
        Ok(())
    }

    /// `Set-Cookie` header values for every change made since the jar was seeded
    #[cfg(test)]
    fn set_cookie_headers(&self) -> Result<Vec<String>, StorageError> {
        let jar = self.jar.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(jar.delta().map(|c| c.encoded().to_string()).collect())
    }

    fn flush(&self, jar: &CookieJar) -> Result<(), StorageError> {
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let line = jar
                .iter()
                .map(|c| c.stripped().encoded().to_string())
                .collect::<Vec<_>>()
                .join("; ");
            std::fs::write(path, line)?;
        }
        Ok(())
    }
}

impl StorageSink for CookieSink {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let jar = self.jar.lock().map_err(|_| StorageError::Poisoned)?;
        match jar.signed(&self.key).get(key) {
            Some(cookie) => Ok(Some(cookie.value().to_string())),
            None => {
                if jar.get(key).is_some() {
                    warn!(cookie = key, "Cookie signature did not verify, ignoring it");
                }
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let cookie = Cookie::build((key.to_string(), value.to_string()))
            .path(self.options.path.clone())
            .same_site(SameSite::Lax)
            .secure(self.options.secure)
            .http_only(false)
            .max_age(self.options.max_age)
            .build();

        let mut jar = self.jar.lock().map_err(|_| StorageError::Poisoned)?;
        let mut next = jar.clone();
        next.signed_mut(&self.key).add(cookie);
        self.flush(&next)?;
        *jar = next;
        drop(jar);

        self.feed.publish(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut jar = self.jar.lock().map_err(|_| StorageError::Poisoned)?;
        if jar.get(key).is_none() {
            return Ok(());
        }
        let mut next = jar.clone();
        next.remove(Cookie::build(key.to_string()).path(self.options.path.clone()));
        self.flush(&next)?;
        *jar = next;
        drop(jar);

        self.feed.publish(key, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.feed.subscribe()
    }
}
