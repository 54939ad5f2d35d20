use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::api::TokenGrant;
use crate::models::UserSnapshot;

/// Access token lifetime used when the server does not declare one.
pub const DEFAULT_SESSION_LIFETIME_HOURS: i64 = 24;

/// Terminal marker stored on a session whose refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionError {
    RefreshAccessTokenError,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::RefreshAccessTokenError => f.write_str("RefreshAccessTokenError"),
        }
    }
}

/// One authenticated session: the token pair, its expiry and the identity
/// snapshot of the signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    /// Absolute expiry, epoch milliseconds on the wire
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token: String,
    pub user: UserSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// Write stamp assigned by the token store
    #[serde(default)]
    pub version: u64,
}

impl Session {
    /// Build a fresh session from a login grant issued at `now`.
    pub fn issue(
        access_token: String,
        refresh_token: String,
        user: UserSnapshot,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            access_token_expiry: expiry_from(now, lifetime),
            refresh_token,
            user,
            error: None,
            version: 0,
        }
    }

    /// Apply a successful refresh. The refresh token is only replaced when
    /// the server rotated it; the user only when the server sent one.
    ///
    /// The new expiry is always later than the current one, even when an
    /// early refresh is granted a shorter lifetime.
    pub fn refreshed(
        &self,
        grant: TokenGrant,
        user: Option<UserSnapshot>,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: grant.access_token,
            access_token_expiry: expiry_from(now, lifetime)
                .max(self.access_token_expiry + Duration::milliseconds(1)),
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            user: user.unwrap_or_else(|| self.user.clone()),
            error: None,
            version: self.version,
        }
    }

    /// Copy of this session carrying the terminal refresh error.
    /// Token fields are left as they were.
    pub fn failed(&self) -> Self {
        Self {
            error: Some(SessionError::RefreshAccessTokenError),
            ..self.clone()
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_token_expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_terminal(&self) -> bool {
        self.error.is_some()
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.access_token_expiry - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }

    /// Whether this record should replace `other` when two writers disagree.
    ///
    /// Ordered by write stamp, then expiry, then token text, so every reader
    /// picks the same winner.
    pub fn supersedes(&self, other: &Session) -> bool {
        (self.version, self.access_token_expiry, &self.access_token)
            > (other.version, other.access_token_expiry, &other.access_token)
    }
}

/// Expiry instant at millisecond precision, matching the wire format.
fn expiry_from(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    (now + lifetime).trunc_subsecs(3)
}

/// Lifetime to apply to a grant: the server's `expires_in` when it sent a
/// positive one, otherwise `fallback`.
pub fn grant_lifetime(grant: &TokenGrant, fallback: Duration) -> Duration {
    match grant.expires_in {
        Some(secs) if secs > 0 => Duration::seconds(secs),
        _ => fallback,
    }
}
