//! Data models shared by the API client and the session lifecycle.
//!
//! - `UserSnapshot`: identity stored next to the tokens (`userData` layout)
//! - `LegacyUser`: the older `user` storage layout
//! - `ApiUser`: the backend's user object, validated into a snapshot

pub mod user;

pub use user::{ApiUser, LegacyUser, UserSnapshot};
