//! Token store: persists the session into the cookie and local sinks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{StorageEvent, StorageSink};

use super::session::Session;

/// Signed full session record (cookie sink only)
pub const SESSION_KEY: &str = "session";
/// Raw access token
pub const TOKEN_KEY: &str = "token";
pub const USER_ROLE_KEY: &str = "userRole";
/// Identity snapshot, `profilePic` layout
pub const USER_DATA_KEY: &str = "userData";
/// Identity snapshot, older `profileImage` layout (local sink only)
pub const LEGACY_USER_KEY: &str = "user";
/// Highest write stamp handed out so far (cookie sink only). Survives
/// `clear()` so a later sign-in outranks any view still held elsewhere.
pub const SESSION_VERSION_KEY: &str = "sessionVersion";

const COOKIE_KEYS: [&str; 4] = [SESSION_KEY, TOKEN_KEY, USER_ROLE_KEY, USER_DATA_KEY];
const LOCAL_KEYS: [&str; 4] = [TOKEN_KEY, USER_ROLE_KEY, USER_DATA_KEY, LEGACY_USER_KEY];

#[derive(Default)]
struct View {
    session: Option<Session>,
    /// The record in `session` reached the cookie sink
    durable: bool,
}

/// Owns the persisted session for one client (one "tab").
///
/// Several stores may share the same sinks; each write is stamped with a
/// version one above any version it has seen, and readers keep whichever
/// record supersedes the other, so all views converge on the same session.
pub struct TokenStore {
    cookies: Arc<dyn StorageSink>,
    local: Arc<dyn StorageSink>,
    view: Mutex<View>,
}

impl TokenStore {
    pub fn new(cookies: Arc<dyn StorageSink>, local: Arc<dyn StorageSink>) -> Self {
        Self {
            cookies,
            local,
            view: Mutex::new(View::default()),
        }
    }

    fn view(&self) -> MutexGuard<'_, View> {
        // The view is always left consistent, so a poisoned lock is still usable
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load any persisted session into memory. Call once at startup.
    pub fn init(&self) -> Option<Session> {
        let persisted = self.load_record();
        let mut view = self.view();
        view.durable = persisted.is_some();
        view.session = persisted.clone();
        debug!(found = persisted.is_some(), "Token store initialized");
        persisted
    }

    /// The in-memory view, without consulting the sinks
    pub fn cached(&self) -> Option<Session> {
        self.view().session.clone()
    }

    /// Current session, reconciled against what other writers persisted.
    pub fn read(&self) -> Option<Session> {
        let persisted = self.load_record();
        let mut view = self.view();
        let has_persisted = persisted.is_some();

        let mut winner = match (view.session.take(), persisted) {
            (Some(mine), Some(theirs)) => {
                if theirs.supersedes(&mine) {
                    debug!(mine = mine.version, theirs = theirs.version, "Adopting newer persisted session");
                    theirs
                } else {
                    mine
                }
            }
            (Some(mine), None) => {
                if view.durable {
                    debug!("Session record was removed by another writer");
                    view.durable = false;
                    return None;
                }
                // Never reached the sinks; the in-memory copy is all there is
                mine
            }
            (None, Some(theirs)) => theirs,
            (None, None) => return None,
        };

        // The token cookie is authoritative for the access token
        if let Some(token) = self.get_logged(&*self.cookies, TOKEN_KEY) {
            if !token.is_empty() && token != winner.access_token {
                debug!("Access token cookie differs from record, using cookie value");
                winner.access_token = token;
            }
        }

        view.durable = view.durable || has_persisted;
        view.session = Some(winner.clone());
        Some(winner)
    }

    /// Persist `session` to both sinks and return it with its write stamp.
    ///
    /// Sink failures are logged and swallowed; the session is still kept in
    /// memory so sign-in is never blocked by storage.
    pub fn write(&self, mut session: Session) -> Session {
        let mut view = self.view();
        let persisted = self.load_record();

        let seen = [view.session.as_ref(), persisted.as_ref(), Some(&session)]
            .into_iter()
            .flatten()
            .map(|s| s.version)
            .chain([self.version_mark()])
            .max()
            .unwrap_or(0);
        session.version = seen + 1;

        let durable = self.persist(&session);
        debug!(version = session.version, durable, terminal = session.is_terminal(), "Session written");

        view.session = Some(session.clone());
        view.durable = durable;
        session
    }

    /// Remove every session key from both sinks. Idempotent and infallible.
    pub fn clear(&self) {
        let mut view = self.view();
        view.session = None;
        view.durable = false;

        for key in COOKIE_KEYS {
            self.remove_logged(&*self.cookies, key);
        }
        for key in LOCAL_KEYS {
            self.remove_logged(&*self.local, key);
        }
        debug!("Token store cleared");
    }

    /// Apply a change another writer made to the cookie sink.
    pub fn on_storage_event(&self, event: &StorageEvent) {
        if event.key != SESSION_KEY {
            return;
        }

        let mut view = self.view();
        match event.new_value.as_deref() {
            Some(raw) => match serde_json::from_str::<Session>(raw) {
                Ok(theirs) => {
                    let adopt = view
                        .session
                        .as_ref()
                        .map(|mine| theirs.supersedes(mine))
                        .unwrap_or(true);
                    if adopt {
                        debug!(version = theirs.version, "Adopted session from storage event");
                        view.session = Some(theirs);
                        view.durable = true;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring unparsable session record in storage event"),
            },
            None => {
                if view.durable {
                    debug!("Session removed by storage event");
                    view.session = None;
                    view.durable = false;
                }
            }
        }
    }

    /// Follow the cookie sink's change feed until the store is dropped.
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.cookies.subscribe();
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let event = rx.recv().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => store.on_storage_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage events lagged, re-reading session");
                        store.read();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn load_record(&self) -> Option<Session> {
        let raw = self.get_logged(&*self.cookies, SESSION_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Persisted session record is unreadable, ignoring it");
                None
            }
        }
    }

    fn version_mark(&self) -> u64 {
        self.get_logged(&*self.cookies, SESSION_VERSION_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    /// Returns whether the full record reached the cookie sink
    fn persist(&self, session: &Session) -> bool {
        let (record, user_data, legacy) = match Self::encode(session) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "StorageWriteFailure: could not encode session");
                return false;
            }
        };

        self.set_logged(&*self.cookies, SESSION_VERSION_KEY, &session.version.to_string());
        let durable = self.set_logged(&*self.cookies, SESSION_KEY, &record);
        self.set_logged(&*self.cookies, TOKEN_KEY, &session.access_token);
        self.set_logged(&*self.cookies, USER_ROLE_KEY, &session.user.role);
        self.set_logged(&*self.cookies, USER_DATA_KEY, &user_data);

        self.set_logged(&*self.local, TOKEN_KEY, &session.access_token);
        self.set_logged(&*self.local, USER_ROLE_KEY, &session.user.role);
        self.set_logged(&*self.local, USER_DATA_KEY, &user_data);
        self.set_logged(&*self.local, LEGACY_USER_KEY, &legacy);

        durable
    }

    /// Full record, `userData` and legacy `user` encodings
    fn encode(session: &Session) -> Result<(String, String, String), serde_json::Error> {
        Ok((
            serde_json::to_string(session)?,
            serde_json::to_string(&session.user)?,
            serde_json::to_string(&session.user.to_legacy())?,
        ))
    }

    fn get_logged(&self, sink: &dyn StorageSink, key: &str) -> Option<String> {
        match sink.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(sink = sink.name(), key, error = %e, "Storage read failed");
                None
            }
        }
    }

    fn set_logged(&self, sink: &dyn StorageSink, key: &str, value: &str) -> bool {
        match sink.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(sink = sink.name(), key, error = %e, "StorageWriteFailure");
                false
            }
        }
    }

    fn remove_logged(&self, sink: &dyn StorageSink, key: &str) {
        if let Err(e) = sink.remove(key) {
            warn!(sink = sink.name(), key, error = %e, "Storage remove failed");
        }
    }
}
