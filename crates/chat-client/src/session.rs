//! Session-id providers.
//!
//! A session id names the server-side conversation.  Ids are reused while
//! fresh so a restarted client picks the same conversation back up.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Supplies the session id embedded in the initialization frame.
pub trait SessionIdProvider: Send + Sync + 'static {
    /// The current id, minting a new one if there is none or it has expired.
    fn current(&self) -> String;
    /// Discard the current id and mint a new one.
    fn renew(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredSession {
    session_id: String,
    issued_at: DateTime<Utc>,
}

/// UUID v4 ids that expire after a TTL, optionally persisted to a JSON file.
#[derive(Debug)]
pub struct ExpiringSessionIds {
    ttl: Duration,
    store_path: Option<PathBuf>,
    slot: Mutex<Option<StoredSession>>,
}

impl ExpiringSessionIds {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store_path: None,
            slot: Mutex::new(None),
        }
    }

    /// Persist ids to `path`, loading any id already stored there.
    pub fn with_store(ttl: Duration, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stored = load_stored(&path);
        Self {
            ttl,
            store_path: Some(path),
            slot: Mutex::new(stored),
        }
    }

    fn current_at(&self, now: DateTime<Utc>) -> String {
        let mut slot = self.slot.lock();
        if let Some(stored) = slot.as_ref() {
            if now - stored.issued_at <= self.ttl {
                return stored.session_id.clone();
            }
            tracing::info!(session_id = %stored.session_id, "session id expired");
        }
        let fresh = self.mint(now);
        let id = fresh.session_id.clone();
        *slot = Some(fresh);
        id
    }

    fn mint(&self, now: DateTime<Utc>) -> StoredSession {
        let stored = StoredSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            issued_at: now,
        };
        if let Some(path) = &self.store_path {
            if let Err(e) = save_stored(path, &stored) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist session id");
            }
        }
        stored
    }
}

impl SessionIdProvider for ExpiringSessionIds {
    fn current(&self) -> String {
        self.current_at(Utc::now())
    }

    fn renew(&self) -> String {
        let fresh = self.mint(Utc::now());
        let id = fresh.session_id.clone();
        *self.slot.lock() = Some(fresh);
        id
    }
}

impl Default for ExpiringSessionIds {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

fn load_stored(path: &Path) -> Option<StoredSession> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(stored) => Some(stored),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session store");
            None
        }
    }
}

fn save_stored(path: &Path, stored: &StoredSession) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(stored)?;
    std::fs::write(path, json)
}
