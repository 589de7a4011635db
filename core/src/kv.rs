//! Persistent per-browser-profile key-value boundary.
//!
//! The engine uses a small persistent key-value store for four things: the
//! global-defaults mirror, the dirty/saved flag pair, the cross-tab
//! change-signal timestamp, and per-event "already seeded" markers. Keys are
//! namespaced by a fixed prefix. Other tabs observe mutations through
//! [`KeyValueStore::watch`], which is the storage-mutation notification the
//! cross-tab channel rides on.

use crate::model::EventId;
use thiserror::Error;
use tokio::sync::broadcast;

/// A key mutation observed by watchers.
#[derive(Debug, Clone)]
pub struct KvChange {
    /// The mutated key.
    pub key: String,
    /// The new value; `None` for a removal.
    pub value: Option<String>,
}

/// Key-value backend failure.
#[derive(Debug, Clone, Error)]
#[error("key-value store error: {0}")]
pub struct KvError(pub String);

/// Persistent key-value store shared by all tabs of one profile.
///
/// Operations are synchronous; backends are expected to be local and cheap
/// (the browser-profile store this models is).
pub trait KeyValueStore: Send + Sync {
    /// Read a key.
    ///
    /// # Errors
    /// Returns [`KvError`] when the backend is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write a key.
    ///
    /// # Errors
    /// Returns [`KvError`] when the backend is unavailable.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Remove a key.
    ///
    /// # Errors
    /// Returns [`KvError`] when the backend is unavailable.
    fn remove(&self, key: &str) -> Result<(), KvError>;

    /// Subscribe to key mutations from any handle of this store.
    fn watch(&self) -> broadcast::Receiver<KvChange>;
}

/// Well-known keys, all under the fixed namespace prefix.
pub mod keys {
    use super::EventId;

    /// Namespace prefix for every key the engine owns.
    pub const PREFIX: &str = "banchetto:";

    /// Mirror of the shared global-defaults record.
    pub const DEFAULTS: &str = "banchetto:defaults";

    /// Cross-tab change-signal timestamp; watching tabs treat any write as
    /// "something changed, re-pull".
    pub const BUMP: &str = "banchetto:bump";

    /// Timestamp of the last local edit.
    pub const DIRTY: &str = "banchetto:dirty";

    /// Timestamp of the last completed save.
    pub const SAVED: &str = "banchetto:saved";

    /// Per-event one-time seeding marker for a settings center.
    #[must_use]
    pub fn seeded(center: &str, event_id: &EventId) -> String {
        format!("{PREFIX}seeded:{center}:{event_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_key_is_namespaced() {
        let key = keys::seeded("staff", &EventId::new("ev42"));
        assert_eq!(key, "banchetto:seeded:staff:ev42");
        assert!(key.starts_with(keys::PREFIX));
    }
}
