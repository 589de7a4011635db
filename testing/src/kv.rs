//! In-memory key-value store double.
//!
//! Handles created with [`InMemoryKv::handle`] share one backing map and one
//! watch channel, which is exactly how two tabs over one browser profile
//! behave: a write from one handle is observed by watchers of the other.

use banchetto_core::kv::{KeyValueStore, KvChange, KvError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

struct Shared {
    map: Mutex<HashMap<String, String>>,
    tx: broadcast::Sender<KvChange>,
}

/// Shareable in-memory [`KeyValueStore`].
#[derive(Clone)]
pub struct InMemoryKv {
    shared: Arc<Shared>,
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKv {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                map: Mutex::new(HashMap::new()),
                tx,
            }),
        }
    }

    /// Another handle over the same backing map; "another tab".
    #[must_use]
    pub fn handle(&self) -> Self {
        self.clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.shared.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl KeyValueStore for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.lock().insert(key.to_string(), value.to_string());
        let _ = self.shared.tx.send(KvChange {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.lock().remove(key);
        let _ = self.shared.tx.send(KvChange {
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<KvChange> {
        self.shared.tx.subscribe()
    }
}
