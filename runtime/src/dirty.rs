//! Persisted dirty/saved flag pair.
//!
//! A top-level save action needs to know whether unsaved edits exist before
//! reporting success. Edits stamp the dirty key, completed saves stamp the
//! saved key; unsaved edits exist while the dirty stamp is newer.

use banchetto_core::environment::Clock;
use banchetto_core::kv::{KeyValueStore, keys};
use std::sync::Arc;

/// The dirty/saved flag pair over the persistent key-value store.
pub struct DirtyFlags {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl DirtyFlags {
    /// Create the flag pair with its injected dependencies.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn stamp(&self, key: &str) {
        let now = self.clock.now().timestamp_millis().to_string();
        if let Err(err) = self.kv.set(key, &now) {
            tracing::warn!(%err, key, "failed to stamp flag");
        }
    }

    fn read(&self, key: &str) -> Option<i64> {
        self.kv
            .get(key)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
    }

    /// Record that a local edit happened.
    pub fn mark_dirty(&self) {
        self.stamp(keys::DIRTY);
    }

    /// Record that a save completed.
    pub fn mark_saved(&self) {
        self.stamp(keys::SAVED);
    }

    /// Whether edits exist that no save has covered yet.
    #[must_use]
    pub fn has_unsaved(&self) -> bool {
        match (self.read(keys::DIRTY), self.read(keys::SAVED)) {
            (Some(dirty), Some(saved)) => dirty > saved,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Drop both stamps.
    pub fn clear(&self) {
        for key in [keys::DIRTY, keys::SAVED] {
            if let Err(err) = self.kv.remove(key) {
                tracing::warn!(%err, key, "failed to clear flag");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_testing::{InMemoryKv, TickingClock, test_clock};
    use banchetto_core::environment::Clock as _;

    fn flags() -> DirtyFlags {
        let clock = TickingClock::new(test_clock().now());
        DirtyFlags::new(Arc::new(InMemoryKv::new()), Arc::new(clock))
    }

    #[test]
    fn dirty_then_saved_then_dirty() {
        let flags = flags();
        assert!(!flags.has_unsaved());

        flags.mark_dirty();
        assert!(flags.has_unsaved());

        flags.mark_saved();
        assert!(!flags.has_unsaved());

        flags.mark_dirty();
        assert!(flags.has_unsaved());

        flags.clear();
        assert!(!flags.has_unsaved());
    }
}
