//! Global defaults store.
//!
//! One shared record (a constant key) holds the markups and vehicle types new
//! events are seeded from. Reads are remote-first with the key-value mirror
//! as fallback, so a fresh tab can render instantly and offline; the mirror
//! is never the authority once the remote value is available. Every mutation
//! re-serializes the whole defaults object and stamps the shared change
//! marker, which is what other tabs watch.
//!
//! Concurrent writers overwrite each other; defaults only affect newly
//! seeded events, so last-write-wins is accepted here.

use banchetto_core::client::{Filter, RowStoreClient};
use banchetto_core::environment::Clock;
use banchetto_core::guard;
use banchetto_core::kv::{KeyValueStore, keys};
use banchetto_core::model::{GlobalDefaults, RemoteRow, VehicleType, tables};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Constant key of the single shared defaults row.
pub const DEFAULTS_ROW_KEY: &str = "shared";

/// Store for the shared [`GlobalDefaults`] record.
pub struct GlobalDefaultsStore {
    client: Arc<dyn RowStoreClient>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<GlobalDefaults>>,
}

impl GlobalDefaultsStore {
    /// Create a store with its injected dependencies.
    #[must_use]
    pub fn new(
        client: Arc<dyn RowStoreClient>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            kv,
            clock,
            cache: RwLock::new(None),
        }
    }

    /// The in-memory cached value, if any. Updated by loads, mutations, and
    /// the mirror watcher.
    pub async fn cached(&self) -> Option<GlobalDefaults> {
        self.cache.read().await.clone()
    }

    /// Load the defaults: remote first, then the local mirror, then factory.
    pub async fn load(&self) -> GlobalDefaults {
        let filter = Filter::new().eq("key", DEFAULTS_ROW_KEY).limit(1);
        match self.client.select(tables::GLOBAL_DEFAULTS, &filter).await {
            Ok(rows) => {
                if let Some(defaults) = rows.first().and_then(Self::decode_row) {
                    self.write_mirror(&defaults);
                    *self.cache.write().await = Some(defaults.clone());
                    return defaults;
                }
                // no remote row yet: fall back without treating it as an error
            }
            Err(err) => {
                tracing::warn!(%err, "global defaults read failed; using local mirror");
            }
        }
        if let Some(defaults) = self.read_mirror() {
            *self.cache.write().await = Some(defaults.clone());
            return defaults;
        }
        if let Some(defaults) = self.cache.read().await.clone() {
            return defaults;
        }
        GlobalDefaults::factory()
    }

    /// Set the default staff markup (clamped to `> 0`).
    pub async fn set_staff_markup(&self, value: f64) -> bool {
        let mut defaults = self.load().await;
        defaults.staff_markup_x = guard::pos_or(value, 1.0);
        self.persist(defaults).await
    }

    /// Set the default transport markup (clamped to `> 0`).
    pub async fn set_transport_markup(&self, value: f64) -> bool {
        let mut defaults = self.load().await;
        defaults.transport_markup_x = guard::pos_or(value, 1.0);
        self.persist(defaults).await
    }

    /// Replace the default vehicle-type list.
    pub async fn set_vehicle_types(&self, vehicle_types: Vec<VehicleType>) -> bool {
        let mut defaults = self.load().await;
        defaults.vehicle_types = vehicle_types;
        self.persist(defaults).await
    }

    /// Spawn the mirror watcher: a defaults-mirror write from another tab
    /// updates the cache; a bump without a mirror write drops the cache so
    /// the next load re-pulls the remote value.
    pub fn spawn_mirror_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut watch = self.kv.watch();
        tokio::spawn(async move {
            loop {
                match watch.recv().await {
                    Ok(change) if change.key == keys::DEFAULTS => {
                        if let Some(defaults) = change
                            .value
                            .as_deref()
                            .and_then(|raw| serde_json::from_str(raw).ok())
                        {
                            *store.cache.write().await = Some(defaults);
                        }
                    }
                    Ok(change) if change.key == keys::BUMP => {
                        // another tab changed something; re-read the mirror
                        if let Some(defaults) = store.read_mirror() {
                            *store.cache.write().await = Some(defaults);
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn persist(&self, defaults: GlobalDefaults) -> bool {
        let payload = match serde_json::to_value(&defaults) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, "global defaults serialization failed");
                return false;
            }
        };
        let mut row = RemoteRow::new();
        row.insert("key".into(), json!(DEFAULTS_ROW_KEY));
        row.insert("payload".into(), payload);

        match self
            .client
            .upsert(tables::GLOBAL_DEFAULTS, "key", row)
            .await
        {
            Ok(_) => {
                self.write_mirror(&defaults);
                let stamp = self.clock.now().timestamp_millis().to_string();
                if let Err(err) = self.kv.set(keys::BUMP, &stamp) {
                    tracing::warn!(%err, "failed to stamp the settings change marker");
                }
                *self.cache.write().await = Some(defaults);
                true
            }
            Err(err) => {
                tracing::warn!(%err, "global defaults write failed");
                false
            }
        }
    }

    fn decode_row(row: &RemoteRow) -> Option<GlobalDefaults> {
        let payload = row.get("payload")?;
        serde_json::from_value(payload.clone()).ok()
    }

    fn read_mirror(&self) -> Option<GlobalDefaults> {
        let raw = self.kv.get(keys::DEFAULTS).ok()??;
        serde_json::from_str(&raw).ok()
    }

    fn write_mirror(&self, defaults: &GlobalDefaults) {
        match serde_json::to_string(defaults) {
            Ok(raw) => {
                if let Err(err) = self.kv.set(keys::DEFAULTS, &raw) {
                    tracing::warn!(%err, "failed to mirror global defaults");
                }
            }
            Err(err) => tracing::warn!(%err, "global defaults serialization failed"),
        }
    }
}
