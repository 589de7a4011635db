//! Per-event settings resolvers.
//!
//! Effective settings resolve through a three-tier waterfall: the per-event
//! record, then the shared global default, then the factory default. The
//! waterfall is never persisted speculatively; a per-event record appears
//! only when the user explicitly adopts a value, or through the one-time
//! first-save seeding.
//!
//! Seeding runs exactly once per event per profile: a persistent marker plus
//! an in-memory phase guard (`Unseeded → Seeding → Resolved`) stop re-entry,
//! and a cross-tab double-seed collapses to last-write-wins through the
//! remote upsert.

use crate::defaults::GlobalDefaultsStore;
use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RemoteError, RowStoreClient};
use banchetto_core::guard;
use banchetto_core::kv::{KeyValueStore, keys};
use banchetto_core::model::{
    EventId, RemoteRow, StaffSettings, TransportSettings, VehicleType, tables,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedPhase {
    Unseeded,
    Seeding,
    Resolved,
}

/// Resolver for the per-event staff markup.
pub struct StaffSettingsResolver {
    client: Arc<dyn RowStoreClient>,
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<ChangeBus>,
    defaults: Arc<GlobalDefaultsStore>,
    event_id: EventId,
    phase: Mutex<SeedPhase>,
    last_error: RwLock<Option<String>>,
}

impl StaffSettingsResolver {
    /// Create a resolver for one event.
    #[must_use]
    pub fn new(
        client: Arc<dyn RowStoreClient>,
        kv: Arc<dyn KeyValueStore>,
        bus: Arc<ChangeBus>,
        defaults: Arc<GlobalDefaultsStore>,
        event_id: EventId,
    ) -> Self {
        Self {
            client,
            kv,
            bus,
            defaults,
            event_id,
            phase: Mutex::new(SeedPhase::Unseeded),
            last_error: RwLock::new(None),
        }
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Effective settings: the per-event record when it exists, otherwise a
    /// view over the global default. Reading never persists anything.
    pub async fn effective(&self) -> StaffSettings {
        match self.fetch_row().await {
            Ok(Some(settings)) => {
                *self.phase.lock().await = SeedPhase::Resolved;
                settings
            }
            Ok(None) => {
                let defaults = self.defaults.load().await;
                StaffSettings {
                    event_id: self.event_id.clone(),
                    markup_x: defaults.staff_markup_x,
                }
            }
            Err(err) => {
                tracing::warn!(%err, "staff settings read failed; using defaults");
                *self.last_error.write().await = Some(err.message);
                let defaults = self.defaults.load().await;
                StaffSettings {
                    event_id: self.event_id.clone(),
                    markup_x: defaults.staff_markup_x,
                }
            }
        }
    }

    /// One-time seeding: copy the current global default into a per-event
    /// record. Guarded by the persistent marker and the in-memory phase;
    /// called from explicit save paths, never from reads.
    pub async fn ensure_seeded(&self) {
        let mut phase = self.phase.lock().await;
        if *phase != SeedPhase::Unseeded {
            return;
        }
        let marker = keys::seeded("staff", &self.event_id);
        if matches!(self.kv.get(&marker), Ok(Some(_))) {
            *phase = SeedPhase::Resolved;
            return;
        }
        *phase = SeedPhase::Seeding;

        let defaults = self.defaults.load().await;
        let mut row = RemoteRow::new();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        row.insert("markup_x".into(), json!(defaults.staff_markup_x));
        match self
            .client
            .upsert(tables::STAFF_SETTINGS, "event_id", row)
            .await
        {
            Ok(_) => {
                if let Err(err) = self.kv.set(&marker, "1") {
                    tracing::warn!(%err, "failed to persist the seeded marker");
                }
                *phase = SeedPhase::Resolved;
            }
            Err(err) => {
                tracing::warn!(%err, "staff settings seeding failed");
                *self.last_error.write().await = Some(err.message);
                *phase = SeedPhase::Unseeded;
            }
        }
    }

    /// Explicitly adopt a markup: clamp to `> 0` (fallback 1), upsert the
    /// per-event record, write through to the global default so future
    /// events inherit it, and broadcast the change.
    pub async fn set_markup(&self, value: f64) -> bool {
        let value = guard::pos_or(value, 1.0);
        let mut row = RemoteRow::new();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        row.insert("markup_x".into(), json!(value));

        match self
            .client
            .upsert(tables::STAFF_SETTINGS, "event_id", row)
            .await
        {
            Ok(_) => {
                let marker = keys::seeded("staff", &self.event_id);
                if let Err(err) = self.kv.set(&marker, "1") {
                    tracing::warn!(%err, "failed to persist the seeded marker");
                }
                *self.phase.lock().await = SeedPhase::Resolved;
                *self.last_error.write().await = None;
                self.defaults.set_staff_markup(value).await;
                self.bus.emit(topic::SETTINGS, Some(&self.event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "staff markup save failed");
                *self.last_error.write().await = Some(err.message);
                false
            }
        }
    }

    /// Denormalized convenience write: push a markup onto every staff row of
    /// the event. Totals do not depend on it; they may read the settings
    /// record directly.
    pub async fn propagate_markup_to_rows(&self, value: f64) -> bool {
        let value = guard::pos_or(value, 1.0);
        let filter = Filter::new().eq("event_id", self.event_id.as_str());
        let mut patch = RemoteRow::new();
        patch.insert("markup_x".into(), json!(value));
        match self
            .client
            .update_where(tables::STAFF_ROWS, &filter, patch)
            .await
        {
            Ok(touched) => {
                tracing::debug!(touched, "staff markup propagated to rows");
                self.bus.emit(topic::STAFF, Some(&self.event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "staff markup propagation failed");
                *self.last_error.write().await = Some(err.message);
                false
            }
        }
    }

    async fn fetch_row(&self) -> Result<Option<StaffSettings>, RemoteError> {
        let filter = Filter::new()
            .eq("event_id", self.event_id.as_str())
            .limit(1);
        let rows = self.client.select(tables::STAFF_SETTINGS, &filter).await?;
        Ok(rows.first().map(|row| StaffSettings {
            event_id: self.event_id.clone(),
            markup_x: guard::pos_or(
                row.get("markup_x").and_then(guard::num_from).unwrap_or(0.0),
                1.0,
            ),
        }))
    }
}

/// Resolver for the per-event transport markup and vehicle types.
pub struct TransportSettingsResolver {
    client: Arc<dyn RowStoreClient>,
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<ChangeBus>,
    defaults: Arc<GlobalDefaultsStore>,
    event_id: EventId,
    phase: Mutex<SeedPhase>,
    last_error: RwLock<Option<String>>,
}

impl TransportSettingsResolver {
    /// Create a resolver for one event.
    #[must_use]
    pub fn new(
        client: Arc<dyn RowStoreClient>,
        kv: Arc<dyn KeyValueStore>,
        bus: Arc<ChangeBus>,
        defaults: Arc<GlobalDefaultsStore>,
        event_id: EventId,
    ) -> Self {
        Self {
            client,
            kv,
            bus,
            defaults,
            event_id,
            phase: Mutex::new(SeedPhase::Unseeded),
            last_error: RwLock::new(None),
        }
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Effective settings. Once *any* per-event data exists (a settings row
    /// or a vehicle type), only per-event data is used; the global default is
    /// never consulted again for this event.
    pub async fn effective(&self) -> TransportSettings {
        let row = match self.fetch_row().await {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(%err, "transport settings read failed; using defaults");
                *self.last_error.write().await = Some(err.message);
                None
            }
        };
        let vehicle_types = match self.fetch_vehicle_types().await {
            Ok(vehicle_types) => vehicle_types,
            Err(err) => {
                tracing::warn!(%err, "vehicle type read failed");
                *self.last_error.write().await = Some(err.message);
                Vec::new()
            }
        };

        if row.is_some() || !vehicle_types.is_empty() {
            *self.phase.lock().await = SeedPhase::Resolved;
            return TransportSettings {
                event_id: self.event_id.clone(),
                markup_x: row.unwrap_or(1.0),
                vehicle_types,
            };
        }

        let defaults = self.defaults.load().await;
        TransportSettings {
            event_id: self.event_id.clone(),
            markup_x: defaults.transport_markup_x,
            vehicle_types: defaults.vehicle_types,
        }
    }

    /// One-time seeding: copy the global markup *and* the global vehicle
    /// types into per-event records.
    pub async fn ensure_seeded(&self) {
        let mut phase = self.phase.lock().await;
        if *phase != SeedPhase::Unseeded {
            return;
        }
        let marker = keys::seeded("transport", &self.event_id);
        if matches!(self.kv.get(&marker), Ok(Some(_))) {
            *phase = SeedPhase::Resolved;
            return;
        }
        *phase = SeedPhase::Seeding;

        let defaults = self.defaults.load().await;
        let mut row = RemoteRow::new();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        row.insert("markup_x".into(), json!(defaults.transport_markup_x));
        let seeded = self
            .client
            .upsert(tables::TRANSPORT_SETTINGS, "event_id", row)
            .await;
        match seeded {
            Ok(_) => {
                for vehicle_type in &defaults.vehicle_types {
                    let mut vt_row = vehicle_type.to_patch();
                    vt_row.insert("event_id".into(), json!(self.event_id.as_str()));
                    if let Err(err) = self
                        .client
                        .insert(tables::TRANSPORT_VEHICLE_TYPES, vt_row)
                        .await
                    {
                        tracing::warn!(%err, key = vehicle_type.key, "vehicle type seeding failed");
                    }
                }
                if let Err(err) = self.kv.set(&marker, "1") {
                    tracing::warn!(%err, "failed to persist the seeded marker");
                }
                *phase = SeedPhase::Resolved;
            }
            Err(err) => {
                tracing::warn!(%err, "transport settings seeding failed");
                *self.last_error.write().await = Some(err.message);
                *phase = SeedPhase::Unseeded;
            }
        }
    }

    /// Explicitly adopt a markup; same write-through semantics as staff.
    pub async fn set_markup(&self, value: f64) -> bool {
        let value = guard::pos_or(value, 1.0);
        let mut row = RemoteRow::new();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        row.insert("markup_x".into(), json!(value));

        match self
            .client
            .upsert(tables::TRANSPORT_SETTINGS, "event_id", row)
            .await
        {
            Ok(_) => {
                let marker = keys::seeded("transport", &self.event_id);
                if let Err(err) = self.kv.set(&marker, "1") {
                    tracing::warn!(%err, "failed to persist the seeded marker");
                }
                *self.phase.lock().await = SeedPhase::Resolved;
                *self.last_error.write().await = None;
                self.defaults.set_transport_markup(value).await;
                self.bus.emit(topic::SETTINGS, Some(&self.event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "transport markup save failed");
                *self.last_error.write().await = Some(err.message);
                false
            }
        }
    }

    /// Add a per-event vehicle type, seeding the event first so the explicit
    /// addition lands next to the inherited list rather than replacing it.
    pub async fn add_vehicle_type(&self, vehicle_type: &VehicleType) -> bool {
        self.ensure_seeded().await;
        let mut row = vehicle_type.to_patch();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        match self
            .client
            .insert(tables::TRANSPORT_VEHICLE_TYPES, row)
            .await
        {
            Ok(_) => {
                *self.last_error.write().await = None;
                self.bus.emit(topic::SETTINGS, Some(&self.event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "vehicle type add failed");
                *self.last_error.write().await = Some(err.message);
                false
            }
        }
    }

    /// Remove every per-event vehicle type with the given key.
    pub async fn remove_vehicle_type(&self, key: &str) -> bool {
        let filter = Filter::new()
            .eq("event_id", self.event_id.as_str())
            .eq("key", key);
        let rows = match self
            .client
            .select(tables::TRANSPORT_VEHICLE_TYPES, &filter)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(%err, "vehicle type read failed");
                *self.last_error.write().await = Some(err.message);
                return false;
            }
        };
        for row in &rows {
            let Some(id) = row.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            if let Err(err) = self
                .client
                .delete(tables::TRANSPORT_VEHICLE_TYPES, id)
                .await
            {
                tracing::warn!(%err, "vehicle type delete failed");
                *self.last_error.write().await = Some(err.message);
                return false;
            }
        }
        self.bus.emit(topic::SETTINGS, Some(&self.event_id));
        true
    }

    /// Denormalized convenience write onto the event's transport rows.
    pub async fn propagate_markup_to_rows(&self, value: f64) -> bool {
        let value = guard::pos_or(value, 1.0);
        let filter = Filter::new().eq("event_id", self.event_id.as_str());
        let mut patch = RemoteRow::new();
        patch.insert("markup_x".into(), json!(value));
        match self
            .client
            .update_where(tables::TRANSPORT_ROWS, &filter, patch)
            .await
        {
            Ok(touched) => {
                tracing::debug!(touched, "transport markup propagated to rows");
                self.bus.emit(topic::TRANSPORT, Some(&self.event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "transport markup propagation failed");
                *self.last_error.write().await = Some(err.message);
                false
            }
        }
    }

    async fn fetch_row(&self) -> Result<Option<f64>, RemoteError> {
        let filter = Filter::new()
            .eq("event_id", self.event_id.as_str())
            .limit(1);
        let rows = self
            .client
            .select(tables::TRANSPORT_SETTINGS, &filter)
            .await?;
        Ok(rows.first().map(|row| {
            guard::pos_or(
                row.get("markup_x").and_then(guard::num_from).unwrap_or(0.0),
                1.0,
            )
        }))
    }

    async fn fetch_vehicle_types(&self) -> Result<Vec<VehicleType>, RemoteError> {
        let filter = Filter::new()
            .eq("event_id", self.event_id.as_str())
            .order("created_at")
            .order("id");
        let rows = self
            .client
            .select(tables::TRANSPORT_VEHICLE_TYPES, &filter)
            .await?;
        Ok(rows.iter().map(VehicleType::from_remote).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::SystemClock;
    use banchetto_testing::{InMemoryKv, InMemoryRowClient};

    struct Fixture {
        client: InMemoryRowClient,
        kv: InMemoryKv,
        defaults: Arc<GlobalDefaultsStore>,
        bus: Arc<ChangeBus>,
    }

    impl Fixture {
        fn new() -> Self {
            let client = InMemoryRowClient::new();
            let kv = InMemoryKv::new();
            let defaults = Arc::new(GlobalDefaultsStore::new(
                Arc::new(client.clone()),
                Arc::new(kv.clone()),
                Arc::new(SystemClock),
            ));
            let bus = Arc::new(ChangeBus::new(Arc::new(SystemClock)));
            Self {
                client,
                kv,
                defaults,
                bus,
            }
        }

        fn staff(&self, event: &str) -> StaffSettingsResolver {
            StaffSettingsResolver::new(
                Arc::new(self.client.clone()),
                Arc::new(self.kv.clone()),
                self.bus.clone(),
                self.defaults.clone(),
                EventId::new(event),
            )
        }

        fn transport(&self, event: &str) -> TransportSettingsResolver {
            TransportSettingsResolver::new(
                Arc::new(self.client.clone()),
                Arc::new(self.kv.clone()),
                self.bus.clone(),
                self.defaults.clone(),
                EventId::new(event),
            )
        }
    }

    #[tokio::test]
    async fn unseeded_event_reads_global_default_without_persisting() {
        let fixture = Fixture::new();
        fixture.defaults.set_staff_markup(1.5).await;
        fixture.defaults.set_transport_markup(1.5).await;

        let transport = fixture.transport("ev-new");
        let effective = transport.effective().await;
        assert_eq!(effective.markup_x, 1.5);
        // factory vehicle list shines through the defaults
        assert_eq!(effective.vehicle_types.len(), 2);

        // nothing was written for the event
        assert!(fixture.client.table(tables::TRANSPORT_SETTINGS).is_empty());
        assert!(
            fixture
                .client
                .table(tables::TRANSPORT_VEHICLE_TYPES)
                .is_empty()
        );
    }

    #[tokio::test]
    async fn seeding_happens_once() {
        let fixture = Fixture::new();
        fixture.defaults.set_staff_markup(1.4).await;

        let staff = fixture.staff("ev1");
        staff.ensure_seeded().await;
        staff.ensure_seeded().await;

        let rows = fixture.client.table(tables::STAFF_SETTINGS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["markup_x"], serde_json::json!(1.4));

        // a second resolver for the same event sees the persistent marker
        let again = fixture.staff("ev1");
        again.ensure_seeded().await;
        let upserts = fixture
            .client
            .ops()
            .iter()
            .filter(|op| op.starts_with("upsert:staff_settings"))
            .count();
        assert_eq!(upserts, 1);
    }

    #[tokio::test]
    async fn per_event_row_short_circuits_defaults() {
        let fixture = Fixture::new();
        fixture.defaults.set_staff_markup(9.0).await;

        let staff = fixture.staff("ev1");
        assert!(staff.set_markup(1.2).await);

        // global default now carries the adopted value (write-through) ...
        assert_eq!(fixture.defaults.load().await.staff_markup_x, 1.2);
        // ... and the per-event row wins regardless of later default changes
        fixture.defaults.set_staff_markup(3.0).await;
        assert_eq!(staff.effective().await.markup_x, 1.2);
    }

    #[tokio::test]
    async fn set_markup_clamps_and_broadcasts() {
        let fixture = Fixture::new();
        let staff = fixture.staff("ev1");
        let mut notices = fixture.bus.subscribe(topic::SETTINGS);

        assert!(staff.set_markup(-3.0).await);
        assert_eq!(staff.effective().await.markup_x, 1.0);
        assert_eq!(notices.recv().await.unwrap().topic, topic::SETTINGS);
    }

    #[tokio::test]
    async fn transport_seeding_copies_vehicle_types() {
        let fixture = Fixture::new();
        let transport = fixture.transport("ev1");
        transport.ensure_seeded().await;

        let vt_rows = fixture.client.table(tables::TRANSPORT_VEHICLE_TYPES);
        assert_eq!(vt_rows.len(), 2); // factory van + truck

        let effective = transport.effective().await;
        assert_eq!(effective.vehicle_types.len(), 2);
    }

    #[tokio::test]
    async fn propagate_updates_every_row() {
        let fixture = Fixture::new();
        fixture.client.seed(
            tables::STAFF_ROWS,
            vec![
                banchetto_testing::builders::patch(&[
                    ("id", serde_json::json!("s1")),
                    ("event_id", serde_json::json!("ev1")),
                    ("markup_x", serde_json::json!(1.0)),
                ]),
                banchetto_testing::builders::patch(&[
                    ("id", serde_json::json!("s2")),
                    ("event_id", serde_json::json!("ev1")),
                    ("markup_x", serde_json::json!(1.0)),
                ]),
                banchetto_testing::builders::patch(&[
                    ("id", serde_json::json!("s3")),
                    ("event_id", serde_json::json!("other")),
                    ("markup_x", serde_json::json!(1.0)),
                ]),
            ],
        );

        let staff = fixture.staff("ev1");
        assert!(staff.propagate_markup_to_rows(1.6).await);

        let rows = fixture.client.table(tables::STAFF_ROWS);
        for row in rows {
            let expected = if row["event_id"] == serde_json::json!("ev1") {
                serde_json::json!(1.6)
            } else {
                serde_json::json!(1.0)
            };
            assert_eq!(row["markup_x"], expected);
        }
    }
}
