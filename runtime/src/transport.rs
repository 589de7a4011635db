//! Transport row store.
//!
//! Same contract as the generic row store, with three extras the transport
//! table needs: column discovery through [`ColumnProbe`], the
//! retry-once-on-integer-rejection write policy, and cancellable in-flight
//! reads (rapid event switches abort the previous read instead of letting a
//! stale result land). Aborts are silent, non-error outcomes.

use crate::probe::{ColumnProbe, ColumnTriple, IntegerCoercion, to_canonical_shape, to_remote_shape};
use crate::store::sort_rows_by;
use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RemoteError, RemoteErrorKind, RowStoreClient};
use banchetto_core::environment::Clock;
use banchetto_core::model::{self, EventId, RemoteRow, RowId, TransportRow, tables};
use futures::future::{AbortHandle, Abortable};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

#[derive(Default)]
struct TransportState {
    event_id: Option<EventId>,
    rows: Vec<TransportRow>,
    last_error: Option<String>,
}

/// Row store for transport, with schema probing and abortable reads.
pub struct TransportStore {
    client: Arc<dyn RowStoreClient>,
    bus: Arc<ChangeBus>,
    clock: Arc<dyn Clock>,
    probe: ColumnProbe,
    coercion: IntegerCoercion,
    state: RwLock<TransportState>,
    inflight: Mutex<Option<AbortHandle>>,
    temp_seq: AtomicU64,
}

impl TransportStore {
    /// Create a store with its injected dependencies.
    #[must_use]
    pub fn new(
        client: Arc<dyn RowStoreClient>,
        bus: Arc<ChangeBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            bus,
            clock,
            probe: ColumnProbe::new(),
            coercion: IntegerCoercion::new(),
            state: RwLock::new(TransportState::default()),
            inflight: Mutex::new(None),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Select the event this store tracks. `None` clears the rows; any
    /// in-flight read is aborted either way.
    pub async fn set_event(&self, event_id: Option<EventId>) {
        self.abort_inflight();
        let mut state = self.state.write().await;
        state.event_id = event_id;
        state.rows.clear();
        state.last_error = None;
    }

    /// Snapshot of the rows in canonical shape, creation order.
    pub async fn rows(&self) -> Vec<TransportRow> {
        self.state.read().await.rows.clone()
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    fn abort_inflight(&self) {
        let handle = {
            let mut inflight = match self.inflight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inflight.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn register_inflight(&self) -> futures::future::AbortRegistration {
        let (handle, registration) = AbortHandle::new_pair();
        let mut inflight = match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = inflight.replace(handle) {
            previous.abort();
        }
        registration
    }

    /// Re-pull the rows. A newer refresh (or an event switch) aborts this
    /// one; the abort is silent.
    pub async fn refresh(&self) {
        let Some(event_id) = self.state.read().await.event_id.clone() else {
            return;
        };
        let registration = self.register_inflight();
        let read = Abortable::new(self.read_rows(&event_id), registration);
        match read.await {
            Ok(Ok(rows)) => {
                let mut state = self.state.write().await;
                if state.event_id.as_ref() != Some(&event_id) {
                    return;
                }
                state.rows = rows;
                state.last_error = None;
            }
            Ok(Err(err)) if err.kind == RemoteErrorKind::Aborted => {}
            Ok(Err(err)) => {
                tracing::warn!(%err, "transport refresh failed; keeping last-known rows");
                self.state.write().await.last_error = Some(err.message);
            }
            Err(futures::future::Aborted) => {
                tracing::debug!("transport refresh aborted");
            }
        }
    }

    async fn read_rows(&self, event_id: &EventId) -> Result<Vec<TransportRow>, RemoteError> {
        let columns = self
            .probe
            .resolve(self.client.as_ref(), tables::TRANSPORT_ROWS)
            .await?;
        let filter = Filter::new()
            .eq("event_id", event_id.as_str())
            .order("created_at")
            .order("id");
        let raw = self.client.select(tables::TRANSPORT_ROWS, &filter).await?;
        let mut rows: Vec<TransportRow> = raw
            .iter()
            .map(|row| TransportRow::from_remote(&to_canonical_shape(row, &columns)))
            .collect();
        sort_rows_by(&mut rows, |r| model::sort_key(r.created_at, &r.id));
        Ok(rows)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        crate::centers::clamp_non_neg(&mut patch, &["distance_km"]);
        crate::centers::clamp_markup(&mut patch, "markup_x");
        crate::centers::clamp_bool(&mut patch, "round_trip");
        if let Some(trips) = patch.get("trips") {
            let clamped = banchetto_core::guard::pos_or(
                banchetto_core::guard::num_from(trips).unwrap_or(0.0),
                1.0,
            );
            patch.insert("trips".to_string(), json!(clamped));
        }
        patch
    }

    /// Write through the integer-coercion policy: remembered fields are
    /// rounded up front; a strict-integer rejection rounds the fractional
    /// fields, remembers them, and retries exactly once.
    async fn insert_coerced(
        &self,
        columns: &ColumnTriple,
        patch: RemoteRow,
    ) -> Result<RemoteRow, RemoteError> {
        let mut payload = to_remote_shape(patch, columns);
        self.coercion.apply(&mut payload);
        match self.client.insert(tables::TRANSPORT_ROWS, payload.clone()).await {
            Err(err) if err.kind == RemoteErrorKind::InvalidInteger => {
                let rounded = self.coercion.round_fractional(&mut payload);
                if rounded.is_empty() {
                    return Err(err);
                }
                tracing::debug!(?rounded, "integer rejection; retrying with rounded fields");
                self.client.insert(tables::TRANSPORT_ROWS, payload).await
            }
            other => other,
        }
    }

    async fn update_coerced(
        &self,
        columns: &ColumnTriple,
        id: &RowId,
        patch: RemoteRow,
    ) -> Result<RemoteRow, RemoteError> {
        let mut payload = to_remote_shape(patch, columns);
        self.coercion.apply(&mut payload);
        match self
            .client
            .update(tables::TRANSPORT_ROWS, id.as_str(), payload.clone())
            .await
        {
            Err(err) if err.kind == RemoteErrorKind::InvalidInteger => {
                let rounded = self.coercion.round_fractional(&mut payload);
                if rounded.is_empty() {
                    return Err(err);
                }
                tracing::debug!(?rounded, "integer rejection; retrying with rounded fields");
                self.client
                    .update(tables::TRANSPORT_ROWS, id.as_str(), payload)
                    .await
            }
            other => other,
        }
    }

    /// Create a row from a canonical-shape patch. Same optimistic two-phase
    /// flow as the generic store.
    pub async fn create(&self, patch: RemoteRow) -> Option<TransportRow> {
        let event_id = {
            let mut state = self.state.write().await;
            match state.event_id.clone() {
                Some(event_id) => event_id,
                None => {
                    state.last_error = Some("no event selected".to_string());
                    return None;
                }
            }
        };
        let columns = match self
            .probe
            .resolve(self.client.as_ref(), tables::TRANSPORT_ROWS)
            .await
        {
            Ok(columns) => columns,
            Err(err) => {
                tracing::warn!(%err, "transport create failed during column discovery");
                self.state.write().await.last_error = Some(err.message);
                return None;
            }
        };

        let mut patch = Self::sanitize(patch);
        patch.insert("event_id".into(), json!(event_id.as_str()));

        let temp_id = format!("pending-{}", self.temp_seq.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut tentative = patch.clone();
            tentative.insert("id".into(), json!(temp_id));
            tentative.insert("created_at".into(), json!(self.clock.now().to_rfc3339()));
            let mut state = self.state.write().await;
            state.rows.push(TransportRow::from_remote(&tentative));
            sort_rows_by(&mut state.rows, |r| model::sort_key(r.created_at, &r.id));
        }

        match self.insert_coerced(&columns, patch).await {
            Ok(echo) => {
                let row = TransportRow::from_remote(&to_canonical_shape(&echo, &columns));
                {
                    let mut state = self.state.write().await;
                    if let Some(slot) =
                        state.rows.iter_mut().find(|r| r.id.as_str() == temp_id)
                    {
                        *slot = row.clone();
                    } else {
                        state.rows.push(row.clone());
                    }
                    sort_rows_by(&mut state.rows, |r| model::sort_key(r.created_at, &r.id));
                    state.last_error = None;
                }
                self.bus.emit(topic::TRANSPORT, Some(&event_id));
                Some(row)
            }
            Err(err) => {
                tracing::warn!(%err, "transport create failed; rolling back tentative row");
                let mut state = self.state.write().await;
                state.rows.retain(|r| r.id.as_str() != temp_id);
                state.last_error = Some(err.message);
                None
            }
        }
    }

    /// Patch a row from a canonical-shape patch.
    pub async fn update(&self, id: &RowId, patch: RemoteRow) -> bool {
        let columns = match self
            .probe
            .resolve(self.client.as_ref(), tables::TRANSPORT_ROWS)
            .await
        {
            Ok(columns) => columns,
            Err(err) => {
                tracing::warn!(%err, "transport update failed during column discovery");
                self.state.write().await.last_error = Some(err.message);
                return false;
            }
        };
        let patch = Self::sanitize(patch);
        match self.update_coerced(&columns, id, patch).await {
            Ok(echo) => {
                let row = TransportRow::from_remote(&to_canonical_shape(&echo, &columns));
                let event_id = {
                    let mut state = self.state.write().await;
                    if let Some(slot) = state.rows.iter_mut().find(|r| &r.id == id) {
                        *slot = row;
                    }
                    sort_rows_by(&mut state.rows, |r| model::sort_key(r.created_at, &r.id));
                    state.last_error = None;
                    state.event_id.clone()
                };
                self.bus.emit(topic::TRANSPORT, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(%err, "transport update failed");
                self.state.write().await.last_error = Some(err.message);
                false
            }
        }
    }

    /// Delete a row optimistically, restoring the exact prior list on
    /// failure.
    pub async fn delete(&self, id: &RowId) -> bool {
        let snapshot = {
            let mut state = self.state.write().await;
            let snapshot = state.rows.clone();
            state.rows.retain(|r| &r.id != id);
            snapshot
        };
        match self.client.delete(tables::TRANSPORT_ROWS, id.as_str()).await {
            Ok(()) => {
                let event_id = {
                    let mut state = self.state.write().await;
                    state.last_error = None;
                    state.event_id.clone()
                };
                self.bus.emit(topic::TRANSPORT, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(%err, "transport delete failed; restoring prior rows");
                let mut state = self.state.write().await;
                state.rows = snapshot;
                state.last_error = Some(err.message);
                false
            }
        }
    }

    /// Spawn the re-sync task (focus and visibility, never a timer).
    pub fn spawn_resync(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut focus = self.bus.subscribe(topic::APP_FOCUS);
        let mut visible = self.bus.subscribe(topic::APP_VISIBLE);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    notice = focus.recv() => notice,
                    notice = visible.recv() => notice,
                };
                match received {
                    Ok(_) | Err(RecvError::Lagged(_)) => store.refresh().await,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::SystemClock;
    use banchetto_testing::{InMemoryRowClient, builders};

    const LEGACY: [&str; 11] = [
        "id",
        "event_id",
        "created_at",
        "distance_km",
        "vehicle_key",
        "trips",
        "markup_x",
        "notes",
        "from_address",
        "to_address",
        "roundtrip",
    ];

    fn store(client: &InMemoryRowClient) -> Arc<TransportStore> {
        let clock = Arc::new(SystemClock);
        let bus = Arc::new(ChangeBus::new(clock.clone()));
        Arc::new(TransportStore::new(Arc::new(client.clone()), bus, clock))
    }

    #[tokio::test]
    async fn writes_and_reads_through_legacy_columns() {
        banchetto_testing::init_tracing();
        let client = InMemoryRowClient::new();
        client.with_columns(tables::TRANSPORT_ROWS, &LEGACY);
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;

        let row = store
            .create(builders::transport("Depot", "Villa", 30.0))
            .await
            .unwrap();
        assert_eq!(row.origin, "Depot");
        assert_eq!(row.destination, "Villa");

        // stored under the legacy names, not the canonical ones
        let raw = client.table(tables::TRANSPORT_ROWS);
        assert_eq!(raw[0]["from_address"], json!("Depot"));
        assert!(!raw[0].contains_key("origin"));

        store.refresh().await;
        let rows = store.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].origin, "Depot");
    }

    #[tokio::test]
    async fn probing_happens_once_per_session() {
        let client = InMemoryRowClient::new();
        client.with_columns(tables::TRANSPORT_ROWS, &LEGACY);
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;

        store.refresh().await;
        let after_first = client.selects_for(tables::TRANSPORT_ROWS);
        store.refresh().await;
        let after_second = client.selects_for(tables::TRANSPORT_ROWS);
        // first refresh = two probe selects + one read; second = one read only
        assert_eq!(after_first, 3);
        assert_eq!(after_second, 4);
    }

    #[tokio::test]
    async fn integer_rejection_rounds_and_retries_once() {
        let client = InMemoryRowClient::new();
        client.with_strict_integer(tables::TRANSPORT_ROWS, "distance_km");
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;

        let row = store
            .create(builders::transport("Depot", "Villa", 12.5))
            .await
            .unwrap();
        assert_eq!(row.distance_km, 13.0);

        // the field is remembered: later writes round up front, no rejection
        let inserts_before = client
            .ops()
            .iter()
            .filter(|op| op.starts_with("insert:transport_rows"))
            .count();
        store
            .create(builders::transport("Depot", "Lake", 7.4))
            .await
            .unwrap();
        let inserts_after = client
            .ops()
            .iter()
            .filter(|op| op.starts_with("insert:transport_rows"))
            .count();
        assert_eq!(inserts_after - inserts_before, 1);
    }

    #[tokio::test]
    async fn second_integer_failure_is_a_hard_error() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        // resolve the columns first so the fault hits the write itself
        store
            .create(builders::transport("Depot", "Villa", 30.0))
            .await
            .unwrap();

        // a rejection with nothing fractional to round cannot be retried
        client.fail_next(RemoteError::new(
            "invalid input syntax for type integer: \"x\"",
        ));
        let created = store
            .create(builders::transport("Depot", "Lake", 20.0))
            .await;
        assert!(created.is_none());
        assert!(store.last_error().await.is_some());
        assert_eq!(store.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn delete_rollback_restores_rows() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        store
            .create(builders::transport("Depot", "Villa", 30.0))
            .await
            .unwrap();
        let before = store.rows().await;

        client.fail_next(RemoteError::new("connection reset"));
        assert!(!store.delete(&before[0].id).await);
        assert_eq!(store.rows().await, before);
    }
}
