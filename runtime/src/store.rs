//! Generic optimistic row store.
//!
//! One [`RowStore`] instance owns one cost-center table for one selected
//! event: it is the only writer of that table, holds the local row collection
//! behind an async lock, and reconciles optimistic local edits with the
//! authoritative remote echo.
//!
//! The mutation control flow is an explicit two-phase commit: a tentative
//! local apply tagged with a temporary id, then the remote round-trip, then
//! either a swap-by-id with the echo or a rollback to the prior snapshot.
//! Within one store, operations are not queued; a second mutation issued
//! before the first completes may race, and the remote store wins.
//!
//! Remote failures are never fatal: the row collection is left in its
//! last-known-good state and the error is recorded as a store-local string.

use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RemoteErrorKind, RowStoreClient};
use banchetto_core::environment::Clock;
use banchetto_core::model::{self, EventId, RemoteRow, RowId};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Static description of one cost center: its table, its bus topic, and how
/// its rows decode and sanitize.
pub trait CostCenter: Send + Sync + 'static {
    /// The typed row this center produces.
    type Row: Clone + Send + Sync + 'static;

    /// Remote table owned by this center.
    const TABLE: &'static str;

    /// Bus topic emitted after successful mutations.
    const TOPIC: &'static str;

    /// Tolerant decode from a remote row.
    fn decode(row: &RemoteRow) -> Self::Row;

    /// Numeric sanitization applied before every write.
    fn sanitize(patch: RemoteRow) -> RemoteRow;

    /// Row identity.
    fn id(row: &Self::Row) -> &RowId;

    /// Creation timestamp; the primary sort key.
    fn created_at(row: &Self::Row) -> Option<DateTime<Utc>>;
}

pub(crate) struct StoreState<R> {
    pub(crate) event_id: Option<EventId>,
    pub(crate) rows: Vec<R>,
    pub(crate) last_error: Option<String>,
}

impl<R> Default for StoreState<R> {
    fn default() -> Self {
        Self {
            event_id: None,
            rows: Vec::new(),
            last_error: None,
        }
    }
}

pub(crate) fn sort_rows<C: CostCenter>(rows: &mut [C::Row]) {
    rows.sort_by_key(|row| model::sort_key(C::created_at(row), C::id(row)));
}

pub(crate) fn sort_rows_by<R, K: Ord>(rows: &mut [R], key: impl Fn(&R) -> K) {
    rows.sort_by_key(|row| key(row));
}

/// Row store for one cost center.
pub struct RowStore<C: CostCenter> {
    client: Arc<dyn RowStoreClient>,
    bus: Arc<ChangeBus>,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState<C::Row>>,
    generation: AtomicU64,
    temp_seq: AtomicU64,
    _center: PhantomData<C>,
}

impl<C: CostCenter> RowStore<C> {
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
            state: RwLock::new(StoreState::default()),
            generation: AtomicU64::new(0),
            temp_seq: AtomicU64::new(0),
            _center: PhantomData,
        }
    }

    /// Select the event this store tracks. `None` clears the row collection;
    /// any in-flight refresh result for the previous event is discarded.
    pub async fn set_event(&self, event_id: Option<EventId>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        state.event_id = event_id;
        state.rows.clear();
        state.last_error = None;
    }

    /// Snapshot of the rows, ordered by creation time ascending, id ascending
    /// as tiebreak.
    pub async fn rows(&self) -> Vec<C::Row> {
        self.state.read().await.rows.clone()
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// Re-pull the row collection from the remote store.
    ///
    /// Results raced by an event switch are discarded. Remote failures keep
    /// the last-known-good rows.
    pub async fn refresh(&self) {
        let (event_id, generation) = {
            let state = self.state.read().await;
            (state.event_id.clone(), self.generation.load(Ordering::SeqCst))
        };
        let Some(event_id) = event_id else {
            return;
        };
        let filter = Filter::new()
            .eq("event_id", event_id.as_str())
            .order("created_at")
            .order("id");
        match self.client.select(C::TABLE, &filter).await {
            Ok(rows) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!(table = C::TABLE, "discarding stale refresh result");
                    return;
                }
                let mut decoded: Vec<C::Row> = rows.iter().map(C::decode).collect();
                sort_rows::<C>(&mut decoded);
                let mut state = self.state.write().await;
                state.rows = decoded;
                state.last_error = None;
            }
            Err(err) if err.kind == RemoteErrorKind::Aborted => {}
            Err(err) => {
                tracing::warn!(table = C::TABLE, %err, "refresh failed; keeping last-known rows");
                self.state.write().await.last_error = Some(err.message);
            }
        }
    }

    /// Create a row: tentative local apply, remote insert, swap with the
    /// authoritative echo. Returns `None` on failure with the error recorded.
    pub async fn create(&self, patch: RemoteRow) -> Option<C::Row> {
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

        let mut patch = C::sanitize(patch);
        patch.insert("event_id".into(), json!(event_id.as_str()));

        // phase one: tentative apply under a temporary id
        let temp_id = format!("pending-{}", self.temp_seq.fetch_add(1, Ordering::SeqCst) + 1);
        let tentative = {
            let mut tentative = patch.clone();
            tentative.insert("id".into(), json!(temp_id));
            tentative.insert("created_at".into(), json!(self.clock.now().to_rfc3339()));
            C::decode(&tentative)
        };
        {
            let mut state = self.state.write().await;
            state.rows.push(tentative);
            sort_rows::<C>(&mut state.rows);
        }

        // phase two: remote write, then swap or roll back
        match self.client.insert(C::TABLE, patch).await {
            Ok(echo) => {
                let row = C::decode(&echo);
                {
                    let mut state = self.state.write().await;
                    if let Some(slot) = state
                        .rows
                        .iter_mut()
                        .find(|r| C::id(r).as_str() == temp_id)
                    {
                        *slot = row.clone();
                    } else {
                        state.rows.push(row.clone());
                    }
                    sort_rows::<C>(&mut state.rows);
                    state.last_error = None;
                }
                self.bus.emit(C::TOPIC, Some(&event_id));
                Some(row)
            }
            Err(err) => {
                tracing::warn!(table = C::TABLE, %err, "create failed; rolling back tentative row");
                let mut state = self.state.write().await;
                state.rows.retain(|r| C::id(r).as_str() != temp_id);
                state.last_error = Some(err.message);
                None
            }
        }
    }

    /// Patch a row. The local row is replaced by the authoritative echo on
    /// success; on failure the collection is untouched.
    pub async fn update(&self, id: &RowId, patch: RemoteRow) -> bool {
        let patch = C::sanitize(patch);
        match self.client.update(C::TABLE, id.as_str(), patch).await {
            Ok(echo) => {
                let row = C::decode(&echo);
                let event_id = {
                    let mut state = self.state.write().await;
                    if let Some(slot) = state.rows.iter_mut().find(|r| C::id(r) == id) {
                        *slot = row;
                    }
                    sort_rows::<C>(&mut state.rows);
                    state.last_error = None;
                    state.event_id.clone()
                };
                self.bus.emit(C::TOPIC, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(table = C::TABLE, %err, "update failed");
                self.state.write().await.last_error = Some(err.message);
                false
            }
        }
    }

    /// Delete a row optimistically. On remote failure the exact prior row
    /// list is restored, order and values included.
    pub async fn delete(&self, id: &RowId) -> bool {
        let snapshot = {
            let mut state = self.state.write().await;
            let snapshot = state.rows.clone();
            state.rows.retain(|r| C::id(r) != id);
            snapshot
        };
        match self.client.delete(C::TABLE, id.as_str()).await {
            Ok(()) => {
                let event_id = {
                    let mut state = self.state.write().await;
                    state.last_error = None;
                    state.event_id.clone()
                };
                self.bus.emit(C::TOPIC, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(table = C::TABLE, %err, "delete failed; restoring prior rows");
                let mut state = self.state.write().await;
                state.rows = snapshot;
                state.last_error = Some(err.message);
                false
            }
        }
    }

    /// Spawn the re-sync task: the store refreshes on window focus and on
    /// page visibility, never on a fixed timer.
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
