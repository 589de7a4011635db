//! Event list view.
//!
//! A read-only consumer of the events table plus the per-event total
//! snapshot procedure. It never writes; it refetches when the bus says
//! something changed, coalescing bursts through a debouncer so ten quick
//! saves produce one refetch.

use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RowStoreClient};
use banchetto_core::guard;
use banchetto_core::model::{EventId, tables};
use banchetto_runtime::debounce::{self, Debounced, Debouncer};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// One row of the event list.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSummary {
    /// Event identity.
    pub event_id: EventId,
    /// Display name.
    pub name: String,
    /// Event date, when recorded.
    pub date: Option<DateTime<Utc>>,
    /// Current total from the recorded snapshot.
    pub total: f64,
}

/// Remote procedure deriving one event's current total from its recorded
/// snapshot value.
pub const TOTAL_SNAPSHOT_FN: &str = "event_total_snapshot";

#[derive(Default)]
struct ListState {
    events: Vec<EventSummary>,
    last_error: Option<String>,
}

/// The event list, kept consistent by bus-driven refetches.
pub struct EventListView {
    client: Arc<dyn RowStoreClient>,
    bus: Arc<ChangeBus>,
    state: RwLock<ListState>,
}

impl EventListView {
    /// Create a view with its injected dependencies.
    #[must_use]
    pub fn new(client: Arc<dyn RowStoreClient>, bus: Arc<ChangeBus>) -> Self {
        Self {
            client,
            bus,
            state: RwLock::new(ListState::default()),
        }
    }

    /// Snapshot of the list.
    pub async fn events(&self) -> Vec<EventSummary> {
        self.state.read().await.events.clone()
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// Refetch the list and each event's snapshot total.
    ///
    /// A failing snapshot call degrades that row's total to zero rather than
    /// failing the whole list.
    pub async fn refresh(&self) {
        let filter = Filter::new().order("created_at").order("id");
        let rows = match self.client.select(tables::EVENTS, &filter).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(%err, "event list refresh failed; keeping last-known list");
                self.state.write().await.last_error = Some(err.message);
                return;
            }
        };

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(id) = row.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let event_id = EventId::new(id);
            let mut args = banchetto_core::model::RemoteRow::new();
            args.insert("event_id".into(), json!(id));
            let total = match self.client.rpc(TOTAL_SNAPSHOT_FN, args).await {
                Ok(value) => guard::num_from(&value).unwrap_or(0.0),
                Err(err) => {
                    tracing::warn!(%err, event = id, "total snapshot failed; showing zero");
                    0.0
                }
            };
            events.push(EventSummary {
                event_id,
                name: row.get("name").and_then(guard::str_from).unwrap_or_default(),
                date: row
                    .get("date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                total,
            });
        }

        let mut state = self.state.write().await;
        state.events = events;
        state.last_error = None;
    }

    /// Spawn the bus-driven refresh loop with the default quiet window.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_refresh_with_window(debounce::DEFAULT_WINDOW)
    }

    /// Spawn the bus-driven refresh loop with a custom quiet window.
    pub fn spawn_refresh_with_window(self: &Arc<Self>, window: Duration) -> JoinHandle<()> {
        let view = Arc::clone(self);
        let notices = self.bus.subscribe_all();
        let (poker, ticks) = debounce::debounce(window);
        tokio::spawn(async move {
            let forwarder = tokio::spawn(forward_notices(notices, poker));
            run_refresh_loop(view, ticks).await;
            forwarder.abort();
        })
    }
}

/// Topics that should not trigger a list refetch: re-sync signals are for
/// stores, and the list's own refresh is not a data change.
fn is_data_change(topic_name: &str) -> bool {
    !matches!(topic_name, topic::APP_FOCUS | topic::APP_VISIBLE)
}

async fn forward_notices(
    mut notices: tokio::sync::broadcast::Receiver<banchetto_core::ChangeNotice>,
    poker: Debouncer,
) {
    loop {
        match notices.recv().await {
            Ok(notice) if is_data_change(&notice.topic) => poker.poke(),
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => poker.poke(),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_refresh_loop(view: Arc<EventListView>, mut ticks: Debounced) {
    while ticks.tick().await {
        view.refresh().await;
    }
}
