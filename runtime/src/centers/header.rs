//! Event header store.
//!
//! Zero-or-one record per event holding contact, billing, and payment-plan
//! fields; persisted with an upsert keyed by the event id.

use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RowStoreClient};
use banchetto_core::model::{EventHeader, EventId, tables};
use banchetto_core::normalize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct HeaderState {
    event_id: Option<EventId>,
    header: Option<EventHeader>,
    last_error: Option<String>,
}

/// Store for the per-event header record.
pub struct HeaderStore {
    client: Arc<dyn RowStoreClient>,
    bus: Arc<ChangeBus>,
    state: RwLock<HeaderState>,
}

impl HeaderStore {
    /// Create a store with its injected dependencies.
    #[must_use]
    pub fn new(client: Arc<dyn RowStoreClient>, bus: Arc<ChangeBus>) -> Self {
        Self {
            client,
            bus,
            state: RwLock::new(HeaderState::default()),
        }
    }

    /// Select the event this store tracks; `None` clears the cached header.
    pub async fn set_event(&self, event_id: Option<EventId>) {
        let mut state = self.state.write().await;
        state.event_id = event_id;
        state.header = None;
        state.last_error = None;
    }

    /// The cached header, if one has been loaded or saved.
    pub async fn header(&self) -> Option<EventHeader> {
        self.state.read().await.header.clone()
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// Load the header record; `None` when the event has no header yet.
    pub async fn load(&self) -> Option<EventHeader> {
        let event_id = self.state.read().await.event_id.clone()?;
        let filter = Filter::new().eq("event_id", event_id.as_str()).limit(1);
        match self.client.select(tables::EVENT_HEADERS, &filter).await {
            Ok(rows) => {
                let header = rows.first().map(EventHeader::from_remote);
                let mut state = self.state.write().await;
                state.header = header.clone();
                state.last_error = None;
                header
            }
            Err(err) => {
                tracing::warn!(%err, "header load failed");
                self.state.write().await.last_error = Some(err.message);
                None
            }
        }
    }

    /// Upsert the header record. The deposit percent is normalized through
    /// the percent heuristic before the write.
    pub async fn save(&self, mut header: EventHeader) -> bool {
        let event_id = {
            let mut state = self.state.write().await;
            match state.event_id.clone() {
                Some(event_id) => event_id,
                None => {
                    state.last_error = Some("no event selected".to_string());
                    return false;
                }
            }
        };
        header.event_id = event_id.clone();
        header.deposit_percent = header
            .deposit_percent
            .map(|p| json!(p))
            .as_ref()
            .and_then(normalize::percent_value);

        match self
            .client
            .upsert(tables::EVENT_HEADERS, "event_id", header.to_patch())
            .await
        {
            Ok(echo) => {
                let stored = EventHeader::from_remote(&echo);
                {
                    let mut state = self.state.write().await;
                    state.header = Some(stored);
                    state.last_error = None;
                }
                self.bus.emit(topic::HEADER, Some(&event_id));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "header save failed");
                self.state.write().await.last_error = Some(err.message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::SystemClock;
    use banchetto_testing::InMemoryRowClient;

    fn store(client: &InMemoryRowClient) -> HeaderStore {
        let clock = Arc::new(SystemClock);
        HeaderStore::new(Arc::new(client.clone()), Arc::new(ChangeBus::new(clock)))
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;

        let header = EventHeader {
            contact_name: "Ada".into(),
            contact_email: Some("ada@example.com".into()),
            deposit_percent: Some(0.3),
            ..EventHeader::default()
        };
        assert!(store.save(header).await);

        store.set_event(Some(EventId::new("ev1"))).await;
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.contact_name, "Ada");
        assert_eq!(loaded.deposit_percent, Some(0.3));
    }

    #[tokio::test]
    async fn save_without_event_is_rejected_locally() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        assert!(!store.save(EventHeader::default()).await);
        assert!(client.ops().is_empty());
    }

    #[tokio::test]
    async fn load_missing_header_is_none() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        assert!(store.load().await.is_none());
        assert!(store.last_error().await.is_none());
    }
}
