//! Change-notification bus.
//!
//! Three cooperating channels keep dependent views consistent without
//! polling:
//!
//! 1. a per-topic broadcast registry for same-process listeners that want the
//!    lowest latency;
//! 2. a process-wide "all notices" channel for listeners that prefer one
//!    declarative subscription over per-topic registration;
//! 3. a cross-process link: every emit stamps the persistent bump key, and a
//!    watcher task re-emits a [`topic::REMOTE_BUMP`] notice when another
//!    process stamps it.
//!
//! All three are best-effort: [`ChangeBus::emit`] never fails, and a failure
//! inside notification never breaks the operation that triggered it.
//!
//! The bus is a constructed singleton: the application root builds one
//! `Arc<ChangeBus>` and hands it to stores at construction.

use crate::environment::Clock;
use crate::kv::{KeyValueStore, keys};
use crate::model::EventId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Well-known topics.
pub mod topic {
    /// Menu bundles or their rows changed.
    pub const BUNDLES: &str = "bundles-changed";
    /// Equipment rows changed.
    pub const EQUIPMENT: &str = "equipment-changed";
    /// Staff rows changed.
    pub const STAFF: &str = "staff-changed";
    /// Transport rows changed.
    pub const TRANSPORT: &str = "transport-changed";
    /// Asset rows changed.
    pub const ASSETS: &str = "assets-changed";
    /// Extra-fee rows changed.
    pub const EXTRA_FEES: &str = "extra-fees-changed";
    /// Discount rows changed.
    pub const DISCOUNTS: &str = "discounts-changed";
    /// The event header changed.
    pub const HEADER: &str = "header-changed";
    /// Settings or global defaults changed.
    pub const SETTINGS: &str = "settings-changed";
    /// The event list itself changed.
    pub const EVENTS: &str = "events-changed";
    /// The window regained focus; stores re-sync on this.
    pub const APP_FOCUS: &str = "app-focus";
    /// The page became visible again; stores re-sync on this.
    pub const APP_VISIBLE: &str = "app-visible";
    /// Another process stamped the bump key; treat as "re-pull everything".
    pub const REMOTE_BUMP: &str = "remote-bump";
}

/// A change notice delivered to subscribers.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    /// The topic this notice was emitted on.
    pub topic: String,
    /// The affected event, when the change is event-scoped.
    pub event_id: Option<EventId>,
    /// Emission time.
    pub at: DateTime<Utc>,
}

const CHANNEL_CAPACITY: usize = 64;

/// The in-process notification bus plus its cross-process link.
pub struct ChangeBus {
    topics: RwLock<HashMap<String, broadcast::Sender<ChangeNotice>>>,
    firehose: broadcast::Sender<ChangeNotice>,
    kv: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
}

impl ChangeBus {
    /// A bus without a cross-process link (in-process channels only).
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (firehose, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            topics: RwLock::new(HashMap::new()),
            firehose,
            kv: None,
            clock,
        }
    }

    /// A bus that stamps the persistent bump key on every emit, linking
    /// processes that share the key-value store.
    #[must_use]
    pub fn with_kv(clock: Arc<dyn Clock>, kv: Arc<dyn KeyValueStore>) -> Self {
        let (firehose, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            topics: RwLock::new(HashMap::new()),
            firehose,
            kv: Some(kv),
            clock,
        }
    }

    /// Subscribe to one topic.
    ///
    /// # Panics
    /// Never panics in practice; the registry lock is only held for map
    /// access and is not poisoned by user code.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeNotice> {
        let mut topics = match self.topics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every notice regardless of topic.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeNotice> {
        self.firehose.subscribe()
    }

    /// Emit a notice. Infallible; delivery is best-effort on every channel.
    ///
    /// Application-signal topics ([`topic::APP_FOCUS`], [`topic::APP_VISIBLE`])
    /// and the re-emitted [`topic::REMOTE_BUMP`] do not stamp the bump key,
    /// so cross-process notification cannot feed back on itself.
    pub fn emit(&self, topic: &str, event_id: Option<&EventId>) {
        self.emit_local(topic, event_id);
        if matches!(topic, topic::APP_FOCUS | topic::APP_VISIBLE | topic::REMOTE_BUMP) {
            return;
        }
        if let Some(kv) = &self.kv {
            let stamp = self.clock.now().timestamp_millis().to_string();
            if let Err(err) = kv.set(keys::BUMP, &stamp) {
                tracing::warn!(%err, "failed to stamp cross-process bump key");
            }
        }
    }

    /// Emit on the in-process channels only.
    pub fn emit_local(&self, topic: &str, event_id: Option<&EventId>) {
        let notice = ChangeNotice {
            topic: topic.to_string(),
            event_id: event_id.cloned(),
            at: self.clock.now(),
        };
        {
            let topics = match self.topics.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(sender) = topics.get(topic) {
                // send only fails when there are no receivers; that's fine
                let _ = sender.send(notice.clone());
            }
        }
        let _ = self.firehose.send(notice);
    }

    /// Spawn the cross-process watcher: any external write to the bump key is
    /// re-emitted locally as [`topic::REMOTE_BUMP`].
    ///
    /// Returns `None` when the bus has no key-value link.
    pub fn spawn_cross_link(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let kv = self.kv.clone()?;
        let bus = Arc::clone(self);
        let mut watch = kv.watch();
        Some(tokio::spawn(async move {
            loop {
                match watch.recv().await {
                    Ok(change) if change.key == keys::BUMP => {
                        bus.emit_local(topic::REMOTE_BUMP, None);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "cross-process watcher lagged; coalescing");
                        bus.emit_local(topic::REMOTE_BUMP, None);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SystemClock;
    use crate::kv::KvChange;

    fn bus() -> ChangeBus {
        ChangeBus::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn topic_subscription_receives_notice() {
        let bus = bus();
        let mut rx = bus.subscribe(topic::EQUIPMENT);
        bus.emit(topic::EQUIPMENT, Some(&EventId::new("ev1")));
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.topic, topic::EQUIPMENT);
        assert_eq!(notice.event_id, Some(EventId::new("ev1")));
    }

    #[tokio::test]
    async fn firehose_sees_every_topic() {
        let bus = bus();
        let mut all = bus.subscribe_all();
        bus.emit(topic::STAFF, None);
        bus.emit(topic::DISCOUNTS, None);
        assert_eq!(all.recv().await.unwrap().topic, topic::STAFF);
        assert_eq!(all.recv().await.unwrap().topic, topic::DISCOUNTS);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let bus = bus();
        // no receivers anywhere; must not fail
        bus.emit(topic::BUNDLES, None);
    }

    struct NullKv;

    impl KeyValueStore for NullKv {
        fn get(&self, _key: &str) -> Result<Option<String>, crate::kv::KvError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), crate::kv::KvError> {
            Err(crate::kv::KvError("backend unavailable".to_string()))
        }
        fn remove(&self, _key: &str) -> Result<(), crate::kv::KvError> {
            Ok(())
        }
        fn watch(&self) -> broadcast::Receiver<crate::kv::KvChange> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn kv_failure_never_breaks_the_emit() {
        let bus = ChangeBus::with_kv(Arc::new(SystemClock), Arc::new(NullKv));
        let mut rx = bus.subscribe(topic::STAFF);
        bus.emit(topic::STAFF, None);
        // the local channels still delivered despite the failing backend
        assert_eq!(rx.recv().await.unwrap().topic, topic::STAFF);
    }

    #[tokio::test]
    async fn app_signals_do_not_stamp_the_bump_key() {
        struct CountingKv(std::sync::Mutex<u32>, broadcast::Sender<crate::kv::KvChange>);
        impl KeyValueStore for CountingKv {
            fn get(&self, _key: &str) -> Result<Option<String>, crate::kv::KvError> {
                Ok(None)
            }
            fn set(&self, _key: &str, _value: &str) -> Result<(), crate::kv::KvError> {
                if let Ok(mut count) = self.0.lock() {
                    *count += 1;
                }
                Ok(())
            }
            fn remove(&self, _key: &str) -> Result<(), crate::kv::KvError> {
                Ok(())
            }
            fn watch(&self) -> broadcast::Receiver<crate::kv::KvChange> {
                self.1.subscribe()
            }
        }

        let kv = Arc::new(CountingKv(
            std::sync::Mutex::new(0),
            broadcast::channel(4).0,
        ));
        let bus = ChangeBus::with_kv(Arc::new(SystemClock), kv.clone());

        bus.emit(topic::APP_FOCUS, None);
        bus.emit(topic::APP_VISIBLE, None);
        bus.emit(topic::REMOTE_BUMP, None);
        assert_eq!(*kv.0.lock().unwrap(), 0);

        bus.emit(topic::EQUIPMENT, None);
        assert_eq!(*kv.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn external_bump_reemits_locally() {
        struct ChannelKv(broadcast::Sender<crate::kv::KvChange>);
        impl KeyValueStore for ChannelKv {
            fn get(&self, _key: &str) -> Result<Option<String>, crate::kv::KvError> {
                Ok(None)
            }
            fn set(&self, _key: &str, _value: &str) -> Result<(), crate::kv::KvError> {
                Ok(())
            }
            fn remove(&self, _key: &str) -> Result<(), crate::kv::KvError> {
                Ok(())
            }
            fn watch(&self) -> broadcast::Receiver<crate::kv::KvChange> {
                self.0.subscribe()
            }
        }

        let (tx, _keep_alive) = broadcast::channel(4);
        let bus = Arc::new(ChangeBus::with_kv(
            Arc::new(SystemClock),
            Arc::new(ChannelKv(tx.clone())),
        ));
        let link = bus.spawn_cross_link().unwrap();
        let mut rx = bus.subscribe(topic::REMOTE_BUMP);
        tokio::task::yield_now().await;

        // another process stamps the bump key
        tx.send(KvChange {
            key: keys::BUMP.to_string(),
            value: Some("1700000000".to_string()),
        })
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().topic, topic::REMOTE_BUMP);
        link.abort();
    }
}
