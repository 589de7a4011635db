//! Menu bundle store.
//!
//! A bundle owns an ordered list of bundle rows (dish + quantity + up to five
//! modifier references). Composition is validated against the bundle's
//! [`BundleTypeConfig`]: dishes against the allowed dish-category set,
//! modifiers against their slot's category set and the effective slot limit.
//!
//! The remote store is not assumed to cascade, so deleting a bundle issues
//! the dependent row deletes explicitly before removing the bundle itself.

use crate::store::sort_rows_by;
use banchetto_core::bundle_config::BundleTypeConfig;
use banchetto_core::bus::{ChangeBus, topic};
use banchetto_core::client::{Filter, RowStoreClient};
use banchetto_core::environment::Clock;
use banchetto_core::model::{
    self, Bundle, BundleRow, DishRef, EventId, ModifierRef, RemoteRow, RowId, tables,
};
use banchetto_core::guard;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct BundleState {
    event_id: Option<EventId>,
    bundles: Vec<Bundle>,
    rows: Vec<BundleRow>,
    last_error: Option<String>,
}

/// Store for menu bundles and their rows.
pub struct BundleStore {
    client: Arc<dyn RowStoreClient>,
    bus: Arc<ChangeBus>,
    clock: Arc<dyn Clock>,
    state: RwLock<BundleState>,
    temp_seq: AtomicU64,
}

impl BundleStore {
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
            state: RwLock::new(BundleState::default()),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Select the event this store tracks; `None` clears everything.
    pub async fn set_event(&self, event_id: Option<EventId>) {
        let mut state = self.state.write().await;
        state.event_id = event_id;
        state.bundles.clear();
        state.rows.clear();
        state.last_error = None;
    }

    /// Snapshot of the bundles, in creation order.
    pub async fn bundles(&self) -> Vec<Bundle> {
        self.state.read().await.bundles.clone()
    }

    /// Snapshot of one bundle's rows, in creation order.
    pub async fn rows_for(&self, bundle_id: &RowId) -> Vec<BundleRow> {
        self.state
            .read()
            .await
            .rows
            .iter()
            .filter(|row| &row.bundle_id == bundle_id)
            .cloned()
            .collect()
    }

    /// Snapshot of every bundle row for the event, in creation order.
    pub async fn rows(&self) -> Vec<BundleRow> {
        self.state.read().await.rows.clone()
    }

    /// The last recorded error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// Re-pull bundles and their rows from the remote store.
    pub async fn refresh(&self) {
        let Some(event_id) = self.state.read().await.event_id.clone() else {
            return;
        };
        let filter = Filter::new()
            .eq("event_id", event_id.as_str())
            .order("created_at")
            .order("id");
        let bundles = match self.client.select(tables::BUNDLES, &filter).await {
            Ok(rows) => rows.iter().map(Bundle::from_remote).collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(%err, "bundle refresh failed; keeping last-known rows");
                self.state.write().await.last_error = Some(err.message);
                return;
            }
        };
        let rows = match self.client.select(tables::BUNDLE_ROWS, &filter).await {
            Ok(rows) => rows.iter().map(BundleRow::from_remote).collect::<Vec<_>>(),
            Err(err) => {
                tracing::warn!(%err, "bundle row refresh failed; keeping last-known rows");
                self.state.write().await.last_error = Some(err.message);
                return;
            }
        };

        let mut state = self.state.write().await;
        if state.event_id.as_ref() != Some(&event_id) {
            return;
        }
        state.bundles = bundles;
        state.rows = rows;
        sort_rows_by(&mut state.bundles, |b| model::sort_key(b.created_at, &b.id));
        sort_rows_by(&mut state.rows, |r| model::sort_key(r.created_at, &r.id));
        state.last_error = None;
    }

    /// Create a bundle of the configured type. The markup multiplier comes
    /// from the configuration's fallback chain.
    pub async fn create_bundle(&self, cfg: &BundleTypeConfig, label: &str) -> Option<Bundle> {
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
        let mut patch = RemoteRow::new();
        patch.insert("event_id".into(), json!(event_id.as_str()));
        patch.insert("type_key".into(), json!(cfg.type_key));
        patch.insert("label".into(), json!(label));
        patch.insert("markup_x".into(), json!(cfg.markup_multiplier()));

        match self.client.insert(tables::BUNDLES, patch).await {
            Ok(echo) => {
                let bundle = Bundle::from_remote(&echo);
                {
                    let mut state = self.state.write().await;
                    state.bundles.push(bundle.clone());
                    sort_rows_by(&mut state.bundles, |b| model::sort_key(b.created_at, &b.id));
                    state.last_error = None;
                }
                self.bus.emit(topic::BUNDLES, Some(&event_id));
                Some(bundle)
            }
            Err(err) => {
                tracing::warn!(%err, "bundle create failed");
                self.state.write().await.last_error = Some(err.message);
                None
            }
        }
    }

    /// Delete a bundle and its rows, rows first since the remote store is not
    /// trusted to cascade. On failure the prior state is restored.
    pub async fn delete_bundle(&self, bundle_id: &RowId) -> bool {
        let (event_id, bundles_snapshot, rows_snapshot, row_ids) = {
            let mut state = self.state.write().await;
            let bundles_snapshot = state.bundles.clone();
            let rows_snapshot = state.rows.clone();
            let row_ids: Vec<RowId> = state
                .rows
                .iter()
                .filter(|r| &r.bundle_id == bundle_id)
                .map(|r| r.id.clone())
                .collect();
            state.rows.retain(|r| &r.bundle_id != bundle_id);
            state.bundles.retain(|b| &b.id != bundle_id);
            (
                state.event_id.clone(),
                bundles_snapshot,
                rows_snapshot,
                row_ids,
            )
        };

        let result = self.delete_bundle_remote(bundle_id, &row_ids).await;
        match result {
            Ok(()) => {
                self.state.write().await.last_error = None;
                self.bus.emit(topic::BUNDLES, event_id.as_ref());
                true
            }
            Err(message) => {
                tracing::warn!(%message, "bundle delete failed; restoring prior state");
                let mut state = self.state.write().await;
                state.bundles = bundles_snapshot;
                state.rows = rows_snapshot;
                state.last_error = Some(message);
                false
            }
        }
    }

    async fn delete_bundle_remote(
        &self,
        bundle_id: &RowId,
        row_ids: &[RowId],
    ) -> Result<(), String> {
        for row_id in row_ids {
            self.client
                .delete(tables::BUNDLE_ROWS, row_id.as_str())
                .await
                .map_err(|err| err.message)?;
        }
        self.client
            .delete(tables::BUNDLES, bundle_id.as_str())
            .await
            .map_err(|err| err.message)
    }

    /// Insert a dish into a bundle. The dish category must pass the bundle's
    /// allowed dish-category set.
    pub async fn add_row(
        &self,
        cfg: &BundleTypeConfig,
        bundle_id: &RowId,
        dish: &DishRef,
        quantity: f64,
    ) -> Option<BundleRow> {
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
        if !cfg.dish_allowed(&dish.category) {
            self.state.write().await.last_error = Some(format!(
                "dish category {:?} not allowed for bundle type {:?}",
                dish.category, cfg.type_key
            ));
            return None;
        }

        let mut patch = RemoteRow::new();
        patch.insert("event_id".into(), json!(event_id.as_str()));
        patch.insert("bundle_id".into(), json!(bundle_id.as_str()));
        patch.insert("dish_id".into(), json!(dish.id.as_str()));
        patch.insert("dish_name".into(), json!(dish.name));
        patch.insert("dish_category".into(), json!(dish.category));
        patch.insert("dish_unit_cost".into(), json!(guard::non_neg(dish.unit_cost)));
        patch.insert("quantity".into(), json!(guard::non_neg(quantity)));
        patch.insert("modifiers".into(), json!([]));

        // tentative apply, then swap with the echo
        let temp_id = format!("pending-{}", self.temp_seq.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut tentative = patch.clone();
            tentative.insert("id".into(), json!(temp_id));
            tentative.insert("created_at".into(), json!(self.clock.now().to_rfc3339()));
            let mut state = self.state.write().await;
            state.rows.push(BundleRow::from_remote(&tentative));
            sort_rows_by(&mut state.rows, |r| model::sort_key(r.created_at, &r.id));
        }

        match self.client.insert(tables::BUNDLE_ROWS, patch).await {
            Ok(echo) => {
                let row = BundleRow::from_remote(&echo);
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
                self.bus.emit(topic::BUNDLES, Some(&event_id));
                Some(row)
            }
            Err(err) => {
                tracing::warn!(%err, "bundle row create failed; rolling back tentative row");
                let mut state = self.state.write().await;
                state.rows.retain(|r| r.id.as_str() != temp_id);
                state.last_error = Some(err.message);
                None
            }
        }
    }

    /// Update a bundle row's quantity.
    pub async fn set_row_quantity(&self, row_id: &RowId, quantity: f64) -> bool {
        let mut patch = RemoteRow::new();
        patch.insert("quantity".into(), json!(guard::non_neg(quantity)));
        self.patch_row(row_id, patch).await
    }

    /// Place a modifier into slot `slot` of a bundle row.
    ///
    /// The slot must be within the configuration's effective limit and the
    /// modifier's category must pass that slot's category set.
    pub async fn set_modifier(
        &self,
        cfg: &BundleTypeConfig,
        row_id: &RowId,
        slot: usize,
        modifier: &ModifierRef,
    ) -> bool {
        if slot >= cfg.effective_limit() {
            self.state.write().await.last_error = Some(format!(
                "modifier slot {slot} exceeds the limit for bundle type {:?}",
                cfg.type_key
            ));
            return false;
        }
        if !cfg.slot_allowed(slot, &modifier.category) {
            self.state.write().await.last_error = Some(format!(
                "modifier category {:?} not allowed in slot {slot}",
                modifier.category
            ));
            return false;
        }

        let Some(mut modifiers) = self.modifiers_of(row_id).await else {
            self.state.write().await.last_error = Some(format!("no bundle row {row_id}"));
            return false;
        };
        while modifiers.len() <= slot {
            modifiers.push(Value::Null);
        }
        modifiers[slot] = json!({
            "id": modifier.id.as_str(),
            "name": modifier.name,
            "category": modifier.category,
        });

        let mut patch = RemoteRow::new();
        patch.insert("modifiers".into(), Value::Array(modifiers));
        self.patch_row(row_id, patch).await
    }

    /// Clear slot `slot` of a bundle row.
    pub async fn clear_modifier(&self, row_id: &RowId, slot: usize) -> bool {
        let Some(mut modifiers) = self.modifiers_of(row_id).await else {
            self.state.write().await.last_error = Some(format!("no bundle row {row_id}"));
            return false;
        };
        if slot < modifiers.len() {
            modifiers[slot] = Value::Null;
        }
        let mut patch = RemoteRow::new();
        patch.insert("modifiers".into(), Value::Array(modifiers));
        self.patch_row(row_id, patch).await
    }

    /// Delete a bundle row optimistically, restoring the prior list on
    /// failure.
    pub async fn delete_row(&self, row_id: &RowId) -> bool {
        let (event_id, snapshot) = {
            let mut state = self.state.write().await;
            let snapshot = state.rows.clone();
            state.rows.retain(|r| &r.id != row_id);
            (state.event_id.clone(), snapshot)
        };
        match self.client.delete(tables::BUNDLE_ROWS, row_id.as_str()).await {
            Ok(()) => {
                self.state.write().await.last_error = None;
                self.bus.emit(topic::BUNDLES, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(%err, "bundle row delete failed; restoring prior rows");
                let mut state = self.state.write().await;
                state.rows = snapshot;
                state.last_error = Some(err.message);
                false
            }
        }
    }

    async fn modifiers_of(&self, row_id: &RowId) -> Option<Vec<Value>> {
        let state = self.state.read().await;
        let row = state.rows.iter().find(|r| &r.id == row_id)?;
        let mut values: Vec<Value> = row
            .modifiers
            .iter()
            .map(|slot| match slot {
                Some(m) => json!({
                    "id": m.id.as_str(),
                    "name": m.name,
                    "category": m.category,
                }),
                None => Value::Null,
            })
            .collect();
        values.truncate(model::MAX_MODIFIER_SLOTS);
        Some(values)
    }

    async fn patch_row(&self, row_id: &RowId, patch: RemoteRow) -> bool {
        match self
            .client
            .update(tables::BUNDLE_ROWS, row_id.as_str(), patch)
            .await
        {
            Ok(echo) => {
                let row = BundleRow::from_remote(&echo);
                let event_id = {
                    let mut state = self.state.write().await;
                    if let Some(slot) = state.rows.iter_mut().find(|r| &r.id == row_id) {
                        *slot = row;
                    }
                    state.last_error = None;
                    state.event_id.clone()
                };
                self.bus.emit(topic::BUNDLES, event_id.as_ref());
                true
            }
            Err(err) => {
                tracing::warn!(%err, "bundle row update failed");
                self.state.write().await.last_error = Some(err.message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::bundle_config::SlotConfig;
    use banchetto_core::SystemClock;
    use banchetto_testing::InMemoryRowClient;

    fn cfg() -> BundleTypeConfig {
        BundleTypeConfig {
            type_key: "buffet".into(),
            label: "Buffet".into(),
            max_modifiers: 2,
            dish_categories: vec!["Mains".into()],
            slots: vec![
                SlotConfig {
                    label: "Sauce".into(),
                    categories: vec!["Sauces".into()],
                    required: false,
                },
                SlotConfig {
                    label: "Side".into(),
                    categories: vec!["any".into()],
                    required: false,
                },
            ],
            markup_x: Some(1.4),
            markup: None,
        }
    }

    fn dish(category: &str) -> DishRef {
        DishRef {
            id: RowId::new("d1"),
            name: "Lasagne".into(),
            category: category.into(),
            unit_cost: 8.0,
        }
    }

    fn store(client: &InMemoryRowClient) -> BundleStore {
        let clock = Arc::new(SystemClock);
        BundleStore::new(
            Arc::new(client.clone()),
            Arc::new(ChangeBus::new(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn create_bundle_applies_config_markup() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        let bundle = store.create_bundle(&cfg(), "Lunch buffet").await.unwrap();
        assert_eq!(bundle.markup_x, 1.4);
        assert_eq!(bundle.type_key, "buffet");
    }

    #[tokio::test]
    async fn dish_outside_category_set_is_rejected() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        let bundle = store.create_bundle(&cfg(), "Lunch").await.unwrap();

        let added = store
            .add_row(&cfg(), &bundle.id, &dish("Desserts"), 10.0)
            .await;
        assert!(added.is_none());
        assert!(store.last_error().await.unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn modifier_slot_rules_apply() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        let bundle = store.create_bundle(&cfg(), "Lunch").await.unwrap();
        let row = store
            .add_row(&cfg(), &bundle.id, &dish("Mains"), 10.0)
            .await
            .unwrap();

        let sauce = ModifierRef {
            id: RowId::new("m1"),
            name: "Pesto".into(),
            category: "Sauces".into(),
        };
        assert!(store.set_modifier(&cfg(), &row.id, 0, &sauce).await);

        // wrong category for slot 0
        let side = ModifierRef {
            id: RowId::new("m2"),
            name: "Fries".into(),
            category: "Sides".into(),
        };
        assert!(!store.set_modifier(&cfg(), &row.id, 0, &side).await);
        // slot past the effective limit
        assert!(!store.set_modifier(&cfg(), &row.id, 4, &sauce).await);

        let rows = store.rows_for(&bundle.id).await;
        assert_eq!(rows[0].set_modifiers().count(), 1);
        assert_eq!(rows[0].modifiers[0].as_ref().unwrap().name, "Pesto");
    }

    #[tokio::test]
    async fn delete_bundle_deletes_rows_first() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        let bundle = store.create_bundle(&cfg(), "Lunch").await.unwrap();
        store
            .add_row(&cfg(), &bundle.id, &dish("Mains"), 10.0)
            .await
            .unwrap();

        assert!(store.delete_bundle(&bundle.id).await);
        assert!(store.bundles().await.is_empty());
        assert!(store.rows().await.is_empty());
        assert!(client.table(tables::BUNDLE_ROWS).is_empty());
        assert!(client.table(tables::BUNDLES).is_empty());

        let ops = client.ops();
        let row_delete = ops.iter().position(|op| op.starts_with("delete:bundle_rows"));
        let bundle_delete = ops.iter().position(|op| op.starts_with("delete:bundles"));
        assert!(row_delete.unwrap() < bundle_delete.unwrap());
    }

    #[tokio::test]
    async fn failed_bundle_delete_restores_everything() {
        let client = InMemoryRowClient::new();
        let store = store(&client);
        store.set_event(Some(EventId::new("ev1"))).await;
        let bundle = store.create_bundle(&cfg(), "Lunch").await.unwrap();
        store
            .add_row(&cfg(), &bundle.id, &dish("Mains"), 10.0)
            .await
            .unwrap();
        let bundles_before = store.bundles().await;
        let rows_before = store.rows().await;

        client.fail_next(banchetto_core::RemoteError::new("connection reset"));
        assert!(!store.delete_bundle(&bundle.id).await);
        assert_eq!(store.bundles().await, bundles_before);
        assert_eq!(store.rows().await, rows_before);
    }
}
