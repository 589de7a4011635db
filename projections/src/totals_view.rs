//! Per-event totals view.
//!
//! Composes the cost-center stores and settings resolvers of one event into
//! a live [`Totals`] value. The view holds no table of its own: it reads the
//! stores' snapshots and recomputes through the pure fold, debounced behind
//! the bus like the event list.

use crate::totals::{EventRows, PricingInputs, Totals, event_totals};
use banchetto_core::bus::{ChangeBus, topic};
use banchetto_runtime::centers::{
    AssetStore, BundleStore, DiscountStore, EquipmentStore, ExtraFeeStore, StaffCenter,
};
use banchetto_runtime::debounce::{self, Debounced, Debouncer};
use banchetto_runtime::settings::{StaffSettingsResolver, TransportSettingsResolver};
use banchetto_runtime::transport::TransportStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// The cost-center stores of one event, bundled for composition.
pub struct EventStores {
    /// Menu bundles.
    pub bundles: Arc<BundleStore>,
    /// Rental equipment.
    pub equipment: Arc<EquipmentStore>,
    /// Staff labor.
    pub staff: Arc<StaffCenter>,
    /// Transport.
    pub transport: Arc<TransportStore>,
    /// Company-owned assets.
    pub assets: Arc<AssetStore>,
    /// Extra fees.
    pub extra_fees: Arc<ExtraFeeStore>,
    /// Discounts.
    pub discounts: Arc<DiscountStore>,
}

/// Live totals for one event.
pub struct TotalsView {
    stores: EventStores,
    staff_settings: Arc<StaffSettingsResolver>,
    transport_settings: Arc<TransportSettingsResolver>,
    bus: Arc<ChangeBus>,
    state: RwLock<Totals>,
}

impl TotalsView {
    /// Create a view over the event's stores and resolvers.
    #[must_use]
    pub fn new(
        stores: EventStores,
        staff_settings: Arc<StaffSettingsResolver>,
        transport_settings: Arc<TransportSettingsResolver>,
        bus: Arc<ChangeBus>,
    ) -> Self {
        Self {
            stores,
            staff_settings,
            transport_settings,
            bus,
            state: RwLock::new(Totals::default()),
        }
    }

    /// The last computed totals.
    pub async fn totals(&self) -> Totals {
        *self.state.read().await
    }

    /// Recompute from the current store snapshots and resolved settings.
    pub async fn recompute(&self) -> Totals {
        let staff_settings = self.staff_settings.effective().await;
        let transport_settings = self.transport_settings.effective().await;
        let inputs = PricingInputs::from_settings(&staff_settings, &transport_settings);

        let bundles = self.stores.bundles.bundles().await;
        let bundle_rows = self.stores.bundles.rows().await;
        let equipment = self.stores.equipment.rows().await;
        let staff = self.stores.staff.rows().await;
        let transport = self.stores.transport.rows().await;
        let assets = self.stores.assets.rows().await;
        let fees = self.stores.extra_fees.rows().await;
        let discounts = self.stores.discounts.rows().await;

        let totals = event_totals(
            &EventRows {
                bundles: &bundles,
                bundle_rows: &bundle_rows,
                equipment: &equipment,
                staff: &staff,
                transport: &transport,
                assets: &assets,
                fees: &fees,
                discounts: &discounts,
            },
            &inputs,
        );
        *self.state.write().await = totals;
        totals
    }

    /// Spawn the bus-driven recompute loop with the default quiet window.
    pub fn spawn_recompute(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_recompute_with_window(debounce::DEFAULT_WINDOW)
    }

    /// Spawn the bus-driven recompute loop with a custom quiet window.
    pub fn spawn_recompute_with_window(self: &Arc<Self>, window: Duration) -> JoinHandle<()> {
        let view = Arc::clone(self);
        let notices = self.bus.subscribe_all();
        let (poker, ticks) = debounce::debounce(window);
        tokio::spawn(async move {
            let forwarder = tokio::spawn(forward_notices(notices, poker));
            run_recompute_loop(view, ticks).await;
            forwarder.abort();
        })
    }
}

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

async fn run_recompute_loop(view: Arc<TotalsView>, mut ticks: Debounced) {
    while ticks.tick().await {
        view.recompute().await;
    }
}
