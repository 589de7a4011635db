//! # Banchetto Runtime
//!
//! Synchronization runtime for the banchetto pricing engine.
//!
//! One event aggregates rows from several independent cost centers, each
//! edited optimistically against a remote relational store. This crate owns
//! that reconciliation:
//!
//! - **Row stores** ([`store`], [`centers`], [`transport`]): one per cost
//!   center, each the only writer of its table. Mutations follow an explicit
//!   two-phase commit (tentative local apply, remote echo swap, rollback on
//!   failure); stores re-sync on focus/visibility signals, never on a timer.
//! - **Settings resolvers** ([`settings`], [`defaults`]): the per-event →
//!   global default → factory default waterfall, with one-time first-save
//!   seeding and write-through of adopted values.
//! - **Schema probing** ([`probe`]): column discovery and the bounded
//!   integer-coercion retry for the irregular transport table.
//! - **Plumbing** ([`debounce`], [`dirty`]): burst coalescing for
//!   bus-triggered refreshes and the persisted dirty/saved flag pair.
//!
//! ## Example
//!
//! ```ignore
//! use banchetto_runtime::{EquipmentStore, RowStore};
//! use std::sync::Arc;
//!
//! let store: Arc<EquipmentStore> = Arc::new(RowStore::new(client, bus, clock));
//! store.set_event(Some(event_id)).await;
//! store.refresh().await;
//! let resync = store.spawn_resync();
//! ```

pub mod centers;
pub mod debounce;
pub mod defaults;
pub mod dirty;
pub mod probe;
pub mod settings;
pub mod store;
pub mod transport;

pub use centers::{
    AssetStore, Assets, BundleStore, DiscountStore, Discounts, Equipment, EquipmentStore,
    ExtraFeeStore, ExtraFees, HeaderStore, Staff, StaffCenter,
};
pub use debounce::{Debounced, Debouncer, debounce};
pub use defaults::GlobalDefaultsStore;
pub use dirty::DirtyFlags;
pub use probe::{CANDIDATE_COLUMNS, ColumnProbe, ColumnTriple, IntegerCoercion};
pub use settings::{StaffSettingsResolver, TransportSettingsResolver};
pub use store::{CostCenter, RowStore};
pub use transport::TransportStore;
