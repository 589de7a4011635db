//! # Banchetto Core
//!
//! Core types and boundary traits for the banchetto event pricing engine.
//!
//! A single event aggregates cost contributions from several independent
//! cost centers (menu bundles, rental equipment, staff labor, transport,
//! company-owned assets, extra fees, discounts). This crate holds everything
//! the synchronization runtime and the aggregate views share:
//!
//! - **Guards & normalization**: pure helpers that turn loosely-typed
//!   historical rows into calculation-ready numbers ([`guard`],
//!   [`normalize`]).
//! - **Data model**: typed rows per cost center, settings records, and the
//!   three-tier defaults waterfall ([`model`]).
//! - **Boundaries**: the narrow remote-store interface ([`client`]), the
//!   persistent key-value store ([`kv`]), and injected dependencies
//!   ([`environment`]).
//! - **Notification**: the change bus and its cross-process link ([`bus`]).
//! - **Bundle rules**: composition configuration ([`bundle_config`]).
//!
//! Everything here is I/O-free except the traits; implementations live in
//! `banchetto-postgres` (production) and `banchetto-testing` (doubles), and
//! the stores that drive them live in `banchetto-runtime`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod bundle_config;
pub mod bus;
pub mod client;
pub mod environment;
pub mod guard;
pub mod kv;
pub mod model;
pub mod normalize;

pub use bus::{ChangeBus, ChangeNotice};
pub use client::{Filter, RemoteError, RemoteErrorKind, RowStoreClient};
pub use environment::{Clock, SystemClock};
pub use kv::{KeyValueStore, KvChange, KvError};
pub use model::{EventId, RemoteRow, RowId};
pub use normalize::Scope;
