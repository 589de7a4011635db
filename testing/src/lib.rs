//! # Banchetto Testing
//!
//! Testing doubles for the banchetto pricing engine.
//!
//! This crate provides:
//! - [`InMemoryRowClient`]: an in-memory remote store with schema-variant and
//!   fault injection, standing in for the production client
//! - [`InMemoryKv`]: a shareable key-value store whose cloned handles behave
//!   like two browser tabs over one profile
//! - deterministic clocks ([`FixedClock`], [`TickingClock`])
//! - small payload builders for cost-center rows
//!
//! ## Example
//!
//! ```ignore
//! use banchetto_testing::{InMemoryRowClient, TickingClock};
//!
//! #[tokio::test]
//! async fn lists_in_creation_order() {
//!     let client = InMemoryRowClient::new();
//!     client.seed("equipment_rows", vec![/* ... */]);
//!     // hand an Arc<InMemoryRowClient> to the store under test
//! }
//! ```

pub mod builders;
pub mod clock;
pub mod client;
pub mod kv;

pub use client::InMemoryRowClient;
pub use clock::{FixedClock, TickingClock, test_clock};
pub use kv::InMemoryKv;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process, honoring `RUST_LOG`.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
