//! Refresh debouncing.
//!
//! When several cost centers save in quick succession every one of them emits
//! a notice; aggregate views would refetch once per notice. A [`Debouncer`]
//! coalesces pokes that land within a quiet window into a single tick.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default quiet window for bus-triggered refreshes.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(150);

/// Producer half: poke on every notice.
#[derive(Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
    /// Signal that something changed. Never blocks; pokes into a closed
    /// channel are dropped.
    pub fn poke(&self) {
        let _ = self.tx.send(());
    }
}

/// Consumer half: awaits coalesced ticks.
pub struct Debounced {
    rx: mpsc::UnboundedReceiver<()>,
    window: Duration,
}

impl Debounced {
    /// Wait for the next burst of pokes to go quiet.
    ///
    /// Returns `true` when a tick fired, `false` once every producer is gone
    /// and the channel has drained.
    pub async fn tick(&mut self) -> bool {
        if self.rx.recv().await.is_none() {
            return false;
        }
        loop {
            match timeout(self.window, self.rx.recv()).await {
                Ok(Some(())) => {}
                // quiet window elapsed, or channel closed with pokes consumed
                Ok(None) | Err(_) => return true,
            }
        }
    }
}

/// A linked poke/tick pair with the given quiet window.
#[must_use]
pub fn debounce(window: Duration) -> (Debouncer, Debounced) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Debouncer { tx }, Debounced { rx, window })
}
