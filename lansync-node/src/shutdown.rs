//! Process-wide "active" flag, checked cooperatively by every loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable handle to the active flag. Clearing it is the only shutdown path;
/// in-flight I/O finishes or times out on its own.
#[derive(Clone, Debug)]
pub struct Shutdown {
    active: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self {
            active: Arc::new(tx),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Clear the flag. Idempotent.
    pub fn trigger(&self) {
        self.active.send_replace(false);
    }

    /// Resolves once the flag is cleared.
    pub async fn cancelled(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|active| !*active).await;
    }

    /// Sleep for `period`, waking early on shutdown. Returns whether the node is still active.
    pub async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.cancelled() => {}
        }
        self.is_active()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
