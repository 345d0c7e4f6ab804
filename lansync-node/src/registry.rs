//! Peer registry: every peer ever discovered, for the lifetime of the process.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// Concurrency-safe peer set. Newly admitted peers are also sent on the
/// admission channel so the engine can reconcile them right away.
pub struct PeerRegistry {
    peers: Mutex<BTreeSet<SocketAddr>>,
    admitted_tx: mpsc::UnboundedSender<SocketAddr>,
}

impl PeerRegistry {
    /// Registry plus the receiving end of its admission channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketAddr>) {
        let (admitted_tx, admitted_rx) = mpsc::unbounded_channel();
        let registry = Self {
            peers: Mutex::new(BTreeSet::new()),
            admitted_tx,
        };
        (registry, admitted_rx)
    }

    /// Add `addr` if unknown. Returns whether it was new; test-and-insert is atomic.
    pub async fn admit(&self, addr: SocketAddr) -> bool {
        let is_new = self.peers.lock().await.insert(addr);
        if is_new {
            info!(peer = %addr, "new peer discovered");
            let _ = self.admitted_tx.send(addr);
        }
        is_new
    }

    /// Point-in-time copy; callers never hold the lock across network I/O.
    pub async fn snapshot(&self) -> Vec<SocketAddr> {
        self.peers.lock().await.iter().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn admit_is_idempotent_and_announces_once() {
        let (registry, mut rx) = PeerRegistry::new();
        let peer: SocketAddr = "192.168.1.20:5005".parse().unwrap();
        assert!(registry.admit(peer).await);
        assert!(!registry.admit(peer).await);
        assert_eq!(rx.recv().await, Some(peer));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.snapshot().await, vec![peer]);
    }

    #[tokio::test]
    async fn concurrent_admission_has_one_winner() {
        let (registry, mut rx) = PeerRegistry::new();
        let registry = Arc::new(registry);
        let peer: SocketAddr = "192.168.1.21:5005".parse().unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let r = registry.clone();
                tokio::spawn(async move { r.admit(peer).await })
            })
            .collect();
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(rx.recv().await, Some(peer));
        assert!(rx.try_recv().is_err());
    }
}
