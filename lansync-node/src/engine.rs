//! Reconciliation engine: periodically diff every known peer and run the resulting transfers.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lansync_core::{plan, Action, SyncLedger};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::TransferClient;
use crate::error::Result;
use crate::index::FileIndex;
use crate::registry::PeerRegistry;
use crate::shutdown::Shutdown;

/// Counts from one peer's cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    /// Pushes dropped because the local file vanished after planning.
    pub skipped: usize,
    pub in_sync: usize,
    pub suppressed: usize,
    /// Names that cannot be requested over the wire and were left alone.
    pub unsendable: usize,
}

impl SyncReport {
    pub fn transfers(&self) -> usize {
        self.pulled + self.pushed
    }
}

pub struct Engine {
    registry: Arc<PeerRegistry>,
    index: Arc<FileIndex>,
    client: TransferClient,
    ledger: Mutex<SyncLedger<SocketAddr>>,
    /// Peers with a cycle in progress; a second cycle for the same peer is skipped.
    in_flight: Mutex<HashSet<SocketAddr>>,
    interval: Duration,
    shutdown: Shutdown,
}

impl Engine {
    pub fn new(
        registry: Arc<PeerRegistry>,
        index: Arc<FileIndex>,
        interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            registry,
            client: TransferClient::new(index.clone()),
            index,
            ledger: Mutex::new(SyncLedger::new()),
            in_flight: Mutex::new(HashSet::new()),
            interval,
            shutdown,
        }
    }

    /// Reconcile newly admitted peers right away, and every known peer each interval, until shutdown.
    pub async fn run(self: Arc<Self>, mut admitted: mpsc::UnboundedReceiver<SocketAddr>) {
        let engine = self.clone();
        let first_contact = tokio::spawn(async move {
            loop {
                let peer = tokio::select! {
                    p = admitted.recv() => match p {
                        Some(p) => p,
                        None => break,
                    },
                    _ = engine.shutdown.cancelled() => break,
                };
                let engine = engine.clone();
                tokio::spawn(async move { engine.sync_guarded(peer).await });
            }
        });

        while self.shutdown.sleep(self.interval).await {
            let peers = self.registry.snapshot().await;
            debug!(peers = peers.len(), "reconciliation cycle");
            for peer in peers {
                if !self.shutdown.is_active() {
                    break;
                }
                self.sync_guarded(peer).await;
            }
        }
        let _ = first_contact.await;
        debug!("reconciliation stopped");
    }

    /// Run one cycle for `peer` unless one is already running. Failures are logged here and go no further.
    async fn sync_guarded(&self, peer: SocketAddr) {
        if !self.in_flight.lock().await.insert(peer) {
            debug!(%peer, "cycle already in progress");
            return;
        }
        match self.sync_peer(peer).await {
            Ok(report) if report.transfers() > 0 || report.skipped > 0 => {
                info!(
                    %peer,
                    pulled = report.pulled,
                    pushed = report.pushed,
                    skipped = report.skipped,
                    "peer synchronized"
                );
            }
            Ok(report) => {
                debug!(
                    %peer,
                    in_sync = report.in_sync,
                    suppressed = report.suppressed,
                    unsendable = report.unsendable,
                    "peer up to date"
                );
            }
            Err(e) => {
                error!(%peer, class = ?e.class(), error = %e, "sync with peer abandoned");
            }
        }
        self.in_flight.lock().await.remove(&peer);
    }

    /// One reconciliation cycle against `peer`: fetch, diff, then transfer.
    /// The first failed transfer abandons the rest of the cycle.
    pub async fn sync_peer(&self, peer: SocketAddr) -> Result<SyncReport> {
        let remote = self.client.fetch_listing(peer).await?;
        let local = self.index.snapshot().await;
        let plan = {
            let ledger = self.ledger.lock().await;
            plan(&peer, &local, &remote, &ledger)
        };
        for name in &plan.unsendable {
            debug!(%peer, file = ?name, "filename cannot be transferred, skipping");
        }
        let mut report = SyncReport {
            in_sync: plan.in_sync,
            suppressed: plan.suppressed,
            unsendable: plan.unsendable.len(),
            ..SyncReport::default()
        };

        for action in &plan.actions {
            if !self.shutdown.is_active() {
                break;
            }
            match action {
                Action::Pull {
                    filename,
                    size,
                    hash,
                } => {
                    self.client.pull(peer, filename, *size, hash).await?;
                    report.pulled += 1;
                }
                Action::Push { filename, .. } => match self.client.push(peer, filename).await {
                    Ok(_) => report.pushed += 1,
                    Err(e) if e.is_missing_file() => {
                        warn!(%peer, file = %filename, "file vanished before push, skipping");
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            }
            self.ledger
                .lock()
                .await
                .record(peer, action.filename(), action.hash());
        }
        Ok(report)
    }
}
