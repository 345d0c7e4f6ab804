//! Sync ledger: which content hash of which file was last reconciled with which peer.

use std::collections::HashMap;
use std::hash::Hash;

/// Records `(peer, filename) -> hash` after a verified transfer.
///
/// Keyed by hash, not a flag: an entry only suppresses a transfer of that exact
/// content. Recording a newer hash for the same `(peer, filename)` supersedes the
/// old one, so content that later reverts to an earlier version is re-evaluated.
#[derive(Debug, Clone)]
pub struct SyncLedger<P> {
    entries: HashMap<(P, String), String>,
}

impl<P: Eq + Hash + Clone> SyncLedger<P> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// True if `hash` of `filename` was already reconciled with `peer`.
    pub fn contains(&self, peer: &P, filename: &str, hash: &str) -> bool {
        self.entries
            .get(&(peer.clone(), filename.to_string()))
            .is_some_and(|h| h == hash)
    }

    /// Record a reconciled triple. Returns false if it was already present.
    pub fn record(&mut self, peer: P, filename: impl Into<String>, hash: impl Into<String>) -> bool {
        let hash = hash.into();
        match self.entries.insert((peer, filename.into()), hash.clone()) {
            Some(previous) => previous != hash,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: Eq + Hash + Clone> Default for SyncLedger<P> {
    fn default() -> Self {
        Self::new()
    }
}
