//! Host-driven reconciliation: diff a local and a remote listing, return the transfers to perform.
//!
//! No I/O here. The host fetches both listings, calls [`plan`], executes the
//! returned actions, and records each successful one in the [`SyncLedger`].

use std::cmp::Ordering;
use std::hash::Hash;

use crate::integrity::is_absent;
use crate::ledger::SyncLedger;
use crate::protocol::validate_filename;
use crate::record::{FileRecord, Listing};

/// Transfer for the host to perform against one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Fetch the peer's copy; `hash` is what the peer advertised.
    Pull {
        filename: String,
        size: u64,
        hash: String,
    },
    /// Send our copy; `hash` is our content hash at planning time.
    Push { filename: String, hash: String },
}

impl Action {
    pub fn filename(&self) -> &str {
        match self {
            Action::Pull { filename, .. } | Action::Push { filename, .. } => filename,
        }
    }

    /// Hash to record in the ledger once the transfer succeeds.
    pub fn hash(&self) -> &str {
        match self {
            Action::Pull { hash, .. } | Action::Push { hash, .. } => hash,
        }
    }
}

/// Which side holds the authoritative copy of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
    /// Same content on both sides, or absent on both.
    InSync,
}

/// Decide the authoritative side for one filename.
///
/// A side that lacks the file (or reports the absent hash) loses. When both
/// sides hold different content, the lexicographically greater hash wins, so
/// two peers facing the same conflict always pick the same version.
pub fn winner(local: Option<&FileRecord>, remote: Option<&FileRecord>) -> Winner {
    let local = local.map(|r| r.hash.as_str()).filter(|h| !is_absent(h));
    let remote = remote.map(|r| r.hash.as_str()).filter(|h| !is_absent(h));
    match (local, remote) {
        (None, None) => Winner::InSync,
        (Some(_), None) => Winner::Local,
        (None, Some(_)) => Winner::Remote,
        (Some(l), Some(r)) => match r.cmp(l) {
            Ordering::Greater => Winner::Remote,
            Ordering::Less => Winner::Local,
            Ordering::Equal => Winner::InSync,
        },
    }
}

/// Outcome of diffing one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Pulls first, then pushes; each in filename order.
    pub actions: Vec<Action>,
    /// Files with identical content on both sides.
    pub in_sync: usize,
    /// Differing files skipped because the ledger already holds the winning hash.
    pub suppressed: usize,
    /// Names on either side that cannot be sent as a request argument; never transferred.
    pub unsendable: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Diff `local` against `remote` for `peer`.
pub fn plan<P: Eq + Hash + Clone>(
    peer: &P,
    local: &Listing,
    remote: &Listing,
    ledger: &SyncLedger<P>,
) -> Plan {
    let mut out = Plan::default();
    let mut pushes = Vec::new();

    // Remote side first: pulls for everything the peer has that we should take.
    for (name, remote_rec) in remote {
        if validate_filename(name).is_err() {
            out.unsendable.push(name.clone());
            continue;
        }
        match winner(local.get(name), Some(remote_rec)) {
            Winner::InSync => out.in_sync += 1,
            Winner::Remote => {
                if ledger.contains(peer, name, &remote_rec.hash) {
                    out.suppressed += 1;
                } else {
                    out.actions.push(Action::Pull {
                        filename: name.clone(),
                        size: remote_rec.size,
                        hash: remote_rec.hash.clone(),
                    });
                }
            }
            // Counted on the local pass below.
            Winner::Local => {}
        }
    }

    for (name, local_rec) in local {
        if validate_filename(name).is_err() {
            if !remote.contains_key(name) {
                out.unsendable.push(name.clone());
            }
            continue;
        }
        if winner(Some(local_rec), remote.get(name)) != Winner::Local {
            continue;
        }
        if ledger.contains(peer, name, &local_rec.hash) {
            out.suppressed += 1;
        } else {
            pushes.push(Action::Push {
                filename: name.clone(),
                hash: local_rec.hash.clone(),
            });
        }
    }
    out.actions.extend(pushes);
    out
}
