//! Change feed: broadcast of full snapshots after every commit.
//!
//! Delivery is at-least-once and may duplicate. Each snapshot carries the
//! store-wide `revision` it was taken at, so a consumer can discard anything
//! older than what it already holds.
//!
//! All claim sets share one channel. A receiver that falls behind gets
//! [`Delivery::Lagged`]: the dropped snapshots may include the last change to
//! any set, so the consumer must re-read from the store (a fresh
//! `subscribe` hands out a current snapshot first).

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use claimdesk_core::{Amount, Claim, ClaimKind, ClaimStatus, RevenueEntry};

const SECS_PER_DAY: u64 = 86_400;

/// Feed tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// Broadcast buffer per channel.
    pub capacity: usize,
    /// Revenue entries older than this are left out of ledger snapshots.
    pub revenue_window_days: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            revenue_window_days: 7,
        }
    }
}

/// Full contents of one `(kind, status)` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSnapshot {
    pub revision: u64,
    pub kind: ClaimKind,
    pub status: ClaimStatus,
    pub claims: Vec<Claim>,
}

/// Ledger-wide totals plus the recent revenue log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub revision: u64,
    pub total_balance: Amount,
    pub user_count: usize,
    pub revenue: Vec<RevenueEntry>,
}

/// One item from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    Snapshot(T),
    /// The receiver fell behind and this many snapshots were dropped.
    Lagged(u64),
}

impl<T> Delivery<T> {
    pub fn snapshot(self) -> Option<T> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            Self::Lagged(_) => None,
        }
    }

    pub fn is_lagged(&self) -> bool {
        matches!(self, Self::Lagged(_))
    }
}

/// Publisher side, owned by a store backend.
///
/// Backends publish while still holding their write lock, so snapshots leave
/// in commit order.
pub struct ChangeFeed {
    claims_tx: broadcast::Sender<ClaimSnapshot>,
    ledger_tx: broadcast::Sender<LedgerSnapshot>,
    revision: AtomicU64,
    config: FeedConfig,
}

impl ChangeFeed {
    pub fn new(config: FeedConfig) -> Self {
        let (claims_tx, _) = broadcast::channel(config.capacity.max(1));
        let (ledger_tx, _) = broadcast::channel(config.capacity.max(1));
        Self {
            claims_tx,
            ledger_tx,
            revision: AtomicU64::new(0),
            config,
        }
    }

    /// Revision of the last published change.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Allocate the revision for a new commit.
    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Oldest revenue timestamp included in ledger snapshots.
    pub fn revenue_cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.config.revenue_window_days as u64 * SECS_PER_DAY)
    }

    pub fn publish_claims(&self, snapshot: ClaimSnapshot) {
        // No receivers is fine.
        let _ = self.claims_tx.send(snapshot);
    }

    pub fn publish_ledger(&self, snapshot: LedgerSnapshot) {
        let _ = self.ledger_tx.send(snapshot);
    }

    /// Register a claim subscriber. Call while holding the backend lock that
    /// produced `initial` so no commit slips in between.
    pub fn subscribe_claims(&self, initial: ClaimSnapshot) -> Subscription {
        Subscription {
            kind: initial.kind,
            status: initial.status,
            rx: self.claims_tx.subscribe(),
            pending: Some(initial),
        }
    }

    pub fn subscribe_ledger(&self, initial: LedgerSnapshot) -> LedgerSubscription {
        LedgerSubscription {
            rx: self.ledger_tx.subscribe(),
            pending: Some(initial),
        }
    }
}

/// Stream of snapshots for one `(kind, status)` set.
pub struct Subscription {
    kind: ClaimKind,
    status: ClaimStatus,
    rx: broadcast::Receiver<ClaimSnapshot>,
    pending: Option<ClaimSnapshot>,
}

impl Subscription {
    pub fn kind(&self) -> ClaimKind {
        self.kind
    }

    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    /// Next snapshot of this set or a lag notice, `None` once the store is
    /// gone.
    pub async fn next(&mut self) -> Option<Delivery<ClaimSnapshot>> {
        if let Some(snapshot) = self.pending.take() {
            return Some(Delivery::Snapshot(snapshot));
        }
        loop {
            match self.rx.recv().await {
                Ok(s) if s.kind == self.kind && s.status == self.status => {
                    return Some(Delivery::Snapshot(s))
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(kind = %self.kind, status = %self.status, skipped, "claim feed lagged");
                    return Some(Delivery::Lagged(skipped));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Stream of ledger snapshots.
pub struct LedgerSubscription {
    rx: broadcast::Receiver<LedgerSnapshot>,
    pending: Option<LedgerSnapshot>,
}

impl LedgerSubscription {
    pub async fn next(&mut self) -> Option<Delivery<LedgerSnapshot>> {
        if let Some(snapshot) = self.pending.take() {
            return Some(Delivery::Snapshot(snapshot));
        }
        match self.rx.recv().await {
            Ok(s) => Some(Delivery::Snapshot(s)),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "ledger feed lagged");
                Some(Delivery::Lagged(skipped))
            }
            Err(RecvError::Closed) => None,
        }
    }
}
