//! In-memory ledger.
//!
//! All state sits behind one `tokio::sync::RwLock`; a commit holds the write
//! guard only for its checks, the writes and the snapshot publish. Contention
//! on a claim or a user still surfaces as a version conflict to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use claimdesk_core::{
    now_secs, Amount, BalanceRecord, Claim, ClaimError, ClaimKind, ClaimPatch, ClaimStatus, Delta,
    Result, RevenueEntry, User, UserId,
};

use crate::feed::{ChangeFeed, ClaimSnapshot, FeedConfig, LedgerSnapshot, LedgerSubscription, Subscription};
use crate::store::{
    check_adjustment, check_transition, fresh_claim, BalanceLedger, Commit, LedgerStore,
    RequestStore, Transition,
};

#[derive(Default)]
struct LedgerState {
    /// Insertion order.
    claims: Vec<Claim>,
    index: HashMap<String, usize>,
    users: BTreeMap<UserId, User>,
    revenue: Vec<RevenueEntry>,
}

impl LedgerState {
    fn claim(&self, id: &str) -> Result<&Claim> {
        self.index
            .get(id)
            .map(|&i| &self.claims[i])
            .ok_or_else(|| ClaimError::NotFound(format!("claim {}", id)))
    }

    fn user(&self, id: &str) -> Result<&User> {
        self.users
            .get(id)
            .ok_or_else(|| ClaimError::NotFound(format!("user {}", id)))
    }

    fn list(&self, kind: ClaimKind, status: ClaimStatus) -> Vec<Claim> {
        self.claims
            .iter()
            .filter(|c| c.kind() == kind && c.status == status)
            .cloned()
            .collect()
    }

    fn total_balance(&self) -> Amount {
        self.users.values().map(|u| u.balance).sum()
    }

    fn claim_snapshot(&self, revision: u64, kind: ClaimKind, status: ClaimStatus) -> ClaimSnapshot {
        ClaimSnapshot {
            revision,
            kind,
            status,
            claims: self.list(kind, status),
        }
    }

    fn ledger_snapshot(&self, revision: u64, cutoff: u64) -> LedgerSnapshot {
        LedgerSnapshot {
            revision,
            total_balance: self.total_balance(),
            user_count: self.users.len(),
            revenue: self
                .revenue
                .iter()
                .filter(|r| r.timestamp >= cutoff)
                .cloned()
                .collect(),
        }
    }
}

/// Ledger kept in process memory. Cloning shares the same state.
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    feed: Arc<ChangeFeed>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_feed_config(FeedConfig::default())
    }

    pub fn with_feed_config(config: FeedConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            feed: Arc::new(ChangeFeed::new(config)),
        }
    }

    fn publish_ledger(&self, state: &LedgerState, revision: u64) {
        let cutoff = self.feed.revenue_cutoff(now_secs());
        self.feed.publish_ledger(state.ledger_snapshot(revision, cutoff));
    }

    fn apply(&self, state: &mut LedgerState, transition: Transition) -> Result<Commit> {
        let claim = state.claim(&transition.claim_id)?;
        check_transition(claim, transition.expected_version, transition.new_status)?;
        let kind = claim.kind();
        let from = claim.status;

        let new_balance = match &transition.adjustment {
            Some(adj) => {
                let user = state.user(&adj.user_id)?;
                Some(check_adjustment(user, adj.delta, adj.expected_version)?)
            }
            None => None,
        };

        // All checks passed; nothing below can fail.
        let idx = state.index[&transition.claim_id];
        let claim = &mut state.claims[idx];
        claim.apply_patch(transition.new_status, &transition.patch);
        let claim = claim.clone();

        let balance = match (transition.adjustment, new_balance) {
            (Some(adj), Some(new_balance)) => {
                let user = state
                    .users
                    .get_mut(&adj.user_id)
                    .ok_or_else(|| ClaimError::NotFound(format!("user {}", adj.user_id)))?;
                user.balance = new_balance;
                user.version += 1;
                Some(user.balance_record())
            }
            _ => None,
        };

        let touched_ledger = balance.is_some() || transition.revenue.is_some();
        if let Some(entry) = transition.revenue {
            state.revenue.push(entry);
        }

        let revision = self.feed.next_revision();
        self.feed.publish_claims(state.claim_snapshot(revision, kind, from));
        self.feed
            .publish_claims(state.claim_snapshot(revision, kind, claim.status));
        if touched_ledger {
            self.publish_ledger(state, revision);
        }

        info!(
            claim_id = %claim.id,
            kind = %kind,
            status = %claim.status,
            version = claim.version,
            revision,
            "claim transition committed"
        );
        Ok(Commit { claim, balance })
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryLedger {
    async fn create(&self, claim: Claim) -> Result<Claim> {
        let mut state = self.state.write().await;
        if state.index.contains_key(&claim.id) {
            return Err(ClaimError::DuplicateId(claim.id));
        }
        let claim = fresh_claim(claim);
        let kind = claim.kind();
        let position = state.claims.len();
        state.index.insert(claim.id.clone(), position);
        state.claims.push(claim.clone());

        let revision = self.feed.next_revision();
        self.feed
            .publish_claims(state.claim_snapshot(revision, kind, ClaimStatus::Pending));
        debug!(claim_id = %claim.id, kind = %kind, "claim created");
        Ok(claim)
    }

    async fn get(&self, id: &str) -> Result<Claim> {
        self.state.read().await.claim(id).cloned()
    }

    async fn list_by_status(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Vec<Claim>> {
        Ok(self.state.read().await.list(kind, status))
    }

    async fn subscribe(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Subscription> {
        let state = self.state.read().await;
        let initial = state.claim_snapshot(self.feed.revision(), kind, status);
        Ok(self.feed.subscribe_claims(initial))
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        new_status: ClaimStatus,
        patch: ClaimPatch,
    ) -> Result<Claim> {
        let mut state = self.state.write().await;
        let claim = state.claim(id)?.clone();
        let transition = Transition {
            expected_version,
            ..Transition::new(&claim, new_status, patch)
        };
        self.apply(&mut state, transition).map(|c| c.claim)
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id) {
            return Err(ClaimError::DuplicateId(user.id));
        }
        let user = User { version: 0, ..user };
        state.users.insert(user.id.clone(), user.clone());
        let revision = self.feed.next_revision();
        self.publish_ledger(&state, revision);
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        self.state.read().await.user(id).cloned()
    }

    async fn read(&self, user_id: &str) -> Result<BalanceRecord> {
        Ok(self.state.read().await.user(user_id)?.balance_record())
    }

    async fn atomic_adjust(
        &self,
        user_id: &str,
        delta: Delta,
        expected_version: u64,
    ) -> Result<BalanceRecord> {
        let mut state = self.state.write().await;
        let new_balance = check_adjustment(state.user(user_id)?, delta, expected_version)?;
        let record = {
            let user = state
                .users
                .get_mut(user_id)
                .ok_or_else(|| ClaimError::NotFound(format!("user {}", user_id)))?;
            user.balance = new_balance;
            user.version += 1;
            user.balance_record()
        };
        let revision = self.feed.next_revision();
        self.publish_ledger(&state, revision);
        debug!(user_id, delta, balance = record.balance, "balance adjusted");
        Ok(record)
    }

    async fn total_balance(&self) -> Result<Amount> {
        Ok(self.state.read().await.total_balance())
    }

    async fn subscribe_ledger(&self) -> Result<LedgerSubscription> {
        let state = self.state.read().await;
        let cutoff = self.feed.revenue_cutoff(now_secs());
        let initial = state.ledger_snapshot(self.feed.revision(), cutoff);
        Ok(self.feed.subscribe_ledger(initial))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn commit(&self, transition: Transition) -> Result<Commit> {
        let mut state = self.state.write().await;
        self.apply(&mut state, transition)
    }

    async fn revenue_since(&self, since: u64) -> Result<Vec<RevenueEntry>> {
        Ok(self
            .state
            .read()
            .await
            .revenue
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect())
    }
}
