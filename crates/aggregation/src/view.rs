//! Aggregates recomputed from the newest snapshot of every slot.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

use claimdesk_core::{Amount, ClaimKind, ClaimStatus};
use claimdesk_ledger::{ClaimSnapshot, LedgerSnapshot};

/// Notification bell entry for one claim kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: ClaimKind,
    pub label: String,
    pub route: String,
    pub pending_count: usize,
}

/// Activity on one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: NaiveDate,
    pub claims: usize,
    pub revenue: Amount,
}

/// Everything the admin dashboard renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    /// Newest revision folded into these numbers.
    pub revision: u64,
    pub pending: BTreeMap<ClaimKind, usize>,
    pub total_balance: Amount,
    pub user_count: usize,
    pub approved_withdrawals: Amount,
    pub days: Vec<DayBucket>,
    pub notifications: Vec<Notification>,
}

impl Dashboard {
    pub fn badge_total(&self) -> usize {
        self.notifications.iter().map(|n| n.pending_count).sum()
    }
}

/// Latest known state of every `(kind, status)` set plus the ledger.
///
/// Deliveries may repeat or arrive out of order; a snapshot only replaces its
/// slot when its revision is newer.
#[derive(Debug, Clone)]
pub struct AggregationView {
    window_days: u32,
    slots: HashMap<(ClaimKind, ClaimStatus), ClaimSnapshot>,
    ledger: Option<LedgerSnapshot>,
}

impl AggregationView {
    pub fn new(window_days: u32) -> Self {
        Self {
            window_days: window_days.max(1),
            slots: HashMap::new(),
            ledger: None,
        }
    }

    /// Returns whether the snapshot was newer than the slot.
    pub fn apply_claims(&mut self, snapshot: ClaimSnapshot) -> bool {
        let key = (snapshot.kind, snapshot.status);
        match self.slots.get(&key) {
            Some(current) if current.revision >= snapshot.revision => false,
            _ => {
                self.slots.insert(key, snapshot);
                true
            }
        }
    }

    pub fn apply_ledger(&mut self, snapshot: LedgerSnapshot) -> bool {
        match &self.ledger {
            Some(current) if current.revision >= snapshot.revision => false,
            _ => {
                self.ledger = Some(snapshot);
                true
            }
        }
    }

    pub fn revision(&self) -> u64 {
        let claims = self.slots.values().map(|s| s.revision).max().unwrap_or(0);
        let ledger = self.ledger.as_ref().map(|l| l.revision).unwrap_or(0);
        claims.max(ledger)
    }

    fn slot(&self, kind: ClaimKind, status: ClaimStatus) -> &[claimdesk_core::Claim] {
        self.slots
            .get(&(kind, status))
            .map(|s| s.claims.as_slice())
            .unwrap_or(&[])
    }

    pub fn pending_count(&self, kind: ClaimKind) -> usize {
        self.slot(kind, ClaimStatus::Pending).len()
    }

    pub fn total_balance(&self) -> Amount {
        self.ledger.as_ref().map(|l| l.total_balance).unwrap_or(0)
    }

    pub fn approved_withdrawals(&self) -> Amount {
        self.slot(ClaimKind::Withdrawal, ClaimStatus::Approved)
            .iter()
            .map(|c| c.payload.amount())
            .sum()
    }

    pub fn notification_summary(&self) -> Vec<Notification> {
        ClaimKind::ALL
            .iter()
            .map(|&kind| Notification {
                kind,
                label: kind.label().to_string(),
                route: kind.route().to_string(),
                pending_count: self.pending_count(kind),
            })
            .collect()
    }

    pub fn badge_total(&self) -> usize {
        ClaimKind::ALL.iter().map(|&k| self.pending_count(k)).sum()
    }

    /// Claim submissions and revenue per day over the trailing window ending
    /// on the day of `now`, oldest first, zero-filled.
    pub fn daily(&self, now: u64) -> Vec<DayBucket> {
        let Some(today) = day_of(now) else {
            return Vec::new();
        };
        let mut buckets: Vec<DayBucket> = (0..self.window_days as u64)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .map(|date| DayBucket {
                date,
                claims: 0,
                revenue: 0,
            })
            .collect();
        let Some(first) = buckets.first().map(|b| b.date) else {
            return buckets;
        };

        let index = |date: NaiveDate| -> Option<usize> {
            if date < first || date > today {
                return None;
            }
            usize::try_from((date - first).num_days()).ok()
        };

        for claim in self.slots.values().flat_map(|s| s.claims.iter()) {
            if let Some(i) = day_of(claim.created_at).and_then(index) {
                buckets[i].claims += 1;
            }
        }
        if let Some(ledger) = &self.ledger {
            for entry in &ledger.revenue {
                if let Some(i) = day_of(entry.timestamp).and_then(index) {
                    buckets[i].revenue += entry.admin_fee_amount;
                }
            }
        }
        buckets
    }

    pub fn dashboard(&self, now: u64) -> Dashboard {
        Dashboard {
            revision: self.revision(),
            pending: ClaimKind::ALL
                .iter()
                .map(|&k| (k, self.pending_count(k)))
                .collect(),
            total_balance: self.total_balance(),
            user_count: self.ledger.as_ref().map(|l| l.user_count).unwrap_or(0),
            approved_withdrawals: self.approved_withdrawals(),
            days: self.daily(now),
            notifications: self.notification_summary(),
        }
    }
}

fn day_of(timestamp: u64) -> Option<NaiveDate> {
    let secs = i64::try_from(timestamp).ok()?;
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}
