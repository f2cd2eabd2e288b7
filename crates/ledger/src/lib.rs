//! Claimdesk Ledger
//!
//! The single authoritative store for claim records and user balances. Claims
//! and balances only change through version-checked operations, and the
//! [`LedgerStore::commit`] unit applies a claim transition, a balance
//! adjustment and a revenue append together or not at all.
//!
//! Every commit publishes full snapshots on a [`ChangeFeed`]; subscribers treat
//! each delivery as a replacement, never as a delta.

pub mod feed;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use feed::{
    ChangeFeed, ClaimSnapshot, Delivery, FeedConfig, LedgerSnapshot, LedgerSubscription, Subscription,
};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use store::{Adjustment, BalanceLedger, Commit, LedgerStore, RequestStore, Transition};
