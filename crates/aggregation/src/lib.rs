//! Claimdesk Aggregation
//!
//! Dashboard figures and notification counts derived from the ledger's change
//! feed. The view never counts events: each slot is replaced by the newest
//! full snapshot, so duplicated or reordered deliveries cannot make it drift.

pub mod service;
pub mod view;

pub use service::{AggregationConfig, AggregationService};
pub use view::{AggregationView, Dashboard, DayBucket, Notification};
