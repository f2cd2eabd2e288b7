//! Claimdesk Coordinator
//!
//! Drives claims from pending to a terminal status. [`ApprovalCoordinator`]
//! resolves claims on behalf of an admin (one at a time or in bulk) and
//! [`AutoPilot`] resolves the kinds an admin has delegated to the decision
//! oracle, falling back to a fixed policy when the oracle is unavailable.

pub mod autopilot;
pub mod bulk;
pub mod coordinator;

pub use autopilot::{AutoOutcome, AutoPilot, AutoPilotConfig, ClaimContext, SweepReport};
pub use bulk::BulkReport;
pub use coordinator::{AdminContext, ApprovalCoordinator, CoordinatorConfig, Resolution};
