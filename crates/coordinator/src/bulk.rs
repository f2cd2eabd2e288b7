//! Bulk resolution: one independent resolve per id, joined at the end.

use std::collections::{BTreeMap, HashSet};

use futures::future::join_all;
use tracing::{info, warn};

use claimdesk_core::{Action, ClaimId, ClaimKind, ClaimRef, Result};

use crate::coordinator::{AdminContext, ApprovalCoordinator, Resolution};

/// Per-id outcomes of a bulk action.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub outcomes: BTreeMap<ClaimId, Result<Resolution>>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

impl ApprovalCoordinator {
    /// Resolve every id concurrently. A failure on one id never affects the
    /// others. Repeated ids are resolved once.
    pub async fn bulk_resolve(
        &self,
        kind: ClaimKind,
        ids: &[ClaimId],
        action: Action,
        ctx: &AdminContext,
    ) -> BulkReport {
        let mut seen = HashSet::new();
        let unique: Vec<&ClaimId> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();

        let tasks = unique.iter().map(|id| async move {
            let claim_ref = ClaimRef::new(kind, id);
            let outcome = self.resolve(&claim_ref, action, ctx).await;
            ((*id).clone(), outcome)
        });
        let results = join_all(tasks).await;

        let mut report = BulkReport::default();
        for (id, outcome) in results {
            match &outcome {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(claim_id = %id, kind = %kind, action = %action, error = %e, "bulk item failed");
                    report.failed += 1;
                }
            }
            report.outcomes.insert(id, outcome);
        }

        info!(
            kind = %kind,
            action = %action,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk resolve finished"
        );
        report
    }
}
