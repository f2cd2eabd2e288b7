//! Behaviour every `LedgerStore` backend must share.

use std::sync::Arc;

use claimdesk_core::{Claim, ClaimError, ClaimKind, ClaimPatch, ClaimStatus, RevenueEntry, User};
use claimdesk_ledger::{
    Adjustment, BalanceLedger, Delivery, LedgerStore, MemoryLedger, RequestStore, SqliteLedger, Transition,
};
use futures::future::join_all;

fn backends() -> Vec<(&'static str, Arc<dyn LedgerStore>)> {
    vec![
        ("memory", Arc::new(MemoryLedger::new())),
        ("sqlite", Arc::new(SqliteLedger::open_in_memory().unwrap())),
    ]
}

fn patch(admin: &str) -> ClaimPatch {
    ClaimPatch {
        resolved_at: 1_000,
        resolved_by: Some(admin.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_duplicate_ids_rejected() {
    for (name, store) in backends() {
        store.create(Claim::task("t1", "u1", "task", 10)).await.unwrap();
        let err = store.create(Claim::referral("t1", "u1", "u2", 10)).await.unwrap_err();
        assert_eq!(err, ClaimError::DuplicateId("t1".into()), "{name}");

        store.create_user(User::new("u1", "u1@example.com", 0)).await.unwrap();
        let err = store.create_user(User::new("u1", "x@example.com", 5)).await.unwrap_err();
        assert!(matches!(err, ClaimError::DuplicateId(_)), "{name}");
    }
}

#[tokio::test]
async fn test_list_keeps_insertion_order() {
    for (name, store) in backends() {
        for id in ["c", "a", "b"] {
            store.create(Claim::task(id, "u1", "task", 10)).await.unwrap();
        }
        store.create(Claim::withdrawal("w1", "u1", 10)).await.unwrap();

        let ids: Vec<_> = store
            .list_by_status(ClaimKind::TaskSubmission, ClaimStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"], "{name}");
    }
}

#[tokio::test]
async fn test_compare_and_swap_rules() {
    for (name, store) in backends() {
        store.create(Claim::task("t1", "u1", "task", 10)).await.unwrap();

        let err = store
            .compare_and_swap("t1", 5, ClaimStatus::Approved, patch("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::VersionConflict { .. }), "{name}");

        let claim = store
            .compare_and_swap("t1", 0, ClaimStatus::Rejected, patch("a"))
            .await
            .unwrap();
        assert_eq!(claim.status, ClaimStatus::Rejected, "{name}");
        assert_eq!(claim.version, 1, "{name}");
        assert_eq!(claim.resolved_by.as_deref(), Some("a"), "{name}");

        let err = store
            .compare_and_swap("t1", 1, ClaimStatus::Approved, patch("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyProcessed { .. }), "{name}");

        let err = store
            .compare_and_swap("missing", 0, ClaimStatus::Approved, patch("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)), "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_compare_and_swap_has_one_winner() {
    for (name, store) in backends() {
        store.create(Claim::referral("r1", "u1", "u2", 500)).await.unwrap();

        let attempts = (0..10).map(|i| {
            let store = store.clone();
            async move {
                store
                    .compare_and_swap("r1", 0, ClaimStatus::Approved, patch(&format!("admin-{i}")))
                    .await
            }
        });
        let results = join_all(attempts).await;
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{name}");
        assert_eq!(store.get("r1").await.unwrap().version, 1, "{name}");
    }
}

#[tokio::test]
async fn test_commit_applies_all_effects() {
    for (name, store) in backends() {
        store.create_user(User::new("u1", "u1@example.com", 100)).await.unwrap();
        let claim = store.create(Claim::withdrawal("w1", "u1", 3_000)).await.unwrap();

        let transition = Transition::new(&claim, ClaimStatus::Rejected, patch("admin"))
            .with_adjustment(Adjustment {
                user_id: "u1".into(),
                delta: 3_000,
                expected_version: 0,
            })
            .with_revenue(RevenueEntry {
                admin_fee_amount: 150,
                original_amount: 3_000,
                source_user_id: "u1".into(),
                kind: ClaimKind::Withdrawal,
                timestamp: 2_000,
            });
        let commit = store.commit(transition).await.unwrap();

        assert_eq!(commit.claim.status, ClaimStatus::Rejected, "{name}");
        let balance = commit.balance.unwrap();
        assert_eq!(balance.balance, 3_100, "{name}");
        assert_eq!(balance.version, 1, "{name}");
        assert_eq!(store.total_balance().await.unwrap(), 3_100, "{name}");
        assert_eq!(store.revenue_since(0).await.unwrap().len(), 1, "{name}");
        assert!(store.revenue_since(2_001).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_failed_commit_changes_nothing() {
    for (name, store) in backends() {
        store.create_user(User::new("u1", "u1@example.com", 100)).await.unwrap();
        let claim = store.create(Claim::task("t1", "u1", "task", 50)).await.unwrap();

        let transition = Transition::new(&claim, ClaimStatus::Approved, patch("admin"))
            .with_adjustment(Adjustment {
                user_id: "u1".into(),
                delta: -500,
                expected_version: 0,
            });
        let err = store.commit(transition).await.unwrap_err();
        assert!(matches!(err, ClaimError::InsufficientFunds { .. }), "{name}");

        let claim = store.get("t1").await.unwrap();
        assert_eq!(claim.status, ClaimStatus::Pending, "{name}");
        assert_eq!(claim.version, 0, "{name}");
        assert_eq!(store.read("u1").await.unwrap().balance, 100, "{name}");
    }
}

#[tokio::test]
async fn test_stale_balance_version_rejected() {
    for (name, store) in backends() {
        store.create_user(User::new("u1", "u1@example.com", 100)).await.unwrap();
        store.atomic_adjust("u1", 10, 0).await.unwrap();

        let err = store.atomic_adjust("u1", 10, 0).await.unwrap_err();
        assert!(matches!(err, ClaimError::VersionConflict { .. }), "{name}");
        assert_eq!(store.read("u1").await.unwrap().balance, 110, "{name}");
    }
}

#[tokio::test]
async fn test_subscription_sees_initial_then_changes() {
    for (name, store) in backends() {
        store.create(Claim::task("t1", "u1", "task", 10)).await.unwrap();
        let mut pending = store
            .subscribe(ClaimKind::TaskSubmission, ClaimStatus::Pending)
            .await
            .unwrap();

        let first = pending.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(first.claims.len(), 1, "{name}");

        store.create(Claim::task("t2", "u1", "task", 10)).await.unwrap();
        let second = pending.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(second.claims.len(), 2, "{name}");
        assert!(second.revision > first.revision, "{name}");

        store
            .compare_and_swap("t1", 0, ClaimStatus::Approved, patch("admin"))
            .await
            .unwrap();
        let third = pending.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(third.claims.len(), 1, "{name}");
        assert_eq!(third.claims[0].id, "t2", "{name}");
    }
}

#[tokio::test]
async fn test_ledger_subscription_tracks_total() {
    for (name, store) in backends() {
        let mut ledger = store.subscribe_ledger().await.unwrap();
        let initial = ledger.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(initial.total_balance, 0, "{name}");

        store.create_user(User::new("u1", "u1@example.com", 40)).await.unwrap();
        let snapshot = ledger.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(snapshot.total_balance, 40, "{name}");
        assert_eq!(snapshot.user_count, 1, "{name}");
    }
}
