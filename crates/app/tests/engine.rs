use std::time::Duration;

use claimdesk_app::{AppBuilder, Engine, EngineConfig};
use claimdesk_core::{AutoPilotSettings, Claim, ClaimKind, ClaimStatus, User};
use claimdesk_ledger::{BalanceLedger, RequestStore};
use claimdesk_settings::Settings;

#[tokio::test]
async fn test_engine_runs_autopilot_and_dashboard() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        database_path: Some(dir.path().join("ledger.db").to_string_lossy().into_owned()),
        autopilot_poll_secs: 1,
        oracle_timeout_ms: 50,
        ..Default::default()
    };
    let engine = Engine::from_config(config).unwrap();
    let store = engine.store().clone();
    store.create_user(User::new("u1", "u1@example.com", 0)).await.unwrap();
    store.create_user(User::new("friend", "f@example.com", 0).verified()).await.unwrap();

    let tasks = engine.start().await.unwrap();
    let mut dashboard = tasks.dashboard.clone();

    store.create(Claim::task("t1", "u1", "task", 250)).await.unwrap();
    store.create(Claim::referral("r1", "u1", "friend", 1_000)).await.unwrap();
    store.create(Claim::withdrawal("w1", "u1", 100)).await.unwrap();

    engine
        .set_autopilot(AutoPilotSettings {
            auto_pilot_referrals: true,
            auto_pilot_tasks: true,
        })
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let d = dashboard.borrow_and_update();
                if d.pending[&ClaimKind::TaskSubmission] == 0
                    && d.pending[&ClaimKind::ReferralBonus] == 0
                    && d.total_balance == 1_250
                {
                    break;
                }
            }
            dashboard.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    // Offline oracle: tasks and verified referrals approved, withdrawals held.
    assert_eq!(store.get("t1").await.unwrap().status, ClaimStatus::Approved);
    assert_eq!(store.get("r1").await.unwrap().status, ClaimStatus::Approved);
    assert_eq!(store.get("w1").await.unwrap().status, ClaimStatus::Pending);
    assert_eq!(dashboard.borrow().pending[&ClaimKind::Withdrawal], 1);

    engine.shutdown();
    tokio::time::timeout(Duration::from_secs(5), tasks.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_autopilot_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let engine = AppBuilder::new("claimdesk-test")
        .skip_logging()
        .skip_banner()
        .config_path(path.to_str().unwrap())
        .build()
        .unwrap()
        .into_engine()
        .unwrap();
    assert_eq!(engine.autopilot_settings(), AutoPilotSettings::default());

    let enabled = AutoPilotSettings {
        auto_pilot_referrals: true,
        auto_pilot_tasks: false,
    };
    engine.set_autopilot(enabled).unwrap();
    assert_eq!(engine.autopilot_settings(), enabled);

    let reloaded: Settings<EngineConfig> = Settings::load_or_default("claimdesk-test", Some(&path)).unwrap();
    assert_eq!(reloaded.config.autopilot, enabled);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"autoPilotReferrals\": true"));
}
