//! Engine configuration persisted through `Settings<EngineConfig>`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use claimdesk_core::{AutoPilotSettings, MAX_FEE_BPS, WITHDRAWAL_FEE_BPS};
use claimdesk_settings::expand_path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file; `None` keeps the ledger in memory.
    pub database_path: Option<String>,
    pub max_retries: u32,
    pub withdrawal_fee_bps: u64,
    /// Oracle daemon socket; `None` runs offline on the fallback policy.
    pub oracle_socket: Option<String>,
    pub oracle_timeout_ms: u64,
    pub autopilot_poll_secs: u64,
    pub screen_withdrawals: bool,
    pub dashboard_window_days: u32,
    pub feed_capacity: usize,
    pub autopilot: AutoPilotSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_retries: 3,
            withdrawal_fee_bps: WITHDRAWAL_FEE_BPS,
            oracle_socket: None,
            oracle_timeout_ms: 5_000,
            autopilot_poll_secs: 30,
            screen_withdrawals: false,
            dashboard_window_days: 7,
            feed_capacity: 256,
            autopilot: AutoPilotSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.withdrawal_fee_bps > MAX_FEE_BPS {
            return Err(format!(
                "withdrawal_fee_bps {} exceeds max {}",
                self.withdrawal_fee_bps, MAX_FEE_BPS
            ));
        }
        if self.feed_capacity == 0 {
            return Err("feed_capacity must be positive".to_string());
        }
        if self.dashboard_window_days == 0 {
            return Err("dashboard_window_days must be positive".to_string());
        }
        if self.oracle_timeout_ms == 0 {
            return Err("oracle_timeout_ms must be positive".to_string());
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.as_deref().map(expand_path)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn autopilot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.autopilot_poll_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.withdrawal_fee_bps, 500);
        assert_eq!(config.oracle_timeout(), Duration::from_secs(5));
        assert_eq!(config.dashboard_window_days, 7);
        assert!(config.database_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_retries": 5, "autopilot": {"autoPilotTasks": true}}"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(config.autopilot.auto_pilot_tasks);
        assert!(!config.autopilot.auto_pilot_referrals);
        assert_eq!(config.feed_capacity, 256);
    }

    #[test]
    fn test_validate_fee_cap() {
        let config = EngineConfig {
            withdrawal_fee_bps: 6_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
