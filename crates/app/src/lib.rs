//! Claimdesk App
//!
//! Composition root: logging, settings, and an [`Engine`] wiring the ledger,
//! oracle, coordinator, auto-pilot and dashboard aggregation together.

pub mod config;

pub use config::EngineConfig;

use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use claimdesk_aggregation::{AggregationConfig, AggregationService, Dashboard};
use claimdesk_coordinator::{ApprovalCoordinator, AutoPilot, AutoPilotConfig, CoordinatorConfig};
use claimdesk_core::{AutoPilotSettings, ClaimError};
use claimdesk_ledger::{FeedConfig, LedgerStore, MemoryLedger, SqliteLedger};
use claimdesk_logging::LogLevel;
use claimdesk_oracle::{DecisionOracle, OfflineOracle, RpcOracle};
use claimdesk_settings::{Settings, SettingsError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Initialization failed: {0}")]
    InitError(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
    #[error("Ledger error: {0}")]
    LedgerError(#[from] ClaimError),
}

/// Initialized application context.
pub struct App {
    pub service: String,
    pub settings: Settings<EngineConfig>,
}

impl App {
    /// Build the engine from the loaded settings. The engine keeps the
    /// settings so auto-pilot changes are written back.
    pub fn into_engine(self) -> Result<Engine, AppError> {
        let config = self.settings.config.clone();
        Engine::build(config, Some(self.settings))
    }
}

/// Builder for constructing an [`App`].
pub struct AppBuilder {
    service: String,
    log_level: LogLevel,
    skip_logging: bool,
    skip_banner: bool,
    config_path: Option<String>,
}

impl AppBuilder {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            log_level: LogLevel::Info,
            skip_logging: false,
            skip_banner: false,
            config_path: None,
        }
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.log_level = LogLevel::from_verbose(verbose);
        self
    }

    pub fn skip_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    pub fn skip_banner(mut self) -> Self {
        self.skip_banner = true;
        self
    }

    pub fn config_path(mut self, path: &str) -> Self {
        self.config_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Result<App, AppError> {
        if !self.skip_logging {
            let _ = claimdesk_logging::try_init(self.log_level);
        }

        let config_path = self.config_path.as_deref().map(Path::new);
        let settings: Settings<EngineConfig> = Settings::load_or_default(&self.service, config_path)?;
        settings.config.validate().map_err(AppError::InvalidConfig)?;

        if !self.skip_banner {
            info!(
                "{} {} starting, settings at {}",
                self.service,
                env!("CARGO_PKG_VERSION"),
                settings.path().display(),
            );
        }

        Ok(App {
            service: self.service,
            settings,
        })
    }
}

/// Running set of services around one ledger.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn LedgerStore>,
    coordinator: Arc<ApprovalCoordinator>,
    autopilot: Arc<AutoPilot>,
    autopilot_tx: watch::Sender<AutoPilotSettings>,
    settings: Option<Mutex<Settings<EngineConfig>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Engine without a settings file; auto-pilot changes stay in memory.
    pub fn from_config(config: EngineConfig) -> Result<Self, AppError> {
        Self::build(config, None)
    }

    fn build(config: EngineConfig, settings: Option<Settings<EngineConfig>>) -> Result<Self, AppError> {
        config.validate().map_err(AppError::InvalidConfig)?;

        let feed = FeedConfig {
            capacity: config.feed_capacity,
            revenue_window_days: config.dashboard_window_days,
        };
        let store: Arc<dyn LedgerStore> = match config.database_path() {
            Some(path) => Arc::new(SqliteLedger::open(&path, feed)?),
            None => {
                info!("no database_path configured, ledger kept in memory");
                Arc::new(MemoryLedger::with_feed_config(feed))
            }
        };

        let oracle: Arc<dyn DecisionOracle> = match &config.oracle_socket {
            Some(socket) => Arc::new(RpcOracle::new(socket)),
            None => {
                info!("no oracle_socket configured, auto-pilot uses the fallback policy");
                Arc::new(OfflineOracle)
            }
        };

        let coordinator = Arc::new(ApprovalCoordinator::new(
            store.clone(),
            CoordinatorConfig {
                max_retries: config.max_retries,
                withdrawal_fee_bps: config.withdrawal_fee_bps,
            },
        ));

        let (autopilot_tx, autopilot_rx) = watch::channel(config.autopilot);
        let autopilot = Arc::new(AutoPilot::new(
            coordinator.clone(),
            oracle,
            autopilot_rx,
            AutoPilotConfig {
                oracle_timeout: config.oracle_timeout(),
                poll_interval: config.autopilot_poll_interval(),
                screen_withdrawals: config.screen_withdrawals,
                ..Default::default()
            },
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            coordinator,
            autopilot,
            autopilot_tx,
            settings: settings.map(Mutex::new),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<ApprovalCoordinator> {
        &self.coordinator
    }

    pub fn autopilot(&self) -> &Arc<AutoPilot> {
        &self.autopilot
    }

    pub fn autopilot_settings(&self) -> AutoPilotSettings {
        *self.autopilot_tx.borrow()
    }

    /// Switch auto-pilot kinds. Takes effect before the next claim is
    /// evaluated and is written to the settings file when there is one.
    pub fn set_autopilot(&self, settings: AutoPilotSettings) -> Result<(), AppError> {
        self.autopilot_tx.send_replace(settings);
        info!(
            referrals = settings.auto_pilot_referrals,
            tasks = settings.auto_pilot_tasks,
            "auto-pilot settings changed"
        );
        if let Some(persisted) = &self.settings {
            let mut persisted = persisted
                .lock()
                .map_err(|_| AppError::InitError("settings mutex poisoned".to_string()))?;
            persisted.update(|c| c.autopilot = settings)?;
        }
        Ok(())
    }

    /// Spawn the auto-pilot loop and the dashboard aggregation.
    pub async fn start(&self) -> Result<EngineTasks, AppError> {
        let aggregation = AggregationService::new(
            self.store.clone(),
            AggregationConfig {
                window_days: self.config.dashboard_window_days,
                ..Default::default()
            },
        );
        let (dashboard, aggregation_handle) =
            aggregation.spawn(self.shutdown_tx.subscribe()).await?;

        let autopilot = self.autopilot.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let autopilot_handle = tokio::spawn(async move { autopilot.run(shutdown).await });

        Ok(EngineTasks {
            dashboard,
            handles: vec![aggregation_handle, autopilot_handle],
        })
    }

    /// Ask every spawned task to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Handles of the tasks spawned by [`Engine::start`].
pub struct EngineTasks {
    pub dashboard: watch::Receiver<Dashboard>,
    handles: Vec<JoinHandle<()>>,
}

impl EngineTasks {
    /// Wait for every task to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_builder_creates_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("settings.json");

        let app = AppBuilder::new("claimdesk-test")
            .skip_logging()
            .skip_banner()
            .config_path(config_path.to_str().unwrap())
            .build()
            .unwrap();

        assert_eq!(app.service, "claimdesk-test");
        assert_eq!(app.settings.config, EngineConfig::default());
        assert!(config_path.exists());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("settings.json");
        std::fs::write(&config_path, r#"{"withdrawal_fee_bps": 9000}"#).unwrap();

        let result = AppBuilder::new("claimdesk-test")
            .skip_logging()
            .skip_banner()
            .config_path(config_path.to_str().unwrap())
            .build();
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }
}
