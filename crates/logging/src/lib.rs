//! Claimdesk Logging
//!
//! Installs a `tracing` fmt subscriber. `RUST_LOG` always wins over the
//! configured [`LogLevel`].

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default verbosity when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `-v` on the command line maps to debug, otherwise info.
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter directive: our crates at this level, dependencies at warn.
    pub fn directive(&self) -> String {
        format!("warn,claimdesk={0},claimdesk_core={0},claimdesk_settings={0},claimdesk_ledger={0},claimdesk_oracle={0},claimdesk_coordinator={0},claimdesk_aggregation={0},claimdesk_app={0}", self.as_str())
    }
}

/// Build the env filter for a level, honouring `RUST_LOG` when set.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init(level: LogLevel) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_verbose() {
        assert_eq!(LogLevel::from_verbose(true), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbose(false), LogLevel::Info);
    }

    #[test]
    fn test_directive_covers_workspace_crates() {
        let d = LogLevel::Debug.directive();
        assert!(d.starts_with("warn,"));
        assert!(d.contains("claimdesk_ledger=debug"));
        assert!(d.contains("claimdesk_coordinator=debug"));
        assert!(d.contains("claimdesk_settings=debug"));
        assert!(d.contains("claimdesk_aggregation=debug"));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = try_init(LogLevel::Warn);
        assert!(try_init(LogLevel::Warn).is_err());
    }
}
