//! Platform-aware config and data directories.

use std::path::PathBuf;

/// Config directory for a service.
///
/// - macOS: `~/Library/Application Support/{Service}`
/// - Linux: `$XDG_CONFIG_HOME/{service}` or `~/.config/{service}`
/// - Windows: `%APPDATA%\{Service}`
pub fn default_config_dir_for(service: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        home_dir().join("Library").join("Application Support").join(capitalize(service))
    }
    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"));
        xdg.join(service.to_lowercase())
    }
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"));
        appdata.join(capitalize(service))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        home_dir().join(format!(".{}", service.to_lowercase()))
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().to_string() + &chars.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_dir_is_service_scoped() {
        let config = default_config_dir_for("claimdesk");
        assert!(config.to_string_lossy().to_lowercase().contains("claimdesk"));
    }

    #[test]
    fn test_expand_path() {
        assert!(!expand_path("~/ledger.db").to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/var/ledger.db"), PathBuf::from("/var/ledger.db"));
    }
}
