//! Configuration file support for portlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PORTLINK_*)
//! 3. Local config file (./portlink.toml)
//! 4. Global config file (~/.config/portlink/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use portlink::FallbackPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "portlink.toml";

/// Wait for the first response byte when nothing else is configured.
pub const DEFAULT_DELAY_MS: u64 = 500;

/// Inter-byte silence that ends a response when nothing else is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Transaction timing and framing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Wait for the first response byte, in milliseconds.
    pub delay_ms: Option<u64>,
    /// Inter-byte silence that ends a response, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Handling of malformed chunked responses ("idle-silence" or "strict-chunked").
    pub fallback: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transaction settings.
    #[serde(default)]
    pub transaction: TransactionConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "portlink").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other
            .connection
            .serial
            .is_some()
        {
            self.connection
                .serial = other
                .connection
                .serial;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection
                .baud = other
                .connection
                .baud;
        }

        if other
            .transaction
            .delay_ms
            .is_some()
        {
            self.transaction
                .delay_ms = other
                .transaction
                .delay_ms;
        }
        if other
            .transaction
            .timeout_ms
            .is_some()
        {
            self.transaction
                .timeout_ms = other
                .transaction
                .timeout_ms;
        }
        if other
            .transaction
            .fallback
            .is_some()
        {
            self.transaction
                .fallback = other
                .transaction
                .fallback;
        }
    }

    /// Configured first-byte wait, or the default.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(
            self.transaction
                .delay_ms
                .unwrap_or(DEFAULT_DELAY_MS),
        )
    }

    /// Configured inter-byte silence, or the default.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            self.transaction
                .timeout_ms
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    /// Configured fallback policy.
    ///
    /// An unrecognized name is logged and replaced by the default.
    pub fn fallback(&self) -> FallbackPolicy {
        match self
            .transaction
            .fallback
            .as_deref()
        {
            None => FallbackPolicy::default(),
            Some(name) => FallbackPolicy::from_name(name).unwrap_or_else(|| {
                warn!("Unknown fallback policy '{name}', using {}", FallbackPolicy::default());
                FallbackPolicy::default()
            }),
        }
    }

    /// Remember a serial port in the local config file.
    ///
    /// Other settings already in the file are kept.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<()> {
        self.save_port_to(Path::new(LOCAL_CONFIG_FILE), serial)
    }

    fn save_port_to(&mut self, path: &Path, serial: &str) -> anyhow::Result<()> {
        let mut stored = Self::load_from_file(path).unwrap_or_default();
        stored
            .connection
            .serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&stored)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());

        self.connection
            .serial = Some(serial.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(
            config
                .connection
                .serial
                .is_none()
        );
        assert!(
            config
                .connection
                .baud
                .is_none()
        );
        assert_eq!(config.delay(), Duration::from_millis(DEFAULT_DELAY_MS));
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.fallback(), FallbackPolicy::IdleSilence);
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.connection
            .baud = Some(9600);
        base.transaction
            .delay_ms = Some(200);

        let mut other = Config::default();
        other
            .connection
            .serial = Some("/dev/ttyUSB0".to_string());
        other
            .connection
            .baud = Some(230400);
        other
            .transaction
            .fallback = Some("strict-chunked".to_string());

        base.merge(other);

        assert_eq!(
            base.connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(
            base.connection
                .baud,
            Some(230400)
        );
        assert_eq!(base.delay(), Duration::from_millis(200));
        assert_eq!(base.fallback(), FallbackPolicy::StrictChunked);
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection
            .serial = Some("/dev/ttyUSB0".to_string());
        base.transaction
            .timeout_ms = Some(250);

        base.merge(Config::default());

        assert_eq!(
            base.connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(base.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_fallback_uses_default() {
        let mut config = Config::default();
        config
            .transaction
            .fallback = Some("whatever".to_string());
        assert_eq!(config.fallback(), FallbackPolicy::IdleSilence);
    }

    // ---- TOML deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyACM0"
baud = 115200

[transaction]
delay_ms = 750
timeout_ms = 50
fallback = "strict"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyACM0")
        );
        assert_eq!(
            config
                .connection
                .baud,
            Some(115200)
        );
        assert_eq!(config.delay(), Duration::from_millis(750));
        assert_eq!(config.timeout(), Duration::from_millis(50));
        assert_eq!(config.fallback(), FallbackPolicy::StrictChunked);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[transaction]\ntimeout_ms = 20\n").unwrap();
        assert!(
            config
                .connection
                .serial
                .is_none()
        );
        assert_eq!(config.timeout(), Duration::from_millis(20));
        assert_eq!(config.delay(), Duration::from_millis(DEFAULT_DELAY_MS));
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join("custom.toml");
        fs::write(&path, "[connection]\nserial = \"COM4\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(
            config
                .connection
                .serial
                .as_deref(),
            Some("COM4")
        );
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(
            config
                .connection
                .serial
                .is_none()
        );
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(
            config
                .connection
                .serial
                .is_none()
        );
    }

    // ---- remembering a port ----

    #[test]
    fn test_save_port_keeps_other_settings() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join(LOCAL_CONFIG_FILE);
        fs::write(&path, "[transaction]\ndelay_ms = 900\n").unwrap();

        let mut config = Config::default();
        config
            .save_port_to(&path, "/dev/ttyUSB7")
            .unwrap();

        assert_eq!(
            config
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB7")
        );
        let stored = Config::load_from_path(&path);
        assert_eq!(
            stored
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB7")
        );
        assert_eq!(stored.delay(), Duration::from_millis(900));
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_is_some() {
        if let Some(p) = Config::global_config_path() {
            let s = p
                .to_str()
                .unwrap();
            assert!(s.contains("portlink"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
