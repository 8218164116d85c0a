//! Transport configuration management

use crate::usb::session::SessionOptions;
use crate::usb::transfers::DEFAULT_RECEIVE_BUFFER_SIZE;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted bulk-IN receive buffer
pub const MAX_RECEIVE_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "TransportSettings::default_log_level")]
    pub log_level: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl TransportSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID filters (e.g. "0x0483:*"), empty allows every device
    #[serde(default)]
    pub filters: Vec<String>,
    /// Bulk-IN receive buffer size in bytes
    #[serde(default = "UsbSettings::default_receive_buffer_size")]
    pub receive_buffer_size: usize,
    /// Blocking read timeout in milliseconds (0 = wait forever)
    #[serde(default)]
    pub read_timeout_ms: u64,
    /// Wait per service cycle in the probe's listen loop
    #[serde(default = "UsbSettings::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            receive_buffer_size: Self::default_receive_buffer_size(),
            read_timeout_ms: 0,
            poll_timeout_ms: Self::default_poll_timeout_ms(),
        }
    }
}

impl UsbSettings {
    fn default_receive_buffer_size() -> usize {
        DEFAULT_RECEIVE_BUFFER_SIZE
    }

    fn default_poll_timeout_ms() -> u64 {
        500
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            receive_buffer_size: self.receive_buffer_size,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl TransportConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/phdc-usb/transport.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: TransportConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("phdc-usb").join("transport.toml")
        } else {
            PathBuf::from(".config/phdc-usb/transport.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.transport.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.transport.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        if !(1..=MAX_RECEIVE_BUFFER_SIZE).contains(&self.usb.receive_buffer_size) {
            return Err(anyhow!(
                "Invalid receive_buffer_size {}, must be between 1 and {}",
                self.usb.receive_buffer_size,
                MAX_RECEIVE_BUFFER_SIZE
            ));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x0483:0x5750' or '0x0483:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x0483')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}

/// Load a configuration file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<TransportConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    TransportConfig::load(Some(path_buf))
}
