//! Configuration management for the usbgate CLI

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor id as a hex string (e.g. "0x1050")
    pub vendor_id: String,
    /// Product id as a hex string (e.g. "0x0030")
    pub product_id: String,
    /// Optional serial number to select between identical devices
    #[serde(default)]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Bulk transfer timeout in milliseconds
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl TransferSettings {
    fn default_timeout_ms() -> u64 {
        5000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "LogSettings::default_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LogSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceSettings {
                vendor_id: "0x1050".to_string(),
                product_id: "0x0030".to_string(),
                serial: None,
            },
            transfer: TransferSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/usbgate/usbgate.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
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
                tracing::debug!("Failed to load config: {}, using defaults", e);
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
            config_dir.join("usbgate").join("usbgate.toml")
        } else {
            PathBuf::from(".config/usbgate/usbgate.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        parse_hex_id(&self.device.vendor_id, "vendor_id")?;
        parse_hex_id(&self.device.product_id, "product_id")?;

        if self.transfer.timeout_ms == 0 {
            return Err(anyhow!("transfer.timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// Parse a device id given as hex ("0x1050") or bare decimal ("4176")
pub fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let parsed = if let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }
        u16::from_str_radix(hex_part, 16)
    } else {
        id.parse::<u16>()
    };

    parsed.map_err(|_| anyhow!("Invalid {} '{}', not a valid device id", name, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.vendor_id, "0x1050");
        assert_eq!(config.device.product_id, "0x0030");
        assert!(config.device.serial.is_none());
        assert_eq!(config.transfer.timeout_ms, 5000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x1050", "vendor_id").unwrap(), 0x1050);
        assert_eq!(parse_hex_id("0X0030", "product_id").unwrap(), 0x0030);
        assert_eq!(parse_hex_id("4176", "vendor_id").unwrap(), 4176);
        assert!(parse_hex_id("0x", "vendor_id").is_err());
        assert!(parse_hex_id("0x12345", "vendor_id").is_err());
        assert!(parse_hex_id("banana", "vendor_id").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.device.vendor_id, parsed.device.vendor_id);
        assert_eq!(config.transfer.timeout_ms, parsed.transfer.timeout_ms);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usbgate.toml");

        let mut config = Config::default();
        config.device.serial = Some("0123456789".to_string());
        config.transfer.timeout_ms = 250;

        config.save(&path).unwrap();
        let loaded = Config::load(Some(path)).unwrap();

        assert_eq!(loaded.device.serial.as_deref(), Some("0123456789"));
        assert_eq!(loaded.transfer.timeout_ms, 250);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usbgate.toml");

        let mut config = Config::default();
        config.log.level = "loud".to_string();
        config.save(&path).unwrap();
        assert!(Config::load(Some(path.clone())).is_err());

        let mut config = Config::default();
        config.device.vendor_id = "yubico".to_string();
        config.save(&path).unwrap();
        assert!(Config::load(Some(path.clone())).is_err());

        let mut config = Config::default();
        config.transfer.timeout_ms = 0;
        config.save(&path).unwrap();
        assert!(Config::load(Some(path)).is_err());
    }
}
