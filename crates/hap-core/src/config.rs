//! Accessory configuration loaded from TOML.

use crate::device::{DeviceId, SetupCode};
use crate::error::ConfigError;
use crate::features::Category;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default HAP TCP port.
pub const DEFAULT_PORT: u16 = 51826;

/// Default cap on a single buffered HTTP message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Top-level accessory configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    /// Instance name advertised over mDNS.
    pub name: String,

    /// Accessory pairing identifier. Generated and persisted when absent.
    pub device_id: Option<String>,

    /// Setup code in `XXX-XX-XXX` form.
    pub setup_code: String,

    /// Four character setup identifier used for the `sh` TXT hash.
    pub setup_id: Option<String>,

    /// Model name (`md` TXT field).
    pub model: String,

    /// Category identifier (`ci` TXT field).
    pub category: u16,

    /// Configuration number (`c#` TXT field).
    pub config_number: u32,

    /// TCP listen address.
    pub bind: SocketAddr,

    /// Pairing store location.
    pub storage_path: PathBuf,

    /// Largest HTTP message accepted on a connection.
    pub max_message_size: usize,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    pub mdns: MdnsConfig,
}

/// mDNS responder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MdnsConfig {
    /// Interface address used to join the multicast group.
    pub interface: Ipv4Addr,

    /// Address advertised in the A record. Falls back to `interface`.
    pub address: Option<Ipv4Addr>,

    /// Seconds between periodic announcements.
    pub interval_secs: u64,

    /// Record TTL in seconds.
    pub ttl: u32,

    /// UDP port (5353 outside of tests).
    pub port: u16,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "HAP Accessory".to_string(),
            device_id: None,
            setup_code: "031-45-154".to_string(),
            setup_id: None,
            model: "hap-accessory".to_string(),
            category: Category::OTHER.raw(),
            config_number: 1,
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            storage_path: PathBuf::from("hap-store.json"),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_level: "info".to_string(),
            mdns: MdnsConfig::default(),
        }
    }
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            address: None,
            interval_secs: 10,
            ttl: 120,
            port: 5353,
        }
    }
}

impl AccessoryConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AccessoryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.len() > 63 {
            return Err(ConfigError::Invalid {
                field: "name",
                reason: "must be 1 to 63 bytes".to_string(),
            });
        }
        self.setup_code()?;
        self.device_id()?;
        if let Some(setup_id) = &self.setup_id {
            if setup_id.len() != 4 || !setup_id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid {
                    field: "setup_id",
                    reason: "must be 4 alphanumeric characters".to_string(),
                });
            }
        }
        if self.max_message_size < 1024 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: "must be at least 1024".to_string(),
            });
        }
        if self.mdns.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "mdns.interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Parsed setup code.
    pub fn setup_code(&self) -> Result<SetupCode, ConfigError> {
        SetupCode::parse(&self.setup_code).map_err(|e| ConfigError::Invalid {
            field: "setup_code",
            reason: e.to_string(),
        })
    }

    /// Parsed device id, if configured.
    pub fn device_id(&self) -> Result<Option<DeviceId>, ConfigError> {
        self.device_id
            .as_deref()
            .map(DeviceId::from_mac_string)
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                field: "device_id",
                reason: e.to_string(),
            })
    }

    /// Category as a typed value.
    pub fn category(&self) -> Category {
        Category(self.category)
    }
}

impl MdnsConfig {
    /// Broadcast interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AccessoryConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind.port(), DEFAULT_PORT);
        assert_eq!(config.mdns.port, 5353);
        assert_eq!(config.mdns.interval(), Duration::from_secs(10));
    }

    #[test]
    fn parses_partial_toml() {
        let config = AccessoryConfig::from_toml_str(
            r#"
            name = "Desk Lamp"
            setup_code = "482-91-734"
            category = 5
            device_id = "1A:2B:3C:4D:5E:6F"

            [mdns]
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "Desk Lamp");
        assert_eq!(config.category(), Category::LIGHTBULB);
        assert_eq!(config.mdns.interval_secs, 30);
        assert_eq!(config.mdns.ttl, 120);
        assert_eq!(
            config.device_id().unwrap(),
            Some(DeviceId([0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F]))
        );
    }

    #[test]
    fn rejects_trivial_setup_code() {
        let err = AccessoryConfig::from_toml_str(r#"setup_code = "123-45-678""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "setup_code", .. }));
    }

    #[test]
    fn rejects_bad_setup_id() {
        let err = AccessoryConfig::from_toml_str(r#"setup_id = "AB""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "setup_id", .. }));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AccessoryConfig::from_toml_str("name = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"Garage\"").unwrap();

        let config = AccessoryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "Garage");
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AccessoryConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
