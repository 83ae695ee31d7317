//! Application settings: ports, sensors, storage and logging

use super::ConfigError;
use crate::core::multi_port::MAX_PORTS;
use crate::core::sensor::SensorDescriptor;
use crate::core::storage::StorageConfig;
use crate::core::transport::{SerialConfig, SerialParity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between polling cycles
    #[serde(default = "default_read_interval")]
    pub read_interval: f64,
    /// Serial lines
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    /// Sensors to poll, in polling order
    #[serde(default)]
    pub sensors: Vec<SensorDescriptor>,
    /// Where readings go
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_read_interval() -> f64 {
    2.0
}

impl Default for AppConfig {
    fn default() -> Self {
        let (first, second) = default_devices();
        let ports = vec![PortConfig::new("port1", first), PortConfig::new("port2", second)];
        let sensors = vec![
            SensorDescriptor::new("sensor1", "port1", 1),
            SensorDescriptor::new("sensor2", "port1", 2),
            SensorDescriptor::new("sensor3", "port2", 1),
            SensorDescriptor::new("sensor4", "port2", 2),
        ];

        Self {
            read_interval: default_read_interval(),
            ports,
            sensors,
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(windows)]
fn default_devices() -> (&'static str, &'static str) {
    ("COM3", "COM4")
}

#[cfg(not(windows))]
fn default_devices() -> (&'static str, &'static str) {
    ("/dev/ttyUSB0", "/dev/ttyUSB1")
}

impl AppConfig {
    /// Load config from `path`; `.json` files are read as JSON, anything else as TOML
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    }

    /// Save config to `path` as TOML
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Time between polling cycles
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.read_interval).unwrap_or(Duration::from_secs(2))
    }

    /// Check everything that would make polling impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.read_interval.is_finite() || self.read_interval <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "read_interval must be positive, got {}",
                self.read_interval
            )));
        }

        if self.ports.is_empty() {
            return Err(ConfigError::Invalid("no ports configured".into()));
        }
        if self.ports.len() > MAX_PORTS {
            return Err(ConfigError::Invalid(format!(
                "{} ports configured, at most {MAX_PORTS} are supported",
                self.ports.len()
            )));
        }

        let mut names = HashSet::new();
        for port in &self.ports {
            port.validate()?;
            if !names.insert(port.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate port name: {}", port.name)));
            }
        }

        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid("no sensors configured".into()));
        }
        for sensor in &self.sensors {
            if !names.contains(sensor.port.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sensor {} refers to unknown port {}",
                    sensor.name, sensor.port
                )));
            }
            if !sensor.temp_scale.is_finite() || !sensor.humi_scale.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "sensor {} has a non-finite scale",
                    sensor.name
                )));
            }
        }

        Ok(())
    }
}

/// One serial line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Name sensors refer to
    pub name: String,
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baudrate", alias = "baud_rate")]
    pub baudrate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits", alias = "bytesize")]
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits", alias = "stopbits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: SerialParity,
    /// Read timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

fn default_baudrate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout() -> f64 {
    1.0
}

impl PortConfig {
    /// 9600 8N1 with a one second timeout
    pub fn new(name: &str, port: &str) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            baudrate: default_baudrate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: SerialParity::None,
            timeout: default_timeout(),
        }
    }

    /// Check line settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("port with an empty name".into()));
        }
        if self.port.is_empty() {
            return Err(ConfigError::Invalid(format!("port {} has no device path", self.name)));
        }
        if self.baudrate == 0 {
            return Err(ConfigError::Invalid(format!("port {} has baudrate 0", self.name)));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Invalid(format!(
                "port {}: unsupported data bits {}",
                self.name, self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::Invalid(format!(
                "port {}: unsupported stop bits {}",
                self.name, self.stop_bits
            )));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "port {}: timeout must be positive, got {}",
                self.name, self.timeout
            )));
        }
        Ok(())
    }

    /// Serial line settings for the transport
    pub fn to_serial_config(&self) -> SerialConfig {
        let timeout = Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(1));
        SerialConfig::new(&self.port, self.baudrate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .timeout(timeout)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Directory for daily-rotated log files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::StorageKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.sensors.len(), 4);
        assert_eq!(config.interval(), Duration::from_secs(2));
        config.validate().unwrap();
    }

    #[test]
    fn test_minimal_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [[ports]]
            name = "bus"
            port = "/dev/ttyS1"

            [[sensors]]
            name = "room"
            port = "bus"
            slave_id = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.read_interval, 2.0);
        assert_eq!(config.ports[0].baudrate, 9600);
        assert_eq!(config.ports[0].parity, SerialParity::None);
        assert_eq!(config.sensors[0].temp_scale, 0.1);
        assert_eq!(config.storage.kind, StorageKind::Csv);
        config.validate().unwrap();
    }

    #[test]
    fn test_json_with_legacy_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "read_interval": 5,
                "ports": [{"name": "p", "port": "COM3", "baudrate": 19200, "parity": "E",
                           "stopbits": 2, "bytesize": 8, "timeout": 0.5}],
                "sensors": [{"name": "s", "port": "p", "slave_id": 1,
                             "temp_reg": 0, "humi_reg": 1, "temp_scale": 0.1, "humi_scale": 0.1}]
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        let serial = config.ports[0].to_serial_config();
        assert_eq!(serial.connection_info(), "COM3 @ 19200 baud (8E2)");
        assert_eq!(serial.timeout, Duration::from_millis(500));
        assert_eq!(config.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("thpoll.toml");
        let config = AppConfig::default();
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(AppConfig::load(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "ports = 3").unwrap();
        assert!(matches!(AppConfig::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.read_interval = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ports.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ports[1].name = "port1".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sensors[0].port = "nowhere".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ports[0].stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ports[0].timeout = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sensors[0].humi_scale = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ports = (0..=MAX_PORTS)
            .map(|i| PortConfig::new(&format!("p{i}"), &format!("/dev/ttyUSB{i}")))
            .collect();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_storage_rejected() {
        let err = toml::from_str::<AppConfig>("[storage]\ntype = \"influxdb\"").unwrap_err();
        assert!(err.to_string().contains("influxdb"));
    }
}
