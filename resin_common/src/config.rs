//! Configuration loading traits and types.
//!
//! Every configuration file is TOML and loads through [`ConfigLoader`]. The
//! MC link reads [`McConfig`]; the `[hw]` section is
//! [`HwConfig`](crate::mc::hw::HwConfig).
//!
//! # Usage
//!
//! ```rust,no_run
//! use resin_common::config::{ConfigError, McConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = McConfig::load_validated(Path::new("/etc/resin-mc/mc.toml"))?;
//!     println!("Device: {}", config.serial.device);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    BAUD_RATE_BOOTLOADER, BAUD_RATE_NORMAL, DEBUG_PORT, FIRMWARE_DIR, FLASH_COMMAND, MC_DEVICE,
    RESET_GPIO, SERIAL_TIMEOUT,
};
use crate::mc::hw::HwConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "resin-mc"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "resin-mc".to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── MC Link Configuration ──────────────────────────────────────────

/// `[serial]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub bootloader_baud_rate: u32,
    /// Read and write timeout [ms].
    pub timeout_ms: u64,
    /// GPIO line wired to the MC reset pin.
    pub reset_gpio: u32,
    /// sysfs GPIO root.
    pub gpio_root: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: MC_DEVICE.to_string(),
            baud_rate: BAUD_RATE_NORMAL,
            bootloader_baud_rate: BAUD_RATE_BOOTLOADER,
            timeout_ms: SERIAL_TIMEOUT.as_millis() as u64,
            reset_gpio: RESET_GPIO,
            gpio_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

impl SerialConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[debug]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEBUG_PORT,
        }
    }
}

/// `[flash]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Flashing utility, invoked as `<command> <firmware_dir> <board> <device>`.
    pub command: PathBuf,
    pub firmware_dir: PathBuf,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from(FLASH_COMMAND),
            firmware_dir: PathBuf::from(FIRMWARE_DIR),
        }
    }
}

/// Top-level configuration of the MC link binary.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "resin-mc"
///
/// [serial]
/// device = "/dev/ttyS2"
///
/// [hw]
/// tilt_height = 4928
///
/// [hw.tuning]
/// down_large_fill = [5, 650, 1000, 4, 1, 0, 64, 3]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub hw: HwConfig,
}

impl McConfig {
    /// Load and validate in one step.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.serial.device.is_empty() {
            return Err(ConfigError::ValidationError(
                "serial.device cannot be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 || self.serial.bootloader_baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "serial baud rates must be greater than 0".to_string(),
            ));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "serial.timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.hw.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        for (text, level) in [
            ("trace", LogLevel::Trace),
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let parsed: TestWrapper = toml::from_str(&format!("level = \"{text}\"")).unwrap();
            assert_eq!(parsed.level, level);
        }
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = McConfig::load(Path::new("/nonexistent/path/mc.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = McConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = McConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.serial.device, MC_DEVICE);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.timeout(), SERIAL_TIMEOUT);
        assert_eq!(config.serial.timeout(), Duration::from_secs(1));
        assert_eq!(config.debug.port, 8192);
        assert_eq!(config.hw.tilt_height, 4928);
        assert!(config.hw.version_check);
    }

    #[test]
    fn test_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "printer-01"

[serial]
device = "/dev/ttyUSB0"
timeout_ms = 2500

[debug]
port = 9000

[hw]
screw_mm = 2
version_check = false
tower_height = 150000

[hw.tuning]
up = [2, 300, 0, 5, 2, 50, 0, 0]

[hw.timing]
homing_poll_ms = 10
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = McConfig::load_validated(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.timeout(), Duration::from_millis(2500));
        assert_eq!(config.debug.port, 9000);
        assert_eq!(config.hw.microsteps_per_mm(), 1600.0);
        assert!(!config.hw.version_check);
        assert_eq!(config.hw.tower_height(), 150_000);
        assert_eq!(config.hw.tuning.up.offset_steps, 300);
        assert_eq!(config.hw.tuning.up.cycles, 2);
        assert_eq!(config.hw.timing.homing_poll_ms, 10);
        assert_eq!(config.hw.timing.move_poll_ms, 100);
    }

    #[test]
    fn test_validation_rejects_bad_tuning_and_hw() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[hw.tuning]\nup = [12, 0, 0, 5, 1, 0, 0, 0]\n").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            McConfig::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));

        let mut config = McConfig::default();
        config.hw.board_version = 4;
        assert!(config.validate().is_err());

        let mut config = McConfig::default();
        config.serial.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
