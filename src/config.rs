//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/bk_psu.toml`)
//! 2. environment variables prefixed with `BK_PSU_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use bk_psu::config::PsuConfig;
//!
//! let config = PsuConfig::load()?;
//! println!("Link: {} @ {}", config.link.path, config.link.baud);
//! # Ok::<(), bk_psu::error::PsuError>(())
//! ```
//!
//! Environment overrides use double underscores for nesting, for example
//! `BK_PSU_LINK__PATH=/dev/ttyUSB0` or `BK_PSU_APPLICATION__LOG_LEVEL=debug`.

use crate::error::{PsuError, PsuResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/bk_psu.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PsuConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial endpoint of the supply
    #[serde(default)]
    pub link: LinkConfig,
    /// Settle delays that are part of the wire protocol
    #[serde(default)]
    pub timing: ProtocolTiming,
    /// Background monitoring
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "BK 1697B".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

/// How log events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored, for reading at a terminal
    Pretty,
    /// One line per event, no colors
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Parity setting of the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Number of stop bits on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Static description of the serial endpoint.
///
/// Read once when the link is opened; changing it afterwards has no effect on an open
/// connection.
///
/// ```toml
/// [link]
/// path = "/dev/ttyACM0"
/// baud = 115200
/// parity = "none"
/// stop_bits = "one"
/// byte_size = 8
/// timeout = "1s"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3")
    pub path: String,
    /// Communication speed
    pub baud: u32,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Data bits per character (5..=8)
    pub byte_size: u8,
    /// Upper bound for reading one reply line
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".to_string(),
            baud: 115_200,
            parity: Parity::None,
            stop_bits: StopBits::One,
            byte_size: 8,
            timeout: Duration::from_secs(1),
        }
    }
}

impl LinkConfig {
    /// Link with default 8N1 @ 115200 settings on the given port.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Data bits in the form `serialport` expects.
    ///
    /// # Errors
    /// Returns `PsuError::Configuration` when `byte_size` is outside 5..=8.
    pub fn data_bits(&self) -> PsuResult<serialport::DataBits> {
        match self.byte_size {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(PsuError::Configuration(format!(
                "byte_size must be 5-8, got {}",
                other
            ))),
        }
    }

    /// Validates the link parameters.
    pub fn validate(&self) -> PsuResult<()> {
        if self.path.trim().is_empty() {
            return Err(PsuError::Configuration("link path is empty".into()));
        }
        if self.baud == 0 {
            return Err(PsuError::Configuration("baud must be non-zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(PsuError::Configuration("timeout must be non-zero".into()));
        }
        self.data_bits().map(|_| ())
    }
}

/// Fixed settle delays of the request/response protocol.
///
/// The device has no acknowledgment or framing, so these delays are what keeps commands
/// and replies paired up. They are protocol constants, not tuning knobs for speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTiming {
    /// Pause after opening the port before the first command
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,
    /// Pause after a command that expects no reply
    #[serde(with = "humantime_serde")]
    pub write_delay: Duration,
    /// Pause between sending a query and reading its reply
    #[serde(with = "humantime_serde")]
    pub query_delay: Duration,
}

impl ProtocolTiming {
    /// Warm-up after opening the port.
    pub const WARMUP: Duration = Duration::from_secs(2);
    /// Settle delay after a setter.
    pub const WRITE_DELAY: Duration = Duration::from_millis(100);
    /// Settle delay before reading a query reply.
    pub const QUERY_DELAY: Duration = Duration::from_millis(500);

    /// All delays zero. Only meaningful against a simulated transport.
    pub fn immediate() -> Self {
        Self {
            warmup: Duration::ZERO,
            write_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
        }
    }
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            warmup: Self::WARMUP,
            write_delay: Self::WRITE_DELAY,
            query_delay: Self::QUERY_DELAY,
        }
    }
}

/// Background monitoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between polls
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Alert when measured voltage exceeds this (V)
    pub voltage_threshold: f64,
    /// Alert when measured current exceeds this (A)
    pub current_threshold: f64,
    /// How much history to keep in memory
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Directory for CSV logs
    pub log_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            voltage_threshold: 14.0,
            current_threshold: 2.5,
            window: Duration::from_secs(30 * 60),
            log_dir: PathBuf::from("."),
        }
    }
}

impl MonitorConfig {
    /// Validates the monitoring parameters.
    pub fn validate(&self) -> PsuResult<()> {
        if self.interval.is_zero() {
            return Err(PsuError::Configuration(
                "monitor interval must be non-zero".into(),
            ));
        }
        for (name, value) in [
            ("voltage_threshold", self.voltage_threshold),
            ("current_threshold", self.current_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PsuError::Configuration(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl PsuConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> PsuResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: built-in defaults and environment variables still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PsuResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(PsuConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BK_PSU_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PsuResult<()> {
        crate::logging::parse_log_level(&self.application.log_level)?;
        self.link.validate()?;
        self.monitor.validate()
    }
}
