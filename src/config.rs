//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/probe_station.toml` (or an explicit path)
//! 2. Environment variables prefixed with `PROBESTATION_`, nested keys
//!    separated by `__`
//!
//! ```text
//! PROBESTATION_APPLICATION__LOG_LEVEL=debug
//! PROBESTATION_SWEEP__POINTS=101
//! ```
//!
//! The voltmeter section is optional; when present the station starts in
//! 4-wire mode.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::adapters::{ScpiAdapter, SerialAdapterBuilder, VisaAdapterBuilder};
use crate::error::AppResult;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/probe_station.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PROBESTATION_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values were read but are not usable
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Source-meter connection
    pub source: InstrumentConfig,
    /// Nanovoltmeter connection, enables 4-wire mode
    #[serde(default)]
    pub voltmeter: Option<InstrumentConfig>,
    /// Default sweep
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Transport for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum InstrumentConfig {
    /// GPIB/USB/LAN through VISA
    Visa(VisaConfig),
    /// RS-232
    Serial(SerialConfig),
}

/// VISA connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisaConfig {
    /// VISA resource string (e.g., "GPIB0::24::INSTR")
    pub resource: String,
    /// Open and I/O timeout in milliseconds
    #[serde(default = "default_visa_timeout")]
    pub timeout_ms: u64,
    /// Response terminator
    #[serde(default = "default_terminator")]
    pub read_terminator: String,
    /// Command terminator
    #[serde(default = "default_terminator")]
    pub write_terminator: String,
}

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Query timeout in milliseconds
    #[serde(default = "default_serial_timeout")]
    pub timeout_ms: u64,
    /// Command terminator
    #[serde(default = "default_terminator")]
    pub line_terminator: String,
    /// Byte that ends a response; defaults to the last character of
    /// `line_terminator`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_delimiter: Option<char>,
}

impl SerialConfig {
    /// Character a response is read up to
    pub fn response_delimiter(&self) -> char {
        self.response_delimiter
            .or_else(|| self.line_terminator.chars().last())
            .unwrap_or('\n')
    }
}

/// Default sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// First setpoint (V)
    #[serde(default = "default_sweep_start")]
    pub start: f64,
    /// Last setpoint (V)
    #[serde(default = "default_sweep_stop")]
    pub stop: f64,
    /// Number of setpoints
    #[serde(default = "default_sweep_points")]
    pub points: usize,
    /// Integration time on every instrument
    #[serde(default = "default_nplc")]
    pub nplc: f64,
    /// 4-wire settling delay in milliseconds
    #[serde(default = "default_settling_delay")]
    pub settling_delay_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: default_sweep_start(),
            stop: default_sweep_stop(),
            points: default_sweep_points(),
            nplc: default_nplc(),
            settling_delay_ms: default_settling_delay(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Probe Station".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_visa_timeout() -> u64 {
    5000
}

fn default_serial_timeout() -> u64 {
    1000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_sweep_start() -> f64 {
    -0.1
}

fn default_sweep_stop() -> f64 {
    0.1
}

fn default_sweep_points() -> usize {
    21
}

fn default_nplc() -> f64 {
    1.0
}

fn default_settling_delay() -> u64 {
    10
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl StationConfig {
    /// Load configuration from `config/probe_station.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.as_ref().display());
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.source.validate("source")?;
        if let Some(voltmeter) = &self.voltmeter {
            voltmeter.validate("voltmeter")?;
        }

        let sweep = &self.sweep;
        if sweep.points == 0 {
            return Err(ConfigError::ValidationError(
                "sweep.points must be > 0".to_string(),
            ));
        }
        if !sweep.start.is_finite() || !sweep.stop.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "sweep bounds must be finite, got start={} stop={}",
                sweep.start, sweep.stop
            )));
        }
        if sweep.nplc.is_nan() || sweep.nplc <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "sweep.nplc must be > 0, got {}",
                sweep.nplc
            )));
        }

        Ok(())
    }
}

impl SweepConfig {
    /// Settling delay as a Duration
    pub fn settling_delay(&self) -> Duration {
        Duration::from_millis(self.settling_delay_ms)
    }
}

impl InstrumentConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        match self {
            InstrumentConfig::Visa(visa) if visa.resource.trim().is_empty() => Err(
                ConfigError::ValidationError(format!("{}: 'resource' cannot be empty", section)),
            ),
            InstrumentConfig::Serial(serial) if serial.port.trim().is_empty() => Err(
                ConfigError::ValidationError(format!("{}: 'port' cannot be empty", section)),
            ),
            InstrumentConfig::Serial(serial) if serial.baud_rate == 0 => Err(
                ConfigError::ValidationError(format!("{}: 'baud_rate' must be > 0", section)),
            ),
            _ => Ok(()),
        }
    }

    /// Open the transport described by this section
    ///
    /// # Errors
    /// `Communication` if the port or resource cannot be opened, including
    /// when the matching transport feature is not compiled in.
    pub async fn connect(&self) -> AppResult<Arc<dyn ScpiAdapter>> {
        let adapter: Arc<dyn ScpiAdapter> = match self {
            InstrumentConfig::Visa(visa) => Arc::new(
                VisaAdapterBuilder::new(visa.resource.clone())
                    .with_timeout(Duration::from_millis(visa.timeout_ms))
                    .with_read_terminator(visa.read_terminator.clone())
                    .with_write_terminator(visa.write_terminator.clone())
                    .connect()
                    .await?,
            ),
            InstrumentConfig::Serial(serial) => Arc::new(
                SerialAdapterBuilder::new(serial.port.clone(), serial.baud_rate)
                    .with_timeout(Duration::from_millis(serial.timeout_ms))
                    .with_line_terminator(serial.line_terminator.clone())
                    .with_response_delimiter(serial.response_delimiter())
                    .open()
                    .await?,
            ),
        };
        Ok(adapter)
    }
}
