//! Settings loading using Figment.
//!
//! Settings are loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables prefixed with `WAVEFORM_DAQ_`, with `__` between
//!    section and key (e.g. `WAVEFORM_DAQ_ACQUISITION__SAMPLE_RATE=250`)
//!
//! The `[channels]` table is read separately with `toml` so that the
//! declaration order of the file survives; Figment's dictionaries are sorted.
//!
//! # Example
//! ```no_run
//! use waveform_daq::config::Settings;
//!
//! # fn main() -> waveform_daq::error::AppResult<()> {
//! let settings = Settings::load_from("config/daq.toml")?;
//! println!("Device: {}", settings.global.device);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::channel::{parse_channel_table, ChannelConfig};
use crate::error::{AppResult, DaqError};
use crate::hardware::SimulatedConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "WAVEFORM_DAQ_";

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device selection
    pub global: GlobalConfig,
    /// Acquisition timing and loop tuning
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Output file placement
    #[serde(default)]
    pub storage: StorageConfig,
    /// Behaviour of the simulated device
    #[serde(default)]
    pub simulation: SimulatedConfig,
    /// Channels in declaration order
    #[serde(skip)]
    pub channels: Vec<ChannelConfig>,
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

/// Device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Device name, e.g. `Dev1`
    pub device: String,
}

/// Acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Samples per second per channel
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Length of the live window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    /// Maximum samples per channel taken in one read
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
    /// Per-channel buffer hint for continuous timing
    #[serde(default = "default_samples_per_channel")]
    pub samples_per_channel: u64,
    /// Driver-side input buffer, in samples per channel
    #[serde(default = "default_input_buffer_size")]
    pub input_buffer_size: u64,
    /// Sleep between polls when no samples are available
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Timeout of a single read
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving the waveform files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name prefix, followed by a timestamp
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_name() -> String {
    "waveform-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    100.0
}

fn default_window_seconds() -> f64 {
    60.0
}

fn default_batch_cap() -> usize {
    1000
}

fn default_samples_per_channel() -> u64 {
    1000
}

fn default_input_buffer_size() -> u64 {
    10_000
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Measurements")
}

fn default_file_prefix() -> String {
    "measurement".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            window_seconds: default_window_seconds(),
            batch_cap: default_batch_cap(),
            samples_per_channel: default_samples_per_channel(),
            input_buffer_size: default_input_buffer_size(),
            poll_interval: default_poll_interval(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl AcquisitionConfig {
    /// Number of samples per channel held in the live window.
    pub fn window_capacity(&self) -> usize {
        ((self.sample_rate * self.window_seconds).ceil() as usize).max(1)
    }
}

impl Settings {
    /// Load settings from a TOML file plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_parts(figment, &raw)
    }

    /// Parse settings from TOML text, without environment overrides.
    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        Self::from_parts(Figment::new().merge(Toml::string(raw)), raw)
    }

    fn from_parts(figment: Figment, raw: &str) -> AppResult<Self> {
        let mut settings: Settings = figment.extract()?;
        let table: ChannelTable =
            toml::from_str(raw).map_err(|e| DaqError::Configuration(e.to_string()))?;
        settings.channels = parse_channel_table(table.channels.0)?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.global.device.trim().is_empty() {
            return Err(DaqError::Configuration(
                "global.device must not be empty".to_string(),
            ));
        }

        let acq = &self.acquisition;
        if !(acq.sample_rate.is_finite() && acq.sample_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid sample_rate {}. Must be positive",
                acq.sample_rate
            )));
        }
        if !(acq.window_seconds.is_finite() && acq.window_seconds > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid window_seconds {}. Must be positive",
                acq.window_seconds
            )));
        }
        if acq.batch_cap == 0 || acq.samples_per_channel == 0 || acq.input_buffer_size == 0 {
            return Err(DaqError::Configuration(
                "batch_cap, samples_per_channel and input_buffer_size must be non-zero"
                    .to_string(),
            ));
        }
        if acq.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.channels.is_empty() {
            return Err(DaqError::Configuration(
                "At least one channel must be configured".to_string(),
            ));
        }

        Ok(())
    }
}

/// Just the `[channels]` table, in file order.
#[derive(Deserialize)]
struct ChannelTable {
    #[serde(default)]
    channels: OrderedEntries,
}

#[derive(Default)]
struct OrderedEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of channel name = \"description\" entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, description)) = map.next_entry::<String, String>()? {
                    entries.push((name, description));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
