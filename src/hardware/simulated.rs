//! Simulated analog input device.
//!
//! Produces `floor(elapsed × sample_rate)` samples per channel since `start`,
//! each channel a sine with its own frequency and phase plus uniform noise.
//! It behaves like a real driver where it matters to the acquisition loop:
//!
//! - unknown custom scales are rejected when channels are opened
//! - raw-voltage channels are clamped to `±max_range`
//! - letting more than `input_buffer_size` samples pile up is a buffer
//!   overflow error
//! - in [`LoggingMode::LogAndRead`] every sample handed out is also appended
//!   to a TDMS file, finalized on `stop`

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{DataSource, LoggingMode};
use crate::channel::{ChannelConfig, ChannelUnits};
use crate::data::block::SampleBlock;
use crate::data::tdms::{ChannelLayout, FileLayout, PropertyValue, TdmsWriter};
use crate::error::{AppResult, DaqError};

/// Group name used in log files.
pub const LOG_GROUP: &str = "Analog Input";

/// Raw full-scale voltage fed into custom scales.
const SCALED_INPUT_VOLTS: f64 = 10.0;

/// `scaled = slope × volts + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    /// Engineering units per volt
    pub slope: f64,
    /// Offset in engineering units
    #[serde(default)]
    pub intercept: f64,
}

impl LinearScale {
    /// Apply the scale.
    pub fn apply(&self, volts: f64) -> f64 {
        self.slope * volts + self.intercept
    }
}

/// Behaviour of the simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Custom scales known to the device
    #[serde(default)]
    pub scales: BTreeMap<String, LinearScale>,
    /// Sine amplitude as a fraction of full scale
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// Frequency of the first channel; later channels are faster
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Uniform noise as a fraction of full scale
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Fixed RNG seed for reproducible noise
    #[serde(default)]
    pub seed: Option<u64>,
    /// Fail the read that would pass this many samples per channel
    #[serde(default)]
    pub fail_after_samples: Option<u64>,
}

fn default_amplitude() -> f64 {
    0.8
}

fn default_frequency() -> f64 {
    0.5
}

fn default_noise() -> f64 {
    0.01
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            scales: BTreeMap::new(),
            amplitude: default_amplitude(),
            frequency_hz: default_frequency(),
            noise: default_noise(),
            seed: None,
            fail_after_samples: None,
        }
    }
}

impl SimulatedConfig {
    /// Register a custom scale.
    pub fn with_scale(mut self, name: &str, scale: LinearScale) -> Self {
        self.scales.insert(name.to_string(), scale);
        self
    }
}

struct SimChannel {
    config: ChannelConfig,
    scale: Option<LinearScale>,
}

/// Simulated device implementing [`DataSource`].
pub struct SimulatedDevice {
    config: SimulatedConfig,
    device: String,
    channels: Vec<SimChannel>,
    sample_rate: f64,
    samples_per_channel: u64,
    input_buffer_size: u64,
    logging: LoggingMode,
    log_path: Option<PathBuf>,
    writer: Option<TdmsWriter<BufWriter<File>>>,
    started_at: Option<Instant>,
    produced: u64,
    rng: StdRng,
}

impl SimulatedDevice {
    /// Closed device with the given behaviour.
    pub fn new(config: SimulatedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            device: String::new(),
            channels: Vec::new(),
            sample_rate: 0.0,
            samples_per_channel: 0,
            input_buffer_size: u64::MAX,
            logging: LoggingMode::Off,
            log_path: None,
            writer: None,
            started_at: None,
            produced: 0,
            rng,
        }
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Samples per channel handed out since `start`.
    pub fn samples_read(&self) -> u64 {
        self.produced
    }

    fn generated(&self) -> u64 {
        self.started_at
            .map_or(0, |t| (t.elapsed().as_secs_f64() * self.sample_rate).floor() as u64)
    }

    fn open_log(&self, path: &Path) -> AppResult<TdmsWriter<BufWriter<File>>> {
        let now = Utc::now();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let layout = FileLayout {
            group: LOG_GROUP.to_string(),
            file_properties: vec![
                ("name".to_string(), title.into()),
                ("DateTime".to_string(), now.into()),
            ],
            group_properties: vec![("NI_DeviceName".to_string(), self.device.clone().into())],
            channels: self
                .channels
                .iter()
                .map(|ch| ChannelLayout {
                    name: ch.config.name.clone(),
                    properties: vec![
                        ("wf_increment".to_string(), PropertyValue::F64(1.0 / self.sample_rate)),
                        ("wf_start_offset".to_string(), PropertyValue::F64(0.0)),
                        ("wf_start_time".to_string(), now.into()),
                        ("unit_string".to_string(), ch.config.unit.clone().into()),
                        ("NI_ChannelName".to_string(), ch.config.name.clone().into()),
                        (
                            "NI_PhysicalChannel".to_string(),
                            ch.config.physical_channel(&self.device).into(),
                        ),
                    ],
                })
                .collect(),
        };
        let threshold = usize::try_from(self.samples_per_channel).unwrap_or(usize::MAX);
        Ok(TdmsWriter::create(path, layout)?.with_flush_threshold(threshold))
    }
}

impl DataSource for SimulatedDevice {
    fn open_channels(&mut self, device: &str, channels: &[ChannelConfig]) -> AppResult<()> {
        if device.trim().is_empty() {
            return Err(DaqError::HardwareConfig("Device name is empty".to_string()));
        }
        if channels.is_empty() {
            return Err(DaqError::HardwareConfig("No channels requested".to_string()));
        }

        let mut opened = Vec::with_capacity(channels.len());
        for ch in channels {
            let scale = match &ch.units {
                ChannelUnits::Volts => None,
                ChannelUnits::CustomScale(name) => Some(
                    *self
                        .config
                        .scales
                        .get(name)
                        .ok_or_else(|| DaqError::CustomScaleMissing { scale: name.clone() })?,
                ),
            };
            debug!(
                channel = %ch.name,
                physical = %ch.physical_channel(device),
                terminal = %ch.terminal_mode,
                "Opened simulated channel"
            );
            opened.push(SimChannel {
                config: ch.clone(),
                scale,
            });
        }

        self.device = device.to_string();
        self.channels = opened;
        Ok(())
    }

    fn configure_continuous(&mut self, sample_rate: f64, samples_per_channel: u64) -> AppResult<()> {
        if self.channels.is_empty() {
            return Err(DaqError::HardwareConfig(
                "Timing configured before channels were opened".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DaqError::HardwareConfig(format!(
                "Invalid sample rate {sample_rate}"
            )));
        }
        self.sample_rate = sample_rate;
        self.samples_per_channel = samples_per_channel.max(1);
        Ok(())
    }

    fn set_input_buffer_size(&mut self, samples_per_channel: u64) -> AppResult<()> {
        if samples_per_channel == 0 {
            return Err(DaqError::HardwareConfig(
                "Input buffer size must be non-zero".to_string(),
            ));
        }
        self.input_buffer_size = samples_per_channel;
        Ok(())
    }

    fn enable_logging(&mut self, path: &Path, mode: LoggingMode) -> AppResult<()> {
        self.logging = mode;
        self.log_path = (mode != LoggingMode::Off).then(|| path.to_path_buf());
        Ok(())
    }

    fn start(&mut self) -> AppResult<()> {
        if self.is_running() {
            return Err(DaqError::HardwareConfig("Task is already running".to_string()));
        }
        if self.sample_rate <= 0.0 {
            return Err(DaqError::HardwareConfig(
                "Sample clock is not configured".to_string(),
            ));
        }
        if let Some(path) = self.log_path.clone() {
            self.writer = Some(self.open_log(&path)?);
        }
        self.produced = 0;
        self.started_at = Some(Instant::now());
        info!(
            device = %self.device,
            channels = self.channels.len(),
            sample_rate = self.sample_rate,
            "Simulated acquisition started"
        );
        Ok(())
    }

    fn available_samples(&mut self) -> AppResult<usize> {
        if !self.is_running() {
            return Err(DaqError::Hardware("Task is not running".to_string()));
        }
        let backlog = self.generated().saturating_sub(self.produced);
        if backlog > self.input_buffer_size {
            return Err(DaqError::Hardware(format!(
                "Input buffer overflow: {backlog} samples pending, buffer holds {}",
                self.input_buffer_size
            )));
        }
        Ok(usize::try_from(backlog).unwrap_or(usize::MAX))
    }

    fn read(&mut self, n: usize, timeout: Duration, block: &mut SampleBlock) -> AppResult<usize> {
        if block.n_channels() != self.channels.len() {
            *block = SampleBlock::new(self.channels.len());
        }
        let deadline = Instant::now() + timeout;
        let mut available = self.available_samples()?;
        while available < n {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let tick = Duration::from_secs_f64(1.0 / self.sample_rate);
            thread::sleep((deadline - now).min(tick));
            available = self.available_samples()?;
        }

        let k = available.min(n);
        if let Some(limit) = self.config.fail_after_samples {
            if self.produced + k as u64 > limit {
                return Err(DaqError::Hardware(format!(
                    "Simulated device fault after {} samples",
                    self.produced
                )));
            }
        }

        block.reset(k);
        let rate = self.sample_rate;
        for (c, (ch, out)) in self
            .channels
            .iter()
            .zip(block.channels_mut())
            .enumerate()
        {
            let freq = self.config.frequency_hz * (1.0 + 0.5 * c as f64);
            let phase = c as f64 * PI / 3.0;
            for (i, slot) in out.iter_mut().enumerate() {
                let t = (self.produced + i as u64) as f64 / rate;
                let unit = self.config.amplitude * (2.0 * PI * freq * t + phase).sin()
                    + self.config.noise * self.rng.gen_range(-1.0..=1.0);
                let value = match ch.scale {
                    Some(scale) => scale.apply(unit * SCALED_INPUT_VOLTS),
                    None => unit * ch.config.max_range,
                };
                *slot = value.clamp(-ch.config.max_range, ch.config.max_range);
            }
        }
        self.produced += k as u64;

        if let Some(writer) = self.writer.as_mut() {
            writer.write_block(block)?;
        }
        Ok(k)
    }

    fn stop(&mut self) -> AppResult<()> {
        if self.started_at.take().is_none() {
            return Ok(());
        }
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        info!(samples = self.produced, "Simulated acquisition stopped");
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        let stopped = self.stop();
        self.channels.clear();
        self.log_path = None;
        self.logging = LoggingMode::Off;
        debug!(device = %self.device, "Simulated device closed");
        stopped
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                error!("Error stopping simulated device on drop: {}", e);
            }
        }
    }
}
