//! Loading a persisted capture for playback and export.

use std::path::Path;

use tracing::{debug, warn};

use crate::data::tdms::{Properties, PropertyValue, TdmsFile};
use crate::error::{AppResult, DaqError};

/// Property holding the sample spacing in seconds.
pub const WF_INCREMENT: &str = "wf_increment";

/// One channel of a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedChannel {
    /// Channel name
    pub name: String,
    /// Samples in file order
    pub samples: Vec<f64>,
    /// Properties as stored
    pub properties: Properties,
}

impl CapturedChannel {
    /// Display unit, when recorded.
    pub fn unit(&self) -> Option<&str> {
        crate::data::tdms::types::get_property(&self.properties, "unit_string")
            .and_then(PropertyValue::as_str)
    }
}

/// A loaded capture: time axis plus channels in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformCapture {
    /// Seconds per sample
    pub sample_increment: f64,
    /// `time_axis[i] = i × sample_increment`
    pub time_axis: Vec<f64>,
    /// Channels in file order
    pub channels: Vec<CapturedChannel>,
}

impl WaveformCapture {
    /// Load the first group of a TDMS file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let file = TdmsFile::open(path.as_ref())?;
        let capture = Self::from_tdms(&file)?;
        debug!(
            path = %path.as_ref().display(),
            channels = capture.channels.len(),
            samples = capture.num_samples(),
            increment = capture.sample_increment,
            "Loaded capture"
        );
        Ok(capture)
    }

    /// Build from an already decoded file.
    pub fn from_tdms(file: &TdmsFile) -> AppResult<Self> {
        let group = file
            .groups
            .first()
            .ok_or_else(|| DaqError::FileFormat("File contains no groups".to_string()))?;
        if group.channels.is_empty() {
            return Err(DaqError::FileFormat(format!(
                "Group '{}' contains no channels",
                group.name
            )));
        }

        let sample_increment = group
            .channels
            .iter()
            .find_map(|ch| ch.property(WF_INCREMENT).and_then(PropertyValue::as_f64))
            .unwrap_or(1.0);

        let mut channels = Vec::with_capacity(group.channels.len());
        for ch in &group.channels {
            let samples = ch.data.as_f64().ok_or_else(|| {
                DaqError::FileFormat(format!("Channel '{}' does not hold numeric data", ch.name))
            })?;
            channels.push(CapturedChannel {
                name: ch.name.clone(),
                samples: samples.to_vec(),
                properties: ch.properties.clone(),
            });
        }

        let num_samples = channels[0].samples.len();
        if channels.iter().any(|c| c.samples.len() != num_samples) {
            warn!(
                group = %group.name,
                num_samples,
                "Channels have different lengths; time axis follows the first channel"
            );
        }

        Ok(Self {
            sample_increment,
            time_axis: time_axis(num_samples, sample_increment),
            channels,
        })
    }

    /// Samples in the first channel.
    pub fn num_samples(&self) -> usize {
        self.time_axis.len()
    }

    /// Channel names in file order.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a channel by name.
    pub fn channel(&self, name: &str) -> Option<&CapturedChannel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// `[0, inc, 2·inc, …]` with `n` entries.
pub fn time_axis(n: usize, increment: f64) -> Vec<f64> {
    (0..n).map(|i| i as f64 * increment).collect()
}

/// Load a capture from `path`.
pub fn load_waveform<P: AsRef<Path>>(path: P) -> AppResult<WaveformCapture> {
    WaveformCapture::load(path)
}
