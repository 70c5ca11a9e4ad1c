//! Hardware abstraction for continuous analog input.
//!
//! The acquisition session drives a device exclusively through the
//! [`DataSource`] trait, in this order:
//!
//! 1. `open_channels` – one hardware channel per [`ChannelConfig`]
//! 2. `configure_continuous` – sample clock, continuous mode
//! 3. `set_input_buffer_size` – driver-side buffer
//! 4. `enable_logging` – persistence of every sample to a waveform file
//! 5. `start`
//! 6. repeated `available_samples` / `read`
//! 7. `stop`, `close`
//!
//! # Contract
//! - Methods are blocking; `read` blocks at most for its timeout.
//! - A source is owned by exactly one run and moved into its worker thread,
//!   so implementations need `Send` but not `Sync`.
//! - `close` must be safe to call in any state, including after a failed
//!   `open_channels`, and more than once.
//! - Setup failures the operator must fix are reported as
//!   [`DaqError::CustomScaleMissing`](crate::error::DaqError::CustomScaleMissing)
//!   or [`DaqError::HardwareConfig`](crate::error::DaqError::HardwareConfig);
//!   failures while acquiring as
//!   [`DaqError::Hardware`](crate::error::DaqError::Hardware).

pub mod simulated;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::data::block::SampleBlock;
use crate::error::AppResult;

pub use simulated::{LinearScale, SimulatedConfig, SimulatedDevice};

/// What the driver does with acquired samples besides handing them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Samples are only returned by `read`
    #[default]
    Off,
    /// Every sample is written to the log file and also returned by `read`
    LogAndRead,
}

/// Capability: continuous multi-channel analog input.
pub trait DataSource: Send {
    /// Create one hardware channel per config, in order.
    fn open_channels(&mut self, device: &str, channels: &[ChannelConfig]) -> AppResult<()>;

    /// Configure the sample clock for continuous acquisition.
    fn configure_continuous(&mut self, sample_rate: f64, samples_per_channel: u64) -> AppResult<()>;

    /// Size of the driver-side input buffer, in samples per channel.
    fn set_input_buffer_size(&mut self, samples_per_channel: u64) -> AppResult<()>;

    /// Persist samples to `path`.
    fn enable_logging(&mut self, path: &Path, mode: LoggingMode) -> AppResult<()>;

    /// Begin acquiring.
    fn start(&mut self) -> AppResult<()>;

    /// Samples per channel ready to be read without blocking.
    fn available_samples(&mut self) -> AppResult<usize>;

    /// Read up to `n` samples per channel into `block`.
    ///
    /// Waits at most `timeout` for `n` samples to become available and
    /// returns the number actually read; `block` is resized to match. Zero
    /// after a timeout is not an error.
    fn read(&mut self, n: usize, timeout: Duration, block: &mut SampleBlock) -> AppResult<usize>;

    /// Stop acquiring and finalize any log file.
    fn stop(&mut self) -> AppResult<()>;

    /// Release all device resources.
    fn close(&mut self) -> AppResult<()>;
}

/// Creates a fresh data source for each run.
pub type DataSourceFactory = Arc<dyn Fn() -> AppResult<Box<dyn DataSource>> + Send + Sync>;

/// Factory producing simulated devices with a shared configuration.
pub fn simulated_factory(config: SimulatedConfig) -> DataSourceFactory {
    Arc::new(move || Ok(Box::new(SimulatedDevice::new(config.clone())) as Box<dyn DataSource>))
}
