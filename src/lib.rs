//! # Waveform DAQ Core Library
//!
//! Continuous multi-channel analog acquisition. A session samples the
//! configured channels at a fixed rate, keeps a sliding window of the most
//! recent samples for display, and lets the device log the full-rate stream
//! to a TDMS waveform file. Persisted files can be loaded back for playback
//! or exported as text.
//!
//! ## Crate Structure
//!
//! - **`channel`**: `ChannelConfig` and the channel description parser.
//! - **`config`**: `Settings` loaded with Figment from TOML and environment.
//! - **`data`**: sample blocks, the `SlidingBuffer`, the TDMS codec, capture
//!   loading and CSV export.
//! - **`error`**: the `DaqError` enum shared by every module.
//! - **`hardware`**: the `DataSource` trait and a simulated device.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`session`**: `AcquisitionSession`, the run state machine and the
//!   snapshot publishing contract.

pub mod channel;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;

pub use channel::{ChannelConfig, ChannelUnits, TerminalMode};
pub use error::{AppResult, DaqError, ErrorKind};
pub use session::{AcquisitionSession, SessionState};
