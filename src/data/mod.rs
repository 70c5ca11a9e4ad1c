//! Sample handling and persistence.
//!
//! - [`block`]: channel-major blocks exchanged with data sources
//! - [`sliding_buffer`]: the live window and its snapshots
//! - [`tdms`]: waveform container codec
//! - [`waveform`]: loading a persisted capture
//! - [`export`]: text export (feature `storage_csv`)

pub mod block;
#[cfg(feature = "storage_csv")]
pub mod export;
pub mod sliding_buffer;
pub mod tdms;
pub mod waveform;

pub use block::SampleBlock;
pub use sliding_buffer::{SlidingBuffer, WindowSnapshot};
pub use waveform::{load_waveform, CapturedChannel, WaveformCapture};
