//! TDMS waveform container support.
//!
//! - [`reader`]: decodes any little- or big-endian file made of contiguous or
//!   interleaved segments (DAQmx raw layouts are rejected)
//! - [`writer`]: streams one group of `f64` channels to disk
//! - [`types`]: constants, data types, property values and object paths

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::{ChannelData, TdmsChannel, TdmsFile, TdmsGroup};
pub use types::{DataType, ObjectPath, Properties, PropertyValue, TdmsTimestamp};
pub use writer::{ChannelLayout, FileLayout, TdmsWriter};
