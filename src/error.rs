//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report failures
//! from configuration parsing, hardware setup, the acquisition loop, and the
//! waveform container reader.
//!
//! ## Error Hierarchy
//!
//! - **`Settings`**: Wraps `figment` extraction errors (missing file, bad types).
//! - **`Configuration`**: Semantic configuration problems, such as a malformed
//!   channel description or a non-positive sample rate.
//! - **`CustomScaleMissing`** / **`HardwareConfig`**: The driver refused the
//!   requested channel setup. These are shown to the operator verbatim.
//! - **`Hardware`**: Runtime driver failures inside the read loop (including
//!   input buffer overflow).
//! - **`Io`** / **`Csv`**: File system and text export failures.
//! - **`FileFormat`**: A waveform container that cannot be decoded.
//! - **`AlreadyRunning`**: `start()` on a session that already has a live run.
//!
//! Every variant maps onto an [`ErrorKind`], which is the coarse category the
//! session and the CLI branch on.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration could not be parsed or validated.
    Config,
    /// The device rejected the channel or timing setup.
    HardwareConfig,
    /// The device failed while acquiring.
    Hardware,
    /// File system failure.
    Io,
    /// A container file could not be decoded.
    FileFormat,
    /// A run is already in progress.
    AlreadyRunning,
    /// Invalid data handed to a processing stage.
    Processing,
}

/// Application error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings file or environment could not be extracted.
    #[error("Configuration error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A channel refers to a custom scale the device does not know.
    #[error("Custom scale '{scale}' does not exist on the device")]
    CustomScaleMissing {
        /// Scale name as written in the channel table
        scale: String,
    },

    /// The device rejected the task setup.
    #[error("Hardware configuration error: {0}")]
    HardwareConfig(String),

    /// The device failed during acquisition.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text export failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Waveform container could not be decoded.
    #[error("Invalid waveform file: {0}")]
    FileFormat(String),

    /// `start()` while a run is live.
    #[error("Acquisition is already running")]
    AlreadyRunning,

    /// Invalid data handed to a processing stage.
    #[error("Data processing error: {0}")]
    Processing(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Settings(Box::new(err))
    }
}

impl DaqError {
    /// Coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Settings(_) | DaqError::Configuration(_) => ErrorKind::Config,
            DaqError::CustomScaleMissing { .. } | DaqError::HardwareConfig(_) => {
                ErrorKind::HardwareConfig
            }
            DaqError::Hardware(_) => ErrorKind::Hardware,
            DaqError::Io(_) => ErrorKind::Io,
            #[cfg(feature = "storage_csv")]
            DaqError::Csv(_) => ErrorKind::Io,
            DaqError::FileFormat(_) => ErrorKind::FileFormat,
            DaqError::AlreadyRunning => ErrorKind::AlreadyRunning,
            DaqError::Processing(_) => ErrorKind::Processing,
        }
    }

    /// True when the operator has to fix the device setup before retrying.
    pub fn is_hardware_config(&self) -> bool {
        self.kind() == ErrorKind::HardwareConfig
    }

    /// Title and body suitable for an operator-facing dialog.
    pub fn user_message(&self) -> (String, String) {
        match self {
            DaqError::CustomScaleMissing { scale } => (
                "Missing Custom Scale".to_string(),
                format!(
                    "The custom scale '{scale}' does not exist.\n\n\
                     Please create this scale in the device configuration and restart acquisition."
                ),
            ),
            DaqError::HardwareConfig(msg) => (
                "Task Creation Issue".to_string(),
                format!("The acquisition task could not be created.\n\n{msg}"),
            ),
            DaqError::AlreadyRunning => (
                "Acquisition Running".to_string(),
                "Stop the current acquisition before starting a new one.".to_string(),
            ),
            other => ("Error".to_string(), other.to_string()),
        }
    }
}
