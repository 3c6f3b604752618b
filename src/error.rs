//! # Error Types
//!
//! Custom error types for joycal using `thiserror`.

use thiserror::Error;

/// Main error type for joycal
#[derive(Debug, Error)]
pub enum JoycalError {
    /// The device could not be opened (missing, permission denied, not a joystick)
    #[error("Device {path} unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },

    /// The device went away while reading, or the handle was closed
    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    /// A saved profile exists but cannot be trusted
    #[error("Profile {path} is corrupt: {reason}")]
    ConfigCorrupt { path: String, reason: String },

    /// A mapping edit or mapping table violates its invariants
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// A calibration record violates `min <= center <= max`
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// No calibration session is open for the axis
    #[error("No calibration session open for axis {0}")]
    NoCalibrationSession(usize),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Profile serialization errors
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for joycal
pub type Result<T> = std::result::Result<T, JoycalError>;
