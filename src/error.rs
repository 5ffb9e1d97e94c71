//! # Error Types
//!
//! Custom error types for stickcal using `thiserror`.

use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::gamepad::GamepadError;

/// Main error type for stickcal
#[derive(Debug, Error)]
pub enum StickcalError {
    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but holds out-of-range values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Virtual gamepad errors
    #[error("Gamepad error: {0}")]
    Gamepad(#[from] GamepadError),

    /// Calibration protocol rejections
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Report export errors
    #[error("Export error: {0}")]
    Export(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for stickcal
pub type Result<T> = std::result::Result<T, StickcalError>;
