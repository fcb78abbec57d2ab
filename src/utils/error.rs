//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Bad format, quality, region or other setting. Raised before any
    /// resource is opened.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Display unavailable: {0}")]
    DisplayUnavailable(String),

    #[error("No audio input device found")]
    NoAudioDevice,

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transient frame or chunk read failure
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Encoder process error: {0}")]
    EncoderProcess(String),

    #[error("Mux error: {0}")]
    Mux(String),

    #[error("Shutdown timed out: {0}")]
    ShutdownTimeout(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Whether the caller may keep going without the affected stream
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RecorderError::DisplayUnavailable(_)
                | RecorderError::NoAudioDevice
                | RecorderError::DeviceUnavailable(_)
                | RecorderError::Capture(_)
                | RecorderError::Mux(_)
        )
    }
}

/// Error response for collaborators (CLI, GUI)
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::Configuration(_) => "CONFIGURATION_ERROR",
            RecorderError::DisplayUnavailable(_) => "DISPLAY_UNAVAILABLE",
            RecorderError::NoAudioDevice => "NO_AUDIO_DEVICE",
            RecorderError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            RecorderError::Capture(_) => "CAPTURE_ERROR",
            RecorderError::EncoderProcess(_) => "ENCODER_PROCESS_ERROR",
            RecorderError::Mux(_) => "MUX_ERROR",
            RecorderError::ShutdownTimeout(_) => "SHUTDOWN_TIMEOUT",
            RecorderError::InvalidState(_) => "INVALID_STATE",
            RecorderError::Io(_) => "IO_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_code() {
        let response: ErrorResponse = RecorderError::Configuration("bad fps".into()).into();
        assert_eq!(response.code, "CONFIGURATION_ERROR");
        assert!(response.message.contains("bad fps"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(RecorderError::NoAudioDevice.is_recoverable());
        assert!(RecorderError::DisplayUnavailable("no X server".into()).is_recoverable());
        assert!(!RecorderError::EncoderProcess("spawn failed".into()).is_recoverable());
        assert!(!RecorderError::Configuration("format".into()).is_recoverable());
    }
}
