//! Error types for the Aimline boundary layer.

use thiserror::Error;

/// Errors raised at the tracking boundary.
///
/// None of these are fatal to the render loop: the tracking thread turns
/// every one of them into a "no detection" sample.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The capture device could not be opened
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The capture device stopped delivering frames
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// A sample carried non-finite or out-of-range values
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a capture-unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::CaptureUnavailable(msg.into())
    }

    /// Creates a device-lost error.
    pub fn lost(msg: impl Into<String>) -> Self {
        Self::DeviceLost(msg.into())
    }

    /// Returns true if the source must be reopened before reading again.
    pub fn needs_reopen(&self) -> bool {
        matches!(self, Self::CaptureUnavailable(_) | Self::DeviceLost(_))
    }
}
