//! Marker source abstraction for the tracking thread.

use crate::error::EnvError;
use crate::types::MarkerDetection;

/// Producer of raw marker detections.
///
/// # Implementations
///
/// - **Production**: a webcam + fiducial detector pipeline
/// - **Simulation**: `OracleSource` in `aimline_sim`, seeded and scripted
///
/// # Blocking
///
/// `next_detection` may block on frame capture. It is only ever called from
/// the background tracking thread, never from the render loop.
pub trait MarkerSource: Send + 'static {
    /// Opens the capture device.
    ///
    /// # Returns
    /// * `Ok(())` - Ready to read frames
    /// * `Err(EnvError::CaptureUnavailable)` - Device could not be opened
    fn open(&mut self) -> Result<(), EnvError>;

    /// Reads one frame and runs detection on it.
    ///
    /// # Returns
    /// * `Ok(Some(detection))` - A marker was found
    /// * `Ok(None)` - Frame read, no marker visible
    /// * `Err(_)` - Frame could not be read
    fn next_detection(&mut self) -> Result<Option<MarkerDetection>, EnvError>;

    /// Releases the capture device.
    fn close(&mut self) {}

    /// Human-readable source name (for logging).
    fn name(&self) -> &str {
        "marker-source"
    }
}
