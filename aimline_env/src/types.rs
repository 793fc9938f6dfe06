//! Plain data records exchanged across the tracking boundary.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Aiming angle produced by a marker centred in the image.
///
/// With the marker at the top of the reference circle and P at the centre,
/// the chord P→E points straight up the diameter's normal.
pub const REST_ALPHA: f64 = FRAC_PI_2;

/// One frame of tracking output.
///
/// Produced by the tracking thread, consumed once per render tick as a whole
/// copy. `distance_to_cam == 0.0` is the "no marker visible" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySample {
    /// Horizontal offset `d` along the reference diameter (world units)
    pub position_offset: f64,

    /// Aiming angle `alpha` in radians
    pub orientation_alpha: f64,

    /// Marker in-plane rotation in degrees
    pub rotation_angle: f64,

    /// Estimated marker distance from the camera (0 = no detection)
    pub distance_to_cam: f64,

    /// Trigger gesture held
    pub shooting: bool,

    /// Reload gesture held
    pub reloading: bool,
}

impl GeometrySample {
    /// Creates a validated sample with gesture flags cleared.
    ///
    /// Rejects non-finite values and negative distances.
    pub fn new(
        position_offset: f64,
        orientation_alpha: f64,
        rotation_angle: f64,
        distance_to_cam: f64,
    ) -> Result<Self, EnvError> {
        let sample = Self {
            position_offset,
            orientation_alpha,
            rotation_angle,
            distance_to_cam,
            shooting: false,
            reloading: false,
        };
        if !sample.is_finite() {
            return Err(EnvError::InvalidSample(format!("non-finite field in {:?}", sample)));
        }
        if distance_to_cam < 0.0 {
            return Err(EnvError::InvalidSample(format!(
                "negative distance {:.4}",
                distance_to_cam
            )));
        }
        Ok(sample)
    }

    /// The resting sample: marker centred, nothing detected.
    pub fn no_detection() -> Self {
        Self {
            position_offset: 0.0,
            orientation_alpha: REST_ALPHA,
            rotation_angle: 0.0,
            distance_to_cam: 0.0,
            shooting: false,
            reloading: false,
        }
    }

    /// Sets the gesture flags.
    pub fn with_gestures(mut self, shooting: bool, reloading: bool) -> Self {
        self.shooting = shooting;
        self.reloading = reloading;
        self
    }

    /// Keeps the last-known geometry but marks the marker as lost.
    pub fn without_detection(&self) -> Self {
        Self {
            distance_to_cam: 0.0,
            shooting: false,
            reloading: false,
            ..*self
        }
    }

    /// Returns true if a marker was visible for this sample.
    pub fn has_detection(&self, epsilon: f64) -> bool {
        self.distance_to_cam > epsilon
    }

    /// Returns true if every float field is finite.
    pub fn is_finite(&self) -> bool {
        self.position_offset.is_finite()
            && self.orientation_alpha.is_finite()
            && self.rotation_angle.is_finite()
            && self.distance_to_cam.is_finite()
    }
}

impl Default for GeometrySample {
    fn default() -> Self {
        Self::no_detection()
    }
}

/// Raw per-frame output of a marker detector.
///
/// This is what a camera pipeline knows before any circle geometry is
/// applied: where the marker centre projected, how it is twisted, how far
/// away it appears, plus the hand-gesture flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    /// Projected marker centre, image column in pixels
    pub x_pixel: f64,

    /// In-plane rotation in degrees, [-180, 180]
    pub rotation_angle: f64,

    /// Estimated distance from camera (world units)
    pub distance_to_cam: f64,

    /// Trigger gesture held
    pub shooting: bool,

    /// Reload gesture held
    pub reloading: bool,
}

impl MarkerDetection {
    /// Creates a detection with gesture flags cleared.
    pub fn new(x_pixel: f64, rotation_angle: f64, distance_to_cam: f64) -> Self {
        Self {
            x_pixel,
            rotation_angle,
            distance_to_cam,
            shooting: false,
            reloading: false,
        }
    }
}
