//! The "GEOMETRY" Engine - marker column to aim angle
//!
//! The player's marker moves left-right in front of the webcam. Its image
//! column is read as a position on the top half of a reference circle of
//! radius `r`:
//!
//! ```text
//!                 E (arc end)
//!              .-'*'-.
//!           .'   /    '.
//!          /    /alpha  \
//!         |----P---------|     P = (d, 0) on the diameter
//!        -r    d    0    +r
//! ```
//!
//! - `d` is the column mapped onto the diameter and damped by `artistic`
//! - `arc_deg` is the column mapped onto [-90°, +90°], measured from the top
//! - `alpha` is the angle of the chord P→E against the +x diameter

use aimline_env::{GeometrySample, MarkerDetection};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Pinhole distances are scaled by this factor to match the tape measure.
const DISTANCE_CORRECTION: f64 = 1.39;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Calibration for the circle geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Reference circle radius `r` in world units (default: 0.4)
    pub radius: f64,

    /// Damping applied to `d` so the weapon moves less than the hand (default: 0.8)
    pub artistic: f64,

    /// Camera image width in pixels (default: 1280)
    pub image_width: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            radius: 0.4,
            artistic: 0.8,
            image_width: 1280.0,
        }
    }
}

impl GeometryConfig {
    /// Checks the calibration can be resolved without dividing by zero.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if !self.radius.is_finite() || self.radius.abs() < f64::EPSILON {
            return Err(GeometryError::ZeroRadius);
        }
        if self.radius < 0.0 {
            return Err(GeometryError::NegativeRadius(self.radius));
        }
        if !self.image_width.is_finite() || self.image_width <= 0.0 {
            return Err(GeometryError::InvalidImageWidth(self.image_width));
        }
        if !self.artistic.is_finite() || self.artistic <= 0.0 || self.artistic > 1.0 {
            return Err(GeometryError::InvalidArtistic(self.artistic));
        }
        Ok(())
    }
}

/// Geometry domain errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Reference circle radius must be non-zero")]
    ZeroRadius,

    #[error("Reference circle radius must be positive, got {0}")]
    NegativeRadius(f64),

    #[error("Image width must be positive, got {0}")]
    InvalidImageWidth(f64),

    #[error("Artistic damping must be in (0, 1], got {0}")]
    InvalidArtistic(f64),

    #[error("Non-finite input: {0}")]
    NonFinite(&'static str),
}

// ============================================================================
// RESULT
// ============================================================================

/// Output of one geometry resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcGeometry {
    /// Offset of P along the diameter, within [-r/2, r/2]
    pub d: f64,

    /// Arc angle from the top of the circle, degrees in [-90, 90]
    pub arc_deg: f64,

    /// Chord angle at P, radians in (-π, π]
    pub alpha: f64,

    /// Arc end point E
    pub arc_end: Point2<f64>,
}

// ============================================================================
// PURE FUNCTIONS
// ============================================================================

/// Angle at `P = (d, 0)` of the chord to the arc end for `arc_deg`.
///
/// Returns `(alpha, E)` with `alpha` in (-π, π].
pub fn alpha_from_arc(r: f64, d: f64, arc_deg: f64) -> Result<(f64, Point2<f64>), GeometryError> {
    if !r.is_finite() || r.abs() < f64::EPSILON {
        return Err(GeometryError::ZeroRadius);
    }
    if !d.is_finite() || !arc_deg.is_finite() {
        return Err(GeometryError::NonFinite("d/arc_deg"));
    }

    // Top of the circle is 90° in standard position; clockwise arc decreases it
    let theta = (90.0 - arc_deg).to_radians();
    let end = Point2::new(r * theta.cos(), r * theta.sin());

    let alpha = (end.y - 0.0).atan2(end.x - d);
    let alpha = if alpha <= -PI { alpha + 2.0 * PI } else { alpha };

    Ok((alpha, end))
}

/// Resolves an image column into circle geometry.
///
/// Columns outside `[0, image_width]` are clamped so `d` stays within
/// `[-r/2, r/2]`.
pub fn resolve(
    x_pixel: f64,
    image_width: f64,
    r: f64,
    artistic: f64,
) -> Result<ArcGeometry, GeometryError> {
    GeometryConfig {
        radius: r,
        artistic,
        image_width,
    }
    .validate()?;
    if !x_pixel.is_finite() {
        return Err(GeometryError::NonFinite("x_pixel"));
    }

    let ratio = (x_pixel / image_width).clamp(0.0, 1.0);
    let d = (ratio * r - r / 2.0) * artistic;
    let arc_deg = ratio * 180.0 - 90.0;
    let (alpha, arc_end) = alpha_from_arc(r, d, arc_deg)?;

    Ok(ArcGeometry {
        d,
        arc_deg,
        alpha,
        arc_end,
    })
}

/// Pinhole distance estimate from the four projected marker corners.
///
/// Corners are in image order TL, TR, BR, BL. Returns `None` for a
/// degenerate (collapsed) quad.
pub fn estimate_marker_distance(
    corners: &[Point2<f64>; 4],
    focal_px: f64,
    marker_size: f64,
) -> Option<f64> {
    let [tl, tr, br, bl] = corners;
    let side_px = ((tr - tl).norm() + (tr - br).norm() + (br - bl).norm() + (bl - tl).norm()) / 4.0;
    if !side_px.is_finite() || side_px < f64::EPSILON {
        return None;
    }
    Some(focal_px * marker_size / side_px * DISTANCE_CORRECTION)
}

/// Marker twist about the camera axis, degrees in [-180, 180], from the
/// first column of its rotation matrix.
pub fn inplane_angle_deg(r00: f64, r10: f64) -> f64 {
    r10.atan2(r00).to_degrees()
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Session-fixed geometry calibration, validated once.
#[derive(Debug, Clone)]
pub struct GeometryResolver {
    config: GeometryConfig,
}

impl GeometryResolver {
    /// Creates a resolver, rejecting a zero radius or bad image width.
    pub fn new(config: GeometryConfig) -> Result<Self, GeometryError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the calibration.
    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// Resolves a column. Non-finite columns resolve as the image centre.
    pub fn resolve(&self, x_pixel: f64) -> ArcGeometry {
        let x = if x_pixel.is_finite() {
            x_pixel
        } else {
            self.config.image_width / 2.0
        };
        let c = &self.config;

        // Config was validated at construction and x is finite
        resolve(x, c.image_width, c.radius, c.artistic).unwrap_or(ArcGeometry {
            d: 0.0,
            arc_deg: 0.0,
            alpha: aimline_env::REST_ALPHA,
            arc_end: Point2::new(0.0, c.radius),
        })
    }

    /// Turns a raw detection into the sample the pose controller consumes.
    pub fn sample(&self, detection: &MarkerDetection) -> GeometrySample {
        let geometry = self.resolve(detection.x_pixel);
        let distance = if detection.distance_to_cam.is_finite() {
            detection.distance_to_cam.max(0.0)
        } else {
            0.0
        };
        let rotation = if detection.rotation_angle.is_finite() {
            detection.rotation_angle
        } else {
            0.0
        };

        GeometrySample {
            position_offset: geometry.d,
            orientation_alpha: geometry.alpha,
            rotation_angle: rotation,
            distance_to_cam: distance,
            shooting: detection.shooting,
            reloading: detection.reloading,
        }
    }
}

impl Default for GeometryResolver {
    fn default() -> Self {
        Self {
            config: GeometryConfig::default(),
        }
    }
}
