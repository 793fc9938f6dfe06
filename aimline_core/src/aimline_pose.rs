//! The "POSE" Engine - tracking samples to a renderable weapon transform
//!
//! Each render tick the controller takes one `GeometrySample` snapshot and
//! produces a 6-DOF weapon pose:
//!
//! 1. Lateral offset from `d` (position sensitivity)
//! 2. Depth offset from marker distance (distance sensitivity), with the
//!    default distance substituted while no marker is visible
//! 3. Yaw from `alpha`, roll from the marker twist
//! 4. Orientation = yaw ∘ roll, renormalized
//! 5. A horizontal aim ray of `target_distance` for firing
//!
//! The aim ray never feeds back into the pose.

use crate::aimline_quat::{self, FORWARD, UP};
use crate::config::{require_positive, ConfigError};

use aimline_env::{GeometrySample, REST_ALPHA};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Calibration for the weapon pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Fixed camera position in world space (default: (0, 2, 5))
    pub camera_position: Vector3<f64>,

    /// Weapon rest position relative to the camera (default: (0, -0.4, -0.8))
    pub base_offset: Vector3<f64>,

    /// Barrel tip relative to the weapon origin, model space (default: (0, 0.2, -1))
    pub barrel_tip_offset: Vector3<f64>,

    /// Length of the aim ray (default: 20)
    pub target_distance: f64,

    /// World units of lateral motion per unit of `d` (default: 5)
    pub position_sensitivity: f64,

    /// World units of depth motion per unit of marker distance (default: 2)
    pub distance_sensitivity: f64,

    /// Marker distance that maps to the rest depth (default: 0.5)
    pub default_distance: f64,

    /// Scale on the marker twist (default: 1)
    pub roll_sensitivity: f64,

    /// Added to the marker twist before scaling, radians (default: 0)
    pub roll_offset: f64,

    /// Lower clamp for every sensitivity setter (default: 0.1)
    pub min_sensitivity: f64,

    /// Distances at or below this count as "no detection" (default: 1e-6)
    pub detection_epsilon: f64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            camera_position: Vector3::new(0.0, 2.0, 5.0),
            base_offset: Vector3::new(0.0, -0.4, -0.8),
            barrel_tip_offset: Vector3::new(0.0, 0.2, -1.0),
            target_distance: 20.0,
            position_sensitivity: 5.0,
            distance_sensitivity: 2.0,
            default_distance: 0.5,
            roll_sensitivity: 1.0,
            roll_offset: 0.0,
            min_sensitivity: 0.1,
            detection_epsilon: 1e-6,
        }
    }
}

impl PoseConfig {
    /// Checks sensitivities and distances are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("pose.min_sensitivity", self.min_sensitivity)?;
        for (name, value) in [
            ("pose.position_sensitivity", self.position_sensitivity),
            ("pose.distance_sensitivity", self.distance_sensitivity),
            ("pose.roll_sensitivity", self.roll_sensitivity),
        ] {
            require_positive(name, value)?;
            if value < self.min_sensitivity {
                return Err(ConfigError::invalid(format!(
                    "{} ({}) is below min_sensitivity ({})",
                    name, value, self.min_sensitivity
                )));
            }
        }
        require_positive("pose.target_distance", self.target_distance)?;
        require_positive("pose.default_distance", self.default_distance)?;
        if !self.roll_offset.is_finite() || !self.detection_epsilon.is_finite() {
            return Err(ConfigError::invalid("pose.roll_offset/detection_epsilon must be finite"));
        }
        let vectors = [self.camera_position, self.base_offset, self.barrel_tip_offset];
        if vectors.iter().any(|v| v.iter().any(|c| !c.is_finite())) {
            return Err(ConfigError::invalid("pose vectors must be finite"));
        }
        Ok(())
    }
}

// ============================================================================
// POSE (Output)
// ============================================================================

/// The renderable weapon transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeaponPose {
    /// Weapon origin relative to the camera
    pub world_offset: Vector3<f64>,

    /// Unit orientation (yaw then roll)
    pub orientation: UnitQuaternion<f64>,

    /// Yaw in radians (the sample's `alpha`)
    pub yaw: f64,

    /// Roll in radians
    pub roll: f64,
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Owns the weapon's offset and orientation and updates them per frame.
#[derive(Debug, Clone)]
pub struct WeaponPoseController {
    config: PoseConfig,
    current_offset: Vector3<f64>,
    yaw_angle: f64,
    roll_angle: f64,
    quaternion: UnitQuaternion<f64>,
    aim_target: Vector3<f64>,
    last_sample: GeometrySample,
    rejected_samples: u64,
}

impl WeaponPoseController {
    /// Creates a controller at the rest pose.
    pub fn new(config: PoseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::at_rest(config))
    }

    fn at_rest(config: PoseConfig) -> Self {
        let mut controller = Self {
            current_offset: config.base_offset,
            yaw_angle: REST_ALPHA,
            roll_angle: 0.0,
            quaternion: UnitQuaternion::identity(),
            aim_target: Vector3::zeros(),
            last_sample: GeometrySample::no_detection(),
            rejected_samples: 0,
            config,
        };
        controller.aim_target = controller.compute_aim_target();
        controller
    }

    /// Integrates one tracking snapshot into the pose.
    ///
    /// Samples with non-finite fields are dropped and the previous pose is
    /// kept.
    pub fn update_pose(&mut self, sample: &GeometrySample) -> WeaponPose {
        if !sample.is_finite() {
            self.rejected_samples += 1;
            debug!("Dropping non-finite sample ({} so far): {:?}", self.rejected_samples, sample);
            return self.pose();
        }

        let distance = if sample.has_detection(self.config.detection_epsilon) {
            sample.distance_to_cam
        } else {
            self.config.default_distance
        };

        let base = self.config.base_offset;
        self.current_offset = Vector3::new(
            base.x + sample.position_offset * self.config.position_sensitivity,
            base.y,
            base.z + (distance - self.config.default_distance) * self.config.distance_sensitivity,
        );

        self.yaw_angle = sample.orientation_alpha;
        self.roll_angle = -(sample.rotation_angle.to_radians() + self.config.roll_offset)
            * self.config.roll_sensitivity;

        // Yaw is measured from the resting aim so a centred marker renders
        // the model unrotated; its barrel then follows the aim ray.
        let yaw_q = aimline_quat::from_axis_angle(&UP, self.yaw_angle - REST_ALPHA);
        let roll_q = aimline_quat::from_axis_angle(&FORWARD, self.roll_angle);
        self.quaternion = aimline_quat::compose(&yaw_q, &roll_q);

        self.aim_target = self.compute_aim_target();
        self.last_sample = *sample;

        self.pose()
    }

    /// Drives the pose from a gauge reading in [0, 180] degrees, for sources
    /// that only report a dial position.
    pub fn update_from_degree(&mut self, degree: f64) -> WeaponPose {
        let degree = if degree.is_finite() { degree.clamp(0.0, 180.0) } else { 90.0 };
        let arc = (degree - 90.0).to_radians();
        let sample = GeometrySample {
            position_offset: arc * 0.1,
            orientation_alpha: REST_ALPHA - arc,
            ..self.last_sample
        };
        self.update_pose(&sample)
    }

    fn compute_aim_target(&self) -> Vector3<f64> {
        let direction = Vector3::new(self.yaw_angle.cos(), 0.0, -self.yaw_angle.sin());
        self.weapon_world_position() + direction * self.config.target_distance
    }

    // ========== Outputs ==========

    /// Current pose.
    pub fn pose(&self) -> WeaponPose {
        WeaponPose {
            world_offset: self.current_offset,
            orientation: self.quaternion,
            yaw: self.yaw_angle,
            roll: self.roll_angle,
        }
    }

    /// Weapon origin in world space.
    pub fn weapon_world_position(&self) -> Vector3<f64> {
        self.config.camera_position + self.current_offset
    }

    /// Barrel tip in world space; the origin for hit-test rays.
    pub fn weapon_tip_world_position(&self) -> Vector3<f64> {
        self.weapon_world_position()
            + aimline_quat::rotate(&self.quaternion, &self.config.barrel_tip_offset)
    }

    /// Unit direction from the barrel tip to the aim target, or `FORWARD`
    /// when the two coincide.
    pub fn firing_direction(&self) -> Vector3<f64> {
        (self.aim_target - self.weapon_tip_world_position())
            .try_normalize(aimline_quat::EPSILON)
            .unwrap_or(FORWARD)
    }

    /// End of the aim ray.
    pub fn aim_target(&self) -> Vector3<f64> {
        self.aim_target
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    pub fn current_offset(&self) -> Vector3<f64> {
        self.current_offset
    }

    pub fn yaw(&self) -> f64 {
        self.yaw_angle
    }

    pub fn roll(&self) -> f64 {
        self.roll_angle
    }

    /// The last sample that was applied.
    pub fn last_sample(&self) -> &GeometrySample {
        &self.last_sample
    }

    /// Number of samples dropped for non-finite values.
    pub fn rejected_samples(&self) -> u64 {
        self.rejected_samples
    }

    pub fn config(&self) -> &PoseConfig {
        &self.config
    }

    // ========== Calibration ==========

    /// Sets the barrel tip offset (model space).
    pub fn set_barrel_tip_offset(&mut self, offset: Vector3<f64>) {
        if offset.iter().any(|c| !c.is_finite()) {
            return;
        }
        self.config.barrel_tip_offset = offset;
        info!(
            "Barrel tip offset updated to: ({:.2}, {:.2}, {:.2})",
            offset.x, offset.y, offset.z
        );
    }

    /// Sets the lateral sensitivity, clamped to the floor. Returns the
    /// applied value.
    pub fn set_position_sensitivity(&mut self, sensitivity: f64) -> f64 {
        self.config.position_sensitivity = self.clamp_sensitivity(sensitivity);
        info!("Position sensitivity updated to: {:.2}", self.config.position_sensitivity);
        self.config.position_sensitivity
    }

    /// Sets the depth sensitivity, clamped to the floor.
    pub fn set_distance_sensitivity(&mut self, sensitivity: f64) -> f64 {
        self.config.distance_sensitivity = self.clamp_sensitivity(sensitivity);
        info!("Distance sensitivity updated to: {:.2}", self.config.distance_sensitivity);
        self.config.distance_sensitivity
    }

    /// Sets the roll sensitivity, clamped to the floor.
    pub fn set_roll_sensitivity(&mut self, sensitivity: f64) -> f64 {
        self.config.roll_sensitivity = self.clamp_sensitivity(sensitivity);
        info!("Roll sensitivity updated to: {:.2}", self.config.roll_sensitivity);
        self.config.roll_sensitivity
    }

    /// Sets the roll offset in radians.
    pub fn set_roll_offset(&mut self, offset: f64) {
        if offset.is_finite() {
            self.config.roll_offset = offset;
            info!("Roll offset updated to: {:.1}°", offset.to_degrees());
        }
    }

    fn clamp_sensitivity(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.max(self.config.min_sensitivity)
        } else {
            self.config.min_sensitivity
        }
    }
}

impl Default for WeaponPoseController {
    fn default() -> Self {
        Self::at_rest(PoseConfig::default())
    }
}
