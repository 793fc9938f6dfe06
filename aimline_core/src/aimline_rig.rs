//! The per-frame session object: pose controller + weapon system.
//!
//! One `tick` per render frame:
//!
//! 1. Apply the latest snapshot to the pose
//! 2. Turn gesture flags into actions on their rising edge
//! 3. Advance the reload
//! 4. Collect what the renderer, audio and hit test need into a `RigFrame`

use crate::aimline_pose::{WeaponPose, WeaponPoseController};
use crate::aimline_reload::{ArmSegments, ReloadPhase};
use crate::aimline_weapon::{Shot, WeaponEvent, WeaponSystem};
use crate::config::{ConfigError, RigConfig};

use aimline_env::GeometrySample;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything produced by one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigFrame {
    pub time: f64,

    /// Pose from the tracking sample
    pub pose: WeaponPose,

    /// Orientation to render (reload transition while reloading)
    pub orientation: UnitQuaternion<f64>,

    /// Weapon origin in world space
    pub weapon_position: Vector3<f64>,

    pub arm: Option<ArmSegments>,
    pub shot: Option<Shot>,
    pub events: Vec<WeaponEvent>,
    pub ammo: (u32, u32),
    pub reload_phase: Option<ReloadPhase>,
    pub detected: bool,
}

/// Owns the weapon's pose and mechanics for one session.
#[derive(Debug, Clone)]
pub struct WeaponRig {
    controller: WeaponPoseController,
    weapon: WeaponSystem,
    was_shooting: bool,
    was_reloading: bool,
}

impl WeaponRig {
    pub fn new(config: &RigConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let controller = WeaponPoseController::new(config.pose.clone())?;
        let weapon = WeaponSystem::new(config.weapon.clone(), config.reload.clone())
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        Ok(Self {
            controller,
            weapon,
            was_shooting: false,
            was_reloading: false,
        })
    }

    /// Runs one frame against a local copy of the shared sample.
    pub fn tick(&mut self, now: f64, sample: &GeometrySample) -> RigFrame {
        let pose = self.controller.update_pose(sample);
        let current = self.controller.quaternion();

        let reload_edge = sample.reloading && !self.was_reloading;
        let shoot_edge = sample.shooting && !self.was_shooting;
        self.was_reloading = sample.reloading;
        self.was_shooting = sample.shooting;

        if reload_edge {
            if let Err(e) = self.weapon.start_reload(now, &current) {
                debug!("Reload gesture ignored: {}", e);
            }
        }

        let shot = if shoot_edge {
            self.weapon.try_shoot(
                now,
                self.controller.weapon_tip_world_position(),
                self.controller.firing_direction(),
                &current,
            )
        } else {
            None
        };

        let events = self.weapon.update(now);
        let weapon_position = self.controller.weapon_world_position();

        RigFrame {
            time: now,
            pose,
            orientation: self.weapon.render_orientation(now, &current),
            weapon_position,
            arm: self.weapon.arm_segments(now, &weapon_position),
            shot,
            events,
            ammo: self.weapon.ammo(),
            reload_phase: self.weapon.reload_phase(now),
            detected: sample.has_detection(self.controller.config().detection_epsilon),
        }
    }

    pub fn controller(&self) -> &WeaponPoseController {
        &self.controller
    }

    /// Calibration access for key bindings.
    pub fn controller_mut(&mut self) -> &mut WeaponPoseController {
        &mut self.controller
    }

    pub fn weapon(&self) -> &WeaponSystem {
        &self.weapon
    }
}

impl Default for WeaponRig {
    fn default() -> Self {
        Self {
            controller: WeaponPoseController::default(),
            weapon: WeaponSystem::default(),
            was_shooting: false,
            was_reloading: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aimline_quat;
    use aimline_env::REST_ALPHA;

    fn aimed(alpha: f64) -> GeometrySample {
        GeometrySample::new(0.0, alpha, 0.0, 0.5).unwrap()
    }

    #[test]
    fn test_shooting_is_edge_triggered() {
        let mut rig = WeaponRig::default();
        let held = aimed(REST_ALPHA).with_gestures(true, false);

        let mut shots = 0;
        for i in 0..60 {
            if rig.tick(i as f64 / 60.0, &held).shot.is_some() {
                shots += 1;
            }
        }
        assert_eq!(shots, 1);

        rig.tick(1.0, &aimed(REST_ALPHA));
        assert!(rig.tick(1.1, &held).shot.is_some());
        assert_eq!(rig.weapon().ammo(), (5, 7));
    }

    #[test]
    fn test_shot_follows_firing_direction() {
        let mut rig = WeaponRig::default();
        let frame = rig.tick(0.0, &aimed(2.2).with_gestures(true, false));
        let shot = frame.shot.unwrap();
        assert_eq!(shot.origin, rig.controller().weapon_tip_world_position());
        assert_eq!(shot.direction, rig.controller().firing_direction());
    }

    #[test]
    fn test_reload_gesture_runs_full_cycle() {
        let mut rig = WeaponRig::default();
        rig.tick(0.0, &aimed(2.0).with_gestures(true, false));

        let start = rig.tick(0.5, &aimed(2.0).with_gestures(false, true));
        assert_eq!(start.events, vec![WeaponEvent::ReloadStarted { auto: false }]);
        assert_eq!(start.reload_phase, Some(ReloadPhase::TransitionToCenter));
        assert!(start.arm.is_none());

        let middle = rig.tick(1.5, &aimed(2.0).with_gestures(false, true));
        assert_eq!(middle.events, vec![WeaponEvent::SlideRacked]);
        assert!(middle.arm.is_some());
        assert!(aimline_quat::angular_distance(&middle.orientation, &UnitQuaternion::identity()) < 1e-12);
        // The pose itself keeps tracking the marker
        assert!(aimline_quat::angular_distance(&middle.pose.orientation, &UnitQuaternion::identity()) > 0.1);

        let done = rig.tick(2.5, &aimed(2.0));
        assert_eq!(done.events, vec![WeaponEvent::ReloadComplete { ammo: 7 }]);
        assert_eq!(done.orientation, done.pose.orientation);
        assert_eq!(done.reload_phase, None);
    }

    #[test]
    fn test_lost_marker_reports_undetected() {
        let mut rig = WeaponRig::default();
        assert!(rig.tick(0.0, &aimed(1.0)).detected);
        let frame = rig.tick(0.1, &aimed(1.0).without_detection());
        assert!(!frame.detected);
        assert_eq!(frame.pose.world_offset.z, -0.8);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = RigConfig::default();
        config.weapon.max_ammo = 0;
        assert!(WeaponRig::new(&config).is_err());
        assert!(WeaponRig::new(&RigConfig::default()).is_ok());
    }
}
