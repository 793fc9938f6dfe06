//! Weapon bookkeeping: magazine, fire rate and the reload cycle.
//!
//! The reload time and the reload animation share one duration, so the
//! magazine refills on the same tick the animator goes idle.

use crate::aimline_reload::{ArmSegments, ReloadAnimator, ReloadConfig, ReloadError, ReloadPhase};
use crate::config::{require_positive, ConfigError};

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeaponError {
    #[error("Already reloading")]
    AlreadyReloading,

    #[error("Magazine is full")]
    MagazineFull,

    #[error("Reload animation error: {0}")]
    Reload(#[from] ReloadError),
}

/// Magazine and fire-rate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponConfig {
    /// Rounds per magazine (default: 7)
    pub max_ammo: u32,

    /// Minimum seconds between shots (default: 0.2)
    pub fire_interval: f64,

    /// Start a reload when the last round is fired (default: true)
    pub auto_reload: bool,
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            max_ammo: 7,
            fire_interval: 0.2,
            auto_reload: true,
        }
    }
}

impl WeaponConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_ammo == 0 {
            return Err(ConfigError::invalid("weapon.max_ammo must be at least 1"));
        }
        require_positive("weapon.fire_interval", self.fire_interval)
    }
}

/// A fired round, handed to the external hit test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// Barrel tip in world space
    pub origin: Vector3<f64>,

    /// Unit firing direction
    pub direction: Vector3<f64>,

    pub time: f64,
    pub ammo_left: u32,
}

/// Things the audio/UI layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WeaponEvent {
    ReloadStarted { auto: bool },

    /// The hand reached the slide; fires once per reload.
    SlideRacked,

    ReloadComplete { ammo: u32 },
}

/// Ammo, fire rate and reload state for one weapon.
#[derive(Debug, Clone)]
pub struct WeaponSystem {
    config: WeaponConfig,
    animator: ReloadAnimator,
    current_ammo: u32,
    is_reloading: bool,
    reload_start_time: f64,
    slide_racked: bool,
    last_shot_time: Option<f64>,
    pending: Vec<WeaponEvent>,
}

impl WeaponSystem {
    pub fn new(config: WeaponConfig, reload: ReloadConfig) -> Result<Self, WeaponError> {
        let animator = ReloadAnimator::new(reload)?;
        Ok(Self {
            current_ammo: config.max_ammo,
            config,
            animator,
            is_reloading: false,
            reload_start_time: 0.0,
            slide_racked: false,
            last_shot_time: None,
            pending: Vec::with_capacity(4),
        })
    }

    /// True if a round can leave the barrel at `now`.
    pub fn can_shoot(&self, now: f64) -> bool {
        !self.is_reloading
            && self.current_ammo > 0
            && self
                .last_shot_time
                .map_or(true, |last| now - last >= self.config.fire_interval)
    }

    /// Fires one round if allowed. The last round starts a reload when
    /// `auto_reload` is set, using `current` as the orientation to return to.
    pub fn try_shoot(
        &mut self,
        now: f64,
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        current: &UnitQuaternion<f64>,
    ) -> Option<Shot> {
        if !self.can_shoot(now) {
            debug!(
                "Shot blocked (ammo {}, reloading {})",
                self.current_ammo, self.is_reloading
            );
            return None;
        }

        self.current_ammo -= 1;
        self.last_shot_time = Some(now);
        debug!("Shot fired, {}/{} left", self.current_ammo, self.config.max_ammo);

        if self.current_ammo == 0 && self.config.auto_reload {
            if let Err(e) = self.begin_reload(now, current, true) {
                debug!("Auto reload not started: {}", e);
            }
        }

        Some(Shot {
            origin,
            direction,
            time: now,
            ammo_left: self.current_ammo,
        })
    }

    /// Manual reload. Rejected while reloading or with a full magazine.
    pub fn start_reload(&mut self, now: f64, current: &UnitQuaternion<f64>) -> Result<(), WeaponError> {
        self.begin_reload(now, current, false)
    }

    fn begin_reload(&mut self, now: f64, current: &UnitQuaternion<f64>, auto: bool) -> Result<(), WeaponError> {
        if self.is_reloading {
            return Err(WeaponError::AlreadyReloading);
        }
        if self.current_ammo == self.config.max_ammo {
            return Err(WeaponError::MagazineFull);
        }

        self.animator.start(now, *current)?;
        self.is_reloading = true;
        self.reload_start_time = now;
        self.slide_racked = false;
        self.pending.push(WeaponEvent::ReloadStarted { auto });

        info!("Reloading... ({:.1}s)", self.animator.duration());
        Ok(())
    }

    /// Advances reload state. Returns the events raised since the last call.
    pub fn update(&mut self, now: f64) -> Vec<WeaponEvent> {
        if self.is_reloading {
            // Checked before the animator goes idle so a long frame still racks
            let past_slide = self
                .animator
                .current_phase(now)
                .is_some_and(|phase| phase.index() >= ReloadPhase::PullBack.index());
            if past_slide && !self.slide_racked {
                self.slide_racked = true;
                self.pending.push(WeaponEvent::SlideRacked);
            }
        }

        self.animator.update(now);

        if self.is_reloading && now - self.reload_start_time >= self.animator.duration() {
            self.current_ammo = self.config.max_ammo;
            self.is_reloading = false;
            self.pending.push(WeaponEvent::ReloadComplete {
                ammo: self.current_ammo,
            });
            info!("Reload complete! Ammo: {}/{}", self.current_ammo, self.config.max_ammo);
        }

        std::mem::take(&mut self.pending)
    }

    /// Orientation to render: the reload transition while reloading,
    /// otherwise `current`.
    pub fn render_orientation(&self, now: f64, current: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        if self.is_reloading {
            self.animator.weapon_transition_quaternion(now, current)
        } else {
            *current
        }
    }

    /// Reload arm for the renderer.
    pub fn arm_segments(&self, now: f64, weapon_position: &Vector3<f64>) -> Option<ArmSegments> {
        if !self.is_reloading {
            return None;
        }
        self.animator.arm_segments(now, weapon_position)
    }

    /// Reload progress in [0, 1]; 1 when not reloading.
    pub fn reload_progress(&self, now: f64) -> f64 {
        if !self.is_reloading {
            return 1.0;
        }
        ((now - self.reload_start_time) / self.animator.duration()).clamp(0.0, 1.0)
    }

    pub fn reload_phase(&self, now: f64) -> Option<ReloadPhase> {
        if self.is_reloading {
            self.animator.current_phase(now)
        } else {
            None
        }
    }

    /// `(current, max)` rounds.
    pub fn ammo(&self) -> (u32, u32) {
        (self.current_ammo, self.config.max_ammo)
    }

    pub fn is_reloading(&self) -> bool {
        self.is_reloading
    }

    pub fn animator(&self) -> &ReloadAnimator {
        &self.animator
    }
}

impl Default for WeaponSystem {
    fn default() -> Self {
        let config = WeaponConfig::default();
        Self {
            current_ammo: config.max_ammo,
            config,
            animator: ReloadAnimator::default(),
            is_reloading: false,
            reload_start_time: 0.0,
            slide_racked: false,
            last_shot_time: None,
            pending: Vec::with_capacity(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aimline_quat::{self, FORWARD, UP};
    use approx::assert_relative_eq;

    fn fire(weapon: &mut WeaponSystem, now: f64) -> Option<Shot> {
        weapon.try_shoot(now, Vector3::zeros(), FORWARD, &UnitQuaternion::identity())
    }

    #[test]
    fn test_fire_rate_limits_shots() {
        let mut weapon = WeaponSystem::default();
        assert!(fire(&mut weapon, 0.0).is_some());
        assert!(fire(&mut weapon, 0.1).is_none());
        let shot = fire(&mut weapon, 0.25).unwrap();
        assert_eq!(shot.ammo_left, 5);
        assert_eq!(weapon.ammo(), (5, 7));
    }

    #[test]
    fn test_shot_carries_ray() {
        let mut weapon = WeaponSystem::default();
        let origin = Vector3::new(0.0, 1.8, 3.2);
        let direction = Vector3::new(-1.0, 0.0, 0.0);
        let shot = weapon
            .try_shoot(3.0, origin, direction, &UnitQuaternion::identity())
            .unwrap();
        assert_eq!(shot.origin, origin);
        assert_eq!(shot.direction, direction);
        assert_eq!(shot.time, 3.0);
    }

    #[test]
    fn test_manual_reload_rejected_when_full() {
        let mut weapon = WeaponSystem::default();
        assert_eq!(
            weapon.start_reload(0.0, &UnitQuaternion::identity()),
            Err(WeaponError::MagazineFull)
        );
        assert!(weapon.update(0.0).is_empty());
    }

    #[test]
    fn test_manual_reload_cycle() {
        let mut weapon = WeaponSystem::default();
        fire(&mut weapon, 0.0);
        weapon.start_reload(1.0, &UnitQuaternion::identity()).unwrap();
        assert_eq!(
            weapon.start_reload(1.1, &UnitQuaternion::identity()),
            Err(WeaponError::AlreadyReloading)
        );

        assert_eq!(weapon.update(1.0), vec![WeaponEvent::ReloadStarted { auto: false }]);
        assert!(fire(&mut weapon, 1.5).is_none());
        assert_relative_eq!(weapon.reload_progress(2.0), 0.5);

        // pull_back starts at 45% of the 2s reload
        assert!(weapon.update(1.8).is_empty());
        assert_eq!(weapon.update(2.0), vec![WeaponEvent::SlideRacked]);
        assert!(weapon.update(2.5).is_empty());

        assert_eq!(weapon.update(3.0), vec![WeaponEvent::ReloadComplete { ammo: 7 }]);
        assert!(!weapon.is_reloading());
        assert!(!weapon.animator().is_active());
        assert_eq!(weapon.ammo(), (7, 7));
        assert!(fire(&mut weapon, 3.0).is_some());
    }

    #[test]
    fn test_auto_reload_on_empty() {
        let mut weapon = WeaponSystem::default();
        for i in 0..7 {
            assert!(fire(&mut weapon, i as f64).is_some());
        }
        assert!(weapon.is_reloading());
        assert_eq!(weapon.ammo(), (0, 7));
        assert_eq!(weapon.update(6.0), vec![WeaponEvent::ReloadStarted { auto: true }]);
        assert!(fire(&mut weapon, 7.0).is_none());
    }

    #[test]
    fn test_auto_reload_disabled() {
        let mut weapon = WeaponSystem::new(
            WeaponConfig {
                max_ammo: 1,
                auto_reload: false,
                ..Default::default()
            },
            ReloadConfig::default(),
        )
        .unwrap();
        assert!(fire(&mut weapon, 0.0).is_some());
        assert!(!weapon.is_reloading());
        assert!(fire(&mut weapon, 1.0).is_none());
    }

    #[test]
    fn test_long_frame_still_racks_slide() {
        let mut weapon = WeaponSystem::default();
        fire(&mut weapon, 0.0);
        weapon.start_reload(0.0, &UnitQuaternion::identity()).unwrap();
        let events = weapon.update(5.0);
        assert_eq!(
            events,
            vec![
                WeaponEvent::ReloadStarted { auto: false },
                WeaponEvent::SlideRacked,
                WeaponEvent::ReloadComplete { ammo: 7 },
            ]
        );
    }

    #[test]
    fn test_render_orientation_during_reload() {
        let mut weapon = WeaponSystem::default();
        let aimed = aimline_quat::from_axis_angle(&UP, 0.9);
        assert_eq!(weapon.render_orientation(0.0, &aimed), aimed);

        fire(&mut weapon, 0.0);
        weapon.start_reload(0.0, &aimed).unwrap();
        let centred = weapon.render_orientation(1.0, &aimed);
        assert!(aimline_quat::angular_distance(&centred, &UnitQuaternion::identity()) < 1e-12);
        assert_eq!(weapon.reload_phase(1.0), Some(ReloadPhase::PullBack));

        let weapon_position = Vector3::new(0.0, 1.6, 4.2);
        assert!(weapon.arm_segments(1.0, &weapon_position).is_some());
    }

    #[test]
    fn test_invalid_config() {
        assert!(WeaponConfig {
            max_ammo: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(matches!(
            WeaponSystem::new(
                WeaponConfig::default(),
                ReloadConfig {
                    upper_arm: 0.0,
                    ..Default::default()
                }
            ),
            Err(WeaponError::Reload(ReloadError::InvalidArm(_)))
        ));
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&WeaponEvent::ReloadComplete { ammo: 7 }).unwrap();
        assert_eq!(json, r#"{"event":"reload_complete","ammo":7}"#);
    }
}
