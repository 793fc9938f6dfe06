//! The "RELOAD" Engine - phased reload animation with two-segment arm IK
//!
//! A reload runs `Idle → Active → Idle`. While active, progress is a pure
//! function of `now - start_time`, split into seven fixed windows:
//!
//! ```text
//! transition_to_center → reach_in → contact → pull_back → release → retract → transition_to_cursor
//! ```
//!
//! The weapon slerps to the identity pose and back in the two transition
//! windows. In between, a hand target is eased between anchors relative to
//! the *current* weapon position and an analytic law-of-cosines solver
//! places the elbow.

use crate::aimline_quat::{self, EPSILON, UP};
use crate::config::{require_positive, ConfigError};

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Smoothstep easing, `t²(3 - 2t)` on the clamped input.
pub fn smoothstep(t: f64) -> f64 {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    t * t * (3.0 - 2.0 * t)
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReloadError {
    #[error("Reload already in progress")]
    AlreadyActive,

    #[error("Invalid phase schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid arm: {0}")]
    InvalidArm(String),
}

// ============================================================================
// PHASES
// ============================================================================

/// Reload phases in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    TransitionToCenter,
    ReachIn,
    Contact,
    PullBack,
    Release,
    Retract,
    TransitionToCursor,
}

impl ReloadPhase {
    pub const ALL: [ReloadPhase; 7] = [
        ReloadPhase::TransitionToCenter,
        ReloadPhase::ReachIn,
        ReloadPhase::Contact,
        ReloadPhase::PullBack,
        ReloadPhase::Release,
        ReloadPhase::Retract,
        ReloadPhase::TransitionToCursor,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ReloadPhase::TransitionToCenter => "transition_to_center",
            ReloadPhase::ReachIn => "reach_in",
            ReloadPhase::Contact => "contact",
            ReloadPhase::PullBack => "pull_back",
            ReloadPhase::Release => "release",
            ReloadPhase::Retract => "retract",
            ReloadPhase::TransitionToCursor => "transition_to_cursor",
        }
    }

    /// True for the windows where the weapon is moving and no arm is drawn.
    pub fn is_transition(self) -> bool {
        matches!(self, ReloadPhase::TransitionToCenter | ReloadPhase::TransitionToCursor)
    }
}

impl fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cumulative phase windows over normalized progress.
///
/// Windows are half-open `[start, end)` except the last, which also owns
/// `1.0`, so every progress value maps to exactly one phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSchedule {
    bounds: [(f64, f64); 7],
}

impl PhaseSchedule {
    /// Tolerance on the fraction sum.
    pub const SUM_TOLERANCE: f64 = 1e-6;

    pub fn new(fractions: [f64; 7]) -> Result<Self, ReloadError> {
        if fractions.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(ReloadError::InvalidSchedule(format!(
                "fractions must be positive: {:?}",
                fractions
            )));
        }
        let sum: f64 = fractions.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(ReloadError::InvalidSchedule(format!(
                "fractions sum to {:.6}, expected 1.0",
                sum
            )));
        }

        let mut bounds = [(0.0, 0.0); 7];
        let mut start = 0.0;
        for (bound, fraction) in bounds.iter_mut().zip(fractions) {
            *bound = (start, start + fraction);
            start += fraction;
        }
        // Absorb rounding so the last window ends exactly at 1.0
        bounds[6].1 = 1.0;

        Ok(Self { bounds })
    }

    /// `(start, end)` of a phase window.
    pub fn window(&self, phase: ReloadPhase) -> (f64, f64) {
        self.bounds[phase.index()]
    }

    /// Phase owning `progress` (clamped to [0, 1]).
    pub fn phase_at(&self, progress: f64) -> ReloadPhase {
        let progress = progress.clamp(0.0, 1.0);
        ReloadPhase::ALL
            .into_iter()
            .find(|phase| progress < self.window(*phase).1)
            .unwrap_or(ReloadPhase::TransitionToCursor)
    }

    /// Progress within one phase, 0 before it and 1 after it.
    pub fn phase_progress(&self, progress: f64, phase: ReloadPhase) -> f64 {
        let (start, end) = self.window(phase);
        if progress <= start {
            0.0
        } else if progress >= end {
            1.0
        } else {
            (progress - start) / (end - start)
        }
    }
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        Self::new(ReloadConfig::default().phase_fractions).unwrap_or(Self {
            bounds: [(0.0, 1.0); 7],
        })
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Reload timing, arm geometry and hand anchors.
///
/// Anchors are offsets from the weapon position, except `approach`,
/// `pull_back` and `release`, which are offsets from the slide contact point
/// (`weapon + hand_anchor`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Whole animation length in seconds (default: 2.0)
    pub duration: f64,

    /// Phase window fractions, must sum to 1.0
    pub phase_fractions: [f64; 7],

    /// Shoulder to elbow (default: 1.5)
    pub upper_arm: f64,

    /// Elbow to wrist (default: 1.4)
    pub forearm: f64,

    /// Shoulder relative to the weapon, bottom-left out of view
    pub shoulder_offset: Vector3<f64>,

    /// Slide contact point relative to the weapon
    pub hand_anchor: Vector3<f64>,

    pub approach: Vector3<f64>,
    pub pull_back: Vector3<f64>,
    pub release: Vector3<f64>,

    /// Hand start position relative to the weapon
    pub reach_start: Vector3<f64>,

    /// Hand end position relative to the weapon
    pub retract: Vector3<f64>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            duration: 2.0,
            phase_fractions: [0.15, 0.20, 0.10, 0.15, 0.10, 0.15, 0.15],
            upper_arm: 1.5,
            forearm: 1.4,
            shoulder_offset: Vector3::new(-2.2, -1.5, -0.3),
            hand_anchor: Vector3::new(0.0, 0.4, 0.1),
            approach: Vector3::new(0.15, 0.0, 0.0),
            pull_back: Vector3::new(-0.25, 0.0, 0.0),
            release: Vector3::new(0.1, 0.0, 0.0),
            reach_start: Vector3::new(-1.8, -0.3, -0.8),
            retract: Vector3::new(-2.2, -0.5, -1.2),
        }
    }
}

impl ReloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("reload.duration", self.duration)?;
        PhaseSchedule::new(self.phase_fractions).map_err(|e| ConfigError::invalid(e.to_string()))?;
        ArmIK::new(self.upper_arm, self.forearm).map_err(|e| ConfigError::invalid(e.to_string()))?;

        let anchors = [
            self.shoulder_offset,
            self.hand_anchor,
            self.approach,
            self.pull_back,
            self.release,
            self.reach_start,
            self.retract,
        ];
        if anchors.iter().any(|v| v.iter().any(|c| !c.is_finite())) {
            return Err(ConfigError::invalid("reload anchors must be finite"));
        }
        Ok(())
    }
}

// ============================================================================
// TWO-SEGMENT IK
// ============================================================================

/// Result of one IK solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IkSolution {
    pub elbow: Vector3<f64>,
    pub wrist: Vector3<f64>,

    /// Target was out of the reachable annulus
    pub is_at_limit: bool,

    /// Interior elbow angle in radians (π = straight arm)
    pub elbow_angle: f64,
}

/// Analytic two-bone solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmIK {
    upper_arm: f64,
    forearm: f64,
}

impl ArmIK {
    /// Direction used when the target sits on the shoulder.
    const FALLBACK_DIRECTION: Vector3<f64> = Vector3::new(1.0, 0.0, 0.0);

    /// Side vector used when the arm points straight up or down.
    const FALLBACK_SIDE: Vector3<f64> = Vector3::new(1.0, 0.0, 0.0);

    /// Below this `|dir × up|` the arm counts as vertical.
    const VERTICAL_THRESHOLD: f64 = 0.1;

    pub fn new(upper_arm: f64, forearm: f64) -> Result<Self, ReloadError> {
        for (name, length) in [("upper_arm", upper_arm), ("forearm", forearm)] {
            if !length.is_finite() || length <= 0.0 {
                return Err(ReloadError::InvalidArm(format!(
                    "{} must be positive, got {}",
                    name, length
                )));
            }
        }
        Ok(Self { upper_arm, forearm })
    }

    pub fn upper_arm(&self) -> f64 {
        self.upper_arm
    }

    pub fn forearm(&self) -> f64 {
        self.forearm
    }

    /// Maximum reach.
    pub fn reach(&self) -> f64 {
        self.upper_arm + self.forearm
    }

    /// Places the elbow and wrist for a hand target.
    ///
    /// - Beyond reach: arm straight toward the target, wrist at full reach
    /// - Inside `|L1 - L2|`: upper arm toward the target, wrist on the target
    /// - Otherwise: law of cosines with the elbow bent upward
    pub fn solve(&self, shoulder: &Vector3<f64>, target: &Vector3<f64>) -> IkSolution {
        let to_target = target - shoulder;
        let distance = to_target.norm();
        let direction = to_target
            .try_normalize(EPSILON)
            .unwrap_or(Self::FALLBACK_DIRECTION);

        let (l1, l2) = (self.upper_arm, self.forearm);

        if distance > l1 + l2 {
            return IkSolution {
                elbow: shoulder + direction * l1,
                wrist: shoulder + direction * (l1 + l2),
                is_at_limit: true,
                elbow_angle: std::f64::consts::PI,
            };
        }

        if distance < (l1 - l2).abs() {
            return IkSolution {
                elbow: shoulder + direction * l1,
                wrist: *target,
                is_at_limit: true,
                elbow_angle: 0.0,
            };
        }

        let cos_elbow = ((l1 * l1 + l2 * l2 - distance * distance) / (2.0 * l1 * l2)).clamp(-1.0, 1.0);
        let cos_shoulder =
            ((l1 * l1 + distance * distance - l2 * l2) / (2.0 * l1 * distance)).clamp(-1.0, 1.0);
        let shoulder_angle = cos_shoulder.acos();

        let side = direction.cross(&UP);
        let side = if side.norm() < Self::VERTICAL_THRESHOLD {
            Self::FALLBACK_SIDE
        } else {
            side.normalize()
        };
        let bend = side
            .cross(&direction)
            .try_normalize(EPSILON)
            .unwrap_or(UP);

        let elbow = shoulder
            + direction * (l1 * shoulder_angle.cos())
            + bend * (l1 * shoulder_angle.sin());

        IkSolution {
            elbow,
            wrist: *target,
            is_at_limit: false,
            elbow_angle: cos_elbow.acos(),
        }
    }
}

// ============================================================================
// ANIMATOR
// ============================================================================

/// Arm pose for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSegments {
    pub shoulder: Vector3<f64>,
    pub elbow: Vector3<f64>,
    pub wrist: Vector3<f64>,
    pub upper_arm_length: f64,
    pub forearm_length: f64,
    pub is_at_limit: bool,
    pub phase: ReloadPhase,
}

/// Reload animation state. Times are seconds on the caller's frame clock.
#[derive(Debug, Clone)]
pub struct ReloadAnimator {
    config: ReloadConfig,
    schedule: PhaseSchedule,
    arm: ArmIK,
    is_active: bool,
    start_time: f64,
    original_quaternion: UnitQuaternion<f64>,
    target_quaternion: UnitQuaternion<f64>,
}

impl ReloadAnimator {
    pub fn new(config: ReloadConfig) -> Result<Self, ReloadError> {
        if !config.duration.is_finite() || config.duration <= 0.0 {
            return Err(ReloadError::InvalidSchedule(format!(
                "duration must be positive, got {}",
                config.duration
            )));
        }
        let schedule = PhaseSchedule::new(config.phase_fractions)?;
        let arm = ArmIK::new(config.upper_arm, config.forearm)?;
        Ok(Self {
            config,
            schedule,
            arm,
            is_active: false,
            start_time: 0.0,
            original_quaternion: UnitQuaternion::identity(),
            target_quaternion: UnitQuaternion::identity(),
        })
    }

    /// Begins a reload from the weapon's current orientation.
    ///
    /// Rejected without touching state while a reload is running.
    pub fn start(&mut self, now: f64, current: UnitQuaternion<f64>) -> Result<(), ReloadError> {
        if self.is_active {
            debug!("Reload start rejected: already active");
            return Err(ReloadError::AlreadyActive);
        }
        self.is_active = true;
        self.start_time = now;
        self.original_quaternion = current;
        self.target_quaternion = UnitQuaternion::identity();
        info!("Reload animation started ({:.2}s)", self.config.duration);
        Ok(())
    }

    /// Deactivates once the duration has elapsed. Returns true on the tick
    /// the animation finishes.
    pub fn update(&mut self, now: f64) -> bool {
        if self.is_active && now - self.start_time >= self.config.duration {
            self.is_active = false;
            debug!("Reload animation finished");
            return true;
        }
        false
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn duration(&self) -> f64 {
        self.config.duration
    }

    pub fn schedule(&self) -> &PhaseSchedule {
        &self.schedule
    }

    pub fn arm(&self) -> &ArmIK {
        &self.arm
    }

    pub fn config(&self) -> &ReloadConfig {
        &self.config
    }

    /// Overall progress in [0, 1]; 1 when idle.
    pub fn progress(&self, now: f64) -> f64 {
        if !self.is_active {
            return 1.0;
        }
        let elapsed = (now - self.start_time).max(0.0);
        (elapsed / self.config.duration).min(1.0)
    }

    /// Current phase, or `None` when idle.
    pub fn current_phase(&self, now: f64) -> Option<ReloadPhase> {
        self.is_active.then(|| self.schedule.phase_at(self.progress(now)))
    }

    /// Progress within `phase`.
    pub fn phase_progress(&self, now: f64, phase: ReloadPhase) -> f64 {
        self.schedule.phase_progress(self.progress(now), phase)
    }

    /// Orientation the weapon should be rendered with.
    ///
    /// Idle returns `current` unchanged.
    pub fn weapon_transition_quaternion(&self, now: f64, current: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        let Some(phase) = self.current_phase(now) else {
            return *current;
        };
        let eased = smoothstep(self.phase_progress(now, phase));
        match phase {
            ReloadPhase::TransitionToCenter => {
                aimline_quat::slerp(&self.original_quaternion, &self.target_quaternion, eased)
            }
            ReloadPhase::TransitionToCursor => {
                aimline_quat::slerp(&self.target_quaternion, &self.original_quaternion, eased)
            }
            _ => self.target_quaternion,
        }
    }

    /// Hand target for the current phase, relative to where the weapon is
    /// now. `None` when idle or in a transition window.
    pub fn target_hand_position(&self, now: f64, weapon_position: &Vector3<f64>) -> Option<Vector3<f64>> {
        let phase = self.current_phase(now)?;
        let eased = smoothstep(self.phase_progress(now, phase));

        let c = &self.config;
        let contact = weapon_position + c.hand_anchor;
        let (from, to) = match phase {
            ReloadPhase::ReachIn => (weapon_position + c.reach_start, contact + c.approach),
            ReloadPhase::Contact => (contact + c.approach, contact),
            ReloadPhase::PullBack => (contact, contact + c.pull_back),
            ReloadPhase::Release => (contact + c.pull_back, contact + c.release),
            ReloadPhase::Retract => (contact + c.release, weapon_position + c.retract),
            ReloadPhase::TransitionToCenter | ReloadPhase::TransitionToCursor => return None,
        };

        Some(from + (to - from) * eased)
    }

    /// Solves the arm for the renderer, or `None` when it should not be drawn.
    pub fn arm_segments(&self, now: f64, weapon_position: &Vector3<f64>) -> Option<ArmSegments> {
        let phase = self.current_phase(now)?;
        let target = self.target_hand_position(now, weapon_position)?;
        let shoulder = weapon_position + self.config.shoulder_offset;
        let solution = self.arm.solve(&shoulder, &target);

        Some(ArmSegments {
            shoulder,
            elbow: solution.elbow,
            wrist: solution.wrist,
            upper_arm_length: self.arm.upper_arm(),
            forearm_length: self.arm.forearm(),
            is_at_limit: solution.is_at_limit,
            phase,
        })
    }
}

impl Default for ReloadAnimator {
    fn default() -> Self {
        let config = ReloadConfig::default();
        Self {
            schedule: PhaseSchedule::default(),
            arm: ArmIK {
                upper_arm: config.upper_arm,
                forearm: config.forearm,
            },
            config,
            is_active: false,
            start_time: 0.0,
            original_quaternion: UnitQuaternion::identity(),
            target_quaternion: UnitQuaternion::identity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aimline_quat::FORWARD;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn yawed(angle: f64) -> UnitQuaternion<f64> {
        aimline_quat::compose(
            &aimline_quat::from_axis_angle(&UP, angle),
            &aimline_quat::from_axis_angle(&FORWARD, -0.3),
        )
    }

    #[test]
    fn test_smoothstep() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(1.0), 1.0);
        assert_relative_eq!(smoothstep(0.5), 0.5);
        assert_eq!(smoothstep(-1.0), 0.0);
        assert_eq!(smoothstep(2.0), 1.0);
    }

    #[test]
    fn test_schedule_windows() {
        let schedule = PhaseSchedule::default();
        assert_eq!(schedule.window(ReloadPhase::TransitionToCenter), (0.0, 0.15));
        assert_relative_eq!(schedule.window(ReloadPhase::PullBack).0, 0.45, epsilon = 1e-12);
        assert_eq!(schedule.window(ReloadPhase::TransitionToCursor).1, 1.0);

        // Half-open: a boundary belongs to the later phase
        assert_eq!(schedule.phase_at(0.15), ReloadPhase::ReachIn);
        assert_eq!(schedule.phase_at(1.0), ReloadPhase::TransitionToCursor);
        assert_eq!(schedule.phase_at(0.0), ReloadPhase::TransitionToCenter);
    }

    #[test]
    fn test_schedule_rejects_bad_fractions() {
        assert!(matches!(
            PhaseSchedule::new([0.1; 7]),
            Err(ReloadError::InvalidSchedule(_))
        ));
        assert!(PhaseSchedule::new([0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(PhaseSchedule::new([f64::NAN, 0.2, 0.1, 0.15, 0.1, 0.15, 0.15]).is_err());
    }

    #[test]
    fn test_phase_coverage_in_order() {
        let mut animator = ReloadAnimator::default();
        animator.start(10.0, UnitQuaternion::identity()).unwrap();

        let mut seen: Vec<ReloadPhase> = Vec::new();
        let steps = 2000;
        for i in 0..=steps {
            let now = 10.0 + animator.duration() * i as f64 / steps as f64;
            let phase = animator.current_phase(now).unwrap();
            if seen.last() != Some(&phase) {
                seen.push(phase);
            }
        }

        assert_eq!(seen, ReloadPhase::ALL.to_vec());
    }

    #[test]
    fn test_start_rejected_while_active() {
        let mut animator = ReloadAnimator::default();
        let q = yawed(0.5);
        animator.start(0.0, q).unwrap();

        assert_eq!(animator.start(0.5, UnitQuaternion::identity()), Err(ReloadError::AlreadyActive));

        // Original capture and start time survive the rejected call
        assert_relative_eq!(animator.progress(1.0), 0.5, epsilon = 1e-12);
        let back = animator.weapon_transition_quaternion(1.999, &UnitQuaternion::identity());
        assert!(aimline_quat::angular_distance(&back, &q) < 1e-3);
    }

    #[test]
    fn test_update_deactivates_after_duration() {
        let mut animator = ReloadAnimator::default();
        animator.start(1.0, UnitQuaternion::identity()).unwrap();

        assert!(!animator.update(2.5));
        assert!(animator.is_active());
        assert!(animator.update(3.0));
        assert!(!animator.is_active());
        assert!(!animator.update(4.0));

        assert_eq!(animator.current_phase(3.0), None);
        assert_eq!(animator.progress(3.0), 1.0);
        // Restart is allowed once idle
        assert!(animator.start(5.0, UnitQuaternion::identity()).is_ok());
    }

    #[test]
    fn test_identity_round_trip() {
        let mut animator = ReloadAnimator::default();
        animator.start(0.0, UnitQuaternion::identity()).unwrap();

        let now = animator.duration() * 0.99;
        assert_eq!(animator.current_phase(now), Some(ReloadPhase::TransitionToCursor));
        let q = animator.weapon_transition_quaternion(now, &UnitQuaternion::identity());
        assert!(aimline_quat::angular_distance(&q, &UnitQuaternion::identity()) < 1e-9);
    }

    #[test]
    fn test_transition_visits_center_and_returns() {
        let mut animator = ReloadAnimator::default();
        let original = yawed(1.1);
        animator.start(0.0, original).unwrap();
        let current = yawed(-0.4);

        let start = animator.weapon_transition_quaternion(0.0, &current);
        assert!(aimline_quat::angular_distance(&start, &original) < 1e-9);

        let mid = animator.weapon_transition_quaternion(1.0, &current);
        assert!(aimline_quat::angular_distance(&mid, &UnitQuaternion::identity()) < 1e-12);

        let end = animator.weapon_transition_quaternion(1.9999, &current);
        assert!(aimline_quat::angular_distance(&end, &original) < 1e-5);

        // Idle hands back whatever the caller has
        let mut idle = ReloadAnimator::default();
        idle.update(0.0);
        assert_eq!(idle.weapon_transition_quaternion(0.0, &current), current);
    }

    #[test]
    fn test_ik_beyond_reach() {
        let arm = ArmIK::new(1.5, 1.4).unwrap();
        let shoulder = Vector3::new(1.0, -2.0, 0.5);
        let direction = Vector3::new(1.0, 2.0, -2.0).normalize();
        let target = shoulder + direction * (arm.reach() + 1e-6);

        let solution = arm.solve(&shoulder, &target);
        assert!(solution.is_at_limit);
        assert_relative_eq!(solution.wrist, shoulder + direction * 2.9, epsilon = 1e-9);
        assert_relative_eq!(solution.elbow, shoulder + direction * 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_ik_inside_inner_radius() {
        let arm = ArmIK::new(1.5, 1.4).unwrap();
        let shoulder = Vector3::zeros();
        let target = Vector3::new(0.0, 0.0, -(0.1 - 1e-6));

        let solution = arm.solve(&shoulder, &target);
        assert!(solution.is_at_limit);
        assert_eq!(solution.wrist, target);
        assert_relative_eq!(solution.elbow, Vector3::new(0.0, 0.0, -1.5), epsilon = 1e-9);
    }

    #[test]
    fn test_ik_target_on_shoulder() {
        let arm = ArmIK::new(1.5, 1.4).unwrap();
        let shoulder = Vector3::new(0.3, 0.3, 0.3);
        let solution = arm.solve(&shoulder, &shoulder);
        assert!(solution.is_at_limit);
        assert!(solution.elbow.iter().all(|c| c.is_finite()));
        assert_relative_eq!((solution.elbow - shoulder).norm(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ik_reachable_preserves_lengths_and_bends_up() {
        let arm = ArmIK::new(1.5, 1.4).unwrap();
        let shoulder = Vector3::new(-2.2, -1.9, -1.1);
        let target = Vector3::new(0.0, -0.4, -0.7);

        let solution = arm.solve(&shoulder, &target);
        assert!(!solution.is_at_limit);
        assert_eq!(solution.wrist, target);
        assert_relative_eq!((solution.elbow - shoulder).norm(), 1.5, epsilon = 1e-9);
        assert_relative_eq!((solution.wrist - solution.elbow).norm(), 1.4, epsilon = 1e-9);

        // Elbow sits above the straight shoulder-wrist line
        let direction = (target - shoulder).normalize();
        let along = (solution.elbow - shoulder).dot(&direction);
        let on_line = shoulder + direction * along;
        assert!(solution.elbow.y > on_line.y);
    }

    #[test]
    fn test_ik_vertical_direction_uses_fallback_side() {
        let arm = ArmIK::new(1.5, 1.4).unwrap();
        let shoulder = Vector3::zeros();
        let target = Vector3::new(0.0, 2.0, 0.0);

        let solution = arm.solve(&shoulder, &target);
        assert!(!solution.is_at_limit);
        assert!(solution.elbow.iter().all(|c| c.is_finite()));
        assert_relative_eq!(solution.elbow.norm(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_arm() {
        assert!(matches!(ArmIK::new(0.0, 1.4), Err(ReloadError::InvalidArm(_))));
        assert!(ReloadAnimator::new(ReloadConfig {
            forearm: -1.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_hand_target_tracks_weapon() {
        let mut animator = ReloadAnimator::default();
        animator.start(0.0, UnitQuaternion::identity()).unwrap();
        let now = 0.8; // progress 0.4, inside contact

        let a = Vector3::new(0.0, 1.6, 4.2);
        let b = a + Vector3::new(0.5, -0.1, 0.2);
        let hand_a = animator.target_hand_position(now, &a).unwrap();
        let hand_b = animator.target_hand_position(now, &b).unwrap();
        assert_relative_eq!(hand_b - hand_a, b - a, epsilon = 1e-12);
    }

    #[test]
    fn test_hand_target_phase_endpoints() {
        let mut animator = ReloadAnimator::default();
        animator.start(0.0, UnitQuaternion::identity()).unwrap();
        let weapon = Vector3::new(0.0, 1.6, 4.2);
        let contact = weapon + Vector3::new(0.0, 0.4, 0.1);

        // Start of reach_in: far start offset
        let start = animator.target_hand_position(0.3, &weapon).unwrap();
        assert_relative_eq!(start, weapon + Vector3::new(-1.8, -0.3, -0.8), epsilon = 1e-9);

        // Start of pull_back: on the slide
        let on_slide = animator.target_hand_position(0.9, &weapon).unwrap();
        assert_relative_eq!(on_slide, contact, epsilon = 1e-9);

        // No target during transitions
        assert!(animator.target_hand_position(0.1, &weapon).is_none());
        assert!(animator.target_hand_position(1.9, &weapon).is_none());
    }

    #[test]
    fn test_arm_segments_visibility() {
        let mut animator = ReloadAnimator::default();
        let weapon = Vector3::new(0.0, 1.6, 4.2);
        assert!(animator.arm_segments(0.0, &weapon).is_none());

        animator.start(0.0, UnitQuaternion::identity()).unwrap();
        assert!(animator.arm_segments(0.1, &weapon).is_none());
        assert!(animator.arm_segments(1.8, &weapon).is_none());

        let arm = animator.arm_segments(1.0, &weapon).unwrap();
        assert_eq!(arm.phase, ReloadPhase::PullBack);
        assert_relative_eq!(arm.shoulder, weapon + Vector3::new(-2.2, -1.5, -0.3), epsilon = 1e-12);
        assert_eq!(arm.upper_arm_length, 1.5);
        assert_eq!(arm.forearm_length, 1.4);
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&ReloadPhase::PullBack).unwrap();
        assert_eq!(json, "\"pull_back\"");
        assert_eq!(ReloadPhase::TransitionToCursor.to_string(), "transition_to_cursor");
    }

    proptest! {
        #[test]
        fn prop_ik_never_exceeds_reach(
            x in -5.0f64..5.0, y in -5.0f64..5.0, z in -5.0f64..5.0,
        ) {
            let arm = ArmIK::new(1.5, 1.4).unwrap();
            let shoulder = Vector3::zeros();
            let solution = arm.solve(&shoulder, &Vector3::new(x, y, z));
            prop_assert!(solution.wrist.norm() <= arm.reach() + 1e-9);
            prop_assert!((solution.elbow.norm() - 1.5).abs() < 1e-9);
            prop_assert!(solution.elbow_angle.is_finite());
        }
    }
}
