//! Scenario runner - drives the weapon rig through scripted marker input.
//!
//! Every tick goes through the same path as the game loop: a
//! `GeometrySample` snapshot is handed to `WeaponRig::tick`. After each tick
//! the runner checks the pipeline invariants and fails the scenario on the
//! first violation.

use crate::context::SimClock;
use crate::exporter::{SimExport, SimFrame};
use crate::oracle::{MarkerOracle, OracleSource, Trajectory};
use crate::scenarios::ScenarioId;

use aimline_core::aimline_quat::{self, FORWARD};
use aimline_core::{
    ConfigError, GeometryResolver, ReloadPhase, RigConfig, RigFrame, ShutdownOutcome, TrackerConfig,
    TrackerError, TrackerRuntime, WeaponEvent, WeaponRig,
};
use aimline_env::{FrameClock, GeometrySample, SnapshotSlot, SystemClock};
use nalgebra::{UnitQuaternion, Vector3};
use serde::Serialize;
use std::f64::consts::{PI, TAU};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Allowed deviation of a quaternion norm from 1.
const NORM_TOLERANCE: f64 = 1e-6;

/// Allowed angle between the barrel and the aim ray, radians.
const AIM_TOLERANCE: f64 = 1e-6;

/// Errors that end a scenario early.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("t={time:.3}s: {message}")]
    Invariant { time: f64, message: String },
}

fn violation(time: f64, message: impl Into<String>) -> SimError {
    SimError::Invariant {
        time,
        message: message.into(),
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Ticks with a visible marker
    pub frames_detected: u64,

    /// Ticks without a marker
    pub frames_lost: u64,

    pub shots_fired: u64,
    pub reloads_started: u64,
    pub slide_racks: u64,
    pub reloads_completed: u64,

    /// Largest |‖q‖ - 1| seen on any rendered orientation
    pub max_norm_error: f64,

    /// Largest barrel-to-aim-ray angle, radians
    pub max_aim_error: f64,

    /// Snapshots published by the tracking thread
    pub snapshots_published: u64,
}

/// One rig plus the bookkeeping shared by every scenario.
struct Session<'a> {
    rig: WeaponRig,
    resolver: GeometryResolver,
    base_offset: Vector3<f64>,
    metrics: ScenarioMetrics,
    ticks: u64,
    time: f64,
    last: GeometrySample,
    export: Option<&'a mut SimExport>,
}

impl<'a> Session<'a> {
    fn new(config: &RigConfig, export: Option<&'a mut SimExport>) -> Result<Self, SimError> {
        Ok(Self {
            rig: WeaponRig::new(config)?,
            resolver: GeometryResolver::new(config.geometry).map_err(ConfigError::from)?,
            base_offset: config.pose.base_offset,
            metrics: ScenarioMetrics::default(),
            ticks: 0,
            time: 0.0,
            last: GeometrySample::no_detection(),
            export,
        })
    }

    /// Resolves an oracle reading into the sample the tracking thread
    /// would publish.
    fn sample_from(&mut self, detection: Option<aimline_env::MarkerDetection>) -> GeometrySample {
        self.last = match detection {
            Some(detection) => self.resolver.sample(&detection),
            None => self.last.without_detection(),
        };
        self.last
    }

    /// Runs one rig tick and checks the per-frame invariants.
    fn step(&mut self, now: f64, sample: &GeometrySample) -> Result<RigFrame, SimError> {
        let frame = self.rig.tick(now, sample);
        self.ticks += 1;
        self.time = now;

        if frame.detected {
            self.metrics.frames_detected += 1;
        } else {
            self.metrics.frames_lost += 1;
        }
        if frame.shot.is_some() {
            self.metrics.shots_fired += 1;
        }
        for event in &frame.events {
            match event {
                WeaponEvent::ReloadStarted { .. } => self.metrics.reloads_started += 1,
                WeaponEvent::SlideRacked => self.metrics.slide_racks += 1,
                WeaponEvent::ReloadComplete { .. } => self.metrics.reloads_completed += 1,
            }
        }

        for q in [&frame.pose.orientation, &frame.orientation] {
            let error = (q.quaternion().norm() - 1.0).abs();
            self.metrics.max_norm_error = self.metrics.max_norm_error.max(error);
            if !(error <= NORM_TOLERANCE) {
                return Err(violation(now, format!("quaternion norm off by {:.3e}", error)));
            }
        }

        if frame.weapon_position.iter().any(|c| !c.is_finite()) {
            return Err(violation(now, "non-finite weapon position"));
        }

        let direction = self.rig.controller().firing_direction();
        if !((direction.norm() - 1.0).abs() <= NORM_TOLERANCE) {
            return Err(violation(now, "firing direction is not a unit vector"));
        }

        if let Some(arm) = &frame.arm {
            if arm.elbow.iter().chain(arm.wrist.iter()).any(|c| !c.is_finite()) {
                return Err(violation(now, "non-finite arm joint"));
            }
        }

        let (ammo, max_ammo) = frame.ammo;
        if ammo > max_ammo {
            return Err(violation(now, format!("ammo {} exceeds magazine {}", ammo, max_ammo)));
        }

        if let Some(export) = self.export.as_deref_mut() {
            export.add_frame(SimFrame::from_rig(&frame, sample));
        }

        Ok(frame)
    }

    /// Angle between the rendered barrel and the horizontal aim ray.
    fn check_aim(&mut self, frame: &RigFrame) -> Result<(), SimError> {
        let barrel = aimline_quat::rotate(&frame.pose.orientation, &FORWARD);
        let yaw = frame.pose.yaw;
        let aim = Vector3::new(yaw.cos(), 0.0, -yaw.sin());
        let error = barrel.cross(&aim).norm().atan2(barrel.dot(&aim));
        self.metrics.max_aim_error = self.metrics.max_aim_error.max(error);
        if error > AIM_TOLERANCE {
            return Err(violation(
                frame.time,
                format!("barrel {:.3} rad off the aim ray", error),
            ));
        }
        Ok(())
    }
}

/// Runs weapon pipeline scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Rig calibration
    config: RigConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 60,
            max_duration_secs: 10.0,
            config: RigConfig::default(),
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the rig calibration.
    pub fn with_config(mut self, config: RigConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording every tick.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some(&mut export));
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        if !(self.max_duration_secs.is_finite() && self.max_duration_secs > 0.0) {
            let reason = format!("duration must be positive and finite, got {}", self.max_duration_secs);
            return self.result(scenario, 0, 0.0, ScenarioMetrics::default(), Some(reason));
        }

        let mut session = match Session::new(&self.config, export) {
            Ok(session) => session,
            Err(e) => return self.result(scenario, 0, 0.0, ScenarioMetrics::default(), Some(e.to_string())),
        };

        let outcome = match scenario {
            ScenarioId::Sweep => self.run_sweep(&mut session),
            ScenarioId::Dropout => self.run_dropout(&mut session),
            ScenarioId::Reload => self.run_reload(&mut session),
            ScenarioId::Jitter => self.run_jitter(&mut session),
            ScenarioId::Threaded => self.run_threaded(&mut session),
        };

        self.result(
            scenario,
            session.ticks,
            session.time,
            session.metrics,
            outcome.err().map(|e| e.to_string()),
        )
    }

    fn result(
        &self,
        scenario: ScenarioId,
        total_ticks: u64,
        final_time_secs: f64,
        metrics: ScenarioMetrics,
        failure_reason: Option<String>,
    ) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks,
            final_time_secs,
            failure_reason,
            metrics,
        }
    }

    fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    fn dt(&self) -> f64 {
        1.0 / self.tick_rate_hz as f64
    }

    fn ticks_for(&self, secs: f64) -> u64 {
        (secs * self.tick_rate_hz as f64).ceil().max(1.0) as u64
    }

    /// AIM-001: Sweep - barrel must follow the aim ray across the image.
    fn run_sweep(&self, session: &mut Session<'_>) -> Result<(), SimError> {
        let clock = SimClock::new();
        let width = self.config.geometry.image_width;
        let half_d = (self.config.geometry.radius / 2.0).abs();
        let mut oracle = MarkerOracle::new(self.physics_seed(), width).with_noise(0.5, 0.2, 0.002);
        let trajectory = Trajectory::Sweep {
            period: 4.0,
            twist_amplitude: 45.0,
        };

        for _ in 0..self.ticks_for(self.max_duration_secs) {
            clock.advance_time(Duration::from_secs_f64(self.dt()));
            let now = clock.now_secs();

            let detection = oracle.observe(&trajectory.truth_at(now, width));
            let sample = session.sample_from(detection);
            if sample.position_offset.abs() > half_d + 1e-9 {
                return Err(violation(now, format!("d={:.4} outside ±r/2", sample.position_offset)));
            }

            let frame = session.step(now, &sample)?;
            session.check_aim(&frame)?;
        }

        if session.metrics.frames_detected == 0 {
            return Err(violation(session.time, "marker never detected"));
        }
        Ok(())
    }

    /// AIM-002: Dropout - lost frames hold the last geometry at rest depth.
    fn run_dropout(&self, session: &mut Session<'_>) -> Result<(), SimError> {
        let clock = SimClock::new();
        let width = self.config.geometry.image_width;
        let base_z = session.base_offset.z;
        let mut oracle = MarkerOracle::new(self.physics_seed(), width)
            .with_noise(2.0, 1.0, 0.01)
            .with_dropout(0.3);
        let trajectory = Trajectory::Sweep {
            period: 8.0,
            twist_amplitude: 20.0,
        };
        let blackout = (self.max_duration_secs * 0.2, self.max_duration_secs * 0.2 + 1.0);

        let mut previous_x: Option<f64> = None;
        for _ in 0..self.ticks_for(self.max_duration_secs) {
            clock.advance_time(Duration::from_secs_f64(self.dt()));
            let now = clock.now_secs();

            let detection = if (blackout.0..blackout.1).contains(&now) {
                None
            } else {
                oracle.observe(&trajectory.truth_at(now, width))
            };
            let sample = session.sample_from(detection);
            let frame = session.step(now, &sample)?;

            if !frame.detected {
                let z = frame.pose.world_offset.z;
                if z != base_z {
                    return Err(violation(now, format!("depth drifted to {:.6} while lost", z)));
                }
                if let Some(x) = previous_x {
                    if frame.pose.world_offset.x != x {
                        return Err(violation(now, "lateral offset moved while lost"));
                    }
                }
            }
            previous_x = Some(frame.pose.world_offset.x);
        }

        let (detected, lost) = (session.metrics.frames_detected, session.metrics.frames_lost);
        if detected == 0 || lost == 0 {
            return Err(violation(
                session.time,
                format!("expected both detected and lost frames, got {}/{}", detected, lost),
            ));
        }
        Ok(())
    }

    /// AIM-003: Reload - one gesture reload, then an auto reload after
    /// emptying the magazine.
    fn run_reload(&self, session: &mut Session<'_>) -> Result<(), SimError> {
        let clock = SimClock::new();
        let width = self.config.geometry.image_width;
        let reload_secs = self.config.reload.duration;
        let max_ammo = self.config.weapon.max_ammo;
        let mut oracle = MarkerOracle::new(self.physics_seed(), width);
        let trajectory = Trajectory::Still {
            x_pixel: width * 0.25,
            rotation_angle: 15.0,
            distance: 0.5,
        };

        // Trigger pulses: on for half of each spacing
        let spacing = (self.config.weapon.fire_interval * 1.5).max(4.0 * self.dt());
        let first_shot = 0.2;
        let reload_gesture = first_shot + spacing;
        let burst_start = reload_gesture + reload_secs + 0.5;
        let burst_end = burst_start + spacing * max_ammo as f64;
        let duration = self.max_duration_secs.max(burst_end + reload_secs + 0.5);

        let mut events: Vec<WeaponEvent> = Vec::new();
        let mut phases: Vec<ReloadPhase> = Vec::new();
        let mut reloads_checked = 0;

        for _ in 0..self.ticks_for(duration) {
            clock.advance_time(Duration::from_secs_f64(self.dt()));
            let now = clock.now_secs();

            let pulse = |start: f64| now >= start && now < start + spacing / 2.0;
            let in_burst = now >= burst_start && now < burst_end;
            let shooting = pulse(first_shot) || (in_burst && ((now - burst_start) / spacing).fract() < 0.5);
            let reloading = pulse(reload_gesture);

            let detection = oracle.observe(&trajectory.truth_at(now, width));
            let sample = session.sample_from(detection).with_gestures(shooting, reloading);
            let frame = session.step(now, &sample)?;
            events.extend(frame.events.iter().copied());

            match frame.reload_phase {
                Some(phase) => {
                    if phases.last() != Some(&phase) {
                        phases.push(phase);
                    }
                    let centred = aimline_quat::angular_distance(&frame.orientation, &UnitQuaternion::identity());
                    if !phase.is_transition() {
                        if centred > 1e-9 {
                            return Err(violation(now, format!("weapon not centred during {}", phase)));
                        }
                        if frame.arm.is_none() {
                            return Err(violation(now, format!("no arm during {}", phase)));
                        }
                    } else if frame.arm.is_some() {
                        return Err(violation(now, format!("arm drawn during {}", phase)));
                    }
                }
                None if !phases.is_empty() => {
                    if phases != ReloadPhase::ALL.to_vec() {
                        return Err(violation(now, format!("phase order {:?}", phases)));
                    }
                    if frame.orientation != frame.pose.orientation {
                        return Err(violation(now, "orientation not handed back after reload"));
                    }
                    phases.clear();
                    reloads_checked += 1;
                }
                None => {}
            }
        }

        let expected = vec![
            WeaponEvent::ReloadStarted { auto: false },
            WeaponEvent::SlideRacked,
            WeaponEvent::ReloadComplete { ammo: max_ammo },
            WeaponEvent::ReloadStarted { auto: true },
            WeaponEvent::SlideRacked,
            WeaponEvent::ReloadComplete { ammo: max_ammo },
        ];
        if events != expected {
            return Err(violation(session.time, format!("event sequence {:?}", events)));
        }
        if reloads_checked != 2 {
            return Err(violation(session.time, format!("{} reloads finished", reloads_checked)));
        }
        let shots = session.metrics.shots_fired;
        if shots != 1 + max_ammo as u64 {
            return Err(violation(session.time, format!("{} shots fired", shots)));
        }
        if session.rig.weapon().ammo() != (max_ammo, max_ammo) {
            return Err(violation(session.time, "magazine not refilled"));
        }
        Ok(())
    }

    /// AIM-004: Jitter - noisy detector and irregular frame times.
    fn run_jitter(&self, session: &mut Session<'_>) -> Result<(), SimError> {
        let clock = SimClock::new();
        let width = self.config.geometry.image_width;
        let mut oracle = MarkerOracle::new(self.physics_seed(), width)
            .with_noise(25.0, 8.0, 0.05)
            .with_dropout(0.05);
        let trajectory = Trajectory::Sweep {
            period: 3.0,
            twist_amplitude: 90.0,
        };

        loop {
            let dt = oracle.uniform(0.005, 0.040);
            clock.advance_time(Duration::from_secs_f64(dt));
            let now = clock.now_secs();
            if now > self.max_duration_secs {
                break;
            }

            // Trigger every ~0.6s and a reload gesture every ~3s
            let shooting = (now / 0.6).fract() < 0.3;
            let reloading = (now / 3.0).fract() < 0.05;

            let detection = oracle.observe(&trajectory.truth_at(now, width));
            let sample = session.sample_from(detection).with_gestures(shooting, reloading);
            let alpha = sample.orientation_alpha;
            if !(-1e-9..=PI + 1e-9).contains(&alpha) {
                return Err(violation(now, format!("alpha {:.4} outside [0, π]", alpha)));
            }

            let frame = session.step(now, &sample)?;
            session.check_aim(&frame)?;
        }
        Ok(())
    }

    /// AIM-005: Threaded - real tracking thread, wall-clock render loop.
    fn run_threaded(&self, session: &mut Session<'_>) -> Result<(), SimError> {
        let clock = SystemClock::new();
        let width = self.config.geometry.image_width;
        let geometry = self.config.geometry;
        let resolver = GeometryResolver::new(geometry).map_err(ConfigError::from)?;

        let oracle = MarkerOracle::new(self.physics_seed(), width)
            .with_noise(3.0, 1.0, 0.01)
            .with_dropout(0.1);
        let source = OracleSource::new(
            oracle,
            Trajectory::Sweep {
                period: 1.0,
                twist_amplitude: 30.0,
            },
            1.0 / 120.0,
        )
        .with_pace(Duration::from_millis(2))
        .with_failing_opens(2)
        .with_device_loss_at(40);

        let tracker_config = TrackerConfig {
            reopen_interval: 0.02,
            join_timeout: 1.0,
            idle_interval: 0.0,
        };
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let mut handle = TrackerRuntime::spawn(source, geometry, tracker_config, slot)?;

        // Wall-clock run, capped so CI stays fast
        let run_secs = self.max_duration_secs.min(1.5);
        let frame_time = Duration::from_secs_f64(self.dt());
        let mut last_sequence = 0;
        let mut outcome = Ok(());

        while clock.now_secs() < run_secs {
            let snapshot = handle.snapshot();
            if snapshot.sequence < last_sequence {
                outcome = Err(violation(clock.now_secs(), "snapshot sequence went backwards"));
                break;
            }
            last_sequence = snapshot.sequence;

            let sample = snapshot.value;
            if let Err(e) = check_untorn(&resolver, &sample, clock.now_secs()) {
                outcome = Err(e);
                break;
            }

            if let Err(e) = session.step(clock.now_secs(), &sample) {
                outcome = Err(e);
                break;
            }
            std::thread::sleep(frame_time);
        }

        session.metrics.snapshots_published = handle.slot().sequence();
        let shutdown = handle.shutdown();
        outcome?;

        if shutdown != ShutdownOutcome::Joined {
            return Err(violation(session.time, format!("tracker shutdown {:?}", shutdown)));
        }
        if session.metrics.frames_detected == 0 {
            return Err(violation(session.time, "render loop never saw a detection"));
        }
        if session.metrics.snapshots_published < 10 {
            return Err(violation(
                session.time,
                format!("only {} snapshots published", session.metrics.snapshots_published),
            ));
        }
        Ok(())
    }
}

/// Summary of a batch of runs, in the shape the CLI prints with `--json`.
pub fn run_summary(results: &[ScenarioResult]) -> serde_json::Value {
    let failed = results.iter().filter(|r| !r.passed).count();
    serde_json::json!({
        "total": results.len(),
        "passed": results.len() - failed,
        "failed": failed,
        "results": results.iter().map(|r| {
            serde_json::json!({
                "scenario": r.scenario.name(),
                "seed": r.seed,
                "passed": r.passed,
                "ticks": r.total_ticks,
                "time_secs": r.final_time_secs,
                "failure_reason": r.failure_reason,
                "metrics": r.metrics,
            })
        }).collect::<Vec<_>>(),
    })
}

/// A torn snapshot would pair `d` from one frame with `alpha` from another;
/// recompute `alpha` from `d` and compare.
fn check_untorn(resolver: &GeometryResolver, sample: &GeometrySample, now: f64) -> Result<(), SimError> {
    let c = resolver.config();
    let ratio = sample.position_offset / (c.artistic * c.radius) + 0.5;
    let expected = resolver.resolve(ratio * c.image_width).alpha;
    let diff = (sample.orientation_alpha - expected + PI).rem_euclid(TAU) - PI;
    if diff.abs() > 1e-6 {
        return Err(violation(
            now,
            format!(
                "torn snapshot: d={:.4} alpha={:.4} (expected {:.4})",
                sample.position_offset, sample.orientation_alpha, expected
            ),
        ));
    }
    Ok(())
}
