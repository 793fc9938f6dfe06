//! Background tracking thread.
//!
//! The thread owns a `MarkerSource`, resolves each detection into a
//! `GeometrySample` and publishes it whole to a `SnapshotSlot`. The render
//! loop only ever copies the latest snapshot out.
//!
//! Capture trouble is never fatal: a failed open, a lost device or a frame
//! without a marker all publish the last-known geometry with
//! `distance_to_cam = 0`, and opening is retried every `reopen_interval`.
//!
//! Shutdown clears a `running` flag and waits up to `join_timeout` for the
//! thread to signal exit. A thread stuck inside a capture call is detached
//! rather than blocking the caller.

use crate::aimline_geometry::{GeometryConfig, GeometryResolver};
use crate::config::{require_positive, ConfigError};

use aimline_env::{GeometrySample, MarkerSource, Snapshot, SnapshotSlot};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Longest single sleep, so a cleared `running` flag is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid tracker config: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn tracking thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Tracking thread timing, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between attempts to open the source (default: 1.0)
    pub reopen_interval: f64,

    /// How long shutdown waits for the thread (default: 1.0)
    pub join_timeout: f64,

    /// Pause after each frame, 0 to spin on the source (default: 0.0)
    pub idle_interval: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            reopen_interval: 1.0,
            join_timeout: 1.0,
            idle_interval: 0.0,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("tracker.reopen_interval", self.reopen_interval)?;
        require_positive("tracker.join_timeout", self.join_timeout)?;
        if !self.idle_interval.is_finite() || self.idle_interval < 0.0 {
            return Err(ConfigError::invalid(format!(
                "tracker.idle_interval must be >= 0, got {}",
                self.idle_interval
            )));
        }
        for (name, secs) in [
            ("tracker.reopen_interval", self.reopen_interval),
            ("tracker.join_timeout", self.join_timeout),
            ("tracker.idle_interval", self.idle_interval),
        ] {
            seconds(name, secs)?;
        }
        Ok(())
    }
}

/// Converts a config interval, rejecting values `Duration` cannot hold.
fn seconds(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::invalid(format!("{} = {} is out of range: {}", name, secs, e)))
}

/// How `shutdown` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Thread exited and was joined
    Joined,

    /// Thread did not exit in time and was detached
    Abandoned,

    /// Shutdown had already run
    AlreadyStopped,
}

/// Signals thread exit on drop, including unwinding.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// Spawns tracking threads.
pub struct TrackerRuntime;

impl TrackerRuntime {
    /// Starts the tracking thread for `source`, publishing into `slot`.
    pub fn spawn<S: MarkerSource>(
        source: S,
        geometry: GeometryConfig,
        config: TrackerConfig,
        slot: SnapshotSlot<GeometrySample>,
    ) -> Result<TrackerHandle, TrackerError> {
        config.validate()?;
        let resolver = GeometryResolver::new(geometry).map_err(ConfigError::from)?;
        let join_timeout = seconds("tracker.join_timeout", config.join_timeout)?;

        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = channel::bounded(1);

        let worker = TrackerLoop {
            source,
            resolver,
            slot: slot.clone(),
            running: Arc::clone(&running),
            reopen_interval: seconds("tracker.reopen_interval", config.reopen_interval)?,
            idle_interval: seconds("tracker.idle_interval", config.idle_interval)?,
            last: slot.latest(),
            opened: false,
        };

        let thread = thread::Builder::new()
            .name("aimline-tracker".to_string())
            .spawn(move || {
                let _signal = ExitSignal(done_tx);
                worker.run();
            })?;

        Ok(TrackerHandle {
            running,
            done: done_rx,
            thread: Some(thread),
            slot,
            join_timeout,
        })
    }
}

struct TrackerLoop<S: MarkerSource> {
    source: S,
    resolver: GeometryResolver,
    slot: SnapshotSlot<GeometrySample>,
    running: Arc<AtomicBool>,
    reopen_interval: Duration,
    idle_interval: Duration,
    last: GeometrySample,
    opened: bool,
}

impl<S: MarkerSource> TrackerLoop<S> {
    fn run(mut self) {
        info!("Tracking thread started ({})", self.source.name());

        while self.running.load(Ordering::Acquire) {
            if !self.opened && !self.try_open() {
                self.publish_lost();
                self.sleep_while_running(self.reopen_interval);
                continue;
            }

            match self.source.next_detection() {
                Ok(Some(detection)) => {
                    let sample = self.resolver.sample(&detection);
                    debug!(
                        "Marker d={:.3} alpha={:.3} dist={:.3}",
                        sample.position_offset, sample.orientation_alpha, sample.distance_to_cam
                    );
                    self.last = sample;
                    self.slot.publish(sample);
                }
                Ok(None) => self.publish_lost(),
                Err(e) => {
                    warn!("Capture error on {}: {}", self.source.name(), e);
                    self.publish_lost();
                    if e.needs_reopen() {
                        self.source.close();
                        self.opened = false;
                    }
                }
            }

            if !self.idle_interval.is_zero() {
                self.sleep_while_running(self.idle_interval);
            }
        }

        if self.opened {
            self.source.close();
        }
        info!("Tracking thread stopped ({})", self.source.name());
    }

    fn try_open(&mut self) -> bool {
        match self.source.open() {
            Ok(()) => {
                info!("Opened marker source {}", self.source.name());
                self.opened = true;
                true
            }
            Err(e) => {
                warn!(
                    "Could not open {}: {} (retrying in {:.1}s)",
                    self.source.name(),
                    e,
                    self.reopen_interval.as_secs_f64()
                );
                false
            }
        }
    }

    /// Keeps the last geometry so the weapon holds still while the marker
    /// is gone.
    fn publish_lost(&mut self) {
        self.last = self.last.without_detection();
        self.slot.publish(self.last);
    }

    fn sleep_while_running(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

/// Owner-side handle to a running tracking thread.
pub struct TrackerHandle {
    running: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    slot: SnapshotSlot<GeometrySample>,
    join_timeout: Duration,
}

impl TrackerHandle {
    /// Copy of the newest sample.
    pub fn latest(&self) -> GeometrySample {
        self.slot.latest()
    }

    /// Newest snapshot with its sequence number.
    pub fn snapshot(&self) -> Arc<Snapshot<GeometrySample>> {
        self.slot.snapshot()
    }

    pub fn slot(&self) -> &SnapshotSlot<GeometrySample> {
        &self.slot
    }

    /// False once the thread has exited or shutdown has run.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the thread, waiting at most `join_timeout`.
    pub fn shutdown(&mut self) -> ShutdownOutcome {
        let Some(thread) = self.thread.take() else {
            return ShutdownOutcome::AlreadyStopped;
        };
        self.running.store(false, Ordering::Release);

        match self.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Tracking thread panicked");
                }
                info!("Tracking thread joined");
                ShutdownOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Tracking thread did not stop within {:.2}s, detaching",
                    self.join_timeout.as_secs_f64()
                );
                ShutdownOutcome::Abandoned
            }
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimline_env::{EnvError, MarkerDetection};
    use std::collections::VecDeque;

    struct ScriptedSource {
        opens_failing: usize,
        frames: VecDeque<Result<Option<MarkerDetection>, EnvError>>,
    }

    impl MarkerSource for ScriptedSource {
        fn open(&mut self) -> Result<(), EnvError> {
            if self.opens_failing > 0 {
                self.opens_failing -= 1;
                return Err(EnvError::unavailable("camera busy"));
            }
            Ok(())
        }

        fn next_detection(&mut self) -> Result<Option<MarkerDetection>, EnvError> {
            thread::sleep(Duration::from_millis(1));
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct StuckSource;

    impl MarkerSource for StuckSource {
        fn open(&mut self) -> Result<(), EnvError> {
            Ok(())
        }

        fn next_detection(&mut self) -> Result<Option<MarkerDetection>, EnvError> {
            thread::sleep(Duration::from_secs(3));
            Ok(None)
        }
    }

    fn fast_config() -> TrackerConfig {
        TrackerConfig {
            reopen_interval: 0.01,
            join_timeout: 1.0,
            idle_interval: 0.0,
        }
    }

    fn wait_for(handle: &TrackerHandle, pred: impl Fn(&GeometrySample) -> bool) -> GeometrySample {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let sample = handle.latest();
            if pred(&sample) || Instant::now() > deadline {
                return sample;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_publishes_resolved_detections() {
        let source = ScriptedSource {
            opens_failing: 0,
            frames: VecDeque::from(vec![Ok(Some(MarkerDetection::new(0.0, 12.0, 0.6)))]),
        };
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let mut handle =
            TrackerRuntime::spawn(source, GeometryConfig::default(), fast_config(), slot).unwrap();

        let sample = wait_for(&handle, |s| s.distance_to_cam > 0.0);
        assert!((sample.position_offset + 0.16).abs() < 1e-9);
        assert_eq!(sample.rotation_angle, 12.0);

        // Marker gone afterwards: geometry kept, detection cleared
        let lost = wait_for(&handle, |s| s.distance_to_cam == 0.0);
        assert_eq!(lost.distance_to_cam, 0.0);
        assert!((lost.position_offset + 0.16).abs() < 1e-9);

        assert_eq!(handle.shutdown(), ShutdownOutcome::Joined);
        assert_eq!(handle.shutdown(), ShutdownOutcome::AlreadyStopped);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_failed_open_is_retried() {
        let source = ScriptedSource {
            opens_failing: 3,
            frames: VecDeque::from(vec![Ok(Some(MarkerDetection::new(640.0, 0.0, 0.4)))]),
        };
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let mut handle =
            TrackerRuntime::spawn(source, GeometryConfig::default(), fast_config(), slot).unwrap();

        // Failed opens still publish "no detection"
        let sample = wait_for(&handle, |s| s.distance_to_cam > 0.0);
        assert_eq!(sample.distance_to_cam, 0.4);
        assert!(handle.snapshot().sequence >= 4);

        assert_eq!(handle.shutdown(), ShutdownOutcome::Joined);
    }

    #[test]
    fn test_device_loss_reopens() {
        let source = ScriptedSource {
            opens_failing: 0,
            frames: VecDeque::from(vec![
                Err(EnvError::lost("unplugged")),
                Ok(Some(MarkerDetection::new(1280.0, 0.0, 0.5))),
            ]),
        };
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let mut handle =
            TrackerRuntime::spawn(source, GeometryConfig::default(), fast_config(), slot).unwrap();

        let sample = wait_for(&handle, |s| s.distance_to_cam > 0.0);
        assert!((sample.position_offset - 0.16).abs() < 1e-9);
        assert_eq!(handle.shutdown(), ShutdownOutcome::Joined);
    }

    #[test]
    fn test_stuck_capture_is_abandoned() {
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let config = TrackerConfig {
            join_timeout: 0.05,
            ..fast_config()
        };
        let mut handle =
            TrackerRuntime::spawn(StuckSource, GeometryConfig::default(), config, slot).unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert_eq!(handle.shutdown(), ShutdownOutcome::Abandoned);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let result = TrackerRuntime::spawn(
            StuckSource,
            GeometryConfig {
                radius: 0.0,
                ..Default::default()
            },
            fast_config(),
            slot.clone(),
        );
        assert!(matches!(result, Err(TrackerError::Config(ConfigError::Geometry(_)))));

        let result = TrackerRuntime::spawn(
            StuckSource,
            GeometryConfig::default(),
            TrackerConfig {
                join_timeout: -1.0,
                ..fast_config()
            },
            slot,
        );
        assert!(matches!(result, Err(TrackerError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let config = TrackerConfig {
            reopen_interval: 1e30,
            ..fast_config()
        };
        assert!(config.validate().is_err());

        let slot = SnapshotSlot::new(GeometrySample::no_detection());
        let result = TrackerRuntime::spawn(StuckSource, GeometryConfig::default(), config, slot);
        assert!(matches!(result, Err(TrackerError::Config(ConfigError::Invalid(_)))));

        let config = TrackerConfig {
            join_timeout: f64::MAX,
            ..fast_config()
        };
        assert!(config.validate().is_err());
    }
}
