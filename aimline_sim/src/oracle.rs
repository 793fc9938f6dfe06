//! Ground truth oracle for simulation.
//!
//! The oracle stands in for the camera and fiducial detector:
//! - Scripted true marker motion (`Trajectory`)
//! - Detector readings with Gaussian noise and random dropouts
//! - A `MarkerSource` adapter so the real tracking thread can consume it

use aimline_env::{EnvError, MarkerDetection, MarkerSource};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Duration;

/// Closest a detected marker is ever reported to the camera.
const MIN_DETECTED_DISTANCE: f64 = 0.01;

/// The true marker state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerTruth {
    /// Image column of the marker centre
    pub x_pixel: f64,

    /// Twist in degrees
    pub rotation_angle: f64,

    /// Distance to the camera
    pub distance: f64,
}

/// Scripted marker motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trajectory {
    /// Marker held in place
    Still {
        x_pixel: f64,
        rotation_angle: f64,
        distance: f64,
    },

    /// Marker swept edge to edge while twisting and moving in depth
    Sweep { period: f64, twist_amplitude: f64 },
}

impl Trajectory {
    /// Marker held at the image centre, 0.5 from the camera.
    pub fn centred(image_width: f64) -> Self {
        Trajectory::Still {
            x_pixel: image_width / 2.0,
            rotation_angle: 0.0,
            distance: 0.5,
        }
    }

    /// True marker state at time `t` (seconds).
    pub fn truth_at(&self, t: f64, image_width: f64) -> MarkerTruth {
        match *self {
            Trajectory::Still {
                x_pixel,
                rotation_angle,
                distance,
            } => MarkerTruth {
                x_pixel,
                rotation_angle,
                distance,
            },
            Trajectory::Sweep {
                period,
                twist_amplitude,
            } => {
                let phase = TAU * t / period;
                MarkerTruth {
                    x_pixel: image_width / 2.0 * (1.0 + phase.sin()),
                    rotation_angle: twist_amplitude * (phase / 0.8).sin(),
                    distance: 0.5 + 0.2 * (phase / 1.7).sin(),
                }
            }
        }
    }
}

/// Seeded detector model.
pub struct MarkerOracle {
    /// Seed the RNG was created from
    seed: u64,

    /// RNG for noise and dropouts
    rng: ChaCha8Rng,

    image_width: f64,

    /// Per-axis noise; `None` means exact readings
    pixel_noise: Option<Normal<f64>>,
    rotation_noise: Option<Normal<f64>>,
    distance_noise: Option<Normal<f64>>,

    /// Probability a frame has no detection
    dropout_rate: f64,

    detections: u64,
    dropouts: u64,
}

impl MarkerOracle {
    /// Creates a noise-free oracle.
    pub fn new(seed: u64, image_width: f64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            image_width,
            pixel_noise: None,
            rotation_noise: None,
            distance_noise: None,
            dropout_rate: 0.0,
            detections: 0,
            dropouts: 0,
        }
    }

    /// Sets Gaussian noise standard deviations (pixels, degrees, distance).
    /// Zero or invalid deviations disable noise on that axis.
    pub fn with_noise(mut self, pixel_std: f64, rotation_std: f64, distance_std: f64) -> Self {
        self.pixel_noise = noise(pixel_std);
        self.rotation_noise = noise(rotation_std);
        self.distance_noise = noise(distance_std);
        self
    }

    /// Sets the per-frame dropout probability.
    pub fn with_dropout(mut self, rate: f64) -> Self {
        self.dropout_rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Produces one detector reading of `truth`, or `None` on a dropout.
    pub fn observe(&mut self, truth: &MarkerTruth) -> Option<MarkerDetection> {
        if self.dropout_rate > 0.0 && self.rng.gen::<f64>() < self.dropout_rate {
            self.dropouts += 1;
            return None;
        }

        let x = truth.x_pixel + sample(&mut self.rng, self.pixel_noise);
        let rotation = truth.rotation_angle + sample(&mut self.rng, self.rotation_noise);
        let distance = truth.distance + sample(&mut self.rng, self.distance_noise);

        self.detections += 1;
        Some(MarkerDetection::new(
            x.clamp(0.0, self.image_width),
            rotation,
            distance.max(MIN_DETECTED_DISTANCE),
        ))
    }

    /// Returns a uniform draw in `[low, high)` from the oracle's RNG.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn image_width(&self) -> f64 {
        self.image_width
    }

    /// `(detections, dropouts)` so far.
    pub fn counts(&self) -> (u64, u64) {
        (self.detections, self.dropouts)
    }
}

fn noise(std_dev: f64) -> Option<Normal<f64>> {
    if std_dev.is_finite() && std_dev > 0.0 {
        Normal::new(0.0, std_dev).ok()
    } else {
        None
    }
}

fn sample(rng: &mut ChaCha8Rng, dist: Option<Normal<f64>>) -> f64 {
    dist.map_or(0.0, |d| d.sample(rng))
}

/// `MarkerSource` backed by an oracle following a trajectory.
///
/// Each `next_detection` call is one camera frame `frame_dt` after the last.
pub struct OracleSource {
    oracle: MarkerOracle,
    trajectory: Trajectory,
    frame_dt: f64,
    frame: u64,

    /// Real time to sleep per frame, emulating capture latency
    pace: Option<Duration>,

    /// Number of `open` calls that fail before one succeeds
    failing_opens: u32,

    /// Frame at which the device is reported lost once
    lose_device_at: Option<u64>,
}

impl OracleSource {
    pub fn new(oracle: MarkerOracle, trajectory: Trajectory, frame_dt: f64) -> Self {
        Self {
            oracle,
            trajectory,
            frame_dt,
            frame: 0,
            pace: None,
            failing_opens: 0,
            lose_device_at: None,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn with_failing_opens(mut self, count: u32) -> Self {
        self.failing_opens = count;
        self
    }

    pub fn with_device_loss_at(mut self, frame: u64) -> Self {
        self.lose_device_at = Some(frame);
        self
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frame
    }
}

impl MarkerSource for OracleSource {
    fn open(&mut self) -> Result<(), EnvError> {
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(EnvError::unavailable("simulated camera busy"));
        }
        Ok(())
    }

    fn next_detection(&mut self) -> Result<Option<MarkerDetection>, EnvError> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        self.frame += 1;

        if self.lose_device_at == Some(self.frame) {
            self.lose_device_at = None;
            return Err(EnvError::lost("simulated unplug"));
        }

        let t = self.frame as f64 * self.frame_dt;
        let truth = self.trajectory.truth_at(t, self.oracle.image_width());
        Ok(self.oracle.observe(&truth))
    }

    fn name(&self) -> &str {
        "oracle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WIDTH: f64 = 1280.0;

    #[test]
    fn test_noise_free_reading_matches_truth() {
        let mut oracle = MarkerOracle::new(1, WIDTH);
        let truth = MarkerTruth {
            x_pixel: 300.0,
            rotation_angle: -20.0,
            distance: 0.7,
        };
        let detection = oracle.observe(&truth).unwrap();
        assert_eq!(detection.x_pixel, 300.0);
        assert_eq!(detection.rotation_angle, -20.0);
        assert_eq!(detection.distance_to_cam, 0.7);
        assert_eq!(oracle.counts(), (1, 0));
    }

    #[test]
    fn test_same_seed_same_readings() {
        let truth = Trajectory::centred(WIDTH).truth_at(0.0, WIDTH);
        let mut a = MarkerOracle::new(42, WIDTH).with_noise(5.0, 2.0, 0.02).with_dropout(0.2);
        let mut b = MarkerOracle::new(42, WIDTH).with_noise(5.0, 2.0, 0.02).with_dropout(0.2);

        for _ in 0..200 {
            assert_eq!(a.observe(&truth), b.observe(&truth));
        }
        assert_eq!(a.counts(), b.counts());
    }

    #[test]
    fn test_dropout_extremes() {
        let truth = Trajectory::centred(WIDTH).truth_at(0.0, WIDTH);

        let mut never = MarkerOracle::new(7, WIDTH).with_dropout(0.0);
        assert!((0..100).all(|_| never.observe(&truth).is_some()));

        let mut always = MarkerOracle::new(7, WIDTH).with_dropout(1.0);
        assert!((0..100).all(|_| always.observe(&truth).is_none()));
        assert_eq!(always.counts(), (0, 100));
    }

    #[test]
    fn test_sweep_covers_image() {
        let sweep = Trajectory::Sweep {
            period: 4.0,
            twist_amplitude: 30.0,
        };
        let xs: Vec<f64> = (0..400).map(|i| sweep.truth_at(i as f64 * 0.01, WIDTH).x_pixel).collect();
        let min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(min < 1.0);
        assert!(max > WIDTH - 1.0);
        assert_eq!(sweep.truth_at(0.0, WIDTH).x_pixel, WIDTH / 2.0);
    }

    #[test]
    fn test_source_failures() {
        let oracle = MarkerOracle::new(3, WIDTH);
        let mut source = OracleSource::new(oracle, Trajectory::centred(WIDTH), 1.0 / 60.0)
            .with_failing_opens(2)
            .with_device_loss_at(2);

        assert!(source.open().is_err());
        assert!(source.open().is_err());
        assert!(source.open().is_ok());

        assert!(source.next_detection().unwrap().is_some());
        let lost = source.next_detection().unwrap_err();
        assert!(lost.needs_reopen());
        assert!(source.next_detection().unwrap().is_some());
        assert_eq!(source.frames(), 3);
    }

    proptest! {
        #[test]
        fn prop_readings_stay_in_image(seed in 0u64..1000, x in -100.0f64..1400.0) {
            let mut oracle = MarkerOracle::new(seed, WIDTH).with_noise(40.0, 10.0, 0.3);
            let truth = MarkerTruth { x_pixel: x, rotation_angle: 0.0, distance: 0.05 };
            let detection = oracle.observe(&truth).unwrap();
            prop_assert!((0.0..=WIDTH).contains(&detection.x_pixel));
            prop_assert!(detection.distance_to_cam >= MIN_DETECTED_DISTANCE);
        }
    }
}
