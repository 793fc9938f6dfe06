//! JSON exporter for offline inspection of a run.
//!
//! Frames carry what a renderer would draw: the weapon transform, the reload
//! arm and the events fired that tick.

use aimline_core::aimline_quat;
use aimline_core::{ArmSegments, RigFrame};
use aimline_env::GeometrySample;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Marker visible this frame
    pub detected: bool,

    /// Sample geometry
    pub d: f64,
    pub alpha: f64,

    /// Weapon origin in world space
    pub weapon_position: [f64; 3],

    /// Tracking orientation, `[w, x, y, z]`
    pub pose_wxyz: [f64; 4],

    /// Rendered orientation, `[w, x, y, z]`
    pub render_wxyz: [f64; 4],

    /// Reload arm, when drawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arm: Option<ArmFrame>,

    /// Reload phase name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    pub ammo: u32,

    /// Events (shots, reload milestones)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl SimFrame {
    /// Builds an export frame from one rig tick and the sample it consumed.
    pub fn from_rig(frame: &RigFrame, sample: &GeometrySample) -> Self {
        let mut events: Vec<String> = frame
            .events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap_or_else(|_| format!("{:?}", e)))
            .collect();
        if frame.shot.is_some() {
            events.insert(0, "shot".to_string());
        }

        Self {
            time_sec: frame.time,
            detected: frame.detected,
            d: sample.position_offset,
            alpha: sample.orientation_alpha,
            weapon_position: point(&frame.weapon_position),
            pose_wxyz: aimline_quat::to_wxyz(&frame.pose.orientation),
            render_wxyz: aimline_quat::to_wxyz(&frame.orientation),
            arm: frame.arm.as_ref().map(ArmFrame::from),
            phase: frame.reload_phase.map(|p| p.name().to_string()),
            ammo: frame.ammo.0,
            events,
        }
    }
}

/// Arm joints for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmFrame {
    pub shoulder: [f64; 3],
    pub elbow: [f64; 3],
    pub wrist: [f64; 3],
    pub is_at_limit: bool,
}

impl From<&ArmSegments> for ArmFrame {
    fn from(arm: &ArmSegments) -> Self {
        Self {
            shoulder: point(&arm.shoulder),
            elbow: point(&arm.elbow),
            wrist: point(&arm.wrist),
            is_at_limit: arm.is_at_limit,
        }
    }
}

fn point(v: &Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Failure message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimline_core::WeaponRig;

    #[test]
    fn test_frame_from_rig() {
        let mut rig = WeaponRig::default();
        let sample = GeometrySample::new(0.05, 1.2, 10.0, 0.5)
            .unwrap()
            .with_gestures(true, false);
        let frame = SimFrame::from_rig(&rig.tick(0.0, &sample), &sample);

        assert!(frame.detected);
        assert_eq!(frame.d, 0.05);
        assert_eq!(frame.ammo, 6);
        assert_eq!(frame.events, vec!["shot".to_string()]);
        assert_eq!(frame.pose_wxyz, frame.render_wxyz);
        assert!(frame.arm.is_none());
    }

    #[test]
    fn test_export_json_shape() {
        let mut export = SimExport::new("sweep", 42);
        let mut rig = WeaponRig::default();
        let sample = GeometrySample::no_detection();
        for i in 0..3 {
            let t = i as f64 / 60.0;
            export.add_frame(SimFrame::from_rig(&rig.tick(t, &sample), &sample));
        }
        export.finalize(true, None);

        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["scenario"], "sweep");
        assert_eq!(value["frames"].as_array().unwrap().len(), 3);
        assert!(value.get("failure_reason").is_none());
        assert!(value["frames"][0].get("arm").is_none());
        assert!((export.duration_sec - 2.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("aimline-export-{}.json", std::process::id()));
        let export = SimExport::new("reload", 7);
        export.write_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: SimExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.seed, 7);
        let _ = std::fs::remove_file(&path);
    }
}
