//! Aimline Core - Marker-Driven Weapon Pose and Reload Animation
//!
//! Turns noisy, asynchronous marker tracking into a stable 3D weapon:
//! 1. **Geometry**: image column → offset `d` and aim angle `alpha` on a reference circle
//! 2. **Pose**: `d`, `alpha`, twist and distance → world offset + unit quaternion
//! 3. **Reload**: seven-phase animation with two-segment arm IK and a slerped
//!    return to the aimed orientation
//!
//! Tracking runs on its own thread (`TrackerRuntime`) and hands whole
//! `GeometrySample` snapshots to the render loop, which drives a `WeaponRig`
//! once per frame.

pub mod aimline_geometry;
pub mod aimline_pose;
pub mod aimline_quat;
pub mod aimline_reload;
pub mod aimline_rig;
pub mod aimline_weapon;
pub mod config;
pub mod tracker_runtime;

// Re-export key types for convenience
pub use aimline_geometry::{ArcGeometry, GeometryConfig, GeometryError, GeometryResolver};
pub use aimline_pose::{PoseConfig, WeaponPose, WeaponPoseController};
pub use aimline_reload::{
    ArmIK, ArmSegments, IkSolution, PhaseSchedule, ReloadAnimator, ReloadConfig, ReloadError, ReloadPhase,
};
pub use aimline_rig::{RigFrame, WeaponRig};
pub use aimline_weapon::{Shot, WeaponConfig, WeaponError, WeaponEvent, WeaponSystem};
pub use config::{ConfigError, RigConfig};
pub use tracker_runtime::{ShutdownOutcome, TrackerConfig, TrackerError, TrackerHandle, TrackerRuntime};
