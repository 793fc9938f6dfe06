//! Aimline Deterministic Simulation Harness
//!
//! Drives the weapon pipeline with scripted marker motion instead of a
//! camera, so every tick of the rig can be checked against the geometry it
//! was fed.
//!
//! # Sources of non-determinism
//!
//! - **Time**: `SimClock` advances only when the runner steps it
//! - **Detector**: `MarkerOracle` derives all noise and dropouts from one seed
//! - **Threads**: only the `threaded` scenario runs a real tracking thread
//!   against the wall clock
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  MarkerDetection  ┌─────────────────┐
//! │ MarkerOracle │──────────────────►│ GeometryResolver│
//! │ (Trajectory) │                   └────────┬────────┘
//! └──────────────┘                            │ GeometrySample
//!                                             ▼
//!                   ┌──────────────────────────────────────┐
//!                   │ WeaponRig (pose + reload + weapon)   │
//!                   └────────────────┬─────────────────────┘
//!                                    │ RigFrame
//!                                    ▼
//!                       invariant checks / SimExport
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use aimline_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_duration(5.0).run(ScenarioId::Reload);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimClock;
pub use exporter::{ArmFrame, SimExport, SimFrame};
pub use oracle::{MarkerOracle, MarkerTruth, OracleSource, Trajectory};
pub use runner::{run_summary, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
