//! Aimline Environment Layer
//!
//! Everything the weapon pipeline touches that is not pure math lives here:
//! - Time (`FrameClock`)
//! - Tracking input (`MarkerSource`, `MarkerDetection`, `GeometrySample`)
//! - Cross-thread handoff (`SnapshotSlot`)
//!
//! # Data Flow
//!
//! ```text
//! camera thread                                   render thread
//!   MarkerSource::next_detection()                  FrameClock::now()
//!        │                                               │
//!        ▼                                               ▼
//!   GeometrySample ──publish──► SnapshotSlot ──snapshot──► pose update
//! ```

mod context;
mod error;
mod handoff;
mod source;
mod system_impl;
mod types;

pub use context::FrameClock;
pub use error::EnvError;
pub use handoff::{Snapshot, SnapshotSlot};
pub use source::MarkerSource;
pub use system_impl::SystemClock;
pub use types::{GeometrySample, MarkerDetection, REST_ALPHA};
