//! Frame clock abstraction.

use std::time::Duration;

/// Monotonic time source for the game loop.
///
/// The weapon pipeline never reads the wall clock itself: every time-driven
/// operation takes a `Duration` stamped from a `FrameClock`, so the same code
/// runs against real time or against a virtual clock in simulation.
///
/// # Implementations
///
/// - **Production**: `SystemClock` - wraps `std::time::Instant`
/// - **Simulation**: `SimClock` (in `aimline_sim`) - manually advanced
pub trait FrameClock: Send + Sync + 'static {
    /// Returns the current monotonic time since clock creation.
    fn now(&self) -> Duration;

    /// Returns the current time in seconds.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}
