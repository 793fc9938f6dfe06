//! Virtual frame clock for deterministic runs.

use aimline_env::FrameClock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Frame clock that only moves when the runner advances it.
///
/// Clones share the same time, so a clock handed to a component stays in
/// step with the runner's copy.
#[derive(Debug, Default)]
pub struct SimClock {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,
}

impl SimClock {
    /// Creates a clock at t = 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped clock for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time_ns;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
        }
    }
}

impl FrameClock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_time() {
        let clock = SimClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance_time(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));

        clock.advance_time(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert_eq!(clock.now_secs(), 1.5);
    }

    #[test]
    fn test_set_time() {
        let clock = SimClock::new();
        clock.set_time(2_000_000_000);
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_clone_shares_time() {
        let clock1 = SimClock::new();
        let clock2 = clock1.clone();

        clock1.advance_time(Duration::from_secs(5));

        assert_eq!(clock1.now(), clock2.now());
    }
}
