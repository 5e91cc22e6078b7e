//! Monotonic time source for the state machine.
//!
//! Every wait in the client is "remember when it started, compare on the
//! next tick". The clock is injected so hosts can use the embassy time
//! driver and tests can advance time by hand.

use embassy_time::{Duration, Instant};

/// A monotonic millisecond-or-better clock.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// The embassy time driver's clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A start instant that can be re-armed and checked against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub const fn new(now: Instant) -> Self {
        Self { started: now }
    }

    pub fn restart(&mut self, now: Instant) {
        self.started = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// True once strictly more than `limit` has passed.
    pub fn exceeded(&self, now: Instant, limit: Duration) -> bool {
        self.elapsed(now) > limit
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new(Instant::from_ticks(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_fires_strictly_after_limit() {
        let watch = Stopwatch::new(Instant::from_millis(100));
        let limit = Duration::from_millis(50);
        assert!(!watch.exceeded(Instant::from_millis(150), limit));
        assert!(watch.exceeded(Instant::from_millis(151), limit));
    }

    #[test]
    fn earlier_instants_count_as_zero_elapsed() {
        let watch = Stopwatch::new(Instant::from_millis(100));
        assert_eq!(watch.elapsed(Instant::from_millis(10)), Duration::from_ticks(0));
    }
}
