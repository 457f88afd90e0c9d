use std::time::{Duration, Instant};

/// Monotonic time source used to timestamp servo commands.
pub trait Clock {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;
}

/// [Clock] backed by [Instant], with its epoch at creation.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Clock, MonotonicClock};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn monotonic() {
        let clock = MonotonicClock::new();

        let first = clock.now();
        thread::sleep(Duration::from_millis(2));
        let second = clock.now();

        assert!(second > first);
        assert!(second - first >= Duration::from_millis(2));
    }
}
