use std::time::Duration;

/// Exponential reconnect backoff: doubles on each failure, capped, reset on
/// success. One instance per device connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            current: Duration::from_secs(min_secs),
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Device reconnect policy: 2 s doubling up to 60 s.
    pub fn device() -> Self {
        Self::new(
            vigil_core::config::DEVICE_RECONNECT_MIN_SECS,
            vigil_core::config::DEVICE_RECONNECT_MAX_SECS,
        )
    }

    /// Relay reconnect policy: 3 s doubling up to 60 s.
    pub fn relay() -> Self {
        Self::new(
            vigil_core::config::RELAY_RECONNECT_MIN_SECS,
            vigil_core::config::RELAY_RECONNECT_MAX_SECS,
        )
    }

    /// Return the current delay and advance to the next step.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_and_caps() {
        let mut b = Backoff::new(2, 60);
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 64.min(60), 60]);
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = Backoff::device();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay().as_secs(), 2);
    }
}
