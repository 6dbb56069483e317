use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::storage::error::StorageError;

// circuit breaker
//
// classic three-state gate in front of a flaky backend.  closed counts
// consecutive transport failures; at the threshold it opens and every call
// short-circuits until the cooldown elapses, after which exactly one probe
// is let through (half-open).  the probe's outcome decides whether the
// breaker closes again or re-opens for another cooldown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    // gate an outgoing call; Ok means the caller may proceed
    pub fn check(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);

                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(StorageError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                // only a single probe until its outcome is recorded
                if inner.probe_in_flight {
                    Err(StorageError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                inner.failures += 1;

                if inner.failures >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        for _ in 0..2 {
            breaker.check().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.check().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        assert!(matches!(breaker.check(), Err(StorageError::CircuitOpen)));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_single_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));

        // first caller after the cooldown gets the probe slot
        breaker.check().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // second caller is still rejected while the probe is out
        assert!(matches!(breaker.check(), Err(StorageError::CircuitOpen)));

        // probe success closes the breaker
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.check().unwrap();
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        breaker.check().unwrap();
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.check(), Err(StorageError::CircuitOpen)));
    }
}
