use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstracts "now" so the scheduler's timeline can be driven deterministically
/// in tests. All time comparisons in the scheduler go through this one seam
/// (spec §4.A).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real clock backed by system wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }
}

/// Fake clock for deterministic testing — time only advances when told to.
/// Uses `std::sync::Mutex` (not tokio) so it can be read from sync and async
/// contexts alike without panicking.
#[derive(Debug)]
pub struct FakeClock {
    now_ms: std::sync::Mutex<i64>,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: std::sync::Mutex::new(start_ms),
        })
    }

    pub fn set(&self, ms: i64) {
        *self.now_ms.lock().unwrap() = ms;
    }

    pub fn advance(&self, delta_ms: i64) {
        let mut guard = self.now_ms.lock().unwrap();
        *guard += delta_ms;
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        *self.now_ms.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_set_and_advance() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.set(5_000);
        assert_eq!(clock.now_ms(), 5_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 5_250);
    }

    #[test]
    fn system_clock_returns_plausible_epoch_millis() {
        let clock = SystemClock;
        // Past 2020-01-01 in epoch millis.
        assert!(clock.now_ms() > 1_577_836_800_000);
    }
}
