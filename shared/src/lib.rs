use std::{
    sync::{atomic::AtomicBool, atomic::Ordering, Mutex, MutexGuard, PoisonError},
    thread::sleep,
    time::{Duration, Instant},
};

/// Control port the supervisor listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 65432;
/// Address the supervisor binds to unless told otherwise
pub static DEFAULT_BIND: &str = "0.0.0.0";

/// Upper bound on a single sensor read
pub const SENSOR_TIMEOUT_MS: u64 = 1000;
/// Upper bound on a single supply command
pub const SUPPLY_TIMEOUT_MS: u64 = 1000;
/// Upper bound on waiting for a protocol line from a client
pub const RECV_TIMEOUT_MS: u64 = 15000;

/// Longest single nap taken by `sleep_till_or`, bounds shutdown latency
const NAP_MS: u64 = 20;

/// Sleep until `instant`, waking early if `running` is cleared.
///
/// Returns whether `running` was still set on return.
pub fn sleep_till_or(instant: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }

        let left = instant.saturating_duration_since(Instant::now());

        if left.is_zero() {
            return true;
        }

        sleep(left.min(Duration::from_millis(NAP_MS)));
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
#[inline]
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_till_or_wakes_on_clear() {
        let running = AtomicBool::new(false);
        let start = Instant::now();

        assert!(!sleep_till_or(start + Duration::from_secs(5), &running));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_till_or_reaches_deadline() {
        let running = AtomicBool::new(true);
        let deadline = Instant::now() + Duration::from_millis(30);

        assert!(sleep_till_or(deadline, &running));
        assert!(Instant::now() >= deadline);
    }
}
