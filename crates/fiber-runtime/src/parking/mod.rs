//! Worker parking: a real blocking syscall for an idle worker's
//! `poll(timeout)`, not a busy-spin.

use std::time::Duration;

/// A worker calls `park()` when its run queue, timer heap, and dispatcher
/// all report nothing to do. `spawn`, cross-worker wakeups, and the timer
/// worker call `wake_one()`/`wake_all()` to pull a parked worker back in.
pub trait WorkerParking: Send + Sync {
    /// Park until woken or `timeout` elapses.
    ///
    /// Returns `true` if woken by a signal, `false` on timeout or a
    /// spurious wakeup. Callers must re-check for work either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker. If none are parked the wake is still
    /// recorded and will be consumed by the next `park()` call.
    fn wake_one(&self);

    /// Wake every parked worker.
    fn wake_all(&self);

    /// Snapshot of how many workers are currently parked (hint, may be
    /// stale by the time the caller reads it).
    fn parked_count(&self) -> usize;
}

mod futex_linux;
pub use futex_linux::FutexParking as PlatformParking;

pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn park_times_out() {
        let parking = new_parking();
        let start = std::time::Instant::now();
        let result = parking.park(Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!result || elapsed < Duration::from_millis(200));
        assert!(elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn wake_one_unblocks_parked_worker() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(50));
        parking.wake_one();

        assert!(handle.join().unwrap());
    }
}
