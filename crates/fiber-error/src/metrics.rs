//! Plain atomic connection counters (supplemented feature: graceful
//! per-connection drain visibility).
//!
//! Not a metrics-export format — just enough internal visibility for the
//! end-to-end scenarios (graceful shutdown, backpressure) to assert on
//! counts without a mocked kernel.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct ConnectionMetrics {
    active: AtomicU64,
    total_accepted: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl ConnectionMetrics {
    pub const fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            total_accepted: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn on_accept(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_close(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn on_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn on_write(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_close_roundtrip() {
        let m = ConnectionMetrics::new();
        m.on_accept();
        m.on_accept();
        assert_eq!(m.active(), 2);
        assert_eq!(m.total_accepted(), 2);

        m.on_close();
        assert_eq!(m.active(), 1);
        assert_eq!(m.total_accepted(), 2);
    }

    #[test]
    fn byte_counters_accumulate() {
        let m = ConnectionMetrics::new();
        m.on_read(100);
        m.on_read(50);
        m.on_write(10);
        assert_eq!(m.bytes_read(), 150);
        assert_eq!(m.bytes_written(), 10);
    }
}
