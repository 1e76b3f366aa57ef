//! Worker thread management.
//!
//! Each worker is a plain OS thread that owns exactly one `Scheduler`.
//! There is no shared run queue and no global worker registry: a worker
//! reaches its own scheduler through the thread-local set by
//! `Scheduler::activate`, and other threads never touch it directly.

use crate::config::RuntimeConfig;
use crate::parking::{new_parking, WorkerParking};
use crate::scheduler::Scheduler;
use crate::tls;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pool of worker OS threads, each running its own scheduling loop.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    num_workers: usize,
    shutdown: Arc<AtomicBool>,
    parking: Arc<dyn WorkerParking>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        Self {
            handles: Vec::with_capacity(num_workers),
            num_workers,
            shutdown: Arc::new(AtomicBool::new(false)),
            parking: Arc::from(new_parking()),
        }
    }

    /// Start all worker threads. `init_worker` runs once per worker,
    /// after its `Scheduler` is constructed and activated but before the
    /// first scheduling iteration, giving a caller the chance to spawn
    /// the worker's initial fibers.
    pub fn start<F>(&mut self, config: RuntimeConfig, init_worker: F)
    where
        F: Fn(usize, &mut Scheduler) + Send + Sync + Clone + 'static,
    {
        for id in 0..self.num_workers {
            let config = config.clone();
            let init_worker = init_worker.clone();
            let shutdown = Arc::clone(&self.shutdown);
            let parking = Arc::clone(&self.parking);

            let handle = thread::Builder::new()
                .name(format!("fibrt-worker-{}", id))
                .spawn(move || run_worker(id, config, init_worker, shutdown, parking))
                .expect("failed to spawn worker thread");

            self.handles.push(handle);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parking.wake_all();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

fn run_worker<F>(
    id: usize,
    config: RuntimeConfig,
    init_worker: F,
    shutdown: Arc<AtomicBool>,
    parking: Arc<dyn WorkerParking>,
) where
    F: Fn(usize, &mut Scheduler),
{
    tls::set_worker_id(id);

    let mut scheduler = Scheduler::new(&config).expect("failed to build worker scheduler");
    scheduler.activate();

    init_worker(id, &mut scheduler);

    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        if scheduler.is_idle() {
            let timeout = park_timeout(&scheduler, &config);
            parking.park(Some(timeout));
            continue;
        }

        scheduler.poll_timers();
        scheduler.run_ready_one();
    }
}

/// How long an idle worker should block in `park()`: long enough not to
/// busy-poll, but never later than its own next timer deadline.
fn park_timeout(scheduler: &Scheduler, config: &RuntimeConfig) -> Duration {
    match scheduler.next_timer_deadline() {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => config.park_timeout,
    }
}
