//! The worker/domain lifecycle (component K): one OS thread per core,
//! each running its own `NetWorker`'s scheduler + dispatcher loop, bound
//! together by a shared list of `WorkQueueHandle`s so servers and
//! cross-worker spawns can reach any worker from any other.
//!
//! This plays the role `fiber_runtime::worker::WorkerPool` plays for the
//! bare scheduler, but drives `NetWorker::tick` (scheduler *and*
//! dispatcher) instead of the scheduler alone.

use crate::queue::{WorkQueue, WorkQueueHandle};
use crate::worker::NetWorker;
use fiber_core::{log_error, log_info};
use fiber_runtime::RuntimeConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A hook run once per worker at a lifecycle boundary. Matches §4.K's
/// "regular start/stop, regular-thread start/stop" hook lists; this
/// crate only needs the per-thread pair, the process-wide "common"
/// hooks live in the embedding crate since they touch the server list.
///
/// Receives the full set of `WorkQueueHandle`s alongside the worker so
/// a start hook can address any worker (e.g. to bind a server and hand
/// off accepted connections) without reaching for process-wide state.
pub type WorkerHook = Arc<dyn Fn(usize, &mut NetWorker, &Arc<Vec<WorkQueueHandle>>) + Send + Sync>;

/// A domain: `N` workers sharing start/stop hooks and an affinity-aware
/// submission surface. The *regular domain* described in §3 is exactly
/// one `NetWorkerPool` with one worker per CPU.
pub struct NetWorkerPool {
    handles: Vec<JoinHandle<()>>,
    work_handles: Arc<Vec<WorkQueueHandle>>,
    shutdown: Arc<AtomicBool>,
    num_workers: usize,
}

impl NetWorkerPool {
    /// Build and start `num_workers` worker threads. `on_start` runs on
    /// each worker thread right after its `NetWorker` is constructed and
    /// activated, before the first scheduling iteration — the place to
    /// spawn a server's accept fiber or any other worker-resident setup.
    /// `on_stop` runs once the shutdown flag is observed, before the
    /// thread exits.
    pub fn start(
        config: RuntimeConfig,
        max_events: usize,
        on_start: WorkerHook,
        on_stop: WorkerHook,
    ) -> Self {
        let num_workers = config.num_workers;
        let shutdown = Arc::new(AtomicBool::new(false));

        // Pre-build every worker's WorkQueue so the full set of
        // WorkQueueHandle`s exists before any worker thread starts —
        // a server's accept fiber needs to address every worker from
        // the moment it runs its first iteration.
        let queues: Vec<WorkQueue> = (0..num_workers)
            .map(|_| WorkQueue::new(config.work_queue_capacity))
            .collect();
        let work_handles: Arc<Vec<WorkQueueHandle>> =
            Arc::new(queues.iter().map(|q| q.handle()).collect());

        let mut handles = Vec::with_capacity(num_workers);
        for (id, queue) in queues.into_iter().enumerate() {
            let config = config.clone();
            let shutdown = Arc::clone(&shutdown);
            let on_start = Arc::clone(&on_start);
            let on_stop = Arc::clone(&on_stop);
            let work_handles = Arc::clone(&work_handles);

            let handle = thread::Builder::new()
                .name(format!("fibrt-net-{id}"))
                .spawn(move || run_worker(id, config, max_events, queue, work_handles, shutdown, on_start, on_stop))
                .expect("failed to spawn net worker thread");
            handles.push(handle);
        }

        Self { handles, work_handles, shutdown, num_workers }
    }

    /// Handles usable from any thread to reach worker `id`'s inbound
    /// queue. Index `id` must be `< num_workers()`.
    pub fn work_handles(&self) -> Arc<Vec<WorkQueueHandle>> {
        Arc::clone(&self.work_handles)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Flip the shared exit flag; every worker observes it within one
    /// `tick()` (bounded by its park timeout) and runs its stop hook.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.work_handles.iter() {
            // Force every worker out of a blocking poll so shutdown is
            // observed promptly even with no other traffic in flight.
            handle.run(|| {});
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Join every worker thread. Matches §4.K's launcher-thread
    /// behavior: call after `stop()` and after common-stop hooks that
    /// depend on workers still running (e.g. draining listeners) have
    /// had their chance.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker(
    id: usize,
    config: RuntimeConfig,
    max_events: usize,
    queue: WorkQueue,
    work_handles: Arc<Vec<WorkQueueHandle>>,
    shutdown: Arc<AtomicBool>,
    on_start: WorkerHook,
    on_stop: WorkerHook,
) {
    fiber_runtime::tls::set_worker_id(id);
    fiber_core::diag::set_worker_id(id as u32);

    let mut worker = match NetWorker::with_queue(&config, max_events, queue) {
        Ok(w) => w,
        Err(e) => {
            log_error!("net worker {id} failed to initialize: {e:?}");
            return;
        }
    };
    worker.activate();

    log_info!("net worker {id} started");
    on_start(id, &mut worker, &work_handles);

    while !shutdown.load(Ordering::Acquire) {
        worker.tick();
    }

    on_stop(id, &mut worker, &work_handles);
    log_info!("net worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn start_runs_on_start_once_per_worker_then_stops_cleanly() {
        let config = RuntimeConfig::default().num_workers(2);
        let started: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let stopped: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let started_hook = Arc::clone(&started);
        let on_start: WorkerHook = Arc::new(move |_id, _worker, handles| {
            assert_eq!(handles.len(), 2);
            started_hook.fetch_add(1, Ordering::SeqCst);
        });
        let stopped_hook = Arc::clone(&stopped);
        let on_stop: WorkerHook = Arc::new(move |_id, _worker, _handles| {
            stopped_hook.fetch_add(1, Ordering::SeqCst);
        });

        let pool = NetWorkerPool::start(config, 16, on_start, on_stop);
        assert_eq!(pool.num_workers(), 2);

        // Give both worker threads a chance to run their on_start hook
        // before asserting; they run before the scheduling loop starts.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(!pool.is_stopping());

        pool.stop();
        assert!(pool.is_stopping());
        pool.join();
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }
}
