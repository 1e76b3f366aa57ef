//! Cross-worker spawn fan-out example.
//!
//! Worker 0 submits 10,000 `spawn` work items onto worker 1's queue as
//! soon as it starts; each one becomes a fiber that runs entirely on
//! worker 1. Demonstrates the work queue (component H) moving fibers
//! across workers without migrating any already-running one.
//!
//! # Environment variables
//!
//! - `FANOUT_COUNT=<n>` - fibers to submit (default: 10000)
//! - `FIBRT_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace

use fiber_core::diag;
use fiber_core::env::env_get;
use fiber_core::state::Priority;
use fiber_core::{log_info, log_warn};
use fiber_net::NetWorkerPool;
use fiber_runtime::RuntimeConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    diag::init();
    let count: usize = env_get("FANOUT_COUNT", 10_000usize);

    let mut config = RuntimeConfig::from_env();
    let num_workers_floor = config.num_workers.max(2);
    config = config.num_workers(num_workers_floor);
    if let Err(e) = config.validate() {
        log_warn!("invalid config: {e:?}");
        std::process::exit(1);
    }
    let num_workers = config.num_workers;

    // per_worker[w] counts fibers that actually ran on worker w.
    let per_worker: Arc<Vec<AtomicUsize>> = Arc::new((0..num_workers).map(|_| AtomicUsize::new(0)).collect());
    let submitted = Arc::new(AtomicUsize::new(0));

    let counters_for_start = Arc::clone(&per_worker);
    let submitted_for_start = Arc::clone(&submitted);
    let on_start = Arc::new(move |worker_id: usize, _net_worker: &mut fiber_net::NetWorker, handles: &Arc<Vec<fiber_net::WorkQueueHandle>>| {
        if worker_id != 0 || handles.len() < 2 {
            return;
        }
        let target = &handles[1];
        for _ in 0..count {
            let counters = Arc::clone(&counters_for_start);
            let delivered = target.spawn(
                move |_cancel| {
                    let here = fiber_runtime::tls::worker_id();
                    counters[here].fetch_add(1, Ordering::Relaxed);
                },
                Priority::default(),
            );
            if delivered {
                submitted_for_start.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    let on_stop = Arc::new(|worker_id: usize, _net_worker: &mut fiber_net::NetWorker, _handles: &Arc<Vec<fiber_net::WorkQueueHandle>>| {
        log_info!("worker {worker_id} stopped");
    });

    let pool = NetWorkerPool::start(config, 64, on_start, on_stop);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let total: usize = per_worker.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        if total >= submitted.load(Ordering::Relaxed) || Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    pool.stop();
    pool.join();

    for (id, counter) in per_worker.iter().enumerate() {
        println!("worker {id}: {} fibers ran", counter.load(Ordering::Relaxed));
    }
    let on_worker1 = per_worker.get(1).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0);
    println!("submitted {}/{count} fan-out fibers, {on_worker1} ran on worker 1", submitted.load(Ordering::Relaxed));
}
