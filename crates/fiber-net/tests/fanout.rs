//! Cross-worker spawn volume: worker 0's start hook submits a batch of
//! fibers onto worker 1 via `WorkQueueHandle::spawn`; every one of them
//! must actually run, and run on worker 1, not wherever it was
//! submitted from.

use fiber_core::state::Priority;
use fiber_net::{NetWorker, NetWorkerPool, WorkQueueHandle};
use fiber_runtime::RuntimeConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn every_submitted_fiber_runs_on_the_target_worker() {
    const COUNT: usize = 2_000;

    let config = RuntimeConfig::default().num_workers(2);
    let ran_on: Arc<Vec<AtomicUsize>> = Arc::new((0..2).map(|_| AtomicUsize::new(0)).collect());

    let ran_on_start = Arc::clone(&ran_on);
    let on_start = Arc::new(move |worker_id: usize, _w: &mut NetWorker, handles: &Arc<Vec<WorkQueueHandle>>| {
        if worker_id != 0 {
            return;
        }
        let target = &handles[1];
        for _ in 0..COUNT {
            let counters = Arc::clone(&ran_on_start);
            target.spawn(
                move |_cancel| {
                    let here = fiber_runtime::tls::worker_id();
                    counters[here].fetch_add(1, Ordering::Relaxed);
                },
                Priority::default(),
            );
        }
    });
    let on_stop = Arc::new(|_id: usize, _w: &mut NetWorker, _h: &Arc<Vec<WorkQueueHandle>>| {});

    let pool = NetWorkerPool::start(config, 32, on_start, on_stop);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let total: usize = ran_on.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        if total >= COUNT || Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    pool.stop();
    pool.join();

    assert_eq!(ran_on[0].load(Ordering::Relaxed), 0, "no fan-out fiber should run on worker 0");
    assert_eq!(ran_on[1].load(Ordering::Relaxed), COUNT, "every fan-out fiber must run on worker 1");
}
