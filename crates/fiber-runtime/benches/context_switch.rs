//! Context-switch and spawn micro-benchmarks.
//!
//! Each iteration activates a fresh scheduler on the calling (bench)
//! thread so results aren't skewed by a pool's idle-parking overhead —
//! `run_ready_one` is driven directly until the run queue drains.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use fiber_core::state::Priority;
use fiber_runtime::config::RuntimeConfig;
use fiber_runtime::scheduler::Scheduler;
use fiber_runtime::tls;

fn fresh_scheduler() -> Scheduler {
    tls::set_worker_id(0);
    let config = RuntimeConfig::default();
    let mut scheduler = Scheduler::new(&config).expect("scheduler init");
    scheduler.activate();
    scheduler
}

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_one_fiber", |b| {
        b.iter_batched(
            fresh_scheduler,
            |mut scheduler| {
                scheduler.fiber_create(|_cancel| {}, Priority::default()).unwrap();
                scheduler.run_ready_one();
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_yield_chain(c: &mut Criterion) {
    c.bench_function("yield_1000_times", |b| {
        b.iter_batched(
            fresh_scheduler,
            |mut scheduler| {
                scheduler
                    .fiber_create(
                        |_cancel| {
                            for _ in 0..1000 {
                                fiber_runtime::scheduler::yield_now();
                            }
                        },
                        Priority::default(),
                    )
                    .unwrap();
                while scheduler.ready_len() > 0 {
                    scheduler.run_ready_one();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_spawn, bench_yield_chain);
criterion_main!(benches);
