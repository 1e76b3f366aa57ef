//! Run-queue put/get throughput at each priority band.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fiber_core::id::FiberId;
use fiber_core::run_queue::RunQueue;
use fiber_core::state::Priority;

fn bench_put_get_normal(c: &mut Criterion) {
    c.bench_function("run_queue_put_get_normal", |b| {
        let mut q = RunQueue::new();
        let mut next = 0u32;
        b.iter(|| {
            q.put(FiberId::new(next), Priority::NORMAL);
            next = next.wrapping_add(1);
            black_box(q.get())
        });
    });
}

fn bench_mixed_priority_drain(c: &mut Criterion) {
    c.bench_function("run_queue_mixed_priority_drain_1000", |b| {
        b.iter(|| {
            let mut q = RunQueue::new();
            for i in 0..1000u32 {
                let priority = match i % 4 {
                    0 => Priority::HIGHEST,
                    1 => Priority::NORMAL,
                    2 => Priority::LOW,
                    _ => Priority::EVENT_LOOP,
                };
                q.put(FiberId::new(i), priority);
            }
            while let Some(entry) = q.get() {
                black_box(entry);
            }
        });
    });
}

criterion_group!(benches, bench_put_get_normal, bench_mixed_priority_drain);
criterion_main!(benches);
