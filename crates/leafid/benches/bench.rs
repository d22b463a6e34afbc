use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use leafid::{
    AllocationRecord, MemoryAllocationStore, SegmentAllocator, SnowflakeGenerator, TimeSource,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};
use tokio::runtime::Builder;

/// Advances one millisecond every 1024 reads, so the sequence never wraps.
struct SteppedMockTime {
    reads: AtomicU64,
}

impl TimeSource for SteppedMockTime {
    fn current_millis(&self) -> u64 {
        self.reads.fetch_add(1, Ordering::Relaxed) >> 10
    }
}

// Number of IDs generated per benchmark iteration (per-task for contended
// runs).
const TOTAL_IDS: usize = 4096;

fn bench_segment_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment/sequential");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let store = MemoryAllocationStore::new();
            store.insert(AllocationRecord::new("bench", 0, 10_000));
            let allocator = SegmentAllocator::new(store);
            allocator.initialize().await.unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_IDS {
                    black_box(allocator.next("bench").await.unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_segment_contended(c: &mut Criterion) {
    const TASKS: usize = 8;

    let mut group = c.benchmark_group("segment/contended");
    group.throughput(Throughput::Elements((TOTAL_IDS * TASKS) as u64));

    group.bench_function(format!("tasks/{}/elems/{}", TASKS, TOTAL_IDS), |b| {
        let rt = Builder::new_multi_thread().enable_all().build().unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let store = MemoryAllocationStore::new();
            store.insert(AllocationRecord::new("bench", 0, 100_000));
            let allocator = Arc::new(SegmentAllocator::new(store));
            allocator.initialize().await.unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                let handles: Vec<_> = (0..TASKS)
                    .map(|_| {
                        let allocator = Arc::clone(&allocator);
                        tokio::spawn(async move {
                            for _ in 0..TOTAL_IDS {
                                black_box(allocator.next("bench").await.unwrap());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_snowflake_mock(c: &mut Criterion) {
    let mut group = c.benchmark_group("snowflake/mock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = SnowflakeGenerator::with_time(
                    0,
                    SteppedMockTime {
                        reads: AtomicU64::new(1 << 10),
                    },
                )
                .unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.next_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_snowflake_system_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("snowflake/system_clock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let generator = SnowflakeGenerator::new(0).unwrap();
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(generator.next_id().unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_segment_sequential,
    bench_segment_contended,
    bench_snowflake_mock,
    bench_snowflake_system_clock,
);
criterion_main!(benches);
