use std::{collections::HashSet, sync::Arc, time::Duration};

use portable_atomic::{AtomicU64, Ordering};

use crate::{
    AllocationRecord, AllocationStore, Error, IdGenerator, MAX_STEP, MemoryAllocationStore,
    SegmentAllocator, SegmentConfig, Status, StoreError, TimeSource, apply_bump, next_step,
};

/// A settable clock shared between the test and the allocator.
#[derive(Debug, Default)]
struct MockClock {
    now: AtomicU64,
}

impl MockClock {
    fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }
}

impl TimeSource for MockClock {
    fn current_millis(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

fn store_with(rows: &[(&str, i64, i64)]) -> Arc<MemoryAllocationStore> {
    let store = MemoryAllocationStore::new();
    for &(key, max_id, step) in rows {
        store.insert(AllocationRecord::new(key, max_id, step));
    }
    Arc::new(store)
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

async fn drain<S, T>(allocator: &SegmentAllocator<S, T>, key: &str, n: usize) -> Vec<i64>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        ids.push(allocator.next(key).await.unwrap());
    }
    ids
}

#[test]
fn next_step_doubles_keeps_and_halves() {
    let config = SegmentConfig::default();
    assert_eq!(next_step(100, 100, minutes(5), &config), 200);
    assert_eq!(next_step(200, 100, minutes(20), &config), 200);
    assert_eq!(next_step(200, 100, minutes(40), &config), 100);
}

#[test]
fn next_step_boundaries() {
    let config = SegmentConfig::default();
    assert_eq!(next_step(100, 100, minutes(15), &config), 100);
    assert_eq!(next_step(100, 100, minutes(30), &config), 100);
    assert_eq!(next_step(400, 100, minutes(30), &config), 200);
}

#[test]
fn next_step_never_exceeds_max() {
    let config = SegmentConfig::default();
    assert_eq!(next_step(500_000, 100, minutes(1), &config), MAX_STEP);
    assert_eq!(next_step(600_000, 100, minutes(1), &config), 600_000);
    assert_eq!(next_step(MAX_STEP, 100, minutes(1), &config), MAX_STEP);
}

#[test]
fn next_step_never_below_min() {
    let config = SegmentConfig::default();
    assert_eq!(next_step(150, 100, minutes(45), &config), 150);
    assert_eq!(next_step(100, 100, minutes(120), &config), 100);
}

#[test]
fn apply_bump_rejects_bad_input() {
    let mut record = AllocationRecord::new("order", 0, 100);
    assert!(matches!(
        apply_bump(&mut record, 0, 1),
        Err(StoreError::InvalidStep { step: 0, .. })
    ));

    let mut record = AllocationRecord::new("order", i64::MAX - 5, 100);
    assert!(matches!(
        apply_bump(&mut record, 100, 1),
        Err(StoreError::Overflow { .. })
    ));
    assert_eq!(record.max_id, i64::MAX - 5);

    let mut record = AllocationRecord::new("order", 0, 100);
    let updated = apply_bump(&mut record, 250, 42).unwrap();
    assert_eq!(updated.max_id, 250);
    assert_eq!(updated.step, 100);
    assert_eq!(updated.update_time, 42);
}

#[tokio::test]
async fn order_serves_first_range_then_switches() {
    let store = store_with(&[("order", 0, 100)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();

    let ids = drain(&allocator, "order", 100).await;
    assert_eq!(ids, (0..100).collect::<Vec<_>>());
    assert_eq!(store.record("order").unwrap().max_id, 100);

    // The refill dispatched mid-range only runs once the caller waits.
    assert_eq!(allocator.next("order").await.unwrap(), 100);
    assert_eq!(store.record("order").unwrap().max_id, 200);

    let buffer = allocator.buffer("order").unwrap();
    assert_eq!(buffer.current_index(), 1);
    assert!(!buffer.is_next_ready());
}

#[tokio::test]
async fn next_before_initialize_is_rejected() {
    let store = store_with(&[("order", 0, 100)]);
    let allocator = SegmentAllocator::new(store);

    let err = allocator.next("order").await.unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
    assert_eq!(err.code(), -1);

    let result = allocator.get("order").await;
    assert_eq!(result.status, Status::Exception);
    assert_eq!(result.id, -1);
}

#[tokio::test]
async fn unknown_key_is_rejected() {
    let store = store_with(&[("order", 0, 100)]);
    let allocator = SegmentAllocator::new(store);
    allocator.initialize().await.unwrap();

    let err = allocator.next("missing").await.unwrap_err();
    assert!(matches!(err, Error::UnknownKey { ref key } if key == "missing"));

    let result = allocator.get("missing").await;
    assert_eq!(result.status, Status::Exception);
    assert_eq!(result.id, -2);
}

#[tokio::test]
async fn initialize_failure_leaves_allocator_uninitialized() {
    let store = store_with(&[("order", 0, 100)]);
    store.set_available(false);
    let allocator = SegmentAllocator::new(Arc::clone(&store));

    assert!(matches!(
        allocator.initialize().await,
        Err(Error::Store(StoreError::Unavailable { .. }))
    ));
    assert!(!allocator.is_initialized());

    store.set_available(true);
    allocator.initialize().await.unwrap();
    assert!(allocator.is_initialized());
    assert_eq!(allocator.next("order").await.unwrap(), 0);
}

#[tokio::test]
async fn sync_adds_and_evicts_keys() {
    let store = store_with(&[("a", 0, 10), ("b", 0, 10)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();
    assert_eq!(allocator.keys(), ["a", "b"]);

    store.insert(AllocationRecord::new("c", 0, 10));
    store.remove("a");
    allocator.initialize().await.unwrap();
    assert_eq!(allocator.keys(), ["b", "c"]);
    assert!(matches!(
        allocator.next("a").await,
        Err(Error::UnknownKey { .. })
    ));
    assert_eq!(allocator.next("c").await.unwrap(), 0);
}

#[tokio::test]
async fn sync_keeps_live_buffers() {
    let store = store_with(&[("a", 0, 10)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();
    assert_eq!(allocator.next("a").await.unwrap(), 0);

    store.insert(AllocationRecord::new("b", 0, 10));
    allocator.initialize().await.unwrap();
    assert_eq!(allocator.next("a").await.unwrap(), 1);
}

#[tokio::test]
async fn empty_key_list_does_not_evict() {
    let store = store_with(&[("a", 0, 10)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();

    store.remove("a");
    allocator.initialize().await.unwrap();
    assert_eq!(allocator.keys(), ["a"]);
}

#[tokio::test]
async fn periodic_sync_picks_up_new_keys() {
    let store = store_with(&[("a", 0, 10)]);
    let config = SegmentConfig {
        sync_interval: Duration::from_millis(20),
        ..SegmentConfig::default()
    };
    let allocator = SegmentAllocator::with_config(
        Arc::clone(&store),
        crate::SystemClock::default(),
        config,
    );
    allocator.initialize().await.unwrap();

    store.insert(AllocationRecord::new("b", 0, 10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(allocator.keys(), ["a", "b"]);

    allocator.shutdown();
}

#[tokio::test]
async fn step_follows_refill_cadence() {
    let store = store_with(&[("order", 0, 100)]);
    let clock = Arc::new(MockClock::default());
    let allocator = SegmentAllocator::with_config(
        Arc::clone(&store),
        Arc::clone(&clock),
        SegmentConfig::default(),
    );
    allocator.initialize().await.unwrap();
    let buffer = allocator.buffer("order").unwrap();

    // First population takes the stored step as both step and floor.
    assert_eq!(allocator.next("order").await.unwrap(), 0);
    let tuning = buffer.tuning();
    assert_eq!((tuning.step, tuning.min_step), (100, 100));
    assert_eq!(tuning.last_refill, None);

    // Second population only records the refill time.
    let ids = drain(&allocator, "order", 100).await;
    assert_eq!(ids.last(), Some(&100));
    let tuning = buffer.tuning();
    assert_eq!(tuning.step, 100);
    assert_eq!(tuning.last_refill, Some(0));

    clock.advance(minutes(5));
    let ids = drain(&allocator, "order", 100).await;
    assert_eq!(ids.last(), Some(&200));
    assert_eq!(buffer.tuning().step, 200);
    assert_eq!(store.record("order").unwrap().max_id, 400);
    // The stored step column is left alone.
    assert_eq!(store.record("order").unwrap().step, 100);

    clock.advance(minutes(20));
    let ids = drain(&allocator, "order", 200).await;
    assert_eq!(ids.last(), Some(&400));
    assert_eq!(buffer.tuning().step, 200);
    assert_eq!(store.record("order").unwrap().max_id, 600);

    clock.advance(minutes(40));
    let ids = drain(&allocator, "order", 200).await;
    assert_eq!(ids.last(), Some(&600));
    let tuning = buffer.tuning();
    assert_eq!((tuning.step, tuning.min_step), (100, 100));
    assert_eq!(store.record("order").unwrap().max_id, 700);
}

#[tokio::test]
async fn second_population_adopts_lowered_stored_step() {
    let store = store_with(&[("order", 0, 100)]);
    let clock = Arc::new(MockClock::default());
    let allocator = SegmentAllocator::with_config(
        Arc::clone(&store),
        Arc::clone(&clock),
        SegmentConfig::default(),
    );
    allocator.initialize().await.unwrap();

    let mut ids = drain(&allocator, "order", 100).await;
    store.insert(AllocationRecord::new("order", 100, 10));
    ids.extend(drain(&allocator, "order", 20).await);

    assert_eq!(ids, (0..120).collect::<Vec<_>>());
    let tuning = allocator.buffer("order").unwrap().tuning();
    assert_eq!(tuning.min_step, 10);
    assert_eq!(store.record("order").unwrap().max_id, 130);
}

#[tokio::test]
async fn failed_refill_reports_exhaustion_then_recovers() {
    let store = store_with(&[("order", 0, 10)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();

    assert_eq!(drain(&allocator, "order", 10).await, (0..10).collect::<Vec<_>>());

    store.set_available(false);
    let err = allocator.next("order").await.unwrap_err();
    assert!(matches!(err, Error::BothSegmentsExhausted { ref key } if key == "order"));
    assert_eq!(err.code(), -3);

    let buffer = allocator.buffer("order").unwrap();
    assert!(!buffer.is_refill_in_progress());
    assert!(!buffer.is_next_ready());

    store.set_available(true);
    assert_eq!(allocator.next("order").await.unwrap(), 10);
}

#[tokio::test]
async fn lazy_population_failure_is_reported() {
    let store = store_with(&[("order", 0, 100)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();

    store.set_available(false);
    let result = allocator.get("order").await;
    assert_eq!(result.status, Status::Exception);
    assert_eq!(result.id, -4);
    assert!(!allocator.buffer("order").unwrap().is_initialized());

    store.set_available(true);
    assert_eq!(allocator.next("order").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lazy_population_happens_once() {
    let store = store_with(&[("order", 0, 1000)]);
    let allocator = Arc::new(SegmentAllocator::new(Arc::clone(&store)));
    allocator.initialize().await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocator.next("order").await.unwrap() })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()));
    }
    assert_eq!(ids, (0..16).collect::<HashSet<i64>>());
    assert_eq!(store.bump_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ids_are_distinct_and_in_range() {
    const TASKS: usize = 8;
    const PER_TASK: usize = 500;

    let store = store_with(&[("order", 0, 1000)]);
    let allocator = Arc::new(SegmentAllocator::new(Arc::clone(&store)));
    allocator.initialize().await.unwrap();

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { drain(&*allocator, "order", PER_TASK).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let ids = handle.await.unwrap();
        // Each caller observes a strictly increasing sequence.
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in ids {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    let max_id = store.record("order").unwrap().max_id;
    assert_eq!(seen.len(), TASKS * PER_TASK);
    assert!(seen.iter().all(|&id| (0..max_id).contains(&id)));
}

#[tokio::test]
async fn snapshot_reports_buffer_state() {
    let store = store_with(&[("order", 0, 100), ("user", 50, 10)]);
    let allocator = SegmentAllocator::new(Arc::clone(&store));
    allocator.initialize().await.unwrap();
    allocator.next("order").await.unwrap();

    let snapshot = allocator.snapshot();
    assert_eq!(snapshot.len(), 2);

    let order = &snapshot[0];
    assert_eq!(order.key, "order");
    assert!(order.initialized);
    assert_eq!(order.current, 0);
    assert_eq!(order.step, 100);
    assert_eq!(order.segments[0].value, 1);
    assert_eq!(order.segments[0].max, 100);
    assert_eq!(order.segments[0].idle, 99);

    let user = &snapshot[1];
    assert_eq!(user.key, "user");
    assert!(!user.initialized);
    assert_eq!(user.segments[0].max, 0);

    let json = serde_json::to_value(order).unwrap();
    assert_eq!(json["segments"][0]["max"], 100);

    let records = allocator.records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].max_id, 100);
    assert_eq!(records[1].max_id, 50);
}
