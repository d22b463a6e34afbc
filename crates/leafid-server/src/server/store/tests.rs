use std::sync::Arc;

use leafid::{AllocationRecord, AllocationStore, SegmentAllocator, StoreError};
use tempfile::TempDir;

use super::JsonFileAllocationStore;

fn store_in(dir: &TempDir) -> JsonFileAllocationStore {
    JsonFileAllocationStore::new(dir.path().join("nested").join("alloc.json"))
}

/// Writes `rows` the way an operator would provision the table.
async fn seed(store: &JsonFileAllocationStore, rows: &[AllocationRecord]) {
    tokio::fs::create_dir_all(store.path().parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(store.path(), serde_json::to_vec_pretty(rows).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn missing_file_reads_as_empty_table() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);

    assert!(store.list_all_keys().await.unwrap().is_empty());
    assert!(store.list_all_records().await.unwrap().is_empty());
    assert!(matches!(
        store.bump_and_fetch("order").await,
        Err(StoreError::KeyNotFound { key }) if key == "order"
    ));
}

#[tokio::test]
async fn bumps_persist_across_instances() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    seed(&store, &[AllocationRecord::new("order", 0, 100)]).await;

    let first = store.bump_and_fetch("order").await.unwrap();
    assert_eq!((first.max_id, first.step), (100, 100));
    assert!(first.update_time > 0);

    let custom = store.bump_and_fetch_with_step("order", 250).await.unwrap();
    assert_eq!((custom.max_id, custom.step), (350, 100));

    let reopened = store_in(&dir);
    let rows = reopened.list_all_records().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].max_id, 350);
    assert_eq!(reopened.list_all_keys().await.unwrap(), vec!["order"]);
}

#[tokio::test]
async fn bumps_touch_only_their_own_row() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let mut described = AllocationRecord::new("b", 500, 20);
    described.description = "billing".to_owned();
    seed(&store, &[AllocationRecord::new("a", 0, 10), described]).await;

    store.bump_and_fetch("a").await.unwrap();
    let rows = store.list_all_records().await.unwrap();
    let b = rows.iter().find(|row| row.key == "b").unwrap();
    assert_eq!((b.max_id, b.step, b.description.as_str()), (500, 20, "billing"));
    let a = rows.iter().find(|row| row.key == "a").unwrap();
    assert_eq!(a.max_id, 10);
}

#[tokio::test]
async fn rejects_invalid_step_and_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    seed(&store, &[AllocationRecord::new("a", 0, 10)]).await;
    assert!(matches!(
        store.bump_and_fetch_with_step("a", 0).await,
        Err(StoreError::InvalidStep { step: 0, .. })
    ));

    tokio::fs::write(store.path(), b"{not json").await.unwrap();
    assert!(matches!(
        store.list_all_keys().await,
        Err(StoreError::Data(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bumps_never_overlap() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store_in(&dir));
    seed(&store, &[AllocationRecord::new("k", 0, 10)]).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.bump_and_fetch("k").await.unwrap().max_id })
        })
        .collect();
    let mut maxes = Vec::new();
    for handle in handles {
        maxes.push(handle.await.unwrap());
    }
    maxes.sort_unstable();
    assert_eq!(maxes, (1..=16).map(|i| i * 10).collect::<Vec<i64>>());
}

#[tokio::test]
async fn drives_a_segment_allocator() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    seed(&store, &[AllocationRecord::new("order", 0, 100)]).await;

    let allocator = SegmentAllocator::new(store);
    allocator.initialize().await.unwrap();
    for expected in 0..5 {
        assert_eq!(allocator.next("order").await.unwrap(), expected);
    }
    allocator.shutdown();
}
