use std::{sync::Arc, time::Duration};

use leafid::{
    CoordinationError, CoordinationService, CoordinatorConfig, WorkerIdCoordinator,
    WorkerIdSource,
};
use tempfile::TempDir;

use super::FsCoordinationService;

fn config(cache: &TempDir, port: u16) -> CoordinatorConfig {
    CoordinatorConfig {
        service_name: "leaf-test".to_owned(),
        ip: "10.0.0.1".to_owned(),
        port,
        cache_dir: cache.path().to_path_buf(),
        heartbeat_interval: Duration::from_secs(3600),
        heartbeat_delay: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn sequential_nodes_are_numbered_per_parent() {
    let root = TempDir::new().unwrap();
    let service = FsCoordinationService::new(root.path());
    service.connect().await.unwrap();

    let a = service
        .create_persistent_sequential("/s/forever/a-", b"one")
        .await
        .unwrap();
    let b = service
        .create_persistent_sequential("/s/forever/b-", b"two")
        .await
        .unwrap();
    let other = service
        .create_persistent_sequential("/s/other/a-", b"")
        .await
        .unwrap();

    assert_eq!(a, "/s/forever/a-0000000000");
    assert_eq!(b, "/s/forever/b-0000000001");
    assert_eq!(other, "/s/other/a-0000000000");
    assert_eq!(
        service.list_children("/s/forever").await.unwrap(),
        vec!["a-0000000000", "b-0000000001"]
    );
    assert_eq!(
        service.list_children("/s").await.unwrap(),
        vec!["forever", "other"]
    );
    assert_eq!(service.read_node(&a).await.unwrap(), b"one");
    assert!(service.read_node("/s").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_nodes_and_bad_paths_are_rejected() {
    let root = TempDir::new().unwrap();
    let service = FsCoordinationService::new(root.path());

    assert!(!service.node_exists("/absent").await.unwrap());
    assert!(matches!(
        service.list_children("/absent").await,
        Err(CoordinationError::NoNode { path }) if path == "/absent"
    ));
    assert!(matches!(
        service.read_node("/absent").await,
        Err(CoordinationError::NoNode { .. })
    ));
    assert!(matches!(
        service.write_node("/absent", b"x").await,
        Err(CoordinationError::NoNode { .. })
    ));
    for bad in ["relative", "/a/../b", "/a/.seq"] {
        assert!(matches!(
            service.node_exists(bad).await,
            Err(CoordinationError::MalformedNode { .. })
        ));
    }
}

#[tokio::test]
async fn write_node_replaces_payload() {
    let root = TempDir::new().unwrap();
    let service = FsCoordinationService::new(root.path());
    let path = service
        .create_persistent_sequential("/n/x-", b"old")
        .await
        .unwrap();

    service.write_node(&path, b"new").await.unwrap();
    assert_eq!(service.read_node(&path).await.unwrap(), b"new");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_claim_distinct_sequences() {
    let root = TempDir::new().unwrap();
    let service = Arc::new(FsCoordinationService::new(root.path()));

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .create_persistent_sequential(&format!("/c/host{i}-"), b"")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for handle in handles {
        let path = handle.await.unwrap();
        let (_, sequence) = path.rsplit_once('-').unwrap();
        sequences.push(sequence.parse::<u64>().unwrap());
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (0..12).collect::<Vec<u64>>());
}

#[tokio::test]
async fn worker_ids_survive_a_restart_on_the_shared_directory() {
    let root = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    let first = WorkerIdCoordinator::new(FsCoordinationService::new(root.path()), config(&cache, 8080));
    assert_eq!(first.initialize().await.unwrap(), 0);
    assert_eq!(first.source(), Some(WorkerIdSource::Created));
    first.shutdown();

    let second = WorkerIdCoordinator::new(FsCoordinationService::new(root.path()), config(&cache, 9090));
    assert_eq!(second.initialize().await.unwrap(), 1);
    second.shutdown();

    let restarted = WorkerIdCoordinator::new(FsCoordinationService::new(root.path()), config(&cache, 8080));
    assert_eq!(restarted.initialize().await.unwrap(), 0);
    assert_eq!(restarted.source(), Some(WorkerIdSource::Reused));
    assert!(restarted.send_heartbeat().await.unwrap());
    restarted.shutdown();
}
