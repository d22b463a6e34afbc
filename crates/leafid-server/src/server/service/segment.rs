use std::sync::Arc;

use leafid::{AllocationStore, SegmentAllocator, SegmentConfig, SystemClock};

use crate::server::{config::ServerConfig, store::JsonFileAllocationStore};

pub type Allocator = SegmentAllocator<Arc<dyn AllocationStore>>;

/// Opens the configured allocation store and runs the first key sync.
pub async fn start(config: &ServerConfig) -> leafid::Result<Arc<Allocator>> {
    let store = JsonFileAllocationStore::new(&config.segment_store_path);
    #[cfg(feature = "tracing")]
    tracing::info!(path = %store.path().display(), "opening allocation store");
    start_with_store(Arc::new(store), config.segment.clone()).await
}

pub async fn start_with_store(
    store: Arc<dyn AllocationStore>,
    config: SegmentConfig,
) -> leafid::Result<Arc<Allocator>> {
    let allocator = SegmentAllocator::with_config(store, SystemClock::default(), config);
    allocator.initialize().await?;

    #[cfg(feature = "tracing")]
    tracing::info!(keys = allocator.keys().len(), "segment mode ready");
    Ok(Arc::new(allocator))
}
