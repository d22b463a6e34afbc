use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use portable_atomic::{AtomicBool, Ordering};
use tokio::{
    sync::Semaphore,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    generator::IdGenerator,
    segment::{
        buffer::{BufferSnapshot, SegmentBuffer},
        config::SegmentConfig,
        step::{StepTuning, next_step},
        store::{AllocationRecord, AllocationStore, StoreError},
    },
    status::IdResult,
    time::{SystemClock, TimeSource},
};

/// Issues ids per business key from double-buffered segments.
///
/// The allocator keeps one [`SegmentBuffer`] per key present in the
/// [`AllocationStore`]. Buffers are populated lazily on first use, refilled in
/// background tasks (at most one per buffer, and at most
/// [`SegmentConfig::max_concurrent_refills`] in total), and the key set is
/// re-synced every [`SegmentConfig::sync_interval`].
///
/// Background tasks run on the ambient tokio runtime and stop when
/// [`SegmentAllocator::shutdown`] is called or the allocator is dropped.
///
/// # Example
///
/// ```
/// use leafid::{AllocationRecord, MemoryAllocationStore, SegmentAllocator};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> leafid::Result<()> {
/// let store = MemoryAllocationStore::new();
/// store.insert(AllocationRecord::new("order", 0, 100));
///
/// let allocator = SegmentAllocator::new(store);
/// allocator.initialize().await?;
///
/// assert_eq!(allocator.next("order").await?, 0);
/// assert_eq!(allocator.next("order").await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct SegmentAllocator<S, T = SystemClock>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    inner: Arc<Inner<S, T>>,
    shutdown: CancellationToken,
}

struct Inner<S, T> {
    store: S,
    time: T,
    config: SegmentConfig,
    cache: RwLock<HashMap<String, Arc<SegmentBuffer>>>,
    initialized: AtomicBool,
    refills: Arc<Semaphore>,
}

impl<S> SegmentAllocator<S>
where
    S: AllocationStore + 'static,
{
    /// Creates an allocator over `store` with the system clock and default
    /// tuning.
    pub fn new(store: S) -> Self {
        Self::with_config(store, SystemClock::default(), SegmentConfig::default())
    }
}

impl<S, T> SegmentAllocator<S, T>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    /// Creates an allocator with an explicit clock and tuning.
    ///
    /// The clock drives the refill timestamps the step policy compares.
    pub fn with_config(store: S, time: T, config: SegmentConfig) -> Self {
        let permits = config.max_concurrent_refills.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                time,
                config,
                cache: RwLock::new(HashMap::new()),
                initialized: AtomicBool::new(false),
                refills: Arc::new(Semaphore::new(permits)),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Loads the key set and starts the periodic re-sync.
    ///
    /// Calling it again only re-runs the sync.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the first sync fails. The allocator then
    /// stays uninitialized and every [`next`](Self::next) call reports
    /// [`Error::NotInitialized`].
    pub async fn initialize(&self) -> Result<()> {
        self.inner.sync_keys().await?;
        if !self.inner.initialized.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::info!(keys = self.inner.cache.read().len(), "segment allocator initialized");
            self.spawn_sync();
        }
        Ok(())
    }

    fn spawn_sync(&self) {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let period = inner.config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(_e) = inner.sync_keys().await {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %_e, "segment key sync failed");
                        }
                    }
                }
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("segment key sync stopped");
        });
    }

    /// Returns the next id for `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before [`initialize`](Self::initialize)
    ///   succeeded
    /// - [`Error::UnknownKey`] if the key was not present at the last sync
    /// - [`Error::Store`] if the lazy first population fails
    /// - [`Error::BothSegmentsExhausted`] if the refill pipeline fell behind
    pub async fn next(&self, key: &str) -> Result<i64> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let buffer = self
            .inner
            .cache
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownKey {
                key: key.to_owned(),
            })?;

        if !buffer.is_initialized() {
            let _guard = buffer.init_lock().lock().await;
            if !buffer.is_initialized() {
                let index = buffer.current_index();
                if let Err(e) = self.inner.update_segment(&buffer, index).await {
                    #[cfg(feature = "tracing")]
                    tracing::error!(key, error = %e, "initial segment population failed");
                    return Err(e.into());
                }
                buffer.mark_initialized();
            }
        }

        let inner = Arc::clone(&self.inner);
        buffer
            .next_id(&self.inner.config, move |buffer| inner.spawn_refill(buffer))
            .await
    }

    /// Whether the first key sync completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Keys currently cached, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.cache.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the buffer for `key`, if cached.
    pub fn buffer(&self, key: &str) -> Option<Arc<SegmentBuffer>> {
        self.inner.cache.read().get(key).cloned()
    }

    /// Point-in-time state of every cached buffer, sorted by key.
    pub fn snapshot(&self) -> Vec<BufferSnapshot> {
        let buffers: Vec<_> = self.inner.cache.read().values().cloned().collect();
        let mut snapshots: Vec<_> = buffers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Every row in the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the store cannot be read.
    pub async fn records(&self) -> Result<Vec<AllocationRecord>> {
        Ok(self.inner.store.list_all_records().await?)
    }

    /// Stops the periodic key sync. In-flight refills run to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl<S, T> Drop for SegmentAllocator<S, T>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<S, T> Inner<S, T>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    /// Reconciles the cache with the store's key set.
    ///
    /// An empty key list leaves the cache untouched.
    async fn sync_keys(&self) -> Result<(), StoreError> {
        let keys = self.store.list_all_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let fresh: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut cache = self.cache.write();
        for key in &keys {
            if !cache.contains_key(key) {
                cache.insert(key.clone(), Arc::new(SegmentBuffer::new(key.clone())));
                #[cfg(feature = "tracing")]
                tracing::info!(key = %key, "added segment buffer");
            }
        }
        cache.retain(|key, _| {
            let keep = fresh.contains(key.as_str());
            #[cfg(feature = "tracing")]
            if !keep {
                tracing::info!(key = %key, "evicted segment buffer");
            }
            keep
        });
        Ok(())
    }

    /// Populates segment `index` of `buffer` from the store, adjusting the
    /// step on the way.
    async fn update_segment(&self, buffer: &SegmentBuffer, index: usize) -> Result<(), StoreError> {
        let key = buffer.key();
        let tuning = buffer.tuning();

        let (record, tuning) = if !buffer.is_initialized() {
            let record = self.store.bump_and_fetch(key).await?;
            let tuning = StepTuning {
                step: record.step,
                min_step: record.step,
                last_refill: None,
            };
            (record, tuning)
        } else if let Some(last_refill) = tuning.last_refill {
            let now = self.time.current_millis();
            let elapsed = Duration::from_millis(now.saturating_sub(last_refill));
            let step = next_step(tuning.step, tuning.min_step, elapsed, &self.config);
            #[cfg(feature = "tracing")]
            tracing::info!(
                key,
                step = tuning.step,
                duration_mins = elapsed.as_secs_f64() / 60.0,
                next_step = step,
                "adjusted segment step"
            );
            let record = self.store.bump_and_fetch_with_step(key, step).await?;
            let tuning = StepTuning {
                step,
                min_step: record.step,
                last_refill: Some(now),
            };
            (record, tuning)
        } else {
            let record = self.store.bump_and_fetch(key).await?;
            let tuning = StepTuning {
                step: record.step,
                min_step: record.step,
                last_refill: Some(self.time.current_millis()),
            };
            (record, tuning)
        };

        let start = record.max_id - tuning.step;
        buffer
            .segment(index)
            .reset(start, record.max_id, tuning.step);
        buffer.set_tuning(tuning);
        #[cfg(feature = "tracing")]
        tracing::debug!(key, index, start, max = record.max_id, "populated segment");
        Ok(())
    }

    /// Fills the standby segment of `buffer` in a background task.
    fn spawn_refill(self: &Arc<Self>, buffer: Arc<SegmentBuffer>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&inner.refills).acquire_owned().await else {
                buffer.finish_refill(false);
                return;
            };
            let index = buffer.next_index();
            let populated = match inner.update_segment(&buffer, index).await {
                Ok(()) => true,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key = buffer.key(), error = %_e, "segment refill failed");
                    false
                }
            };
            buffer.finish_refill(populated);
        });
    }
}

#[async_trait]
impl<S, T> IdGenerator for SegmentAllocator<S, T>
where
    S: AllocationStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> IdResult {
        self.next(key).await.into()
    }
}
