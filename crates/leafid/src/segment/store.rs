use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::time::{SystemClock, TimeSource};

/// One durable allocation row: the high-water mark handed out for `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Business key the row belongs to.
    pub key: String,
    /// Exclusive upper bound of everything handed out so far. Only increases.
    pub max_id: i64,
    /// Configured batch size for the key.
    pub step: i64,
    /// Free-form note kept alongside the row.
    #[serde(default)]
    pub description: String,
    /// Millisecond timestamp of the last bump.
    #[serde(default)]
    pub update_time: u64,
}

impl AllocationRecord {
    pub fn new(key: impl Into<String>, max_id: i64, step: i64) -> Self {
        Self {
            key: key.into(),
            max_id,
            step,
            description: String::new(),
            update_time: 0,
        }
    }
}

/// Errors surfaced by an [`AllocationStore`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("no allocation row for key `{key}`")]
    KeyNotFound { key: String },

    #[error("invalid step {step} for key `{key}`")]
    InvalidStep { key: String, step: i64 },

    #[error("max_id overflow for key `{key}`")]
    Overflow { key: String },

    #[error("allocation store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("allocation store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("allocation store data error: {0}")]
    Data(#[from] serde_json::Error),
}

/// Durable source of truth for segment allocation.
///
/// Both bump operations are atomic read-modify-writes: they increase the
/// stored `max_id` and return the post-increment row.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Returns every business key that has a row.
    async fn list_all_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Returns every row.
    async fn list_all_records(&self) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Bumps `max_id` by the stored step.
    async fn bump_and_fetch(&self, key: &str) -> Result<AllocationRecord, StoreError>;

    /// Bumps `max_id` by `step`, leaving the stored step untouched.
    async fn bump_and_fetch_with_step(
        &self,
        key: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError>;
}

#[async_trait]
impl<S: AllocationStore + ?Sized> AllocationStore for Arc<S> {
    async fn list_all_keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_all_keys().await
    }

    async fn list_all_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        (**self).list_all_records().await
    }

    async fn bump_and_fetch(&self, key: &str) -> Result<AllocationRecord, StoreError> {
        (**self).bump_and_fetch(key).await
    }

    async fn bump_and_fetch_with_step(
        &self,
        key: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError> {
        (**self).bump_and_fetch_with_step(key, step).await
    }
}

/// Applies one bump to `record` in place and returns the updated row.
///
/// Shared by every store implementation so the overflow and step checks stay
/// identical.
pub fn apply_bump(
    record: &mut AllocationRecord,
    step: i64,
    now: u64,
) -> Result<AllocationRecord, StoreError> {
    if step <= 0 {
        return Err(StoreError::InvalidStep {
            key: record.key.clone(),
            step,
        });
    }
    record.max_id = record
        .max_id
        .checked_add(step)
        .ok_or_else(|| StoreError::Overflow {
            key: record.key.clone(),
        })?;
    record.update_time = now;
    Ok(record.clone())
}

/// An in-process [`AllocationStore`].
///
/// Rows live in a mutex-guarded map. Besides serving embedded deployments it
/// can be toggled unavailable and counts bump calls, which makes it the
/// store of choice for exercising refill failure paths.
#[derive(Debug)]
pub struct MemoryAllocationStore<T = SystemClock> {
    rows: Mutex<BTreeMap<String, AllocationRecord>>,
    available: AtomicBool,
    bumps: AtomicUsize,
    time: T,
}

impl Default for MemoryAllocationStore {
    fn default() -> Self {
        Self::with_time(SystemClock::default())
    }
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: TimeSource> MemoryAllocationStore<T> {
    pub fn with_time(time: T) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            bumps: AtomicUsize::new(0),
            time,
        }
    }

    /// Inserts or replaces a row.
    pub fn insert(&self, record: AllocationRecord) {
        self.rows.lock().insert(record.key.clone(), record);
    }

    /// Removes the row for `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<AllocationRecord> {
        self.rows.lock().remove(key)
    }

    /// Returns a copy of the row for `key`.
    pub fn record(&self, key: &str) -> Option<AllocationRecord> {
        self.rows.lock().get(key).cloned()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of successful bump calls served so far.
    pub fn bump_count(&self) -> usize {
        self.bumps.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "store disabled".into(),
            })
        }
    }

    fn bump(&self, key: &str, step: Option<i64>) -> Result<AllocationRecord, StoreError> {
        self.check_available()?;
        let now = self.time.current_millis();
        let mut rows = self.rows.lock();
        let record = rows.get_mut(key).ok_or_else(|| StoreError::KeyNotFound {
            key: key.to_owned(),
        })?;
        let step = step.unwrap_or(record.step);
        let updated = apply_bump(record, step, now)?;
        self.bumps.fetch_add(1, Ordering::AcqRel);
        Ok(updated)
    }
}

#[async_trait]
impl<T: TimeSource + Send + Sync> AllocationStore for MemoryAllocationStore<T> {
    async fn list_all_keys(&self) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self.rows.lock().keys().cloned().collect())
    }

    async fn list_all_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        self.check_available()?;
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn bump_and_fetch(&self, key: &str) -> Result<AllocationRecord, StoreError> {
        self.bump(key, None)
    }

    async fn bump_and_fetch_with_step(
        &self,
        key: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError> {
        self.bump(key, Some(step))
    }
}
