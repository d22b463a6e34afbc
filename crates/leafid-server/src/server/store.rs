use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use leafid::{
    AllocationRecord, AllocationStore, StoreError, SystemClock, TimeSource, apply_bump,
};
use tokio::sync::Mutex;

/// An [`AllocationStore`] persisted as a JSON array of rows.
///
/// Every bump is a read-modify-write of the whole file under an async mutex,
/// published with a write-to-temp-then-rename so readers never observe a
/// partial file. A missing file reads as an empty table. The file must be
/// owned by a single server process.
#[derive(Debug)]
pub struct JsonFileAllocationStore {
    path: PathBuf,
    lock: Mutex<()>,
    time: SystemClock,
}

impl JsonFileAllocationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            time: SystemClock::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, rows: &[AllocationRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(rows)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn bump(&self, key: &str, step: Option<i64>) -> Result<AllocationRecord, StoreError> {
        let _guard = self.lock.lock().await;
        let mut rows = self.load().await?;
        let record = rows
            .iter_mut()
            .find(|row| row.key == key)
            .ok_or_else(|| StoreError::KeyNotFound {
                key: key.to_owned(),
            })?;
        let step = step.unwrap_or(record.step);
        let updated = apply_bump(record, step, self.time.current_millis())?;
        self.persist(&rows).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(key, max_id = updated.max_id, step, "bumped allocation row");
        Ok(updated)
    }
}

#[async_trait]
impl AllocationStore for JsonFileAllocationStore {
    async fn list_all_keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().map(|row| row.key).collect())
    }

    async fn list_all_records(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn bump_and_fetch(&self, key: &str) -> Result<AllocationRecord, StoreError> {
        self.bump(key, None).await
    }

    async fn bump_and_fetch_with_step(
        &self,
        key: &str,
        step: i64,
    ) -> Result<AllocationRecord, StoreError> {
        self.bump(key, Some(step)).await
    }
}

#[cfg(test)]
mod tests;
