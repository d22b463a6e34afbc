use std::path::{Path, PathBuf};

use crate::coordinator::service::CoordinationError;

const WORKER_ID_KEY: &str = "workerID";

/// The on-disk fallback for a worker id, one file per listening port.
///
/// Lives at `<cache_dir>/<service_name>/leafconf/<port>/workerID.properties`
/// and holds a single `workerID=<n>` property.
#[derive(Debug, Clone)]
pub struct LocalWorkerIdCache {
    path: PathBuf,
}

impl LocalWorkerIdCache {
    pub fn new(cache_dir: impl AsRef<Path>, service_name: &str, port: u16) -> Self {
        let path = cache_dir
            .as_ref()
            .join(service_name)
            .join("leafconf")
            .join(port.to_string())
            .join("workerID.properties");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cached worker id.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Io`] if the file cannot be read and
    /// [`CoordinationError::InvalidCache`] if it has no parsable `workerID`.
    pub async fn load(&self) -> Result<i64, CoordinationError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_properties(&contents).ok_or_else(|| CoordinationError::InvalidCache {
            path: self.path.clone(),
        })
    }

    /// Overwrites the cache with `worker_id`, creating parent directories.
    pub async fn store(&self, worker_id: i64) -> Result<(), CoordinationError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, format!("{WORKER_ID_KEY}={worker_id}")).await?;
        Ok(())
    }
}

fn parse_properties(contents: &str) -> Option<i64> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(['#', '!']))
        .find_map(|line| {
            let (key, value) = line.split_once(['=', ':'])?;
            if key.trim() == WORKER_ID_KEY {
                value.trim().parse().ok()
            } else {
                None
            }
        })
}
