use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use leafid::{CoordinationError, CoordinationService, sequential_path, split_path};
use tokio::fs;

const PAYLOAD_FILE: &str = ".payload";
const SEQUENCE_DIR: &str = ".seq";

/// A [`CoordinationService`] backed by a shared directory.
///
/// Each node is a directory below `root` mirroring its path, with the payload
/// in a hidden `.payload` file. Sequence numbers are claimed per parent by
/// creating marker files with `create_new`, which the filesystem makes atomic,
/// so several processes sharing the directory never receive the same
/// sequence. Hidden entries are not reported as children.
#[derive(Debug, Clone)]
pub struct FsCoordinationService {
    root: PathBuf,
}

impl FsCoordinationService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an absolute node path onto the directory below `root`.
    fn dir_of(&self, path: &str) -> Result<PathBuf, CoordinationError> {
        let relative = path
            .strip_prefix('/')
            .ok_or_else(|| CoordinationError::MalformedNode {
                name: path.to_owned(),
            })?;
        let mut dir = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let valid = !segment.starts_with('.')
                && matches!(
                    Path::new(segment).components().next(),
                    Some(Component::Normal(_))
                );
            if !valid {
                return Err(CoordinationError::MalformedNode {
                    name: path.to_owned(),
                });
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    async fn existing_dir(&self, path: &str) -> Result<PathBuf, CoordinationError> {
        let dir = self.dir_of(path)?;
        if fs::try_exists(&dir).await? {
            Ok(dir)
        } else {
            Err(CoordinationError::NoNode {
                path: path.to_owned(),
            })
        }
    }

    /// Claims the lowest unused sequence under `parent`.
    async fn claim_sequence(&self, parent: &Path) -> Result<u64, CoordinationError> {
        let markers = parent.join(SEQUENCE_DIR);
        fs::create_dir_all(&markers).await?;

        let mut sequence = count_entries(&markers).await?;
        loop {
            let marker = markers.join(format!("{sequence:010}"));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
                .await
            {
                Ok(_) => return Ok(sequence),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => sequence += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn count_entries(dir: &Path) -> Result<u64, CoordinationError> {
    let mut entries = fs::read_dir(dir).await?;
    let mut count = 0;
    while entries.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

async fn write_payload(dir: &Path, payload: &[u8]) -> Result<(), CoordinationError> {
    let tmp = dir.join(".payload.tmp");
    fs::write(&tmp, payload).await?;
    fs::rename(&tmp, dir.join(PAYLOAD_FILE)).await?;
    Ok(())
}

#[async_trait]
impl CoordinationService for FsCoordinationService {
    async fn connect(&self) -> Result<(), CoordinationError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CoordinationError::Connection {
                reason: format!("{}: {e}", self.root.display()),
            })
    }

    async fn node_exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(fs::try_exists(self.dir_of(path)?).await?)
    }

    async fn create_persistent_sequential(
        &self,
        prefix: &str,
        payload: &[u8],
    ) -> Result<String, CoordinationError> {
        let (parent, _) = split_path(prefix);
        let parent_dir = self.dir_of(parent)?;
        fs::create_dir_all(&parent_dir).await?;

        let sequence = self.claim_sequence(&parent_dir).await?;
        let path = sequential_path(prefix, sequence);
        let dir = self.dir_of(&path)?;
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CoordinationError::NodeExists { path });
            }
            Err(e) => return Err(e.into()),
        }
        write_payload(&dir, payload).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path, "created sequential node");
        Ok(path)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        let dir = self.existing_dir(path).await?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().filter(|n| !n.starts_with('.')) {
                children.push(name.to_owned());
            }
        }
        children.sort_unstable();
        Ok(children)
    }

    async fn read_node(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let dir = self.existing_dir(path).await?;
        match fs::read(dir.join(PAYLOAD_FILE)).await {
            Ok(payload) => Ok(payload),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_node(&self, path: &str, payload: &[u8]) -> Result<(), CoordinationError> {
        let dir = self.existing_dir(path).await?;
        write_payload(&dir, payload).await
    }
}

#[cfg(test)]
mod tests;
