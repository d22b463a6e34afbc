use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;

/// Errors surfaced by a [`CoordinationService`] or the local worker-id cache.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoordinationError {
    #[error("coordination service unreachable: {reason}")]
    Connection { reason: String },

    #[error("node `{path}` does not exist")]
    NoNode { path: String },

    #[error("node `{path}` already exists")]
    NodeExists { path: String },

    #[error("malformed node name `{name}`")]
    MalformedNode { name: String },

    #[error("invalid worker id cache at {}", path.display())]
    InvalidCache { path: PathBuf },

    #[error("invalid node payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("coordination I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A hierarchical node store in the ZooKeeper mould.
///
/// Paths are absolute and `/`-separated. Every node may carry a payload and
/// have children. Sequential creation appends a zero-padded 10-digit counter
/// that is unique among the parent's children.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Establishes (or verifies) the session. The default does nothing.
    async fn connect(&self) -> Result<(), CoordinationError> {
        Ok(())
    }

    async fn node_exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Creates the persistent node `<prefix><sequence>` with `payload`,
    /// creating missing ancestors, and returns the full assigned path.
    async fn create_persistent_sequential(
        &self,
        prefix: &str,
        payload: &[u8],
    ) -> Result<String, CoordinationError>;

    /// Names (not paths) of the direct children of `path`.
    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    async fn read_node(&self, path: &str) -> Result<Vec<u8>, CoordinationError>;

    /// Replaces the payload of an existing node.
    async fn write_node(&self, path: &str, payload: &[u8]) -> Result<(), CoordinationError>;
}

#[async_trait]
impl<C: CoordinationService + ?Sized> CoordinationService for Arc<C> {
    async fn connect(&self) -> Result<(), CoordinationError> {
        (**self).connect().await
    }

    async fn node_exists(&self, path: &str) -> Result<bool, CoordinationError> {
        (**self).node_exists(path).await
    }

    async fn create_persistent_sequential(
        &self,
        prefix: &str,
        payload: &[u8],
    ) -> Result<String, CoordinationError> {
        (**self).create_persistent_sequential(prefix, payload).await
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        (**self).list_children(path).await
    }

    async fn read_node(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        (**self).read_node(path).await
    }

    async fn write_node(&self, path: &str, payload: &[u8]) -> Result<(), CoordinationError> {
        (**self).write_node(path, payload).await
    }
}

/// Formats the path of the `sequence`-th sequential child under `prefix`.
///
/// ```
/// use leafid::sequential_path;
///
/// assert_eq!(
///     sequential_path("/snowflake/leaf/forever/10.0.0.1:8080-", 3),
///     "/snowflake/leaf/forever/10.0.0.1:8080-0000000003",
/// );
/// ```
pub fn sequential_path(prefix: &str, sequence: u64) -> String {
    format!("{prefix}{sequence:010}")
}

/// Splits `path` into its parent and final segment.
///
/// The parent of a top-level node is `/`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", path),
    }
}
