use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::coordinator::service::{
    CoordinationError, CoordinationService, sequential_path, split_path,
};

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Vec<u8>>,
    sequences: HashMap<String, u64>,
}

impl Tree {
    fn ensure_ancestors(&mut self, path: &str) {
        let (parent, _) = split_path(path);
        if parent == "/" || self.nodes.contains_key(parent) {
            return;
        }
        self.ensure_ancestors(parent);
        self.nodes.insert(parent.to_owned(), Vec::new());
    }
}

/// An in-process [`CoordinationService`].
///
/// Suitable for single-node deployments and for tests. It can be switched
/// unavailable to exercise the local-cache fallback.
#[derive(Debug)]
pub struct MemoryCoordinationService {
    tree: Mutex<Tree>,
    available: AtomicBool,
}

impl Default for MemoryCoordinationService {
    fn default() -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryCoordinationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`CoordinationError::Connection`] until
    /// re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Creates or overwrites a node directly, creating missing ancestors.
    pub fn put(&self, path: &str, payload: impl Into<Vec<u8>>) {
        let mut tree = self.tree.lock();
        tree.ensure_ancestors(path);
        tree.nodes.insert(path.to_owned(), payload.into());
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoordinationError::Connection {
                reason: "service disabled".into(),
            })
        }
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordinationService {
    async fn connect(&self) -> Result<(), CoordinationError> {
        self.check_available()
    }

    async fn node_exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.check_available()?;
        Ok(self.tree.lock().nodes.contains_key(path))
    }

    async fn create_persistent_sequential(
        &self,
        prefix: &str,
        payload: &[u8],
    ) -> Result<String, CoordinationError> {
        self.check_available()?;
        let mut guard = self.tree.lock();
        let tree = &mut *guard;
        tree.ensure_ancestors(prefix);

        let (parent, _) = split_path(prefix);
        let counter = tree.sequences.entry(parent.to_owned()).or_default();
        let path = sequential_path(prefix, *counter);
        *counter += 1;

        if tree.nodes.contains_key(&path) {
            return Err(CoordinationError::NodeExists { path });
        }
        tree.nodes.insert(path.clone(), payload.to_vec());
        Ok(path)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.check_available()?;
        let tree = self.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode {
                path: path.to_owned(),
            });
        }
        let prefix = format!("{path}/");
        Ok(tree
            .nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| {
                let name = &key[prefix.len()..];
                (!name.contains('/')).then(|| name.to_owned())
            })
            .collect())
    }

    async fn read_node(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        self.check_available()?;
        self.tree
            .lock()
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_owned(),
            })
    }

    async fn write_node(&self, path: &str, payload: &[u8]) -> Result<(), CoordinationError> {
        self.check_available()?;
        let mut tree = self.tree.lock();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_owned(),
            })?;
        payload.clone_into(node);
        Ok(())
    }
}
