use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::{
        cache::LocalWorkerIdCache,
        endpoint::{Endpoint, WorkerRegistration, parse_node_name},
        service::{CoordinationError, CoordinationService, split_path},
    },
    error::{Error, Result},
    snowflake::SnowflakeId,
    time::{SystemClock, TimeSource},
};

/// Settings for [`WorkerIdCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Namespaces the registration tree: `/snowflake/<service_name>`.
    pub service_name: String,
    /// Address this worker is reachable at.
    pub ip: String,
    pub port: u16,
    /// Root directory of the local worker-id cache.
    pub cache_dir: PathBuf,
    pub heartbeat_interval: Duration,
    /// Delay before the first heartbeat.
    pub heartbeat_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service_name: "leaf".to_owned(),
            ip: "127.0.0.1".to_owned(),
            port: 8080,
            cache_dir: std::env::temp_dir(),
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_delay: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    /// `ip:port`, the key of this worker's registration.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn root_path(&self) -> String {
        format!("/snowflake/{}", self.service_name)
    }

    /// Parent of every registration node ever created for this service.
    pub fn forever_path(&self) -> String {
        format!("{}/forever", self.root_path())
    }

    pub fn cache(&self) -> LocalWorkerIdCache {
        LocalWorkerIdCache::new(&self.cache_dir, &self.service_name, self.port)
    }
}

/// Where a worker id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerIdSource {
    /// A new sequential node was created for this address.
    Created,
    /// This address already had a node.
    Reused,
    /// The coordination service failed and the local cache supplied the id.
    LocalCache,
}

#[derive(Debug, Clone)]
struct Assignment {
    worker_id: i64,
    source: WorkerIdSource,
    node_path: Option<String>,
}

struct Inner<C, T> {
    service: C,
    time: T,
    config: CoordinatorConfig,
    cache: LocalWorkerIdCache,
    assignment: Mutex<Option<Assignment>>,
    last_heartbeat: AtomicU64,
}

/// Obtains a unique worker id for this process and keeps its registration
/// alive.
///
/// Registration lives under `/snowflake/<service_name>/forever`, one
/// persistent sequential node per `ip:port` ever seen. The node's sequence
/// suffix is the worker id, so an address keeps its id across restarts. A
/// background heartbeat rewrites the node payload with the local time; a
/// restarted worker refuses to reuse its id if the stored time is ahead of its
/// own clock.
///
/// When the coordination service fails, the id is read from a local cache file
/// written after every successful registration.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use leafid::{CoordinatorConfig, MemoryCoordinationService, WorkerIdCoordinator};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> leafid::Result<()> {
/// let dir = std::env::temp_dir().join("leafid-doc-coordinator");
/// let service = Arc::new(MemoryCoordinationService::new());
/// let config = CoordinatorConfig {
///     cache_dir: dir,
///     ..CoordinatorConfig::default()
/// };
///
/// let coordinator = WorkerIdCoordinator::new(service, config);
/// let worker_id = coordinator.initialize().await?;
/// assert_eq!(worker_id, 0);
/// coordinator.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct WorkerIdCoordinator<C, T = SystemClock>
where
    C: CoordinationService + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    inner: Arc<Inner<C, T>>,
    shutdown: CancellationToken,
}

impl<C> WorkerIdCoordinator<C>
where
    C: CoordinationService + 'static,
{
    pub fn new(service: C, config: CoordinatorConfig) -> Self {
        Self::with_time(service, SystemClock::default(), config)
    }
}

impl<C, T> WorkerIdCoordinator<C, T>
where
    C: CoordinationService + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    /// Creates a coordinator whose clock must report wall-clock UNIX
    /// milliseconds.
    pub fn with_time(service: C, time: T, config: CoordinatorConfig) -> Self {
        let cache = config.cache();
        Self {
            inner: Arc::new(Inner {
                service,
                time,
                config,
                cache,
                assignment: Mutex::new(None),
                last_heartbeat: AtomicU64::new(0),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Resolves this worker's id. Later calls return the id resolved first.
    ///
    /// On success through the coordination service the id is persisted to
    /// the local cache and the heartbeat starts.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockBehindRegistration`] if the existing registration
    ///   carries a timestamp ahead of the local clock. Unlike a coordination
    ///   failure, this never falls back to the local cache: the cached id is
    ///   the same registration, and issuing with it under a lagging clock
    ///   can repeat ids already handed out.
    /// - [`Error::CoordinationInitFailure`] if the coordination service
    ///   failed and the local cache is missing or unreadable.
    pub async fn initialize(&self) -> Result<i64> {
        if let Some(worker_id) = self.worker_id() {
            return Ok(worker_id);
        }
        let inner = &self.inner;
        let assignment = match inner.register().await {
            Ok(assignment) => {
                if let Err(_e) = inner.cache.store(assignment.worker_id).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        path = %inner.cache.path().display(),
                        error = %_e,
                        "failed to persist worker id cache"
                    );
                }
                assignment
            }
            Err(e @ Error::ClockBehindRegistration { .. }) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "refusing to reuse worker id");
                return Err(e);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "worker id registration failed, trying local cache");
                match inner.cache.load().await {
                    Ok(worker_id) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(worker_id, "using worker id from local cache");
                        Assignment {
                            worker_id,
                            source: WorkerIdSource::LocalCache,
                            node_path: None,
                        }
                    }
                    Err(cache_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            path = %inner.cache.path().display(),
                            error = %cache_err,
                            "failed to read worker id cache"
                        );
                        return Err(Error::CoordinationInitFailure {
                            reason: format!("{e}; local cache: {cache_err}"),
                        });
                    }
                }
            }
        };

        let worker_id = assignment.worker_id;
        if let Some(path) = &assignment.node_path {
            self.spawn_heartbeat(path.clone());
        }
        *inner.assignment.lock() = Some(assignment);
        Ok(worker_id)
    }

    pub fn worker_id(&self) -> Option<i64> {
        self.inner.assignment.lock().as_ref().map(|a| a.worker_id)
    }

    pub fn source(&self) -> Option<WorkerIdSource> {
        self.inner.assignment.lock().as_ref().map(|a| a.source)
    }

    /// Full path of this worker's registration node, if registered.
    pub fn node_path(&self) -> Option<String> {
        self.inner
            .assignment
            .lock()
            .as_ref()
            .and_then(|a| a.node_path.clone())
    }

    /// The registration as last observed by this process.
    pub fn registration(&self) -> Option<WorkerRegistration> {
        self.worker_id().map(|worker_id| WorkerRegistration {
            address: self.inner.config.address(),
            worker_id,
            last_heartbeat: self.last_heartbeat(),
        })
    }

    /// Returns the worker id after checking it fits the Snowflake layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinationInitFailure`] before a successful
    /// [`initialize`](Self::initialize) and [`Error::WorkerIdOutOfRange`]
    /// outside `0..=1023`.
    pub fn checked_worker_id(&self) -> Result<i64> {
        let worker_id = self
            .worker_id()
            .ok_or_else(|| Error::CoordinationInitFailure {
                reason: "worker id not initialized".to_owned(),
            })?;
        if (0..=SnowflakeId::MAX_WORKER_ID).contains(&worker_id) {
            Ok(worker_id)
        } else {
            Err(Error::WorkerIdOutOfRange {
                worker_id,
                max: SnowflakeId::MAX_WORKER_ID,
            })
        }
    }

    /// Local time of the last successful heartbeat write, or of the
    /// registration itself.
    pub fn last_heartbeat(&self) -> u64 {
        self.inner.last_heartbeat.load(Ordering::Acquire)
    }

    /// Rewrites the registration payload with the current time.
    ///
    /// Returns `Ok(false)` without writing when there is no registration node
    /// or the clock is behind the last successful write.
    pub async fn send_heartbeat(&self) -> Result<bool, CoordinationError> {
        match self.node_path() {
            Some(path) => self.inner.heartbeat(&path).await,
            None => Ok(false),
        }
    }

    /// Stops the heartbeat.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn spawn_heartbeat(&self, node_path: String) {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        let start = Instant::now() + inner.config.heartbeat_delay;
        let period = inner.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(_e) = inner.heartbeat(&node_path).await {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(path = %node_path, error = %_e, "heartbeat failed");
                        }
                    }
                }
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(path = %node_path, "heartbeat stopped");
        });
    }
}

impl<C, T> Drop for WorkerIdCoordinator<C, T>
where
    C: CoordinationService + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<C, T> Inner<C, T>
where
    C: CoordinationService + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    async fn register(&self) -> Result<Assignment> {
        self.service.connect().await?;

        let forever = self.config.forever_path();
        if !self.service.node_exists(&forever).await? {
            return self.create_node(&forever).await;
        }

        let address = self.config.address();
        let mut nodes: HashMap<String, (i64, String)> = HashMap::new();
        for name in self.service.list_children(&forever).await? {
            match parse_node_name(&name) {
                Ok((node_address, worker_id)) => {
                    let entry = nodes
                        .entry(node_address.to_owned())
                        .or_insert((worker_id, name.clone()));
                    if worker_id < entry.0 {
                        *entry = (worker_id, name.clone());
                    }
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "skipping registration node");
                }
            }
        }

        match nodes.remove(&address) {
            Some((worker_id, name)) => {
                let node_path = format!("{forever}/{name}");
                let payload = self.service.read_node(&node_path).await?;
                let endpoint = Endpoint::from_json(&payload)?;
                let now = self.time.current_millis();
                if endpoint.timestamp > now {
                    return Err(Error::ClockBehindRegistration {
                        registered: endpoint.timestamp,
                        now,
                    });
                }
                self.last_heartbeat.store(endpoint.timestamp, Ordering::Release);
                #[cfg(feature = "tracing")]
                tracing::info!(%address, worker_id, "reusing registration node");
                Ok(Assignment {
                    worker_id,
                    source: WorkerIdSource::Reused,
                    node_path: Some(node_path),
                })
            }
            None => self.create_node(&forever).await,
        }
    }

    async fn create_node(&self, forever: &str) -> Result<Assignment> {
        let address = self.config.address();
        let now = self.time.current_millis();
        let payload = Endpoint::new(&self.config.ip, self.config.port, now).to_json()?;
        let node_path = self
            .service
            .create_persistent_sequential(&format!("{forever}/{address}-"), &payload)
            .await?;
        let (_, name) = split_path(&node_path);
        let (_, worker_id) = parse_node_name(name)?;
        self.last_heartbeat.store(now, Ordering::Release);
        #[cfg(feature = "tracing")]
        tracing::info!(%address, worker_id, path = %node_path, "created registration node");
        Ok(Assignment {
            worker_id,
            source: WorkerIdSource::Created,
            node_path: Some(node_path),
        })
    }

    async fn heartbeat(&self, node_path: &str) -> Result<bool, CoordinationError> {
        let now = self.time.current_millis();
        if now < self.last_heartbeat.load(Ordering::Acquire) {
            #[cfg(feature = "tracing")]
            tracing::debug!(path = node_path, now, "clock behind last heartbeat, skipping");
            return Ok(false);
        }
        let payload = Endpoint::new(&self.config.ip, self.config.port, now).to_json()?;
        self.service.write_node(node_path, &payload).await?;
        self.last_heartbeat
            .store(self.time.current_millis(), Ordering::Release);
        Ok(true)
    }
}
