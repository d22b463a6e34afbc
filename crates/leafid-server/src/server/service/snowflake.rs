use std::sync::Arc;

use leafid::{CoordinationService, CoordinatorConfig, SnowflakeGenerator, WorkerIdCoordinator};

use crate::server::{config::ServerConfig, coordination::FsCoordinationService};

pub type Coordinator = WorkerIdCoordinator<Arc<dyn CoordinationService>>;

/// A running Snowflake mode: the worker-id registration and the generator
/// built on it.
pub struct SnowflakeMode {
    pub coordinator: Coordinator,
    pub generator: Arc<SnowflakeGenerator>,
}

impl SnowflakeMode {
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.generator.interrupt();
    }
}

/// Registers this server in the shared coordination directory and builds
/// the generator for the assigned worker id.
pub async fn start(config: &ServerConfig) -> leafid::Result<Arc<SnowflakeMode>> {
    let service = FsCoordinationService::new(&config.coordination_root);
    #[cfg(feature = "tracing")]
    tracing::info!(root = %service.root().display(), "using coordination directory");
    start_with_service(Arc::new(service), config.coordinator.clone()).await
}

pub async fn start_with_service(
    service: Arc<dyn CoordinationService>,
    config: CoordinatorConfig,
) -> leafid::Result<Arc<SnowflakeMode>> {
    let coordinator = WorkerIdCoordinator::new(service, config);
    coordinator.initialize().await?;
    let worker_id = coordinator.checked_worker_id()?;
    let generator = Arc::new(SnowflakeGenerator::new(worker_id)?);

    #[cfg(feature = "tracing")]
    tracing::info!(worker_id, source = ?coordinator.source(), "snowflake mode ready");
    Ok(Arc::new(SnowflakeMode {
        coordinator,
        generator,
    }))
}
