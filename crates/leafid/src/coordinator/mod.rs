//! Worker-id assignment through a hierarchical coordination service.
//!
//! [`WorkerIdCoordinator`] registers `ip:port` under a persistent sequential
//! node and uses the node's sequence as the Snowflake worker id. The
//! [`CoordinationService`] trait is the seam to the actual store;
//! [`MemoryCoordinationService`] implements it in-process.

mod cache;
mod endpoint;
mod memory;
mod service;
mod worker;

pub use cache::*;
pub use endpoint::*;
pub use memory::*;
pub use service::*;
pub use worker::*;
