//! HTTP surface: shared state, mode startup and routes.

pub mod handler;
pub mod segment;
pub mod snowflake;

use std::sync::Arc;

use axum::{Router, routing::get};
use leafid::{IdGenerator, ZeroIdGenerator};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::server::config::ServerConfig;
use segment::Allocator;
use snowflake::SnowflakeMode;

/// How one id mode answers requests.
#[derive(Clone)]
pub enum ModeState {
    /// Requests are forwarded to the generator. A disabled mode is served
    /// by [`ZeroIdGenerator`].
    Ready(Arc<dyn IdGenerator>),
    /// Startup failed; requests are refused.
    Unavailable { reason: Arc<str> },
}

impl ModeState {
    pub fn disabled() -> Self {
        Self::Ready(Arc::new(ZeroIdGenerator))
    }

    pub fn unavailable(reason: impl Into<Arc<str>>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// State shared by every handler.
///
/// Holds the per-mode dispatch plus the concrete components that need
/// inspection or an orderly shutdown.
#[derive(Clone)]
pub struct AppState {
    pub segment: ModeState,
    pub snowflake: ModeState,
    pub allocator: Option<Arc<Allocator>>,
    pub snowflake_mode: Option<Arc<SnowflakeMode>>,
}

impl AppState {
    /// Starts each enabled mode independently. A mode that fails to start is
    /// logged and left [`ModeState::Unavailable`]; the other keeps serving.
    pub async fn start(config: &ServerConfig) -> Self {
        let (segment, allocator) = if config.segment_enabled {
            match segment::start(config).await {
                Ok(allocator) => (
                    ModeState::Ready(Arc::clone(&allocator) as Arc<dyn IdGenerator>),
                    Some(allocator),
                ),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "segment mode failed to start");
                    (ModeState::unavailable(e.to_string()), None)
                }
            }
        } else {
            #[cfg(feature = "tracing")]
            tracing::info!("segment mode disabled");
            (ModeState::disabled(), None)
        };

        let (snowflake, snowflake_mode) = if config.snowflake_enabled {
            match snowflake::start(config).await {
                Ok(mode) => (
                    ModeState::Ready(Arc::clone(&mode.generator) as Arc<dyn IdGenerator>),
                    Some(mode),
                ),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "snowflake mode failed to start");
                    (ModeState::unavailable(e.to_string()), None)
                }
            }
        } else {
            #[cfg(feature = "tracing")]
            tracing::info!("snowflake mode disabled");
            (ModeState::disabled(), None)
        };

        Self {
            segment,
            snowflake,
            allocator,
            snowflake_mode,
        }
    }

    /// Stops background work and wakes any rollback waiter.
    pub fn shutdown(&self) {
        if let Some(allocator) = &self.allocator {
            allocator.shutdown();
        }
        if let Some(mode) = &self.snowflake_mode {
            mode.shutdown();
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/segment/get/{key}", get(handler::segment_id))
        .route("/api/snowflake/get/{key}", get(handler::snowflake_id))
        .route("/api/segment/cache", get(handler::segment_cache))
        .route("/api/segment/db", get(handler::segment_db))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
