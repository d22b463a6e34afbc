use std::time::Instant;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::server::{
    service::{AppState, ModeState},
    telemetry::{
        increment_errors, increment_ids_generated, increment_requests, record_request_duration,
    },
};

const SEGMENT: &str = "segment";
const SNOWFLAKE: &str = "snowflake";

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(key = %key)))]
pub async fn segment_id(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    issue(&state.segment, SEGMENT, &key).await
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(key = %key)))]
pub async fn snowflake_id(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    issue(&state.snowflake, SNOWFLAKE, &key).await
}

/// Buffer state of every cached key.
pub async fn segment_cache(State(state): State<AppState>) -> Response {
    match &state.allocator {
        Some(allocator) => Json(allocator.snapshot()).into_response(),
        None => segment_unavailable(&state.segment),
    }
}

/// The allocation rows as stored.
pub async fn segment_db(State(state): State<AppState>) -> Response {
    let Some(allocator) = &state.allocator else {
        return segment_unavailable(&state.segment);
    };
    match allocator.records().await {
        Ok(records) => Json(records).into_response(),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "failed to list allocation records");
            (StatusCode::INTERNAL_SERVER_ERROR, "allocation store unavailable").into_response()
        }
    }
}

/// Maps one id request onto the mode's generator.
///
/// The body is the decimal id on success. A failure result is answered with
/// `500` and the result's textual form; an unavailable mode with `503`.
async fn issue(mode: &ModeState, name: &'static str, key: &str) -> Response {
    if key.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "key is empty").into_response();
    }
    let generator = match mode {
        ModeState::Ready(generator) => generator,
        ModeState::Unavailable { reason } => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("{name} mode unavailable: {reason}"),
            )
                .into_response();
        }
    };

    increment_requests(name);
    let started = Instant::now();
    let result = generator.get(key).await;
    record_request_duration(name, started.elapsed().as_secs_f64() * 1000.0);

    if result.is_success() {
        increment_ids_generated(name);
        result.id.to_string().into_response()
    } else {
        increment_errors(name);
        #[cfg(feature = "tracing")]
        tracing::warn!(mode = name, key, code = result.id, "id request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, result.to_string()).into_response()
    }
}

fn segment_unavailable(mode: &ModeState) -> Response {
    let reason = match mode {
        ModeState::Unavailable { reason } => format!("segment mode unavailable: {reason}"),
        ModeState::Ready(_) => "segment mode disabled".to_owned(),
    };
    (StatusCode::SERVICE_UNAVAILABLE, reason).into_response()
}
