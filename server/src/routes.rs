use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::pipeline::{audio_body, Frame, PipelineError, StreamEnd, StreamPipeline};
use crate::prompt::meditation_messages;
use crate::state::AppState;
use crate::validation::{validate_meditation_request, validate_stream_id};

pub const STREAM_ID_HEADER: &str = "x-stream-id";

/// How long a timed-out request waits for its workers before answering
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
pub struct MeditationRequest {
    // missing input is reported like an empty one
    #[serde(default)]
    input: String,
}

#[derive(Serialize)]
pub struct ScriptResponse {
    script: String,
}

/// Routes served at the root and under `/api`
pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/stream-meditation", post(stream_meditation))
        .route("/generate-meditation", post(generate_meditation))
        .route("/streams/{id}/cancel", post(cancel_stream));

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(middleware::from_fn(add_request_id))
        .with_state(state)
}

/// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header_value.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header_value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<crate::metrics::MetricsResponse> {
    Json(state.metrics.snapshot())
}

/// Stream synthesized speech of a freshly generated meditation.
///
/// Headers are committed only once the first audio chunk exists, so an
/// upstream failure before that point becomes a 500. After it, failures
/// follow the configured `FailurePolicy`.
pub async fn stream_meditation(
    State(state): State<AppState>,
    Json(req): Json<MeditationRequest>,
) -> Result<Response, ApiError> {
    state.metrics.record_request();
    validate_meditation_request(&req.input)?;

    let messages = meditation_messages(&state.config.system_prompt, &req.input);
    let pipeline = StreamPipeline::new(
        state.generator.clone(),
        state.synthesizer.clone(),
        state.config.pipeline_config(),
    );
    let ticket = state.streams.register(pipeline.cancel_flag());
    let stream_id = ticket.id();
    info!(%stream_id, input_len = req.input.len(), "meditation stream requested");

    let started = Instant::now();
    let mut running = pipeline.start(messages);
    let timeout = state.config.llm_timeout();

    let first = match tokio::time::timeout(timeout, running.next_frame()).await {
        Ok(Some(Frame::Item(chunk))) => Some(chunk),
        Ok(Some(Frame::End(StreamEnd::Failed(e)))) => {
            running.join().await;
            state.metrics.record_upstream_failure();
            return Err(ApiError::Upstream(e));
        }
        Ok(Some(Frame::End(end))) => {
            // finished (or was cancelled) without producing any audio
            running.join().await;
            state.metrics.record_stream_end(&end);
            info!(%stream_id, outcome = end.label(), "stream ended before any audio");
            None
        }
        Ok(None) => None,
        Err(_) => {
            running.shutdown(SHUTDOWN_GRACE).await;
            state.metrics.record_upstream_failure();
            return Err(ApiError::Upstream(PipelineError::Timeout(timeout.as_secs())));
        }
    };

    let format = state.config.speech.format;
    let body = match first {
        Some(chunk) => {
            state.metrics.record_stream_started(started.elapsed());
            info!(%stream_id, ttfa_ms = started.elapsed().as_millis() as u64, "first audio ready");
            Body::from_stream(audio_body(
                Some(chunk),
                running,
                state.config.failure_policy,
                state.metrics.clone(),
                ticket,
            ))
        }
        None => Body::empty(),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(STREAM_ID_HEADER, stream_id.to_string())
        .body(body)
        .map_err(|e| ApiError::InternalError(format!("Failed to build response: {e}")))
}

/// Generate the full meditation script as text, without audio.
pub async fn generate_meditation(
    State(state): State<AppState>,
    Json(req): Json<MeditationRequest>,
) -> Result<Json<ScriptResponse>, ApiError> {
    state.metrics.record_request();
    validate_meditation_request(&req.input)?;

    let messages = meditation_messages(&state.config.system_prompt, &req.input);
    let timeout = state.config.llm_timeout();
    let script = tokio::time::timeout(timeout, state.generator.complete(&messages, &state.config.llm_model))
        .await
        .map_err(|_| PipelineError::Timeout(timeout.as_secs()))?
        .map_err(|e| PipelineError::Generation(format!("{e:#}")))?;

    info!(script_len = script.len(), "meditation script generated");
    Ok(Json(ScriptResponse { script }))
}

/// Cooperatively stop a live stream
pub async fn cancel_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = validate_stream_id(&id)?;
    if state.streams.cancel(&id) {
        info!(stream_id = %id, "stream cancellation requested");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No active stream with id {id}")))
    }
}
