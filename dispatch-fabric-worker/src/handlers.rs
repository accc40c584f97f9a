//! Axum handlers for the Worker's public route and self-health probe.

use crate::registration_agent::LoadGuard;
use crate::state::WorkerState;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use dispatch_fabric::schema::{ChatCompletionRequest, HealthResponse};
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// `POST /v1/chat/completions` — increments load, unary- or stream-forwards
/// to the backend, decrements load on every exit path.
///
/// For the unary branch the local `load_guard` already covers the right
/// span: the backend's full body is read before the handler returns. For
/// the streaming branch a plain local would drop as soon as the SSE
/// `Response` is built, long before the backend stream actually finishes —
/// so the guard is moved into the stream itself and released only at EOF or
/// error, same as the Controller's `RecordingStream`.
pub async fn chat_completions(
    State(state): State<WorkerState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let load_guard = state.agent.increment_load();

    let url = format!("{}/v1/chat/completions", state.backend_url.trim_end_matches('/'));
    let upstream = match state.http.post(&url).json(&request).send().await {
        Ok(resp) => resp,
        Err(err) => {
            return (StatusCode::BAD_GATEWAY, format!("backend unreachable: {err}")).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    if request.stream {
        let tracked = LoadTrackedStream { inner: Box::pin(upstream.bytes_stream()), _guard: load_guard };
        let body = Body::from_stream(tracked);
        Response::builder()
            .status(status)
            .header("content-type", "text/event-stream")
            .body(body)
            .expect("static response parts are always valid")
    } else {
        match upstream.bytes().await {
            Ok(bytes) => Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(bytes))
                .expect("static response parts are always valid"),
            Err(err) => (StatusCode::BAD_GATEWAY, format!("backend read failed: {err}")).into_response(),
        }
    }
}

/// Forwards backend bytes unchanged; holds the load-counter guard until the
/// stream itself is dropped, which happens once the body is exhausted or
/// the connection ends — not when the response is first built.
struct LoadTrackedStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    _guard: LoadGuard,
}

impl Stream for LoadTrackedStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// `GET /health` — probes the backend; reports `current_load` alongside
/// status since the RegistrationAgent already tracks it.
pub async fn health(State(state): State<WorkerState>) -> Json<HealthResponse> {
    let url = format!("{}/health", state.backend_url.trim_end_matches('/'));
    match state.http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            Json(HealthResponse::healthy_with_load(state.agent.current_load()))
        }
        Ok(resp) => Json(HealthResponse::unhealthy(format!("backend status {}", resp.status()))),
        Err(err) => Json(HealthResponse::unhealthy(err.to_string())),
    }
}
