//! Axum handlers for the Controller's public and internal routes.

use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use dispatch_fabric::error::{ErrorBody, FabricError};
use dispatch_fabric::router::Router;
use dispatch_fabric::schema::{
    ChatCompletionRequest, HealthResponse, HeartbeatRequest, HeartbeatResponse, ModelsResponse,
    RegisterRequest, RegisterResponse, WorkerListResponse,
};
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

/// `FabricError` and `IntoResponse` are both foreign to this crate, so this
/// is a plain function rather than a trait impl — implementing a foreign
/// trait for a foreign type isn't allowed here.
fn error_response(err: FabricError) -> Response {
    let status = err.status_code();
    let body = ErrorBody::from(&err);
    (status, Json(body)).into_response()
}

/// `POST /v1/chat/completions` — select a worker, forward the request
/// unmodified, and proxy unary or streaming responses back to the caller.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let worker = match state.router.select(&request.model).await {
        Ok(worker) => worker,
        Err(err) => return error_response(err),
    };

    let backend_url = format!("{}/v1/chat/completions", worker.endpoint.trim_end_matches('/'));
    let upstream = state.http.post(&backend_url).json(&request).send().await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(err) => {
            state.router.record_failure(&worker.worker_id).await;
            let body = ErrorBody::from(&FabricError::Transport(err.to_string()));
            return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
        }
    };

    let status = upstream.status();

    if request.stream {
        if !status.is_success() {
            state.router.record_failure(&worker.worker_id).await;
            let text = upstream.text().await.unwrap_or_default();
            let body = ErrorBody::from(&FabricError::Upstream { status: status.as_u16(), body: text });
            return (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), Json(body))
                .into_response();
        }
        let recording = RecordingStream {
            inner: Box::pin(upstream.bytes_stream()),
            router: state.router.clone(),
            worker_id: worker.worker_id.clone(),
            done: false,
        };
        let body = Body::from_stream(recording);
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(body)
            .expect("static response parts are always valid");
    }

    if status.is_success() {
        state.router.record_success(&worker.worker_id).await;
        let bytes = match upstream.bytes().await {
            Ok(b) => b,
            Err(err) => {
                let body = ErrorBody::from(&FabricError::Transport(err.to_string()));
                return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
            }
        };
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(bytes))
            .expect("static response parts are always valid")
    } else {
        state.router.record_failure(&worker.worker_id).await;
        let text = upstream.text().await.unwrap_or_default();
        let body = ErrorBody::from(&FabricError::Upstream { status: status.as_u16(), body: text });
        (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), Json(body)).into_response()
    }
}

/// Forwards backend bytes to the client unchanged, then records the stream's
/// outcome against the worker's breaker on EOF or mid-stream error — exactly
/// once, off the request's own task so the byte pass-through is never
/// delayed by the registry lock.
struct RecordingStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    router: Router,
    worker_id: String,
    done: bool,
}

impl Stream for RecordingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                let router = this.router.clone();
                let worker_id = this.worker_id.clone();
                tokio::spawn(async move { router.record_failure(&worker_id).await });
                Poll::Ready(Some(Err(std::io::Error::new(std::io::ErrorKind::Other, err))))
            }
            Poll::Ready(None) => {
                this.done = true;
                let router = this.router.clone();
                let worker_id = this.worker_id.clone();
                tokio::spawn(async move { router.record_success(&worker_id).await });
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// `GET /v1/models` — distinct model ids currently served by at least one
/// registered worker.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse { models: state.registry.model_ids().await })
}

/// `GET /health` — 200 unconditionally.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// `POST /internal/workers/register` — 201 on success, 409 on duplicate.
pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match state
        .registry
        .register(request.worker_id.clone(), request.model_id, request.endpoint, request.capacity, request.metadata)
        .await
    {
        Ok(()) => (StatusCode::CREATED, Json(RegisterResponse::registered(request.worker_id))).into_response(),
        Err(err) => error_response(err),
    }
}

/// `POST /internal/workers/heartbeat` — 200 on success, 404 on unknown
/// worker.
pub async fn heartbeat(State(state): State<AppState>, Json(request): Json<HeartbeatRequest>) -> Response {
    match state.registry.heartbeat(&request.worker_id, request.current_load, request.status).await {
        Ok(()) => (StatusCode::OK, Json(HeartbeatResponse::default())).into_response(),
        Err(err) => error_response(err),
    }
}

/// `GET /internal/workers?model_id=…` — registry listing, optionally
/// filtered.
pub async fn list_workers(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<WorkerListResponse> {
    let model_id = params.get("model_id").map(String::as_str);
    let records = state.registry.list(model_id).await;
    Json(WorkerListResponse::from(records))
}

/// `DELETE /internal/workers/{id}?force=…` — 200 on success, 404 on unknown.
pub async fn deregister_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let force = params.get("force").map(|v| v == "true").unwrap_or(false);
    match state.registry.unregister(&worker_id, force).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}
