//! Client-facing proxy routes for all four protocol surfaces.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::any;
use bytes::Bytes;
use maki_core::engine::{Engine, Reply};
use maki_core::potluck::{PotluckStore, QuotaError};
use maki_core::{ProxyError, classify_request};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<Engine>,
    pub potluck: Arc<PotluckStore>,
}

pub fn proxy_router(engine: Arc<Engine>, potluck: Arc<PotluckStore>) -> Router {
    let state = ProxyState { engine, potluck };
    Router::new()
        .route("/v1/{*rest}", any(handle))
        .route("/v1beta/{*rest}", any(handle))
        .route("/api/chat", any(handle))
        .route("/api/generate", any(handle))
        .route("/api/tags", any(handle))
        .route("/api/show", any(handle))
        .route("/api/version", any(handle))
        .with_state(state)
}

async fn handle(State(state): State<ProxyState>, request: Request) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    // Potluck keys are quota-counted before any upstream work happens.
    if let Some(key) = potluck_key(&headers) {
        match state.potluck.check_and_count(&key, maki_common::epoch_ms()).await {
            Ok(_) => {}
            Err(QuotaError::UnknownKey) => {
                return plain_error(StatusCode::UNAUTHORIZED, "unknown client key");
            }
            Err(QuotaError::LimitExceeded) => {
                return plain_error(StatusCode::TOO_MANY_REQUESTS, "daily quota exhausted");
            }
        }
    }

    let body = match axum::body::to_bytes(request.into_body(), 32 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(err) => return plain_error(StatusCode::BAD_REQUEST, &format!("body read: {err}")),
    };

    let classified = match classify_request(&method, &path, body) {
        Ok(classified) => classified,
        Err(error) => return proxy_error(error),
    };
    reply_to_response(state.engine.handle(classified).await)
}

pub(crate) fn potluck_key(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    token
        .starts_with(maki_core::potluck::KEY_PREFIX)
        .then(|| token.to_string())
}

pub(crate) fn reply_to_response(reply: Reply) -> Response {
    match reply {
        Reply::Json {
            status,
            content_type,
            headers,
            body,
        } => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
                .header(header::CONTENT_TYPE, content_type);
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(body)).unwrap_or_default()
        }
        Reply::Stream { content_type, body } => {
            let stream = ReceiverStream::new(body).map(Ok::<Bytes, std::convert::Infallible>);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, "no-cache")
                .header("x-accel-buffering", "no")
                .body(Body::from_stream(stream))
                .unwrap_or_default()
        }
    }
}

pub(crate) fn proxy_error(error: ProxyError) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, error.content_type)
        .body(Body::from(error.body))
        .unwrap_or_default()
}

pub(crate) fn plain_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": { "message": message, "type": "gateway_error" } });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}
