//! Admin surface: provider/node management and OAuth acquisition. All
//! routes authenticate with a bearer token from the token store.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use maki_common::{ProviderKind, epoch_ms};
use maki_core::potluck::PotluckStore;
use maki_provider_core::{
    CredentialNode, Observation, PoolManager, RiskEngine, RiskSignal,
};
use maki_provider_impl::oauth::loopback::{CallbackOutcome, wait_for_callback};
use maki_provider_impl::{AuthManager, PendingPoll};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::proxy::plain_error;

const LOOPBACK_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AdminState {
    pub pools: Arc<PoolManager>,
    pub risk: Arc<RiskEngine>,
    pub auth: Arc<AuthManager>,
    pub potluck: Arc<PotluckStore>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/providers/{kind}", get(list_nodes))
        .route("/providers/{kind}/generate-auth-url", post(generate_auth_url))
        .route("/providers/{kind}/{uuid}/disable", post(disable_node))
        .route("/providers/{kind}/{uuid}/enable", post(enable_node))
        .route("/providers/{kind}/{uuid}/release", post(release_node))
        .route("/providers/{kind}/{uuid}", delete(delete_node))
        .route("/oauth/callback", post(oauth_callback))
        .route("/oauth/poll", post(oauth_poll))
        .with_state(state)
}

async fn authorize(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw).trim());
    match token {
        Some(token) if state.potluck.is_admin(token).await => Ok(()),
        _ => Err(plain_error(StatusCode::UNAUTHORIZED, "admin token required")),
    }
}

fn parse_kind(raw: &str) -> Result<ProviderKind, Response> {
    ProviderKind::parse(raw)
        .ok_or_else(|| plain_error(StatusCode::NOT_FOUND, "unknown provider type"))
}

/// Public node view: secrets reduced to identity fields.
fn node_summary(node: &CredentialNode) -> serde_json::Value {
    json!({
        "uuid": node.uuid,
        "provider": node.provider,
        "state": node.state,
        "priority": node.priority,
        "is_healthy": node.is_healthy,
        "is_disabled": node.is_disabled,
        "needs_refresh": node.needs_refresh,
        "usage_count": node.usage_count,
        "error_count": node.error_count,
        "auth_failure_streak": node.auth_failure_streak,
        "last_used_ms": node.last_used_ms,
        "cooldown_until_ms": node.cooldown_until_ms,
        "expires_at_ms": node.expires_at_ms,
        "email": node.secrets.email,
        "account_id": node.secrets.account_id,
    })
}

async fn list_providers(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    let mut out = Vec::new();
    for kind in ProviderKind::ALL {
        let nodes = state.pools.list(kind).await;
        let healthy = nodes.iter().filter(|n| n.is_healthy && !n.is_disabled).count();
        out.push(json!({
            "provider": kind,
            "nodes": nodes.len(),
            "healthy": healthy,
        }));
    }
    json_response(StatusCode::OK, json!({ "providers": out }))
}

async fn list_nodes(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let nodes: Vec<_> = state
        .pools
        .list(kind)
        .await
        .iter()
        .map(node_summary)
        .collect();
    json_response(StatusCode::OK, json!({ "nodes": nodes }))
}

#[derive(Debug, Default, Deserialize)]
struct AuthUrlRequest {
    #[serde(default)]
    mode: Option<String>,
}

async fn generate_auth_url(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    body: Option<Json<AuthUrlRequest>>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let mode = body
        .map(|Json(body)| body.mode.unwrap_or_default())
        .unwrap_or_default();

    if mode == "device" {
        return match state.auth.begin_device(kind).await {
            Ok(maki_provider_impl::AuthStart::Device {
                verification_uri,
                user_code,
                interval_secs,
                state: session,
            }) => json_response(
                StatusCode::OK,
                json!({
                    "mode": "device",
                    "verification_uri": verification_uri,
                    "user_code": user_code,
                    "interval": interval_secs,
                    "state": session,
                }),
            ),
            Ok(_) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, "unexpected auth mode"),
            Err(err) => plain_error(StatusCode::BAD_GATEWAY, &err.to_string()),
        };
    }

    match state.auth.begin(kind).await {
        Ok(maki_provider_impl::AuthStart::Redirect { auth_url, state: session }) => {
            spawn_loopback_session(&state, kind, session.clone());
            json_response(
                StatusCode::OK,
                json!({ "mode": "authorization_code", "auth_url": auth_url, "state": session }),
            )
        }
        Ok(_) => plain_error(StatusCode::INTERNAL_SERVER_ERROR, "unexpected auth mode"),
        Err(err) => plain_error(StatusCode::BAD_GATEWAY, &err.to_string()),
    }
}

/// For providers with a loopback redirect, run the ephemeral listener and
/// finish the session server-side when the browser comes back.
fn spawn_loopback_session(state: &AdminState, kind: ProviderKind, session: String) {
    let Some((port, path)) = state.auth.loopback_target(kind) else {
        return;
    };
    let auth = state.auth.clone();
    let pools = state.pools.clone();
    tokio::spawn(async move {
        match wait_for_callback(port, &path, &session, LOOPBACK_DEADLINE).await {
            Ok(CallbackOutcome::Code(code)) => match auth.complete(&session, &code).await {
                Ok(node) => {
                    tracing::info!(provider = %kind, uuid = %node.uuid, "credential linked");
                    pools.insert(node).await;
                }
                Err(err) => tracing::warn!(error = %err, "oauth exchange failed"),
            },
            Ok(CallbackOutcome::Denied(detail)) => {
                tracing::warn!(detail = %detail, "oauth denied by user");
            }
            Ok(CallbackOutcome::Timeout) => {
                tracing::info!(provider = %kind, "oauth session timed out");
            }
            Err(err) => tracing::warn!(error = %err, "oauth callback listener failed"),
        }
    });
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    state: String,
    code: String,
}

/// Cloud-redirect flows deliver the code back through here.
async fn oauth_callback(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(body): Json<CallbackBody>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    match state.auth.complete(&body.state, &body.code).await {
        Ok(node) => {
            let summary = node_summary(&node);
            state.pools.insert(node).await;
            json_response(StatusCode::OK, json!({ "linked": summary }))
        }
        Err(err) => plain_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct PollBody {
    state: String,
}

async fn oauth_poll(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(body): Json<PollBody>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    match state.auth.poll_device(&body.state).await {
        Ok(PendingPoll::Pending { retry_after_secs }) => json_response(
            StatusCode::ACCEPTED,
            json!({ "status": "pending", "retry_after": retry_after_secs }),
        ),
        Ok(PendingPoll::Complete(node)) => {
            let summary = node_summary(&node);
            state.pools.insert(*node).await;
            json_response(StatusCode::OK, json!({ "linked": summary }))
        }
        Err(err) => plain_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn node_action(
    state: &AdminState,
    headers: &HeaderMap,
    kind: &str,
    uuid: &str,
    signal: RiskSignal,
    reason: &str,
) -> Response {
    if let Err(denied) = authorize(state, headers).await {
        return denied;
    }
    let kind = match parse_kind(kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let Ok(uuid) = Uuid::parse_str(uuid) else {
        return plain_error(StatusCode::BAD_REQUEST, "invalid uuid");
    };
    if state.pools.get(kind, uuid).await.is_none() {
        return plain_error(StatusCode::NOT_FOUND, "unknown node");
    }
    state
        .risk
        .observe(
            &state.pools,
            kind,
            uuid,
            signal,
            Observation::reason(reason),
            epoch_ms(),
        )
        .await;
    let node = state.pools.get(kind, uuid).await;
    json_response(
        StatusCode::OK,
        json!({ "node": node.as_ref().map(node_summary) }),
    )
}

async fn disable_node(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path((kind, uuid)): Path<(String, String)>,
) -> Response {
    node_action(&state, &headers, &kind, &uuid, RiskSignal::ProviderDisabled, "admin_disable").await
}

async fn enable_node(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path((kind, uuid)): Path<(String, String)>,
) -> Response {
    node_action(&state, &headers, &kind, &uuid, RiskSignal::ProviderEnabled, "admin_enable").await
}

async fn release_node(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path((kind, uuid)): Path<(String, String)>,
) -> Response {
    node_action(&state, &headers, &kind, &uuid, RiskSignal::ManualRelease, "admin_release").await
}

async fn delete_node(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path((kind, uuid)): Path<(String, String)>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers).await {
        return denied;
    }
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let Ok(uuid) = Uuid::parse_str(&uuid) else {
        return plain_error(StatusCode::BAD_REQUEST, "invalid uuid");
    };
    let removed = state.pools.remove(kind, uuid).await;
    json_response(StatusCode::OK, json!({ "removed": removed }))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(value.to_string()))
        .unwrap_or_default()
}
