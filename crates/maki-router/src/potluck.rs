//! Potluck quota-key surface: admin CRUD plus the `maki_`-key-facing
//! usage/upload/import endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use maki_common::{ProviderKind, epoch_ms};
use maki_core::potluck::{PotluckStore, QuotaError};
use maki_provider_core::{CredentialNode, CredentialSecrets, PoolManager};
use maki_provider_impl::CredentialStore;
use serde::Deserialize;
use serde_json::json;

use crate::proxy::{plain_error, potluck_key};

#[derive(Clone)]
pub struct PotluckRouterState {
    pub potluck: Arc<PotluckStore>,
    pub pools: Arc<PoolManager>,
    pub store: Arc<CredentialStore>,
}

pub fn potluck_router(state: PotluckRouterState) -> Router {
    Router::new()
        .route("/api/potluck", get(list_keys).post(create_key))
        .route("/api/potluck/{key}", delete(delete_key))
        .route("/api/potluckuser/usage", get(usage))
        .route("/upload", post(upload_credential))
        .route("/kiro/batch-import-tokens", post(batch_import_tokens))
        .route("/kiro/import-aws-credentials", post(import_aws_credentials))
        .with_state(state)
}

async fn require_admin(state: &PotluckRouterState, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw).trim());
    match token {
        Some(token) if state.potluck.is_admin(token).await => Ok(()),
        _ => Err(plain_error(StatusCode::UNAUTHORIZED, "admin token required")),
    }
}

/// Resolve and rate-count the caller's `maki_` key.
async fn require_client_key(
    state: &PotluckRouterState,
    headers: &HeaderMap,
) -> Result<String, Response> {
    let Some(key) = potluck_key(headers) else {
        return Err(plain_error(StatusCode::UNAUTHORIZED, "maki_ client key required"));
    };
    match state.potluck.check_and_count(&key, epoch_ms()).await {
        Ok(_) => Ok(key),
        Err(QuotaError::UnknownKey) => {
            Err(plain_error(StatusCode::UNAUTHORIZED, "unknown client key"))
        }
        Err(QuotaError::LimitExceeded) => Err(plain_error(
            StatusCode::TOO_MANY_REQUESTS,
            "daily quota exhausted",
        )),
    }
}

async fn list_keys(State(state): State<PotluckRouterState>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_admin(&state, &headers).await {
        return denied;
    }
    let keys = state.potluck.list_keys().await;
    json_response(StatusCode::OK, json!({ "keys": keys }))
}

#[derive(Debug, Deserialize)]
struct CreateKeyBody {
    name: String,
    #[serde(default)]
    daily_limit: Option<u64>,
}

async fn create_key(
    State(state): State<PotluckRouterState>,
    headers: HeaderMap,
    Json(body): Json<CreateKeyBody>,
) -> Response {
    if let Err(denied) = require_admin(&state, &headers).await {
        return denied;
    }
    let key = state
        .potluck
        .create_key(&body.name, body.daily_limit, epoch_ms())
        .await;
    json_response(StatusCode::CREATED, json!({ "key": key }))
}

async fn delete_key(
    State(state): State<PotluckRouterState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Err(denied) = require_admin(&state, &headers).await {
        return denied;
    }
    let removed = state.potluck.delete_key(&key).await;
    json_response(StatusCode::OK, json!({ "removed": removed }))
}

async fn usage(State(state): State<PotluckRouterState>, headers: HeaderMap) -> Response {
    let Some(key) = potluck_key(&headers) else {
        return plain_error(StatusCode::UNAUTHORIZED, "maki_ client key required");
    };
    match state.potluck.usage(&key, epoch_ms()).await {
        Some(usage) => json_response(StatusCode::OK, serde_json::to_value(usage).unwrap_or_default()),
        None => plain_error(StatusCode::UNAUTHORIZED, "unknown client key"),
    }
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    provider: String,
    #[serde(flatten)]
    credential: serde_json::Value,
}

/// Upload one credential file body; it is persisted under the provider's
/// directory and linked into the pool.
async fn upload_credential(
    State(state): State<PotluckRouterState>,
    headers: HeaderMap,
    Json(body): Json<UploadBody>,
) -> Response {
    if let Err(denied) = require_client_key(&state, &headers).await {
        return denied;
    }
    let Some(kind) = ProviderKind::parse(&body.provider) else {
        return plain_error(StatusCode::BAD_REQUEST, "unknown provider type");
    };
    match node_from_value(kind, &body.credential) {
        Some(node) => link_node(&state, node).await,
        None => plain_error(StatusCode::BAD_REQUEST, "credential body missing tokens"),
    }
}

#[derive(Debug, Deserialize)]
struct KiroTokenImport {
    #[serde(alias = "accessToken")]
    access_token: Option<String>,
    #[serde(alias = "refreshToken")]
    refresh_token: String,
    #[serde(alias = "accountId")]
    account_id: Option<String>,
    email: Option<String>,
    region: Option<String>,
}

async fn batch_import_tokens(
    State(state): State<PotluckRouterState>,
    headers: HeaderMap,
    Json(entries): Json<Vec<KiroTokenImport>>,
) -> Response {
    if let Err(denied) = require_client_key(&state, &headers).await {
        return denied;
    }
    let mut linked = Vec::new();
    for entry in entries {
        let mut node =
            CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), epoch_ms());
        node.secrets = CredentialSecrets {
            access_token: entry.access_token,
            refresh_token: Some(entry.refresh_token),
            account_id: entry.account_id,
            email: entry.email,
            region: entry.region,
            auth_method: Some("token-import".to_string()),
            ..CredentialSecrets::default()
        };
        if let Err(err) = state.store.persist_new(&node) {
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
        linked.push(node.uuid);
        state.pools.insert(node).await;
    }
    json_response(StatusCode::OK, json!({ "linked": linked }))
}

#[derive(Debug, Deserialize)]
struct AwsCredentialImport {
    #[serde(alias = "clientId")]
    client_id: String,
    #[serde(alias = "clientSecret")]
    client_secret: String,
    #[serde(alias = "refreshToken")]
    refresh_token: String,
    region: Option<String>,
    #[serde(alias = "accountId")]
    account_id: Option<String>,
}

async fn import_aws_credentials(
    State(state): State<PotluckRouterState>,
    headers: HeaderMap,
    Json(body): Json<AwsCredentialImport>,
) -> Response {
    if let Err(denied) = require_client_key(&state, &headers).await {
        return denied;
    }
    let mut node =
        CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), epoch_ms());
    node.secrets = CredentialSecrets {
        refresh_token: Some(body.refresh_token),
        client_id: Some(body.client_id),
        client_secret: Some(body.client_secret),
        region: body.region,
        account_id: body.account_id,
        auth_method: Some("builder-id".to_string()),
        ..CredentialSecrets::default()
    };
    node.needs_refresh = true;
    link_node(&state, node).await
}

fn node_from_value(kind: ProviderKind, value: &serde_json::Value) -> Option<CredentialNode> {
    let get = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let access_token = get("access_token").or_else(|| get("accessToken"));
    let refresh_token = get("refresh_token").or_else(|| get("refreshToken"));
    let api_key = get("api_key").or_else(|| get("apiKey"));
    if access_token.is_none() && refresh_token.is_none() && api_key.is_none() {
        return None;
    }
    let mut node = CredentialNode::new(kind, CredentialSecrets::default(), epoch_ms());
    node.secrets = CredentialSecrets {
        access_token,
        refresh_token,
        api_key,
        id_token: get("id_token"),
        client_id: get("client_id").or_else(|| get("clientId")),
        client_secret: get("client_secret").or_else(|| get("clientSecret")),
        region: get("region"),
        account_id: get("account_id").or_else(|| get("accountId")),
        email: get("email"),
        machine_id: get("machine_id").or_else(|| get("machineId")),
        agent_id: get("LETTA_AGENT_ID").or_else(|| get("agent_id")),
        auth_method: get("auth_method").or_else(|| get("authMethod")),
        base_url: get("base_url").or_else(|| get("baseUrl")),
    };
    Some(node)
}

async fn link_node(state: &PotluckRouterState, node: CredentialNode) -> Response {
    if let Err(err) = state.store.persist_new(&node) {
        return plain_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
    let uuid = node.uuid;
    state.pools.insert(node).await;
    json_response(StatusCode::OK, json!({ "linked": uuid }))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(value.to_string()))
        .unwrap_or_default()
}
