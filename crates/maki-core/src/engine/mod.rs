//! Request dispatch: node selection, inline refresh, retry / fail-over and
//! streaming fan-through. The engine only speaks to upstreams through the
//! `UpstreamFamily` capability trait.

pub mod stream_bridge;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use maki_common::{ProviderKind, epoch_ms};
use maki_protocol::{Proto, claude, gemini, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, NativeRequest, Observation, PoolManager, RiskEngine,
    RiskSignal, UpstreamFamily, UpstreamResponse,
};
use maki_provider_core::risk::signal::classify_failure;
use maki_provider_impl::CredentialStore;
use maki_transform::chat::ollama2openai::OllamaMode;
use maki_transform::chat::{
    claude2openai, gemini2openai, ollama2openai, openai2claude, openai2gemini,
};
use maki_transform::models as model_transform;

use crate::classify::{ClientOp, ClientRequest};
use crate::compact;
use crate::routing::ModelRouter;
use stream_bridge::{BridgeOutcome, ClientEncoder, spawn_bridge};

const MODEL_LIST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);
const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub enum Reply {
    Json {
        status: u16,
        content_type: &'static str,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    Stream {
        content_type: &'static str,
        body: tokio::sync::mpsc::Receiver<Bytes>,
    },
}

impl Reply {
    fn ok_json(body: Bytes) -> Self {
        Reply::Json {
            status: 200,
            content_type: "application/json",
            headers: Vec::new(),
            body,
        }
    }

    fn error(proto: Proto, status: u16, message: &str) -> Self {
        Reply::Json {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: maki_transform::error_body(proto, status, message),
        }
    }
}

pub struct Engine {
    pools: Arc<PoolManager>,
    risk: Arc<RiskEngine>,
    families: HashMap<ProviderKind, Arc<dyn UpstreamFamily>>,
    store: Option<Arc<CredentialStore>>,
    router: ModelRouter,
    max_retries: u32,
    base_delay_ms: u64,
}

enum Attempt {
    Unary(UpstreamResponse),
    Stream(ByteStream),
    Failed(FamilyError),
}

impl Engine {
    pub fn new(
        pools: Arc<PoolManager>,
        risk: Arc<RiskEngine>,
        families: HashMap<ProviderKind, Arc<dyn UpstreamFamily>>,
        store: Option<Arc<CredentialStore>>,
        router: ModelRouter,
        max_retries: u32,
        base_delay_ms: u64,
    ) -> Self {
        Self {
            pools,
            risk,
            families,
            store,
            router,
            max_retries,
            base_delay_ms,
        }
    }

    pub async fn handle(&self, request: ClientRequest) -> Reply {
        let proto = request.proto;
        match request.op {
            ClientOp::Chat {
                request,
                stream,
                ollama_mode,
            } => self.handle_chat(proto, request, stream, ollama_mode).await,
            ClientOp::ModelsList => self.handle_models(proto).await,
            ClientOp::ModelsGet { model } => self.handle_model_get(proto, &model),
            ClientOp::OllamaTags => self.handle_models(Proto::Ollama).await,
            ClientOp::OllamaShow { model } => {
                let body = serde_json::to_vec(&model_transform::ollama_show(&model))
                    .unwrap_or_default();
                Reply::ok_json(Bytes::from(body))
            }
            ClientOp::OllamaVersion => Reply::ok_json(Bytes::from(
                serde_json::json!({ "version": GATEWAY_VERSION }).to_string(),
            )),
            ClientOp::Embeddings { model, body } => {
                self.handle_embeddings(proto, &model, body).await
            }
            ClientOp::Compact { messages } => {
                let output = compact::compress(messages, epoch_ms());
                Reply::ok_json(Bytes::from(
                    serde_json::to_vec(&output).unwrap_or_default(),
                ))
            }
        }
    }

    async fn handle_chat(
        &self,
        proto: Proto,
        mut request: openai::ChatCompletionRequest,
        stream: bool,
        ollama_mode: Option<OllamaMode>,
    ) -> Reply {
        let (kind, upstream_model) = self.router.resolve(&request.model);
        request.model = upstream_model;
        let Some(family) = self.families.get(&kind).cloned() else {
            return Reply::error(proto, 503, "no provider configured for model");
        };
        let native_proto = family.native_proto();
        let native = build_native(&request, native_proto, stream);

        let mut tried: HashSet<uuid::Uuid> = HashSet::new();
        let mut attempts = 0u32;
        let mut min_rate_limit_reset: Option<i64> = None;

        loop {
            let now = epoch_ms();
            let node = match self.pools.select_excluding(kind, &tried, now).await {
                Ok(node) => node,
                Err(_) => break,
            };
            tried.insert(node.uuid);
            attempts += 1;

            if let Some(fingerprint) = node.account_key() {
                self.risk
                    .note_identity(&self.pools, kind, node.uuid, &fingerprint, now)
                    .await;
            }

            let mut node = node;
            if node.needs_refresh || family.is_expiry_near(&node, now) {
                if !self.try_refresh(family.as_ref(), kind, &node).await {
                    if attempts > self.max_retries {
                        break;
                    }
                    continue;
                }
                node = self.pools.get(kind, node.uuid).await.unwrap_or(node);
            }

            let mut attempt = self.attempt(family.as_ref(), &node, &native, stream).await;

            // 401-class failures get one inline refresh + same-node retry.
            if let Attempt::Failed(error) = &attempt
                && is_auth_failure(error)
            {
                self.observe_failure(kind, &node, error).await;
                if self.try_refresh(family.as_ref(), kind, &node).await {
                    node = self.pools.get(kind, node.uuid).await.unwrap_or(node);
                    attempt = self.attempt(family.as_ref(), &node, &native, stream).await;
                } else if attempts > self.max_retries {
                    break;
                } else {
                    continue;
                }
            }

            match attempt {
                Attempt::Unary(response) => {
                    self.observe_success(kind, &node).await;
                    return self.unary_reply(proto, native_proto, ollama_mode, &request, response);
                }
                Attempt::Stream(upstream) => {
                    return self.stream_reply(
                        proto,
                        native_proto,
                        ollama_mode,
                        request.model.clone(),
                        kind,
                        node.uuid,
                        upstream,
                    );
                }
                Attempt::Failed(error) => {
                    // First-attempt auth failures were observed before the
                    // inline refresh; anything reaching this arm is new.
                    self.observe_failure(kind, &node, &error).await;
                    if let FamilyError::Http {
                        status: 429,
                        retry_after_secs,
                        ..
                    } = &error
                    {
                        let reset = retry_after_secs
                            .map(|secs| now + secs as i64 * 1_000)
                            .unwrap_or(now + 30_000);
                        min_rate_limit_reset = Some(match min_rate_limit_reset {
                            Some(existing) => existing.min(reset),
                            None => reset,
                        });
                    }
                    if attempts > self.max_retries {
                        break;
                    }
                    if self.base_delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(self.base_delay_ms))
                            .await;
                    }
                }
            }
        }

        match min_rate_limit_reset {
            Some(reset) => {
                let retry_after = ((reset - epoch_ms()).max(1_000) / 1_000).to_string();
                Reply::Json {
                    status: 429,
                    content_type: "application/json",
                    headers: vec![("retry-after".to_string(), retry_after)],
                    body: maki_transform::error_body(proto, 429, "all credentials rate limited"),
                }
            }
            None => Reply::error(proto, 503, "no healthy credential available"),
        }
    }

    async fn attempt(
        &self,
        family: &dyn UpstreamFamily,
        node: &CredentialNode,
        native: &NativeRequest,
        stream: bool,
    ) -> Attempt {
        if stream {
            match family.stream(node, native).await {
                Ok(upstream) => Attempt::Stream(upstream),
                Err(error) => Attempt::Failed(error),
            }
        } else {
            match family.unary(node, native).await {
                Ok(response) => Attempt::Unary(response),
                Err(error) => Attempt::Failed(error),
            }
        }
    }

    async fn observe_success(&self, kind: ProviderKind, node: &CredentialNode) {
        self.risk
            .observe(
                &self.pools,
                kind,
                node.uuid,
                RiskSignal::Success,
                Observation {
                    reason_code: "http_200".to_string(),
                    http_status: Some(200),
                    ..Observation::default()
                },
                epoch_ms(),
            )
            .await;
    }

    async fn observe_failure(&self, kind: ProviderKind, node: &CredentialNode, error: &FamilyError) {
        let (signal, reason_code, http_status, error_snippet) = classify_failure(error);
        let header_reset_ms = match error {
            FamilyError::Http {
                retry_after_secs: Some(secs),
                ..
            } => Some(epoch_ms() + *secs as i64 * 1_000),
            _ => None,
        };
        self.risk
            .observe(
                &self.pools,
                kind,
                node.uuid,
                signal,
                Observation {
                    reason_code,
                    http_status,
                    error_snippet,
                    header_reset_ms,
                },
                epoch_ms(),
            )
            .await;
    }

    /// Refresh a node's tokens, propagate to siblings, persist, and mark the
    /// node healthy. Returns false when the refresh definitively failed.
    async fn try_refresh(
        &self,
        family: &dyn UpstreamFamily,
        kind: ProviderKind,
        node: &CredentialNode,
    ) -> bool {
        match family.refresh(node).await {
            Ok(tokens) => {
                self.pools.apply_refresh(kind, node.uuid, &tokens).await;
                if let Some(store) = &self.store
                    && let Some(updated) = self.pools.get(kind, node.uuid).await
                    && let Err(err) = store.persist_tokens(&updated)
                {
                    tracing::warn!(error = %err, "token persist failed");
                }
                self.risk
                    .observe(
                        &self.pools,
                        kind,
                        node.uuid,
                        RiskSignal::ProviderMarkedHealthy,
                        Observation::reason("refresh_ok"),
                        epoch_ms(),
                    )
                    .await;
                true
            }
            Err(error) => {
                let (signal, reason, status, snippet) = classify_failure(&error);
                let signal = if signal == RiskSignal::NetworkTransient {
                    signal
                } else {
                    RiskSignal::AuthInvalid
                };
                self.risk
                    .observe(
                        &self.pools,
                        kind,
                        node.uuid,
                        signal,
                        Observation {
                            reason_code: format!("refresh_{reason}"),
                            http_status: status,
                            error_snippet: snippet,
                            header_reset_ms: None,
                        },
                        epoch_ms(),
                    )
                    .await;
                false
            }
        }
    }

    fn unary_reply(
        &self,
        proto: Proto,
        native_proto: Proto,
        ollama_mode: Option<OllamaMode>,
        request: &openai::ChatCompletionRequest,
        response: UpstreamResponse,
    ) -> Reply {
        let created = epoch_ms() / 1_000;
        let canonical: openai::ChatCompletionResponse = match native_proto {
            Proto::OpenAi | Proto::Ollama => match serde_json::from_slice(&response.body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    return Reply::error(proto, 502, &format!("upstream decode: {err}"));
                }
            },
            Proto::Claude => match serde_json::from_slice::<claude::MessagesResponse>(
                &response.body,
            ) {
                Ok(parsed) => openai2claude::response(parsed, created),
                Err(err) => {
                    return Reply::error(proto, 502, &format!("upstream decode: {err}"));
                }
            },
            Proto::Gemini => match serde_json::from_slice::<gemini::GenerateContentResponse>(
                &response.body,
            ) {
                Ok(parsed) => openai2gemini::response(
                    parsed,
                    &request.model,
                    &format!("chatcmpl-{created:x}"),
                    created,
                ),
                Err(err) => {
                    return Reply::error(proto, 502, &format!("upstream decode: {err}"));
                }
            },
        };

        let body = match proto {
            Proto::OpenAi => serde_json::to_vec(&canonical),
            Proto::Claude => serde_json::to_vec(&claude2openai::response(canonical)),
            Proto::Gemini => serde_json::to_vec(&gemini2openai::response(canonical)),
            Proto::Ollama => match ollama_mode.unwrap_or(OllamaMode::Chat) {
                OllamaMode::Chat => serde_json::to_vec(&ollama2openai::chat_response(canonical)),
                OllamaMode::Generate => {
                    serde_json::to_vec(&ollama2openai::generate_response(canonical))
                }
            },
        };
        match body {
            Ok(bytes) => Reply::ok_json(Bytes::from(bytes)),
            Err(err) => Reply::error(proto, 500, &format!("response encode: {err}")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn stream_reply(
        &self,
        proto: Proto,
        native_proto: Proto,
        ollama_mode: Option<OllamaMode>,
        model: String,
        kind: ProviderKind,
        uuid: uuid::Uuid,
        upstream: ByteStream,
    ) -> Reply {
        let created = epoch_ms() / 1_000;
        let (body, handle) =
            spawn_bridge(native_proto, proto, ollama_mode, model, upstream, created);

        let pools = Arc::clone(&self.pools);
        let risk = Arc::clone(&self.risk);
        tokio::spawn(async move {
            match handle.await {
                Ok(BridgeOutcome::Completed) => {
                    risk.observe(
                        &pools,
                        kind,
                        uuid,
                        RiskSignal::Success,
                        Observation::reason("stream_complete"),
                        epoch_ms(),
                    )
                    .await;
                }
                Ok(BridgeOutcome::UpstreamError(error)) => {
                    let (signal, reason_code, http_status, error_snippet) =
                        classify_failure(&error);
                    risk.observe(
                        &pools,
                        kind,
                        uuid,
                        signal,
                        Observation {
                            reason_code,
                            http_status,
                            error_snippet,
                            header_reset_ms: None,
                        },
                        epoch_ms(),
                    )
                    .await;
                }
                // Client cancellation carries no penalty.
                Ok(BridgeOutcome::ClientGone) | Err(_) => {}
            }
        });

        Reply::Stream {
            content_type: ClientEncoder::content_type(proto),
            body,
        }
    }

    /// Aggregate model lists from every pool in parallel, namespacing each
    /// id as `<provider>:<id>`.
    async fn handle_models(&self, proto: Proto) -> Reply {
        let mut tasks = Vec::new();
        for (kind, family) in &self.families {
            let kind = *kind;
            let family = family.clone();
            let pools = Arc::clone(&self.pools);
            tasks.push(tokio::spawn(async move {
                let nodes = pools.list(kind).await;
                let node = nodes.iter().find(|n| !n.is_disabled)?;
                match tokio::time::timeout(MODEL_LIST_TIMEOUT, family.list_models(node)).await {
                    Ok(Ok(models)) => Some((kind, models)),
                    _ => None,
                }
            }));
        }

        let mut data = Vec::new();
        for task in tasks {
            if let Ok(Some((kind, models))) = task.await {
                for model in models {
                    data.push(openai::Model {
                        id: format!("{}:{}", kind.slug(), model.id),
                        ..model
                    });
                }
            }
        }
        data.sort_by(|a, b| a.id.cmp(&b.id));
        let list = openai::ModelList {
            object: "list".to_string(),
            data,
        };

        let body = match proto {
            Proto::OpenAi => serde_json::to_vec(&list),
            Proto::Claude => serde_json::to_vec(&model_transform::openai_to_claude(list)),
            Proto::Gemini => serde_json::to_vec(&model_transform::openai_to_gemini(list)),
            Proto::Ollama => serde_json::to_vec(&model_transform::openai_to_ollama_tags(list)),
        };
        Reply::ok_json(Bytes::from(body.unwrap_or_default()))
    }

    fn handle_model_get(&self, _proto: Proto, model: &str) -> Reply {
        let (kind, upstream_model) = self.router.resolve(model);
        let body = serde_json::json!({
            "id": model,
            "object": "model",
            "created": epoch_ms() / 1_000,
            "owned_by": kind.slug(),
            "root": upstream_model,
        });
        Reply::ok_json(Bytes::from(body.to_string()))
    }

    /// Verbatim JSON passthrough; only families that expose a raw surface
    /// (custom-compatible upstreams) accept it.
    async fn handle_embeddings(
        &self,
        proto: Proto,
        model: &str,
        body: serde_json::Value,
    ) -> Reply {
        let (kind, _) = self.router.resolve(model);
        let Some(family) = self.families.get(&kind).cloned() else {
            return Reply::error(proto, 503, "no provider configured for model");
        };
        let native = NativeRequest::Raw {
            path: "/v1/embeddings".to_string(),
            body,
        };
        let now = epoch_ms();
        let node = match self.pools.select(kind, now).await {
            Ok(node) => node,
            Err(_) => return Reply::error(proto, 503, "no healthy credential available"),
        };
        match family.unary(&node, &native).await {
            Ok(response) => {
                self.observe_success(kind, &node).await;
                Reply::ok_json(response.body)
            }
            Err(error) => {
                self.observe_failure(kind, &node, &error).await;
                Reply::error(proto, 502, &error.to_string())
            }
        }
    }
}

fn is_auth_failure(error: &FamilyError) -> bool {
    matches!(
        classify_failure(error).0,
        RiskSignal::AuthInvalid
    )
}

fn build_native(
    request: &openai::ChatCompletionRequest,
    native_proto: Proto,
    stream: bool,
) -> NativeRequest {
    let mut request = request.clone();
    request.stream = Some(stream);
    match native_proto {
        Proto::OpenAi | Proto::Ollama => NativeRequest::OpenAi(request),
        Proto::Claude => NativeRequest::Claude(openai2claude::request(request)),
        Proto::Gemini => {
            let model = request.model.clone();
            NativeRequest::Gemini {
                model,
                body: openai2gemini::request(request),
                stream,
            }
        }
    }
}
