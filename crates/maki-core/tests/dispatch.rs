use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use maki_common::{ProviderKind, epoch_ms};
use maki_core::classify::{ClientOp, ClientRequest};
use maki_core::engine::{Engine, Reply};
use maki_core::routing::ModelRouter;
use maki_protocol::{Proto, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, CredentialSecrets, FamilyError, FamilyResult, LifecycleState,
    NativeRequest, PolicyMode, PoolManager, PoolTuning, RefreshedTokens, RiskEngine, RiskHub,
    RiskSettings, RiskSignal, RotationPolicy, RotationStrategy, StreamItem, UpstreamFamily,
    UpstreamResponse,
};
use tokio::sync::Mutex;
use uuid::Uuid;

enum Outcome {
    Unary(Result<&'static str, FamilyError>),
    Stream(Result<Vec<StreamItem>, FamilyError>),
}

struct MockFamily {
    script: Mutex<VecDeque<Outcome>>,
    refreshes: Mutex<VecDeque<FamilyResult<RefreshedTokens>>>,
    calls: Mutex<Vec<Uuid>>,
}

impl MockFamily {
    fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            refreshes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    async fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl UpstreamFamily for MockFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn native_proto(&self) -> Proto {
        Proto::OpenAi
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        _request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        self.calls.lock().await.push(node.uuid);
        match self.script.lock().await.pop_front() {
            Some(Outcome::Unary(Ok(body))) => Ok(UpstreamResponse {
                status: 200,
                body: Bytes::from_static(body.as_bytes()),
            }),
            Some(Outcome::Unary(Err(error))) => Err(error),
            other => panic!("unexpected unary call: scripted {}", other.is_some()),
        }
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        _request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        self.calls.lock().await.push(node.uuid);
        match self.script.lock().await.pop_front() {
            Some(Outcome::Stream(Ok(items))) => {
                let (tx, rx) = tokio::sync::mpsc::channel(items.len().max(1));
                for item in items {
                    tx.try_send(item).expect("channel capacity");
                }
                Ok(rx)
            }
            Some(Outcome::Stream(Err(error))) => Err(error),
            other => panic!("unexpected stream call: scripted {}", other.is_some()),
        }
    }

    async fn list_models(&self, _node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        Ok(Vec::new())
    }

    async fn refresh(&self, _node: &CredentialNode) -> FamilyResult<RefreshedTokens> {
        self.refreshes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(RefreshedTokens::default()))
    }

    fn is_expiry_near(&self, _node: &CredentialNode, _now_ms: i64) -> bool {
        false
    }
}

struct Harness {
    pools: Arc<PoolManager>,
    engine: Engine,
    family: Arc<MockFamily>,
    node_a: Uuid,
    node_b: Uuid,
}

async fn harness(script: Vec<Outcome>) -> Harness {
    let tuning = PoolTuning {
        strategy: RotationStrategy::LeastUsed,
        ..PoolTuning::default()
    };
    let pools = Arc::new(PoolManager::new(
        HashMap::new(),
        tuning,
        RotationPolicy::default(),
    ));

    let mut node_a = CredentialNode::new(ProviderKind::Custom, CredentialSecrets::default(), 0);
    node_a.priority = 10;
    node_a.secrets.api_key = Some("key-a".to_string());
    node_a.secrets.base_url = Some("http://upstream-a".to_string());
    let mut node_b = CredentialNode::new(ProviderKind::Custom, CredentialSecrets::default(), 0);
    node_b.priority = 100;
    node_b.secrets.api_key = Some("key-b".to_string());
    node_b.secrets.base_url = Some("http://upstream-b".to_string());
    let (a, b) = (node_a.uuid, node_b.uuid);
    pools.insert(node_a).await;
    pools.insert(node_b).await;

    let risk = Arc::new(RiskEngine::new(
        RiskSettings {
            mode: PolicyMode::EnforceStrict,
            ..RiskSettings::default()
        },
        RiskHub::new(128),
    ));

    let family = MockFamily::new(script);
    let mut families: HashMap<ProviderKind, Arc<dyn UpstreamFamily>> = HashMap::new();
    families.insert(ProviderKind::Custom, family.clone());

    let engine = Engine::new(
        pools.clone(),
        risk,
        families,
        None,
        ModelRouter::new(ProviderKind::Custom),
        3,
        0,
    );
    Harness {
        pools,
        engine,
        family,
        node_a: a,
        node_b: b,
    }
}

fn chat_request(stream: bool) -> ClientRequest {
    ClientRequest {
        proto: Proto::OpenAi,
        op: ClientOp::Chat {
            request: openai::ChatCompletionRequest {
                model: "some-model".to_string(),
                messages: vec![openai::ChatMessage::text(openai::Role::User, "hi")],
                temperature: None,
                top_p: None,
                max_tokens: None,
                stop: None,
                stream: Some(stream),
                tools: None,
                tool_choice: None,
                user: None,
            },
            stream,
            ollama_mode: None,
        },
    }
}

const OK_RESPONSE: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","created":1,"model":"some-model","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#;

fn http_error(status: u16) -> FamilyError {
    FamilyError::Http {
        status,
        body: format!("status {status}"),
        retry_after_secs: if status == 429 { Some(60) } else { None },
    }
}

async fn drain(mut body: tokio::sync::mpsc::Receiver<Bytes>) -> String {
    let mut out = Vec::new();
    while let Some(chunk) = body.recv().await {
        out.extend_from_slice(&chunk);
    }
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn happy_path_unary_uses_preferred_node() {
    let h = harness(vec![Outcome::Unary(Ok(OK_RESPONSE))]).await;
    let reply = h.engine.handle(chat_request(false)).await;

    let Reply::Json { status, body, .. } = reply else {
        panic!("expected json reply");
    };
    assert_eq!(status, 200);
    let parsed: openai::ChatCompletionResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.choices[0].message.content_text(), "hello");

    assert_eq!(h.family.calls().await, vec![h.node_a]);
    let a = h.pools.get(ProviderKind::Custom, h.node_a).await.unwrap();
    assert_eq!(a.usage_count, 1);
    assert_eq!(a.error_count, 0);
}

#[tokio::test]
async fn unary_fails_over_to_second_node() {
    let h = harness(vec![
        Outcome::Unary(Err(http_error(500))),
        Outcome::Unary(Ok(OK_RESPONSE)),
    ])
    .await;
    let reply = h.engine.handle(chat_request(false)).await;

    let Reply::Json { status, .. } = reply else {
        panic!("expected json reply");
    };
    assert_eq!(status, 200);
    assert_eq!(h.family.calls().await, vec![h.node_a, h.node_b]);

    let a = h.pools.get(ProviderKind::Custom, h.node_a).await.unwrap();
    assert_eq!(a.error_count, 1);
    assert_eq!(a.auth_failure_streak, 0);
}

#[tokio::test]
async fn streaming_never_fails_over_after_first_byte() {
    let chunk = format!(
        "data: {}\n\n",
        r#"{"id":"chatcmpl-9","object":"chat.completion.chunk","created":1,"model":"some-model","choices":[{"index":0,"delta":{"role":"assistant","content":"hel"},"finish_reason":null}]}"#
    );
    let h = harness(vec![Outcome::Stream(Ok(vec![
        Ok(Bytes::from(chunk)),
        Err(http_error(500)),
    ]))])
    .await;

    let reply = h.engine.handle(chat_request(true)).await;
    let Reply::Stream { body, .. } = reply else {
        panic!("expected stream reply");
    };
    let text = drain(body).await;

    assert!(text.contains("\"content\":\"hel\""));
    assert!(text.contains("\"error\""), "in-band terminal error: {text}");
    assert!(text.trim_end().ends_with("data: [DONE]"), "{text}");
    // Only node A was ever dialled.
    assert_eq!(h.family.calls().await, vec![h.node_a]);
}

#[tokio::test]
async fn quota_exhaustion_returns_429_with_retry_after() {
    let h = harness(vec![
        Outcome::Unary(Err(http_error(429))),
        Outcome::Unary(Err(http_error(429))),
    ])
    .await;
    let reply = h.engine.handle(chat_request(false)).await;

    let Reply::Json {
        status, headers, ..
    } = reply
    else {
        panic!("expected json reply");
    };
    assert_eq!(status, 429);
    assert!(
        headers
            .iter()
            .any(|(name, value)| name == "retry-after" && value.parse::<u64>().unwrap() >= 1)
    );

    for uuid in [h.node_a, h.node_b] {
        let node = h.pools.get(ProviderKind::Custom, uuid).await.unwrap();
        assert_eq!(node.state, LifecycleState::Cooldown);
        assert!(node.cooldown_until_ms.unwrap() > epoch_ms());
    }
}

#[tokio::test]
async fn auth_failure_refreshes_inline_and_retries_same_node() {
    let h = harness(vec![
        Outcome::Unary(Err(http_error(401))),
        Outcome::Unary(Ok(OK_RESPONSE)),
    ])
    .await;
    h.family
        .refreshes
        .lock()
        .await
        .push_back(Ok(RefreshedTokens {
            access_token: Some("fresh".to_string()),
            ..RefreshedTokens::default()
        }));

    let reply = h.engine.handle(chat_request(false)).await;
    let Reply::Json { status, .. } = reply else {
        panic!("expected json reply");
    };
    assert_eq!(status, 200);
    // Same node twice: the 401 and the post-refresh retry.
    assert_eq!(h.family.calls().await, vec![h.node_a, h.node_a]);

    let a = h.pools.get(ProviderKind::Custom, h.node_a).await.unwrap();
    assert_eq!(a.auth_failure_streak, 0, "success resets the streak");
    assert_eq!(a.secrets.access_token.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn exhausted_pool_yields_protocol_shaped_503() {
    let h = harness(vec![
        Outcome::Unary(Err(http_error(500))),
        Outcome::Unary(Err(http_error(500))),
    ])
    .await;
    let reply = h.engine.handle(chat_request(false)).await;
    let Reply::Json { status, body, .. } = reply else {
        panic!("expected json reply");
    };
    assert_eq!(status, 503);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["type"], "api_error");

    // No uuid dialled twice.
    let calls = h.family.calls().await;
    let unique: HashSet<Uuid> = calls.iter().copied().collect();
    assert_eq!(calls.len(), unique.len());
}
