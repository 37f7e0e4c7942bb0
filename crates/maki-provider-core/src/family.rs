use async_trait::async_trait;
use bytes::Bytes;
use maki_common::ProviderKind;
use maki_protocol::{Proto, claude, gemini, openai};

use crate::credential::CredentialNode;

/// One streamed body chunk, or the upstream failure that ended the stream.
pub type StreamItem = Result<Bytes, FamilyError>;
pub type ByteStream = tokio::sync::mpsc::Receiver<StreamItem>;
pub type FamilyResult<T> = Result<T, FamilyError>;

/// Request already converted to the upstream family's native protocol.
#[derive(Debug, Clone)]
pub enum NativeRequest {
    OpenAi(openai::ChatCompletionRequest),
    Claude(claude::MessagesRequest),
    Gemini {
        model: String,
        body: gemini::GenerateContentRequest,
        stream: bool,
    },
    /// Verbatim JSON passthrough for side surfaces (embeddings).
    Raw {
        path: String,
        body: serde_json::Value,
    },
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Token material returned by a successful refresh; `None` fields keep the
/// node's current value.
#[derive(Debug, Clone, Default)]
pub struct RefreshedTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Reset,
    Other,
}

#[derive(Debug, Clone)]
pub enum FamilyError {
    /// No HTTP response was obtained.
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// Non-2xx upstream response, body truncated to a snippet.
    Http {
        status: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },
    MissingCredential(&'static str),
    InvalidConfig(String),
    Unsupported(&'static str),
    Other(String),
}

impl std::fmt::Display for FamilyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FamilyError::Transport { kind, message } => {
                write!(f, "transport error ({kind:?}): {message}")
            }
            FamilyError::Http { status, body, .. } => {
                write!(f, "upstream returned {status}: {body}")
            }
            FamilyError::MissingCredential(field) => {
                write!(f, "missing credential field: {field}")
            }
            FamilyError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            FamilyError::Unsupported(what) => write!(f, "unsupported: {what}"),
            FamilyError::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for FamilyError {}

/// Capability interface implemented once per upstream family. The dispatch
/// engine only ever talks to this trait; it never branches on a concrete
/// adapter type.
#[async_trait]
pub trait UpstreamFamily: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Protocol this family speaks natively; the engine converts canonical
    /// requests into it before calling `unary`/`stream`.
    fn native_proto(&self) -> Proto;

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse>;

    /// Open a streaming call. The returned channel yields raw upstream body
    /// bytes; closing the receiver aborts the upstream transfer.
    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream>;

    async fn list_models(&self, node: &CredentialNode) -> FamilyResult<Vec<openai::Model>>;

    async fn refresh(&self, node: &CredentialNode) -> FamilyResult<RefreshedTokens>;

    fn is_expiry_near(&self, node: &CredentialNode, now_ms: i64) -> bool;
}
