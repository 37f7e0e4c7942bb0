//! Generic OpenAI-compatible HTTP upstream keyed by a plain API key. Also
//! carries the verbatim passthrough surface (embeddings).

use std::sync::Arc;

use async_trait::async_trait;
use maki_common::ProviderKind;
use maki_protocol::{Proto, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, FamilyResult, NativeRequest, RefreshedTokens,
    UpstreamFamily, UpstreamResponse,
};

use crate::client::{HttpRequest, UpstreamClient};
use crate::families::{json_body, send_stream, send_unary};
use crate::registry::ProviderEndpoints;

const CHAT_PATH: &str = "/v1/chat/completions";

pub struct CustomFamily {
    client: Arc<dyn UpstreamClient>,
    default_base: Option<String>,
}

impl CustomFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        Self {
            client,
            default_base: endpoints.custom_base.clone(),
        }
    }

    fn base_url<'a>(&'a self, node: &'a CredentialNode) -> FamilyResult<&'a str> {
        node.secrets
            .base_url
            .as_deref()
            .or(self.default_base.as_deref())
            .map(|base| base.trim_end_matches('/'))
            .ok_or_else(|| FamilyError::InvalidConfig("custom provider has no base_url".into()))
    }

    fn api_key<'a>(&self, node: &'a CredentialNode) -> FamilyResult<&'a str> {
        node.secrets
            .api_key
            .as_deref()
            .or(node.secrets.access_token.as_deref())
            .ok_or(FamilyError::MissingCredential("api_key"))
    }

    fn build_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
        stream: bool,
    ) -> FamilyResult<HttpRequest> {
        let base = self.base_url(node)?;
        let key = self.api_key(node)?;
        match request {
            NativeRequest::OpenAi(body) => {
                let mut body = body.clone();
                body.stream = Some(stream);
                let mut http =
                    HttpRequest::post_json(format!("{base}{CHAT_PATH}"), json_body(&body)?)
                        .bearer(key);
                if stream {
                    http = http.header("accept", "text/event-stream");
                }
                Ok(http)
            }
            NativeRequest::Raw { path, body } => Ok(HttpRequest::post_json(
                format!("{base}{path}"),
                json_body(body)?,
            )
            .bearer(key)),
            _ => Err(FamilyError::Unsupported("custom speaks openai only")),
        }
    }
}

#[async_trait]
impl UpstreamFamily for CustomFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn native_proto(&self) -> Proto {
        Proto::OpenAi
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        let http = self.build_request(node, request, false)?;
        send_unary(self.client.as_ref(), http).await
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        let http = self.build_request(node, request, true)?;
        send_stream(self.client.as_ref(), http).await
    }

    async fn list_models(&self, node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        let base = self.base_url(node)?;
        let key = self.api_key(node)?;
        let response = send_unary(
            self.client.as_ref(),
            HttpRequest::get(format!("{base}/v1/models")).bearer(key),
        )
        .await?;
        let list: openai::ModelList = serde_json::from_slice(&response.body)
            .map_err(|err| FamilyError::Other(format!("model list decode: {err}")))?;
        Ok(list.data)
    }

    async fn refresh(&self, _node: &CredentialNode) -> FamilyResult<RefreshedTokens> {
        // API keys have nothing to refresh.
        Ok(RefreshedTokens::default())
    }

    fn is_expiry_near(&self, _node: &CredentialNode, _now_ms: i64) -> bool {
        false
    }
}
