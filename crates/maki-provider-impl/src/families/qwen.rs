//! Qwen (DashScope compatible-mode) adapter. OpenAI-shaped natively.

use std::sync::Arc;

use async_trait::async_trait;
use maki_common::{ProviderKind, epoch_ms};
use maki_protocol::{Proto, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, FamilyResult, NativeRequest, RefreshedTokens,
    UpstreamFamily, UpstreamResponse,
};

use crate::client::{HttpRequest, UpstreamClient};
use crate::families::{json_body, send_stream, send_unary};
use crate::oauth::token::refresh_grant;
use crate::registry::ProviderEndpoints;

const EXPIRY_NEAR_MS: i64 = 10 * 60 * 1_000;
const CHAT_PATH: &str = "/v1/chat/completions";

pub struct QwenFamily {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    token_url: String,
    client_id: String,
}

impl QwenFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        let oauth = endpoints.oauth(ProviderKind::Qwen);
        Self {
            client,
            base_url: endpoints.qwen_base.trim_end_matches('/').to_string(),
            token_url: oauth
                .map(|o| o.token_url.clone())
                .unwrap_or_else(|| "https://chat.qwen.ai/api/v1/oauth2/token".to_string()),
            client_id: oauth.map(|o| o.client_id.clone()).unwrap_or_default(),
        }
    }

    fn auth_token<'a>(&self, node: &'a CredentialNode) -> FamilyResult<&'a str> {
        node.secrets
            .access_token
            .as_deref()
            .or(node.secrets.api_key.as_deref())
            .ok_or(FamilyError::MissingCredential("access_token"))
    }

    fn build_chat_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
        stream: bool,
    ) -> FamilyResult<HttpRequest> {
        let NativeRequest::OpenAi(body) = request else {
            return Err(FamilyError::Unsupported("qwen speaks openai only"));
        };
        let mut body = body.clone();
        body.stream = Some(stream);
        let mut http = HttpRequest::post_json(
            format!("{}{CHAT_PATH}", self.base_url),
            json_body(&body)?,
        )
        .bearer(self.auth_token(node)?);
        if stream {
            http = http.header("accept", "text/event-stream");
        }
        Ok(http)
    }
}

#[async_trait]
impl UpstreamFamily for QwenFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn native_proto(&self) -> Proto {
        Proto::OpenAi
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        let http = self.build_chat_request(node, request, false)?;
        send_unary(self.client.as_ref(), http).await
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        let http = self.build_chat_request(node, request, true)?;
        send_stream(self.client.as_ref(), http).await
    }

    async fn list_models(&self, _node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        let created = epoch_ms() / 1_000;
        Ok(["qwen3-coder-plus", "qwen3-coder-flash", "qwen-max"]
            .into_iter()
            .map(|id| openai::Model {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "qwen".to_string(),
            })
            .collect())
    }

    async fn refresh(&self, node: &CredentialNode) -> FamilyResult<RefreshedTokens> {
        let refresh_token = node
            .secrets
            .refresh_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("refresh_token"))?;
        let tokens = refresh_grant(
            self.client.as_ref(),
            &self.token_url,
            &self.client_id,
            None,
            refresh_token,
        )
        .await?;
        Ok(tokens.into_refreshed(epoch_ms()))
    }

    fn is_expiry_near(&self, node: &CredentialNode, now_ms: i64) -> bool {
        node.is_expiry_near(EXPIRY_NEAR_MS, now_ms)
    }
}
