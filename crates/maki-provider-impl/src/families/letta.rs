//! Letta agent back-end adapter. OpenAI-shaped chat against a pinned agent;
//! tokens are long-lived, so the expiry-near horizon is a day.

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

const EXPIRY_NEAR_MS: i64 = 24 * 60 * 60 * 1_000;

pub struct LettaFamily {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    token_url: String,
    client_id: String,
}

impl LettaFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        let oauth = endpoints.oauth(ProviderKind::Letta);
        Self {
            client,
            base_url: endpoints.letta_base.trim_end_matches('/').to_string(),
            token_url: oauth
                .map(|o| o.token_url.clone())
                .unwrap_or_else(|| "https://api.letta.com/v1/oauth/token".to_string()),
            client_id: oauth.map(|o| o.client_id.clone()).unwrap_or_default(),
        }
    }

    fn build_chat_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
        stream: bool,
    ) -> FamilyResult<HttpRequest> {
        let NativeRequest::OpenAi(body) = request else {
            return Err(FamilyError::Unsupported("letta speaks openai only"));
        };
        let token = node
            .secrets
            .access_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("access_token"))?;
        let agent_id = node
            .secrets
            .agent_id
            .as_deref()
            .ok_or(FamilyError::MissingCredential("agent_id"))?;

        let mut body = body.clone();
        body.stream = Some(stream);
        let url = format!(
            "{}/v1/agents/{agent_id}/chat/completions",
            self.base_url
        );
        let mut http = HttpRequest::post_json(url, json_body(&body)?).bearer(token);
        if stream {
            http = http.header("accept", "text/event-stream");
        }
        Ok(http)
    }
}

#[async_trait]
impl UpstreamFamily for LettaFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Letta
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

    async fn list_models(&self, node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        let agent = node
            .secrets
            .agent_id
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Ok(vec![openai::Model {
            id: format!("letta-{agent}"),
            object: "model".to_string(),
            created: epoch_ms() / 1_000,
            owned_by: "letta".to_string(),
        }])
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
