//! Google Gemini (CLI-style OAuth) adapter. Natively Gemini-shaped;
//! streaming uses `alt=sse` so the shared SSE parser applies.

use std::sync::Arc;

use async_trait::async_trait;
use maki_common::{ProviderKind, epoch_ms};
use maki_protocol::{Proto, gemini, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, FamilyResult, NativeRequest, RefreshedTokens,
    UpstreamFamily, UpstreamResponse,
};

use crate::client::{HttpRequest, UpstreamClient};
use crate::families::{json_body, send_stream, send_unary};
use crate::oauth::token::refresh_grant;
use crate::registry::ProviderEndpoints;

const EXPIRY_NEAR_MS: i64 = 5 * 60 * 1_000;

pub struct GeminiCliFamily {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl GeminiCliFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        let oauth = endpoints.oauth(ProviderKind::GeminiCli);
        Self {
            client,
            base_url: endpoints.gemini_base.trim_end_matches('/').to_string(),
            token_url: oauth
                .map(|o| o.token_url.clone())
                .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string()),
            client_id: oauth.map(|o| o.client_id.clone()).unwrap_or_default(),
            client_secret: oauth.and_then(|o| o.client_secret.clone()),
        }
    }

    fn build_generate_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<HttpRequest> {
        let NativeRequest::Gemini {
            model,
            body,
            stream,
        } = request
        else {
            return Err(FamilyError::Unsupported("gemini-cli speaks gemini only"));
        };
        let token = node
            .secrets
            .access_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("access_token"))?;

        let action = if *stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        let url = format!("{}/v1beta/models/{model}:{action}", self.base_url);
        let mut http = HttpRequest::post_json(url, json_body(body)?).bearer(token);
        if *stream {
            http = http.header("accept", "text/event-stream");
        }
        Ok(http)
    }
}

#[async_trait]
impl UpstreamFamily for GeminiCliFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GeminiCli
    }

    fn native_proto(&self) -> Proto {
        Proto::Gemini
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        let http = self.build_generate_request(node, request)?;
        send_unary(self.client.as_ref(), http).await
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        let http = self.build_generate_request(node, request)?;
        send_stream(self.client.as_ref(), http).await
    }

    async fn list_models(&self, node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        let token = node
            .secrets
            .access_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("access_token"))?;
        let url = format!("{}/v1beta/models", self.base_url);
        let response = send_unary(self.client.as_ref(), HttpRequest::get(url).bearer(token)).await?;
        let list: gemini::ModelList = serde_json::from_slice(&response.body)
            .map_err(|err| FamilyError::Other(format!("model list decode: {err}")))?;
        let created = epoch_ms() / 1_000;
        Ok(list
            .models
            .into_iter()
            .map(|model| openai::Model {
                id: model
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&model.name)
                    .to_string(),
                object: "model".to_string(),
                created,
                owned_by: "google".to_string(),
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
            self.client_secret.as_deref(),
            refresh_token,
        )
        .await?;
        Ok(tokens.into_refreshed(epoch_ms()))
    }

    fn is_expiry_near(&self, node: &CredentialNode, now_ms: i64) -> bool {
        node.is_expiry_near(EXPIRY_NEAR_MS, now_ms)
    }
}
