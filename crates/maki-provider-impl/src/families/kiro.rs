//! AWS CodeWhisperer ("Kiro") adapter. Speaks the Anthropic Messages shape
//! natively and signs every call with the per-account machine id.

use std::sync::Arc;

use async_trait::async_trait;
use maki_common::{ProviderKind, epoch_ms};
use maki_protocol::{Proto, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, FamilyResult, NativeRequest, RefreshedTokens,
    UpstreamFamily, UpstreamResponse,
};
use serde::Deserialize;

use crate::client::{HttpRequest, HttpResponseBody, REFRESH_TIMEOUT, UpstreamClient};
use crate::families::{json_body, send_stream, send_unary};
use crate::registry::ProviderEndpoints;

const EXPIRY_NEAR_MS: i64 = 10 * 60 * 1_000;
const MESSAGES_PATH: &str = "/v1/conversations/messages";

pub struct KiroFamily {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    refresh_url: String,
}

impl KiroFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        Self {
            client,
            base_url: endpoints.kiro_base.trim_end_matches('/').to_string(),
            refresh_url: endpoints.kiro_refresh_url.clone(),
        }
    }

    fn build_messages_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
        stream: bool,
    ) -> FamilyResult<HttpRequest> {
        let NativeRequest::Claude(body) = request else {
            return Err(FamilyError::Unsupported("kiro speaks claude only"));
        };
        let token = node
            .secrets
            .access_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("access_token"))?;
        let mut body = body.clone();
        body.stream = Some(stream);

        let mut http = HttpRequest::post_json(
            format!("{}{MESSAGES_PATH}", self.base_url),
            json_body(&body)?,
        )
        .bearer(token)
        .header("x-kiro-machine-id", node.machine_id());
        if let Some(region) = node.secrets.region.as_deref().filter(|r| !r.is_empty()) {
            http = http.header("x-amz-region", region);
        }
        if stream {
            http = http.header("accept", "text/event-stream");
        }
        Ok(http)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KiroRefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[async_trait]
impl UpstreamFamily for KiroFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kiro
    }

    fn native_proto(&self) -> Proto {
        Proto::Claude
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        let http = self.build_messages_request(node, request, false)?;
        send_unary(self.client.as_ref(), http).await
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        let http = self.build_messages_request(node, request, true)?;
        send_stream(self.client.as_ref(), http).await
    }

    async fn list_models(&self, _node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        // Kiro has no model-list endpoint; the roster is fixed per region.
        let created = epoch_ms() / 1_000;
        Ok(["claude-sonnet-4", "claude-3-7-sonnet", "claude-haiku-4"]
            .into_iter()
            .map(|id| openai::Model {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "kiro".to_string(),
            })
            .collect())
    }

    async fn refresh(&self, node: &CredentialNode) -> FamilyResult<RefreshedTokens> {
        let refresh_token = node
            .secrets
            .refresh_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("refresh_token"))?;
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let http = HttpRequest::post_json(self.refresh_url.clone(), json_body(&body)?)
            .timeout(REFRESH_TIMEOUT);

        let response = self.client.send(http, false).await?;
        let HttpResponseBody::Full(bytes) = response.body else {
            return Err(FamilyError::Other("unexpected stream from refresh".into()));
        };
        if !(200..300).contains(&response.status) {
            return Err(FamilyError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
                retry_after_secs: None,
            });
        }
        let parsed: KiroRefreshResponse = serde_json::from_slice(&bytes)
            .map_err(|err| FamilyError::Other(format!("refresh decode: {err}")))?;
        Ok(RefreshedTokens {
            access_token: Some(parsed.access_token),
            refresh_token: parsed.refresh_token,
            id_token: None,
            expires_at_ms: parsed
                .expires_in
                .map(|secs| epoch_ms() + secs as i64 * 1_000),
        })
    }

    fn is_expiry_near(&self, node: &CredentialNode, now_ms: i64) -> bool {
        node.is_expiry_near(EXPIRY_NEAR_MS, now_ms)
    }
}
