//! OpenAI Codex / ChatGPT back-end adapter. Natively OpenAI-shaped, with a
//! per-(model, user) conversation cache surfaced as a session header.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maki_common::{ProviderKind, epoch_ms};
use maki_protocol::{Proto, openai};
use maki_provider_core::{
    ByteStream, CredentialNode, FamilyError, FamilyResult, NativeRequest, RefreshedTokens,
    UpstreamFamily, UpstreamResponse,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::{HttpRequest, UpstreamClient};
use crate::families::{json_body, send_stream, send_unary};
use crate::oauth::token::refresh_grant;
use crate::registry::ProviderEndpoints;

const EXPIRY_NEAR_MS: i64 = 5 * 60 * 1_000;
const CONVERSATION_TTL_MS: i64 = 60 * 60 * 1_000;
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const CHAT_PATH: &str = "/v1/chat/completions";

/// `(model, user) → (conversation_id, expires_at_ms)`, 1 h TTL, swept every
/// 15 minutes.
pub struct ConversationCache {
    entries: Mutex<HashMap<(String, String), (String, i64)>>,
}

impl ConversationCache {
    fn new() -> Arc<Self> {
        let cache = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        });
        let sweeper = Arc::clone(&cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweeper.sweep(epoch_ms()).await;
            }
        });
        cache
    }

    pub async fn get_or_create(&self, model: &str, user: &str, now_ms: i64) -> String {
        let key = (model.to_string(), user.to_string());
        let mut entries = self.entries.lock().await;
        if let Some((id, expires_at)) = entries.get(&key)
            && *expires_at > now_ms
        {
            return id.clone();
        }
        let id = format!("conv_{}", Uuid::new_v4().simple());
        entries.insert(key, (id.clone(), now_ms + CONVERSATION_TTL_MS));
        id
    }

    pub async fn sweep(&self, now_ms: i64) {
        self.entries
            .lock()
            .await
            .retain(|_, (_, expires_at)| *expires_at > now_ms);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

pub struct CodexFamily {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    token_url: String,
    client_id: String,
    conversations: Arc<ConversationCache>,
}

impl CodexFamily {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        let oauth = endpoints.oauth(ProviderKind::Codex);
        Self {
            client,
            base_url: endpoints.codex_base.trim_end_matches('/').to_string(),
            token_url: oauth
                .map(|o| o.token_url.clone())
                .unwrap_or_else(|| "https://auth.openai.com/oauth/token".to_string()),
            client_id: oauth
                .map(|o| o.client_id.clone())
                .unwrap_or_default(),
            conversations: ConversationCache::new(),
        }
    }

    async fn build_chat_request(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
        stream: bool,
    ) -> FamilyResult<HttpRequest> {
        let NativeRequest::OpenAi(body) = request else {
            return Err(FamilyError::Unsupported("codex speaks openai only"));
        };
        let token = node
            .secrets
            .access_token
            .as_deref()
            .ok_or(FamilyError::MissingCredential("access_token"))?;

        let mut body = body.clone();
        body.stream = Some(stream);
        let user = body.user.clone().unwrap_or_else(|| "anonymous".to_string());
        let conversation_id = self
            .conversations
            .get_or_create(&body.model, &user, epoch_ms())
            .await;

        let mut http = HttpRequest::post_json(
            format!("{}{CHAT_PATH}", self.base_url),
            json_body(&body)?,
        )
        .bearer(token)
        .header("session_id", conversation_id)
        .header("originator", "codex_cli_rs");
        if let Some(account_id) = node.secrets.account_id.as_deref() {
            http = http.header("chatgpt-account-id", account_id);
        }
        if stream {
            http = http.header("accept", "text/event-stream");
        }
        Ok(http)
    }
}

#[async_trait]
impl UpstreamFamily for CodexFamily {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Codex
    }

    fn native_proto(&self) -> Proto {
        Proto::OpenAi
    }

    async fn unary(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<UpstreamResponse> {
        let http = self.build_chat_request(node, request, false).await?;
        send_unary(self.client.as_ref(), http).await
    }

    async fn stream(
        &self,
        node: &CredentialNode,
        request: &NativeRequest,
    ) -> FamilyResult<ByteStream> {
        let http = self.build_chat_request(node, request, true).await?;
        send_stream(self.client.as_ref(), http).await
    }

    async fn list_models(&self, _node: &CredentialNode) -> FamilyResult<Vec<openai::Model>> {
        let created = epoch_ms() / 1_000;
        Ok(["gpt-5", "gpt-5-codex", "codex-mini-latest"]
            .into_iter()
            .map(|id| openai::Model {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "openai".to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conversation_cache_reuses_within_ttl_and_sweeps() {
        let cache = ConversationCache::new();
        let first = cache.get_or_create("gpt-5", "u1", 1_000).await;
        let again = cache.get_or_create("gpt-5", "u1", 2_000).await;
        assert_eq!(first, again);

        let other_user = cache.get_or_create("gpt-5", "u2", 2_000).await;
        assert_ne!(first, other_user);

        // Past the TTL a fresh id is issued.
        let late = cache
            .get_or_create("gpt-5", "u1", 1_000 + CONVERSATION_TTL_MS + 1)
            .await;
        assert_ne!(first, late);

        cache.sweep(1_000 + CONVERSATION_TTL_MS + 1).await;
        assert_eq!(cache.len().await, 2, "expired entries are purged");
    }
}
