use std::collections::HashMap;
use std::sync::Arc;

use maki_common::ProviderKind;
use maki_provider_core::UpstreamFamily;

use crate::client::UpstreamClient;
use crate::families;

/// OAuth endpoints for one provider family.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub device_code_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: String,
    pub redirect_uri: String,
    pub loopback_port: Option<u16>,
}

/// Upstream API bases and OAuth endpoints, overridable from configuration.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub codex_base: String,
    pub kiro_base: String,
    pub kiro_refresh_url: String,
    pub gemini_base: String,
    pub qwen_base: String,
    pub letta_base: String,
    pub custom_base: Option<String>,
    oauth: HashMap<ProviderKind, OAuthEndpoints>,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        let mut oauth = HashMap::new();
        oauth.insert(
            ProviderKind::Codex,
            OAuthEndpoints {
                authorize_url: "https://auth.openai.com/oauth/authorize".to_string(),
                token_url: "https://auth.openai.com/oauth/token".to_string(),
                device_code_url: None,
                client_id: "app_EMoamEEZ73f0CkXaXp7hrann".to_string(),
                client_secret: None,
                scopes: "openid profile email offline_access".to_string(),
                redirect_uri: "http://localhost:1455/auth/callback".to_string(),
                loopback_port: Some(1455),
            },
        );
        oauth.insert(
            ProviderKind::Kiro,
            OAuthEndpoints {
                authorize_url: "https://prod.us-east-1.auth.desktop.kiro.dev/authorize".to_string(),
                token_url: "https://prod.us-east-1.auth.desktop.kiro.dev/token".to_string(),
                device_code_url: Some(
                    "https://oidc.us-east-1.amazonaws.com/device_authorization".to_string(),
                ),
                client_id: "kiro-desktop".to_string(),
                client_secret: None,
                scopes: "codewhisperer:completions codewhisperer:conversations".to_string(),
                redirect_uri: "https://kiro.dev/auth/callback".to_string(),
                loopback_port: None,
            },
        );
        oauth.insert(
            ProviderKind::GeminiCli,
            OAuthEndpoints {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                device_code_url: None,
                client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com"
                    .to_string(),
                client_secret: Some("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".to_string()),
                scopes: "https://www.googleapis.com/auth/cloud-platform openid email".to_string(),
                redirect_uri: "http://localhost:8085/oauth2callback".to_string(),
                loopback_port: Some(8085),
            },
        );
        oauth.insert(
            ProviderKind::Qwen,
            OAuthEndpoints {
                authorize_url: "https://chat.qwen.ai/authorize".to_string(),
                token_url: "https://chat.qwen.ai/api/v1/oauth2/token".to_string(),
                device_code_url: Some("https://chat.qwen.ai/api/v1/oauth2/device/code".to_string()),
                client_id: "f0304373b74a44d2b584a3fb70ca9e56".to_string(),
                client_secret: None,
                scopes: "openid profile email model.completion".to_string(),
                redirect_uri: "https://chat.qwen.ai/authorize/device".to_string(),
                loopback_port: None,
            },
        );
        oauth.insert(
            ProviderKind::Letta,
            OAuthEndpoints {
                authorize_url: "https://app.letta.com/oauth/authorize".to_string(),
                token_url: "https://api.letta.com/v1/oauth/token".to_string(),
                device_code_url: None,
                client_id: "letta-gateway".to_string(),
                client_secret: None,
                scopes: "agents:read agents:write".to_string(),
                redirect_uri: "https://app.letta.com/oauth/local-callback".to_string(),
                loopback_port: None,
            },
        );
        Self {
            codex_base: "https://chatgpt.com/backend-api/codex".to_string(),
            kiro_base: "https://codewhisperer.us-east-1.amazonaws.com".to_string(),
            kiro_refresh_url: "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
                .to_string(),
            gemini_base: "https://cloudcode-pa.googleapis.com".to_string(),
            qwen_base: "https://dashscope.aliyuncs.com/compatible-mode".to_string(),
            letta_base: "https://api.letta.com".to_string(),
            custom_base: None,
            oauth,
        }
    }
}

impl ProviderEndpoints {
    pub fn oauth(&self, kind: ProviderKind) -> Option<&OAuthEndpoints> {
        self.oauth.get(&kind)
    }

    pub fn set_oauth(&mut self, kind: ProviderKind, endpoints: OAuthEndpoints) {
        self.oauth.insert(kind, endpoints);
    }
}

/// One adapter instance per provider family, shared by the dispatch engine.
pub struct FamilyRegistry {
    map: HashMap<ProviderKind, Arc<dyn UpstreamFamily>>,
}

impl FamilyRegistry {
    pub fn new(client: Arc<dyn UpstreamClient>, endpoints: &ProviderEndpoints) -> Self {
        let mut map: HashMap<ProviderKind, Arc<dyn UpstreamFamily>> = HashMap::new();
        map.insert(
            ProviderKind::Kiro,
            Arc::new(families::kiro::KiroFamily::new(client.clone(), endpoints)),
        );
        map.insert(
            ProviderKind::Codex,
            Arc::new(families::codex::CodexFamily::new(client.clone(), endpoints)),
        );
        map.insert(
            ProviderKind::GeminiCli,
            Arc::new(families::geminicli::GeminiCliFamily::new(
                client.clone(),
                endpoints,
            )),
        );
        map.insert(
            ProviderKind::Qwen,
            Arc::new(families::qwen::QwenFamily::new(client.clone(), endpoints)),
        );
        map.insert(
            ProviderKind::Letta,
            Arc::new(families::letta::LettaFamily::new(client.clone(), endpoints)),
        );
        map.insert(
            ProviderKind::Custom,
            Arc::new(families::custom::CustomFamily::new(client, endpoints)),
        );
        Self { map }
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn UpstreamFamily>> {
        self.map.get(&kind).cloned()
    }

    pub fn all(&self) -> HashMap<ProviderKind, Arc<dyn UpstreamFamily>> {
        self.map.clone()
    }
}
