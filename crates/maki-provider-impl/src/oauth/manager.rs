use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use maki_common::{ProviderKind, epoch_ms};
use maki_provider_core::{CredentialNode, CredentialSecrets, FamilyError, FamilyResult};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::client::{HttpRequest, HttpResponseBody, REFRESH_TIMEOUT, UpstreamClient};
use crate::oauth::pkce::{generate_pkce, generate_state};
use crate::oauth::token::{exchange_code, parse_id_token_claims};
use crate::registry::ProviderEndpoints;
use crate::store::CredentialStore;

pub const SESSION_TTL: Duration = Duration::from_secs(600);

/// What the caller gets back from `begin`/`begin_device`: either a URL to
/// open (code delivered later through `complete`) or a device prompt to
/// poll.
#[derive(Debug, Clone)]
pub enum AuthStart {
    Redirect { auth_url: String, state: String },
    Device {
        verification_uri: String,
        user_code: String,
        interval_secs: u64,
        state: String,
    },
}

#[derive(Debug)]
pub enum PendingPoll {
    Pending { retry_after_secs: u64 },
    Complete(Box<CredentialNode>),
}

enum Pending {
    Code {
        provider: ProviderKind,
        verifier: String,
        redirect_uri: String,
        created_at: Instant,
    },
    Device {
        provider: ProviderKind,
        device_code: String,
        interval_secs: u64,
        created_at: Instant,
    },
}

impl Pending {
    fn created_at(&self) -> Instant {
        match self {
            Pending::Code { created_at, .. } | Pending::Device { created_at, .. } => *created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_uri_complete")]
    verification_uri: String,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Owns in-flight acquisition sessions, keyed by CSRF state. Sessions have
/// an absolute deadline; expired entries are pruned on every touch.
pub struct AuthManager {
    client: Arc<dyn UpstreamClient>,
    store: Arc<CredentialStore>,
    endpoints: ProviderEndpoints,
    sessions: Mutex<HashMap<String, Pending>>,
    ttl: Duration,
}

impl AuthManager {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        store: Arc<CredentialStore>,
        endpoints: ProviderEndpoints,
    ) -> Self {
        Self {
            client,
            store,
            endpoints,
            sessions: Mutex::new(HashMap::new()),
            ttl: SESSION_TTL,
        }
    }

    /// Loopback listener coordinates for a provider, when it uses one:
    /// the fixed port plus the path component of its redirect URI.
    pub fn loopback_target(&self, kind: ProviderKind) -> Option<(u16, String)> {
        let oauth = self.endpoints.oauth(kind)?;
        let port = oauth.loopback_port?;
        let path = oauth
            .redirect_uri
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|idx| rest[idx..].to_string()))
            .unwrap_or_else(|| "/auth/callback".to_string());
        Some((port, path))
    }

    /// Start an authorization-code session (PKCE). The returned URL is
    /// opened by the operator; the code comes back through `complete`,
    /// either from the loopback listener or from the admin surface.
    pub async fn begin(&self, kind: ProviderKind) -> FamilyResult<AuthStart> {
        let oauth = self
            .endpoints
            .oauth(kind)
            .ok_or(FamilyError::Unsupported("oauth for this provider"))?;
        let pkce = generate_pkce();
        let state = generate_state();

        let auth_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
            oauth.authorize_url,
            urlencoding::encode(&oauth.client_id),
            urlencoding::encode(&oauth.redirect_uri),
            urlencoding::encode(&oauth.scopes),
            pkce.challenge,
            state,
        );

        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions, self.ttl);
        sessions.insert(
            state.clone(),
            Pending::Code {
                provider: kind,
                verifier: pkce.verifier,
                redirect_uri: oauth.redirect_uri.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(AuthStart::Redirect { auth_url, state })
    }

    /// Start a device-authorization session (Kiro AWS Builder ID, Qwen).
    pub async fn begin_device(&self, kind: ProviderKind) -> FamilyResult<AuthStart> {
        let oauth = self
            .endpoints
            .oauth(kind)
            .ok_or(FamilyError::Unsupported("oauth for this provider"))?;
        let device_url = oauth
            .device_code_url
            .as_deref()
            .ok_or(FamilyError::Unsupported("device flow for this provider"))?;

        let body = format!(
            "client_id={}&scope={}",
            urlencoding::encode(&oauth.client_id),
            urlencoding::encode(&oauth.scopes)
        );
        let request = HttpRequest {
            method: "POST",
            url: device_url.to_string(),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(Bytes::from(body)),
            timeout: REFRESH_TIMEOUT,
        };
        let response = self.client.send(request, false).await?;
        let HttpResponseBody::Full(bytes) = response.body else {
            return Err(FamilyError::Other("unexpected stream from device endpoint".into()));
        };
        if !(200..300).contains(&response.status) {
            return Err(FamilyError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
                retry_after_secs: None,
            });
        }
        let device: DeviceCodeResponse = serde_json::from_slice(&bytes)
            .map_err(|err| FamilyError::Other(format!("device response decode: {err}")))?;

        let state = generate_state();
        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions, self.ttl);
        sessions.insert(
            state.clone(),
            Pending::Device {
                provider: kind,
                device_code: device.device_code,
                interval_secs: device.interval.max(1),
                created_at: Instant::now(),
            },
        );
        Ok(AuthStart::Device {
            verification_uri: device.verification_uri,
            user_code: device.user_code,
            interval_secs: device.interval.max(1),
            state,
        })
    }

    /// Exchange a delivered authorization code for tokens and persist the
    /// resulting credential file. The session is consumed on success.
    pub async fn complete(&self, state: &str, code: &str) -> FamilyResult<CredentialNode> {
        let pending = {
            let mut sessions = self.sessions.lock().await;
            prune(&mut sessions, self.ttl);
            sessions.remove(state)
        };
        let Some(Pending::Code {
            provider,
            verifier,
            redirect_uri,
            ..
        }) = pending
        else {
            return Err(FamilyError::Other("unknown or expired auth session".into()));
        };

        let oauth = self
            .endpoints
            .oauth(provider)
            .ok_or(FamilyError::Unsupported("oauth for this provider"))?;
        let tokens = exchange_code(
            self.client.as_ref(),
            &oauth.token_url,
            &oauth.client_id,
            &redirect_uri,
            code,
            &verifier,
        )
        .await?;
        self.build_and_persist(provider, tokens).await
    }

    /// One poll of a device session. Providers report "not yet" as a 4xx
    /// with `authorization_pending`/`slow_down` markers.
    pub async fn poll_device(&self, state: &str) -> FamilyResult<PendingPoll> {
        let (provider, device_code, interval_secs) = {
            let mut sessions = self.sessions.lock().await;
            prune(&mut sessions, self.ttl);
            match sessions.get(state) {
                Some(Pending::Device {
                    provider,
                    device_code,
                    interval_secs,
                    ..
                }) => (*provider, device_code.clone(), *interval_secs),
                _ => return Err(FamilyError::Other("unknown or expired auth session".into())),
            }
        };

        let oauth = self
            .endpoints
            .oauth(provider)
            .ok_or(FamilyError::Unsupported("oauth for this provider"))?;
        let body = format!(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&device_code={}&client_id={}",
            urlencoding::encode(&device_code),
            urlencoding::encode(&oauth.client_id),
        );
        let request = HttpRequest {
            method: "POST",
            url: oauth.token_url.clone(),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(Bytes::from(body)),
            timeout: REFRESH_TIMEOUT,
        };
        let response = self.client.send(request, false).await?;
        let HttpResponseBody::Full(bytes) = response.body else {
            return Err(FamilyError::Other("unexpected stream from token endpoint".into()));
        };
        let text = String::from_utf8_lossy(&bytes);
        if !(200..300).contains(&response.status) {
            if text.contains("authorization_pending") || text.contains("slow_down") {
                return Ok(PendingPoll::Pending {
                    retry_after_secs: interval_secs,
                });
            }
            return Err(FamilyError::Http {
                status: response.status,
                body: text.into_owned(),
                retry_after_secs: None,
            });
        }

        let tokens: crate::oauth::token::TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|err| FamilyError::Other(format!("token response decode: {err}")))?;
        self.sessions.lock().await.remove(state);
        let node = self.build_and_persist(provider, tokens).await?;
        Ok(PendingPoll::Complete(Box::new(node)))
    }

    async fn build_and_persist(
        &self,
        provider: ProviderKind,
        tokens: crate::oauth::token::TokenResponse,
    ) -> FamilyResult<CredentialNode> {
        let now = epoch_ms();
        let claims = tokens
            .id_token
            .as_deref()
            .map(parse_id_token_claims)
            .unwrap_or_default();

        let mut node = CredentialNode::new(provider, CredentialSecrets::default(), now);
        node.expires_at_ms = tokens.expires_in.map(|secs| now + secs as i64 * 1_000);
        node.secrets = CredentialSecrets {
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            account_id: claims.account_id,
            email: claims.email,
            auth_method: Some("oauth".to_string()),
            ..CredentialSecrets::default()
        };

        self.store
            .persist_new(&node)
            .map_err(|err| FamilyError::Other(format!("credential persist: {err}")))?;
        Ok(node)
    }
}

fn prune(sessions: &mut HashMap<String, Pending>, ttl: Duration) {
    let now = Instant::now();
    sessions.retain(|_, pending| now.duration_since(pending.created_at()) <= ttl);
}
