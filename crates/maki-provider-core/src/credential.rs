use maki_common::ProviderKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifecycle tier of one credential. Transitions are owned by the risk
/// engine; the selector only reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Healthy,
    NeedsRefresh,
    Cooldown,
    Quarantined,
    Suspended,
    Banned,
    Disabled,
    Unknown,
}

impl LifecycleState {
    /// States the selector must never hand out, regardless of counters.
    pub fn is_terminal_for_selection(&self) -> bool {
        matches!(
            self,
            LifecycleState::Banned | LifecycleState::Suspended | LifecycleState::Disabled
        )
    }
}

/// Opaque per-provider secret material. Fields are a union across provider
/// families; adapters read the ones they need and error on absences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// One OAuth identity with its tokens, metadata and runtime counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialNode {
    pub uuid: Uuid,
    pub provider: ProviderKind,
    pub secrets: CredentialSecrets,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_healthy: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub needs_refresh: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub auth_failure_streak: u32,
    /// Legacy failure budget; gates availability only, never lifecycle state.
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub failure_window_start_ms: i64,
    #[serde(default)]
    pub rate_limit_streak: u32,
    #[serde(default)]
    pub transient_streak: u32,
    #[serde(default)]
    pub last_used_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    #[serde(default = "default_state")]
    pub state: LifecycleState,
    #[serde(default)]
    pub created_at_ms: i64,
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_state() -> LifecycleState {
    LifecycleState::Healthy
}

impl CredentialNode {
    pub fn new(provider: ProviderKind, secrets: CredentialSecrets, now_ms: i64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            provider,
            secrets,
            priority: default_priority(),
            is_healthy: true,
            is_disabled: false,
            needs_refresh: false,
            usage_count: 0,
            error_count: 0,
            auth_failure_streak: 0,
            failure_count: 0,
            failure_window_start_ms: 0,
            rate_limit_streak: 0,
            transient_streak: 0,
            last_used_ms: 0,
            cooldown_until_ms: None,
            rate_limit_reset_ms: None,
            expires_at_ms: None,
            state: LifecycleState::Healthy,
            created_at_ms: now_ms,
        }
    }

    /// Effective priority: out-of-range values collapse to the default tier.
    pub fn effective_priority(&self) -> i32 {
        if self.priority < 0 { 100 } else { self.priority }
    }

    /// Stable machine identifier. Configured value wins; otherwise it is
    /// derived from the node uuid, so it never changes across restarts.
    pub fn machine_id(&self) -> String {
        if let Some(id) = &self.secrets.machine_id
            && !id.is_empty()
        {
            return id.clone();
        }
        sha256_hex(self.uuid.to_string().as_bytes())
    }

    /// Account identity key shared by sibling nodes: hash of
    /// `account_id + auth_method`. Nodes without an account id have no
    /// siblings.
    pub fn account_key(&self) -> Option<String> {
        let account_id = self.secrets.account_id.as_deref()?;
        if account_id.is_empty() {
            return None;
        }
        let auth_method = self.secrets.auth_method.as_deref().unwrap_or("");
        Some(sha256_hex(
            format!("{account_id}|{auth_method}").as_bytes(),
        ))
    }

    pub fn is_expiry_near(&self, threshold_ms: i64, now_ms: i64) -> bool {
        match self.expires_at_ms {
            Some(expires_at) => expires_at - now_ms <= threshold_ms,
            None => false,
        }
    }
}

pub(crate) fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_id_prefers_configured_value() {
        let mut node = CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), 0);
        node.secrets.machine_id = Some("mid-1".to_string());
        assert_eq!(node.machine_id(), "mid-1");
    }

    #[test]
    fn machine_id_falls_back_to_uuid_digest() {
        let node = CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), 0);
        let expected = sha256_hex(node.uuid.to_string().as_bytes());
        assert_eq!(node.machine_id(), expected);
        assert_eq!(node.machine_id().len(), 64);
    }

    #[test]
    fn account_key_is_stable_across_siblings() {
        let mut a = CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), 0);
        let mut b = CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), 0);
        for node in [&mut a, &mut b] {
            node.secrets.account_id = Some("acct-7".to_string());
            node.secrets.auth_method = Some("social".to_string());
        }
        assert_eq!(a.account_key(), b.account_key());
        b.secrets.auth_method = Some("builder-id".to_string());
        assert_ne!(a.account_key(), b.account_key());
    }
}
