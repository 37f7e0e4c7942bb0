//! Process wiring: config directory, credential auto-link, pools, risk
//! engine, adapters, background flush tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use maki_provider_core::risk::hub::TracingSink;
use maki_provider_core::{JournalSink, PoolManager, RiskEngine, RiskHub};
use maki_provider_impl::{AuthManager, CredentialStore, FamilyRegistry, ProviderEndpoints, WreqClient};
use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::engine::Engine;
use crate::potluck::PotluckStore;
use crate::routing::ModelRouter;

const POOL_SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(500);
const TOKEN_STORE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Fatal init: invalid configuration (exit code 1).
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Credential directory unusable (exit code 2).
    #[error("credential directory unwritable: {0}")]
    CredentialDirUnwritable(String),
    /// Any other fatal init failure (exit code 1).
    #[error("init failed: {0}")]
    Init(String),
}

pub struct App {
    pub settings: Settings,
    pub pools: Arc<PoolManager>,
    pub risk: Arc<RiskEngine>,
    pub engine: Arc<Engine>,
    pub store: Arc<CredentialStore>,
    pub potluck: Arc<PotluckStore>,
    pub auth: Arc<AuthManager>,
    pub journal: Arc<JournalSink>,
    pub hub: RiskHub,
    pool_snapshot_path: PathBuf,
}

impl App {
    /// Flush all debounced state; called on graceful shutdown.
    pub async fn flush(&self) {
        self.journal.flush_now().await;
        self.pools.flush_now(&self.pool_snapshot_path).await;
        self.potluck.flush_now().await;
    }
}

pub async fn bootstrap(settings: Settings) -> Result<App, BootstrapError> {
    let config_dir = settings.config_dir.clone();
    std::fs::create_dir_all(config_dir.join("temp"))
        .map_err(|err| BootstrapError::CredentialDirUnwritable(err.to_string()))?;
    let probe = config_dir.join(".probe");
    std::fs::write(&probe, b"ok")
        .and_then(|_| std::fs::remove_file(&probe))
        .map_err(|err| BootstrapError::CredentialDirUnwritable(err.to_string()))?;

    let store = Arc::new(CredentialStore::new(&config_dir));

    let pools = Arc::new(PoolManager::new(
        settings.pool_tuning.clone(),
        settings.default_tuning,
        settings.rotation,
    ));

    // Counters survive restarts through the pool snapshot; token material
    // always comes from the credential files.
    let snapshot_path = config_dir.join("provider_pools.json");
    if let Ok(bytes) = std::fs::read(&snapshot_path)
        && let Ok(snapshot) = serde_json::from_slice(&bytes)
    {
        pools.load_snapshot(snapshot).await;
    }
    for node in store.scan() {
        if pools.get(node.provider, node.uuid).await.is_some() {
            pools
                .update(node.provider, node.uuid, |existing| {
                    existing.secrets = node.secrets.clone();
                    existing.expires_at_ms = node.expires_at_ms;
                    existing.priority = node.priority;
                })
                .await;
        } else {
            pools.insert(node).await;
        }
    }
    seed_kiro_pool(&settings, &pools).await?;
    pools.spawn_persist_task(snapshot_path.clone(), POOL_SNAPSHOT_DEBOUNCE);

    let hub = RiskHub::new(256);
    let journal = JournalSink::new(
        config_dir.join("risk-lifecycle.json"),
        settings.risk.max_events,
    );
    hub.add_sink(journal.clone()).await;
    hub.add_sink(Arc::new(TracingSink)).await;
    journal.spawn_flush_task(Duration::from_millis(settings.risk.flush_debounce_ms));
    let risk = Arc::new(RiskEngine::new(settings.risk.clone(), hub.clone()));

    let client = Arc::new(
        WreqClient::new().map_err(|err| BootstrapError::Init(err.to_string()))?,
    );
    let mut endpoints = ProviderEndpoints::default();
    if let Some(base) = &settings.codex_base_url {
        endpoints.codex_base = base.clone();
    }
    if let Some(base) = &settings.letta_base_url {
        endpoints.letta_base = base.clone();
    }
    endpoints.custom_base = settings.custom_base_url.clone();
    let registry = FamilyRegistry::new(client.clone(), &endpoints);

    let engine = Arc::new(Engine::new(
        pools.clone(),
        risk.clone(),
        registry.all(),
        Some(store.clone()),
        ModelRouter::new(settings.default_provider),
        settings.request_max_retries,
        settings.request_base_delay_ms,
    ));

    let potluck = PotluckStore::load(
        config_dir.join("token-store.json"),
        settings.risk.cooldown_offset,
    );
    if let Some(token) = potluck.ensure_admin_token().await {
        tracing::info!(admin_token = %token, "minted initial admin token");
    }
    potluck.spawn_persist_task(TOKEN_STORE_DEBOUNCE);

    let auth = Arc::new(AuthManager::new(client, store.clone(), endpoints));

    Ok(App {
        settings,
        pools,
        risk,
        engine,
        store,
        potluck,
        auth,
        journal,
        hub,
        pool_snapshot_path: snapshot_path,
    })
}

/// Seed the Kiro pool from `KIRO_POOL_CONFIG` (a JSON array of account
/// objects). Entries are keyed by `account_id`; already-linked accounts
/// are left alone.
async fn seed_kiro_pool(settings: &Settings, pools: &PoolManager) -> Result<(), BootstrapError> {
    use maki_common::{ProviderKind, epoch_ms};
    use maki_provider_core::{CredentialNode, CredentialSecrets};

    let Some(raw) = &settings.kiro_pool_config else {
        return Ok(());
    };
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|err| {
        BootstrapError::Config(ConfigError::Invalid {
            key: "KIRO_POOL_CONFIG",
            value: err.to_string(),
        })
    })?;

    let existing = pools.list(ProviderKind::Kiro).await;
    for entry in entries {
        let account_id = entry
            .get("account_id")
            .or_else(|| entry.get("accountId"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if account_id.is_some()
            && existing
                .iter()
                .any(|n| n.secrets.account_id == account_id)
        {
            continue;
        }
        let get = |key: &str| entry.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let mut node =
            CredentialNode::new(ProviderKind::Kiro, CredentialSecrets::default(), epoch_ms());
        node.secrets = CredentialSecrets {
            access_token: get("access_token").or_else(|| get("accessToken")),
            refresh_token: get("refresh_token").or_else(|| get("refreshToken")),
            client_id: get("client_id").or_else(|| get("clientId")),
            client_secret: get("client_secret").or_else(|| get("clientSecret")),
            region: get("region"),
            account_id,
            email: get("email"),
            machine_id: get("machine_id").or_else(|| get("machineId")),
            auth_method: get("auth_method").or_else(|| get("authMethod")),
            ..CredentialSecrets::default()
        };
        if let Some(priority) = entry.get("priority").and_then(|v| v.as_i64()) {
            node.priority = priority as i32;
        }
        pools.insert(node).await;
    }
    Ok(())
}
