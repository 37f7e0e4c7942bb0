use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use maki_common::ProviderKind;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::credential::CredentialNode;
use crate::family::RefreshedTokens;
use crate::select::{self, SelectError};
use crate::settings::{PoolTuning, RotationPolicy};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolShard {
    nodes: Vec<CredentialNode>,
    #[serde(default)]
    cursor: usize,
}

/// Process-wide credential pools, one shard (and one writer lock) per
/// provider kind. Counters live on the nodes; every mutation schedules a
/// debounced snapshot to disk.
pub struct PoolManager {
    shards: HashMap<ProviderKind, Arc<RwLock<PoolShard>>>,
    tuning: HashMap<ProviderKind, PoolTuning>,
    default_tuning: PoolTuning,
    rotation: RotationPolicy,
    dirty: AtomicBool,
    dirty_notify: Notify,
}

impl PoolManager {
    pub fn new(
        tuning: HashMap<ProviderKind, PoolTuning>,
        default_tuning: PoolTuning,
        rotation: RotationPolicy,
    ) -> Self {
        let shards = ProviderKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(RwLock::new(PoolShard::default()))))
            .collect();
        Self {
            shards,
            tuning,
            default_tuning,
            rotation,
            dirty: AtomicBool::new(false),
            dirty_notify: Notify::new(),
        }
    }

    fn shard(&self, kind: ProviderKind) -> &Arc<RwLock<PoolShard>> {
        // Shards exist for every kind; the map is built in `new`.
        self.shards.get(&kind).expect("shard exists for every kind")
    }

    fn effective_tuning(&self, kind: ProviderKind) -> PoolTuning {
        let mut tuning = self
            .tuning
            .get(&kind)
            .copied()
            .unwrap_or(self.default_tuning);
        if self.rotation.enabled
            && let Some(strategy) = self.rotation.strategy
        {
            tuning.strategy = strategy;
        }
        tuning
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.dirty_notify.notify_one();
    }

    /// Insert or replace by uuid. A uuid is unique across all pools; the
    /// node's own provider shard is the only place it can live.
    pub async fn insert(&self, mut node: CredentialNode) {
        let shard = self.shard(node.provider);
        let mut guard = shard.write().await;
        // Kiro siblings (same account) must present one machine id.
        if node.provider == ProviderKind::Kiro
            && node.secrets.machine_id.is_none()
            && node.secrets.account_id.is_some()
            && let Some(sibling) = guard
                .nodes
                .iter()
                .find(|n| n.uuid != node.uuid && n.secrets.account_id == node.secrets.account_id)
        {
            node.secrets.machine_id = Some(sibling.machine_id());
        }
        match guard.nodes.iter_mut().find(|n| n.uuid == node.uuid) {
            Some(existing) => *existing = node,
            None => guard.nodes.push(node),
        }
        drop(guard);
        self.mark_dirty();
    }

    pub async fn remove(&self, kind: ProviderKind, uuid: Uuid) -> bool {
        let mut guard = self.shard(kind).write().await;
        let before = guard.nodes.len();
        guard.nodes.retain(|n| n.uuid != uuid);
        let removed = guard.nodes.len() != before;
        drop(guard);
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub async fn get(&self, kind: ProviderKind, uuid: Uuid) -> Option<CredentialNode> {
        let guard = self.shard(kind).read().await;
        guard.nodes.iter().find(|n| n.uuid == uuid).cloned()
    }

    pub async fn list(&self, kind: ProviderKind) -> Vec<CredentialNode> {
        self.shard(kind).read().await.nodes.clone()
    }

    pub async fn select(
        &self,
        kind: ProviderKind,
        now_ms: i64,
    ) -> Result<CredentialNode, SelectError> {
        self.select_excluding(kind, &HashSet::new(), now_ms).await
    }

    /// Pick an available node outside `exclude`, bump its usage counters and
    /// return a snapshot of it. The fail-over loop passes its tried set here
    /// so no uuid is handed out twice per request.
    pub async fn select_excluding(
        &self,
        kind: ProviderKind,
        exclude: &HashSet<Uuid>,
        now_ms: i64,
    ) -> Result<CredentialNode, SelectError> {
        let tuning = self.effective_tuning(kind);
        let mut guard = self.shard(kind).write().await;
        if guard.nodes.is_empty() {
            return Err(SelectError::NoHealthyNode);
        }
        let shard = &mut *guard;
        let Some(node) = select::pick(&mut shard.nodes, &mut shard.cursor, &tuning, now_ms, exclude)
        else {
            return Err(SelectError::NoHealthyNode);
        };
        node.usage_count += 1;
        node.last_used_ms = now_ms;
        let chosen = node.clone();
        drop(guard);
        self.mark_dirty();
        Ok(chosen)
    }

    /// Mutate one node under the shard writer lock.
    pub async fn update<F>(&self, kind: ProviderKind, uuid: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut CredentialNode),
    {
        let mut guard = self.shard(kind).write().await;
        let Some(node) = guard.nodes.iter_mut().find(|n| n.uuid == uuid) else {
            return false;
        };
        mutate(node);
        drop(guard);
        self.mark_dirty();
        true
    }

    /// Apply refreshed tokens to a node and, when account-aware rotation is
    /// on, to every sibling sharing its account key.
    pub async fn apply_refresh(&self, kind: ProviderKind, uuid: Uuid, tokens: &RefreshedTokens) {
        let mut guard = self.shard(kind).write().await;
        let account_key = guard
            .nodes
            .iter()
            .find(|n| n.uuid == uuid)
            .and_then(|n| n.account_key());
        for node in guard.nodes.iter_mut() {
            let is_target = node.uuid == uuid;
            let is_sibling = self.rotation.enabled
                && account_key.is_some()
                && node.account_key() == account_key;
            if !is_target && !is_sibling {
                continue;
            }
            if let Some(token) = &tokens.access_token {
                node.secrets.access_token = Some(token.clone());
            }
            if let Some(token) = &tokens.refresh_token {
                node.secrets.refresh_token = Some(token.clone());
            }
            if let Some(token) = &tokens.id_token {
                node.secrets.id_token = Some(token.clone());
            }
            if tokens.expires_at_ms.is_some() {
                node.expires_at_ms = tokens.expires_at_ms;
            }
            node.needs_refresh = false;
        }
        drop(guard);
        self.mark_dirty();
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let mut pools = HashMap::new();
        for (kind, shard) in &self.shards {
            let guard = shard.read().await;
            pools.insert(kind.slug().to_string(), guard.nodes.clone());
        }
        PoolSnapshot { pools }
    }

    pub async fn load_snapshot(&self, snapshot: PoolSnapshot) {
        for (slug, nodes) in snapshot.pools {
            let Some(kind) = ProviderKind::parse(&slug) else {
                continue;
            };
            let mut guard = self.shard(kind).write().await;
            for node in nodes {
                if node.provider != kind {
                    continue;
                }
                if !guard.nodes.iter().any(|n| n.uuid == node.uuid) {
                    guard.nodes.push(node);
                }
            }
        }
    }

    /// Single background writer: wakes on the first mutation, lets the
    /// debounce window absorb the burst, then snapshots once.
    pub fn spawn_persist_task(
        self: &Arc<Self>,
        path: PathBuf,
        debounce: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                manager.dirty_notify.notified().await;
                tokio::time::sleep(debounce).await;
                if !manager.dirty.swap(false, Ordering::AcqRel) {
                    continue;
                }
                let snapshot = manager.snapshot().await;
                match serde_json::to_vec_pretty(&snapshot) {
                    Ok(bytes) => {
                        if let Err(err) = maki_common::atomic_write_secret(&path, &bytes) {
                            tracing::warn!(error = %err, "pool snapshot write failed");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "pool snapshot encode failed"),
                }
            }
        })
    }

    /// Flush immediately, bypassing the debounce (shutdown path).
    pub async fn flush_now(&self, path: &std::path::Path) {
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.snapshot().await;
        if let Ok(bytes) = serde_json::to_vec_pretty(&snapshot)
            && let Err(err) = maki_common::atomic_write_secret(path, &bytes)
        {
            tracing::warn!(error = %err, "pool snapshot flush failed");
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pools: HashMap<String, Vec<CredentialNode>>,
}
