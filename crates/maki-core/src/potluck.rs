//! "Potluck" quota keys: opaque `maki_` client keys with daily counters,
//! plus the admin bearer tokens, both backed by `configs/token-store.json`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use maki_common::atomic_write_secret;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};

pub const KEY_PREFIX: &str = "maki_";
const DEFAULT_DAILY_LIMIT: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotluckKey {
    pub key: String,
    pub name: String,
    pub daily_limit: u64,
    #[serde(default)]
    pub used_today: u64,
    /// Day the counter belongs to, in the cooldown timezone.
    #[serde(default)]
    pub day_stamp: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenStoreFile {
    #[serde(default)]
    admin_tokens: Vec<String>,
    #[serde(default)]
    potluck_keys: Vec<PotluckKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaError {
    UnknownKey,
    LimitExceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsage {
    pub name: String,
    pub daily_limit: u64,
    pub used_today: u64,
    pub remaining: u64,
}

pub struct PotluckStore {
    path: PathBuf,
    keys: RwLock<HashMap<String, PotluckKey>>,
    admin_tokens: RwLock<Vec<String>>,
    offset: time::UtcOffset,
    dirty: AtomicBool,
    dirty_notify: Notify,
}

impl PotluckStore {
    pub fn load(path: PathBuf, offset: time::UtcOffset) -> Arc<Self> {
        let file: TokenStoreFile = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        let keys = file
            .potluck_keys
            .into_iter()
            .map(|key| (key.key.clone(), key))
            .collect();
        Arc::new(Self {
            path,
            keys: RwLock::new(keys),
            admin_tokens: RwLock::new(file.admin_tokens),
            offset,
            dirty: AtomicBool::new(false),
            dirty_notify: Notify::new(),
        })
    }

    /// Make sure at least one admin token exists; returns it when freshly
    /// minted so the operator can read it off the boot log.
    pub async fn ensure_admin_token(&self) -> Option<String> {
        let mut tokens = self.admin_tokens.write().await;
        if !tokens.is_empty() {
            return None;
        }
        let token = random_token();
        tokens.push(token.clone());
        drop(tokens);
        self.mark_dirty();
        Some(token)
    }

    pub async fn is_admin(&self, token: &str) -> bool {
        self.admin_tokens
            .read()
            .await
            .iter()
            .any(|candidate| candidate == token)
    }

    pub async fn create_key(&self, name: &str, daily_limit: Option<u64>, now_ms: i64) -> PotluckKey {
        let key = PotluckKey {
            key: format!("{KEY_PREFIX}{}", random_token()),
            name: name.to_string(),
            daily_limit: daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
            used_today: 0,
            day_stamp: day_stamp(now_ms, self.offset),
            created_at_ms: now_ms,
        };
        self.keys
            .write()
            .await
            .insert(key.key.clone(), key.clone());
        self.mark_dirty();
        key
    }

    pub async fn delete_key(&self, key: &str) -> bool {
        let removed = self.keys.write().await.remove(key).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub async fn list_keys(&self) -> Vec<PotluckKey> {
        let mut keys: Vec<PotluckKey> = self.keys.read().await.values().cloned().collect();
        keys.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        keys
    }

    /// Atomically check the daily budget and count one request against it.
    /// Counters reset at midnight in the configured timezone.
    pub async fn check_and_count(&self, key: &str, now_ms: i64) -> Result<QuotaUsage, QuotaError> {
        let today = day_stamp(now_ms, self.offset);
        let mut keys = self.keys.write().await;
        let Some(entry) = keys.get_mut(key) else {
            return Err(QuotaError::UnknownKey);
        };
        if entry.day_stamp != today {
            entry.day_stamp = today;
            entry.used_today = 0;
        }
        if entry.used_today >= entry.daily_limit {
            return Err(QuotaError::LimitExceeded);
        }
        entry.used_today += 1;
        let usage = QuotaUsage {
            name: entry.name.clone(),
            daily_limit: entry.daily_limit,
            used_today: entry.used_today,
            remaining: entry.daily_limit - entry.used_today,
        };
        drop(keys);
        self.mark_dirty();
        Ok(usage)
    }

    pub async fn usage(&self, key: &str, now_ms: i64) -> Option<QuotaUsage> {
        let today = day_stamp(now_ms, self.offset);
        let keys = self.keys.read().await;
        let entry = keys.get(key)?;
        let used = if entry.day_stamp == today {
            entry.used_today
        } else {
            0
        };
        Some(QuotaUsage {
            name: entry.name.clone(),
            daily_limit: entry.daily_limit,
            used_today: used,
            remaining: entry.daily_limit.saturating_sub(used),
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.dirty_notify.notify_one();
    }

    pub fn spawn_persist_task(
        self: &Arc<Self>,
        debounce: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.dirty_notify.notified().await;
                tokio::time::sleep(debounce).await;
                if !store.dirty.swap(false, Ordering::AcqRel) {
                    continue;
                }
                store.write_file().await;
            }
        })
    }

    pub async fn flush_now(&self) {
        self.dirty.store(false, Ordering::Release);
        self.write_file().await;
    }

    async fn write_file(&self) {
        let file = TokenStoreFile {
            admin_tokens: self.admin_tokens.read().await.clone(),
            potluck_keys: self.keys.read().await.values().cloned().collect(),
        };
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(err) = atomic_write_secret(&self.path, &bytes) {
                    tracing::warn!(error = %err, "token store write failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "token store encode failed"),
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn day_stamp(now_ms: i64, offset: time::UtcOffset) -> String {
    let dt = time::OffsetDateTime::from_unix_timestamp(now_ms.div_euclid(1_000))
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset);
    format!(
        "{:04}-{:02}-{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<PotluckStore> {
        let path = std::env::temp_dir().join(format!(
            "maki-potluck-{}-{}.json",
            std::process::id(),
            maki_common::epoch_ms()
        ));
        PotluckStore::load(path, time::UtcOffset::UTC)
    }

    #[tokio::test]
    async fn keys_are_prefixed_and_counted() {
        let store = store();
        let key = store.create_key("team-a", Some(2), 0).await;
        assert!(key.key.starts_with(KEY_PREFIX));

        assert!(store.check_and_count(&key.key, 1_000).await.is_ok());
        let usage = store.check_and_count(&key.key, 2_000).await.unwrap();
        assert_eq!(usage.remaining, 0);
        assert_eq!(
            store.check_and_count(&key.key, 3_000).await.unwrap_err(),
            QuotaError::LimitExceeded
        );
    }

    #[tokio::test]
    async fn counters_reset_at_midnight() {
        let store = store();
        let key = store.create_key("team-b", Some(1), 0).await;
        store.check_and_count(&key.key, 1_000).await.unwrap();
        assert!(store.check_and_count(&key.key, 2_000).await.is_err());

        // Next day in UTC.
        let next_day_ms = 25 * 60 * 60 * 1_000;
        let usage = store.check_and_count(&key.key, next_day_ms).await.unwrap();
        assert_eq!(usage.used_today, 1);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let store = store();
        assert_eq!(
            store.check_and_count("maki_nope", 0).await.unwrap_err(),
            QuotaError::UnknownKey
        );
    }
}
