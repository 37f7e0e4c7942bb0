use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use maki_common::{FsError, ProviderKind, atomic_write_secret, epoch_ms};
use maki_provider_core::{CredentialNode, CredentialSecrets, LifecycleState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One credential file under `configs/<slug>/`. Tokens live here; runtime
/// counters do not (those go to the pool snapshot).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// ISO-8601; absent means the provider never expires the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(default, rename = "LETTA_AGENT_ID", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Credential files on disk plus the uuid → path index used to rewrite a
/// node's file after refresh.
pub struct CredentialStore {
    root: PathBuf,
    paths: Mutex<HashMap<Uuid, PathBuf>>,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn provider_dir(&self, kind: ProviderKind) -> PathBuf {
        self.root.join(kind.slug())
    }

    /// Persist a freshly acquired credential as
    /// `configs/<slug>/<timestamp>_<slug>[-<email>].json`, mode 0600.
    pub fn persist_new(&self, node: &CredentialNode) -> Result<PathBuf, FsError> {
        let slug = node.provider.slug();
        let stamp = epoch_ms() / 1_000;
        let name = match node.secrets.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) => format!("{stamp}_{slug}-{}.json", sanitize(email)),
            None => format!("{stamp}_{slug}.json"),
        };
        let path = self.provider_dir(node.provider).join(name);
        self.write_node(&path, node)?;
        self.paths.lock().expect("paths lock").insert(node.uuid, path.clone());
        Ok(path)
    }

    /// Rewrite the file backing `node` after a refresh. Falls back to a new
    /// file when the node was never linked to one.
    pub fn persist_tokens(&self, node: &CredentialNode) -> Result<PathBuf, FsError> {
        let existing = self.paths.lock().expect("paths lock").get(&node.uuid).cloned();
        match existing {
            Some(path) => {
                self.write_node(&path, node)?;
                Ok(path)
            }
            None => self.persist_new(node),
        }
    }

    fn write_node(&self, path: &Path, node: &CredentialNode) -> Result<(), FsError> {
        let file = CredentialFile {
            uuid: Some(node.uuid),
            access_token: node.secrets.access_token.clone(),
            refresh_token: node.secrets.refresh_token.clone(),
            id_token: node.secrets.id_token.clone(),
            api_key: node.secrets.api_key.clone(),
            expires_at: node.expires_at_ms.map(iso8601),
            account_id: node.secrets.account_id.clone(),
            email: node.secrets.email.clone(),
            client_id: node.secrets.client_id.clone(),
            client_secret: node.secrets.client_secret.clone(),
            region: node.secrets.region.clone(),
            machine_id: node.secrets.machine_id.clone(),
            agent_id: node.secrets.agent_id.clone(),
            auth_method: node.secrets.auth_method.clone(),
            base_url: node.secrets.base_url.clone(),
            priority: Some(node.priority),
        };
        let bytes = serde_json::to_vec_pretty(&file).unwrap_or_default();
        atomic_write_secret(path, &bytes)
    }

    /// Auto-link pass: scan every provider directory and surface each
    /// credential file as a pool node. Files without a uuid get one assigned
    /// and written back, so identity is stable across restarts.
    pub fn scan(&self) -> Vec<CredentialNode> {
        let mut nodes = Vec::new();
        for kind in ProviderKind::ALL {
            let dir = self.provider_dir(kind);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match self.load_file(kind, &path) {
                    Ok(node) => nodes.push(node),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping credential file");
                    }
                }
            }
        }
        nodes
    }

    fn load_file(&self, kind: ProviderKind, path: &Path) -> Result<CredentialNode, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        let mut file: CredentialFile = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;

        let mut needs_rewrite = false;
        let uuid = match file.uuid {
            Some(uuid) => uuid,
            None => {
                needs_rewrite = true;
                Uuid::new_v4()
            }
        };
        file.uuid = Some(uuid);

        let mut node = CredentialNode::new(kind, CredentialSecrets::default(), epoch_ms());
        node.uuid = uuid;
        node.priority = file.priority.unwrap_or(100);
        node.expires_at_ms = file.expires_at.as_deref().and_then(parse_iso8601);
        node.secrets = CredentialSecrets {
            access_token: file.access_token.clone(),
            refresh_token: file.refresh_token.clone(),
            id_token: file.id_token.clone(),
            api_key: file.api_key.clone(),
            client_id: file.client_id.clone(),
            client_secret: file.client_secret.clone(),
            region: file.region.clone(),
            account_id: file.account_id.clone(),
            email: file.email.clone(),
            machine_id: file.machine_id.clone(),
            agent_id: file.agent_id.clone(),
            auth_method: file.auth_method.clone(),
            base_url: file.base_url.clone(),
        };
        node.state = LifecycleState::Healthy;

        if needs_rewrite {
            let bytes = serde_json::to_vec_pretty(&file).unwrap_or_default();
            if let Err(err) = atomic_write_secret(path, &bytes) {
                tracing::warn!(path = %path.display(), error = %err, "uuid backfill failed");
            }
        }
        self.paths
            .lock()
            .expect("paths lock")
            .insert(uuid, path.to_path_buf());
        Ok(node)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == '@' {
            c
        } else {
            '_'
        })
        .collect()
}

fn iso8601(epoch_ms: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp(epoch_ms.div_euclid(1_000))
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn parse_iso8601(raw: &str) -> Option<i64> {
    time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp() * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (CredentialStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "maki-store-{}-{}",
            std::process::id(),
            epoch_ms()
        ));
        (CredentialStore::new(&root), root)
    }

    #[test]
    fn persist_scan_round_trip() {
        let (store, root) = temp_store();
        let mut node =
            CredentialNode::new(ProviderKind::Codex, CredentialSecrets::default(), 1_000);
        node.secrets.access_token = Some("at-1".to_string());
        node.secrets.refresh_token = Some("rt-1".to_string());
        node.secrets.email = Some("dev@example.com".to_string());
        node.secrets.account_id = Some("acct-1".to_string());
        node.expires_at_ms = Some(1_900_000_000_000);

        let path = store.persist_new(&node).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_codex-dev@example.com.json"), "{name}");

        let scanned = store.scan();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].uuid, node.uuid);
        assert_eq!(scanned[0].secrets.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(scanned[0].expires_at_ms, Some(1_900_000_000_000));

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn scan_backfills_missing_uuid() {
        let (store, root) = temp_store();
        let dir = root.join("qwen");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("1700_qwen.json"),
            br#"{"access_token":"a","refresh_token":"r"}"#,
        )
        .unwrap();

        let first = store.scan();
        assert_eq!(first.len(), 1);
        let assigned = first[0].uuid;

        let second = store.scan();
        assert_eq!(second[0].uuid, assigned, "uuid is stable once backfilled");

        std::fs::remove_dir_all(root).unwrap();
    }
}
