use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use maki_common::ProviderKind;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::hub::EventSink;
use super::signal::RiskSignal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub at_ms: i64,
    pub uuid: Uuid,
    pub provider: ProviderKind,
    pub signal: RiskSignal,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_snippet: Option<String>,
}

/// Bounded in-memory ring of the latest risk events with a debounced JSON
/// snapshot on disk. Crash loss is limited to the most recent debounce
/// window.
pub struct JournalSink {
    ring: Mutex<VecDeque<RiskEvent>>,
    max_events: usize,
    path: PathBuf,
    dirty: AtomicBool,
    dirty_notify: Notify,
}

impl JournalSink {
    pub fn new(path: PathBuf, max_events: usize) -> Arc<Self> {
        Arc::new(Self {
            ring: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events: max_events.max(1),
            path,
            dirty: AtomicBool::new(false),
            dirty_notify: Notify::new(),
        })
    }

    pub async fn push(&self, event: RiskEvent) {
        let mut ring = self.ring.lock().await;
        if ring.len() == self.max_events {
            ring.pop_front();
        }
        ring.push_back(event);
        drop(ring);
        self.dirty.store(true, Ordering::Release);
        self.dirty_notify.notify_one();
    }

    pub async fn events(&self) -> Vec<RiskEvent> {
        self.ring.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.ring.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn spawn_flush_task(
        self: &Arc<Self>,
        debounce: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let journal = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                journal.dirty_notify.notified().await;
                tokio::time::sleep(debounce).await;
                if !journal.dirty.swap(false, Ordering::AcqRel) {
                    continue;
                }
                journal.write_snapshot().await;
            }
        })
    }

    pub async fn flush_now(&self) {
        self.dirty.store(false, Ordering::Release);
        self.write_snapshot().await;
    }

    async fn write_snapshot(&self) {
        let events = self.events().await;
        match serde_json::to_vec_pretty(&events) {
            Ok(bytes) => {
                if let Err(err) = maki_common::atomic_write_secret(&self.path, &bytes) {
                    tracing::warn!(error = %err, "risk journal write failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "risk journal encode failed"),
        }
    }
}

impl EventSink for JournalSink {
    fn write<'a>(&'a self, event: &'a RiskEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.push(event.clone()).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> RiskEvent {
        RiskEvent {
            at_ms: n,
            uuid: Uuid::new_v4(),
            provider: ProviderKind::Kiro,
            signal: RiskSignal::Success,
            reason_code: "http_200".to_string(),
            http_status: Some(200),
            error_snippet: None,
        }
    }

    #[tokio::test]
    async fn ring_never_exceeds_max_events() {
        let journal = JournalSink::new(std::env::temp_dir().join("maki-journal-test.json"), 3);
        for n in 0..10 {
            journal.push(event(n)).await;
        }
        assert_eq!(journal.len().await, 3);
        let events = journal.events().await;
        assert_eq!(events.first().unwrap().at_ms, 7);
        assert_eq!(events.last().unwrap().at_ms, 9);
    }
}
