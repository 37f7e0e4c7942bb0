use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use super::journal::RiskEvent;

/// Receives every risk event; implementations must not block the engine.
pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a RiskEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Fan-out for risk events: live subscribers get a broadcast copy, durable
/// sinks (journal file, tracing) are driven off-path.
#[derive(Clone)]
pub struct RiskHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<RiskEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl RiskHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RiskEvent> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: RiskEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}

/// Sink that mirrors events into the tracing log.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write<'a>(&'a self, event: &'a RiskEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(
                provider = %event.provider,
                uuid = %event.uuid,
                signal = ?event.signal,
                reason = %event.reason_code,
                status = ?event.http_status,
                "risk event"
            );
        })
    }
}
