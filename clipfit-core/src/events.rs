use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Outcome announcement for one request. Exactly one is emitted per request
/// that got past the lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AcquisitionEvent {
    Delivered {
        key: String,
        destination: String,
        url: String,
        parts: usize,
        fresh: bool,
    },
    Failed {
        key: String,
        destination: String,
        url: String,
        reason: String,
    },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: AcquisitionEvent);
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<AcquisitionEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEvents {
    async fn emit(&self, event: AcquisitionEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

#[async_trait]
impl EventSink for TracingEvents {
    async fn emit(&self, event: AcquisitionEvent) {
        match &event {
            AcquisitionEvent::Delivered {
                key,
                destination,
                parts,
                fresh,
                ..
            } => info!(key = %key, destination = %destination, parts, fresh, "video delivered"),
            AcquisitionEvent::Failed {
                key,
                destination,
                reason,
                ..
            } => warn!(key = %key, destination = %destination, reason = %reason, "video delivery failed"),
        }
    }
}
