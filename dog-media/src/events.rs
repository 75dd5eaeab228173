use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::keys::StorageKey;
use crate::{EntityId, SlotKey};

/// Side-channel notifications for external subscribers (cache warmers, CDNs, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaEvent {
    /// A variant was written to its disk
    VariantUploaded {
        filename: String,
        key: StorageKey,
        slot: SlotKey,
        width: u32,
        height: u32,
        entity: Option<EntityId>,
        at: DateTime<Utc>,
    },

    /// A batch delete was issued for these keys
    VariantsDeleted {
        keys: Vec<StorageKey>,
        at: DateTime<Utc>,
    },
}

impl MediaEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::VariantUploaded { .. } => "variant_uploaded",
            Self::VariantsDeleted { .. } => "variants_deleted",
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::VariantUploaded { at, .. } => at,
            Self::VariantsDeleted { at, .. } => at,
        }
    }
}

/// Where media events go. Emitting never fails the operation that caused it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MediaEvent);
}

/// Broadcast channel fan-out
#[derive(Debug, Clone)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<MediaEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEvents {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventSink for BroadcastEvents {
    fn emit(&self, event: MediaEvent) {
        tracing::trace!(event = event.event_name(), "media event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn emit(&self, _event: MediaEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let events = BroadcastEvents::default();
        let mut rx = events.subscribe();

        events.emit(MediaEvent::VariantsDeleted {
            keys: vec![StorageKey::new("public", "blog/a.jpg")],
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_name(), "variants_deleted");
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        BroadcastEvents::new(4).emit(MediaEvent::VariantsDeleted {
            keys: Vec::new(),
            at: Utc::now(),
        });
    }
}
