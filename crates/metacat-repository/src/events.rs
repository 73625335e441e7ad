//! Change event sinks
//!
//! Every committed create, update, delete and restore produces a
//! [`ChangeEvent`]. The repository hands events to a [`ChangeEventSink`] after
//! the transaction has committed; delivery problems are logged and never undo
//! the write.

use async_trait::async_trait;
use metacat_core::ChangeEvent;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChangeEventSink: Send + Sync {
    async fn publish(&self, event: &ChangeEvent);
}

/// Logs each event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl ChangeEventSink for LoggingSink {
    async fn publish(&self, event: &ChangeEvent) {
        tracing::info!(
            event_type = ?event.event_type,
            entity_type = %event.entity_type,
            fqn = %event.fqn,
            previous_version = %event.previous_version,
            current_version = %event.current_version,
            user = %event.user_name,
            "Change event"
        );
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl ChangeEventSink for NoopSink {
    async fn publish(&self, _event: &ChangeEvent) {}
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ChangeEventSink for ChannelSink {
    async fn publish(&self, event: &ChangeEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::warn!(fqn = %event.fqn, "Change event receiver dropped, event lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacat_core::{Entity, EntityVersion, EventType};

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let entity = Entity::new("table", "orders");
        let event = ChangeEvent::for_entity(&entity, EventType::EntityCreated, EntityVersion::INITIAL);

        sink.publish(&event).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, entity.id);
        assert_eq!(received.event_type, EventType::EntityCreated);
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let entity = Entity::new("table", "orders");
        sink.publish(&ChangeEvent::for_entity(&entity, EventType::EntityDeleted, entity.version))
            .await;
    }
}
