//! Outbound notifications to observers.
//!
//! The core publishes `(topic, payload)` pairs whenever incident, assignment
//! or unit state changes. Delivery is best-effort: a failed publish is logged
//! and never unwinds the state change that produced it.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Incidents,
    Units,
    Assignments,
    AssignmentComplete,
    Notify,
    UnitRoute,
    UnitLocationBatch,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Incidents => "/topic/incidents",
            Topic::Units => "/topic/emergency-units",
            Topic::Assignments => "/topic/assignments",
            Topic::AssignmentComplete => "/topic/assignment-complete",
            Topic::Notify => "/topic/notify",
            Topic::UnitRoute => "/topic/unit-route",
            Topic::UnitLocationBatch => "/topic/unit-location-batch",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: Topic,
        #[source]
        source: serde_json::Error,
    },
    #[error("broadcast channel closed")]
    Closed,
    #[error("sink rejected message: {0}")]
    Rejected(String),
}

/// One published message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), PublishError>;
}

/// Serialize `payload` and publish it, logging and swallowing any failure.
pub fn publish<T: Serialize + ?Sized>(sink: &dyn Broadcaster, topic: Topic, payload: &T) {
    let result = serde_json::to_value(payload)
        .map_err(|source| PublishError::Encode { topic, source })
        .and_then(|value| sink.publish(topic, value));
    if let Err(err) = result {
        tracing::warn!(%topic, error = %err, "publish failed");
    }
}

/// Fan-out over a tokio broadcast channel. Publishing with no subscribers
/// succeeds; lagging subscribers lose the oldest messages.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Message>,
}

impl ChannelBroadcaster {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), PublishError> {
        // Err from send only means nobody is listening.
        let _ = self.sender.send(Message { topic, payload });
        Ok(())
    }
}

/// Writes every message to the `debug` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBroadcaster;

impl Broadcaster for LoggingBroadcaster {
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), PublishError> {
        tracing::debug!(%topic, %payload, "publish");
        Ok(())
    }
}
