//! Outbound engine events
//!
//! The engine collects events while it holds the state lock and hands them
//! to a publisher once the lock is released.

use crate::error::{MatchmakingError, Result};
use crate::types::EngineEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Default channel depth for the broadcast publisher
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Trait for publishing engine events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> Result<()>;

    /// Publish in order, logging failures instead of stopping at the first one
    async fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            let name = event.name();
            if let Err(e) = self.publish(event).await {
                warn!("Failed to publish {} event: {}", name, e);
            }
        }
    }
}

/// Fan-out over a tokio broadcast channel. Events published while nobody
/// is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream; lagging consumers see `Err(Lagged)` items
    pub fn stream(&self) -> BroadcastStream<EngineEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        if self.sender.receiver_count() == 0 {
            debug!("No subscribers for {} event", event.name());
            return Ok(());
        }
        self.sender
            .send(event)
            .map_err(|e| MatchmakingError::InternalError {
                message: format!("Failed to broadcast {} event", e.0.name()),
            })?;
        Ok(())
    }
}

/// Writes every event to the log as JSON
#[derive(Debug, Default, Clone)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        let payload = serde_json::to_string(&event).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize event: {}", e),
        })?;
        info!(event = event.name(), "{}", payload);
        Ok(())
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published events, oldest first
    pub fn events(&self) -> Vec<EngineEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of all published events (for testing)
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(EngineEvent::name).collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
