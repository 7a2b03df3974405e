//! Lifecycle event broadcasting
//!
//! The engine publishes typed events on a `tokio::sync::broadcast` channel.
//! Notification transports (SSE, websockets, logging sinks) subscribe here;
//! the engine never waits on them, and a send with no subscribers is fine.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::JobMode;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine lifecycle notifications
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    JobStarted {
        channel_id: String,
        mode: JobMode,
        profile: String,
        hwaccel: String,
    },
    JobStopped {
        channel_id: String,
        mode: JobMode,
    },
    JobFailed {
        channel_id: String,
        mode: JobMode,
        reason: String,
    },
    ThroughputUpdated {
        channel_id: String,
        mode: JobMode,
        rate_mbps: f64,
        total_mb: f64,
    },
    CatalogChanged {
        channel_count: usize,
    },
}

/// Broadcast hub handed to every engine component
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; receiver lag or absence is not an error
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::CatalogChanged { channel_count: 0 });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(LifecycleEvent::JobStopped {
            channel_id: "42".to_string(),
            mode: JobMode::Hls,
        });
        match rx.recv().await.unwrap() {
            LifecycleEvent::JobStopped { channel_id, mode } => {
                assert_eq!(channel_id, "42");
                assert_eq!(mode, JobMode::Hls);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
