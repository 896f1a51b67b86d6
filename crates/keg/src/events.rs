//! Volume event definitions and bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Volume event types.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VolumeEvent {
    /// Volume created.
    Created { name: String, driver: String, timestamp: i64 },
    /// Volume removed.
    Removed { name: String, timestamp: i64 },
    /// Volume bound into a container.
    Mounted { name: String, container: String, timestamp: i64 },
    /// Container reference released.
    Unmounted { name: String, container: String, timestamp: i64 },
}

impl VolumeEvent {
    /// The volume name this event is about.
    #[must_use]
    pub fn volume(&self) -> &str {
        match self {
            Self::Created { name, .. }
            | Self::Removed { name, .. }
            | Self::Mounted { name, .. }
            | Self::Unmounted { name, .. } => name,
        }
    }
}

/// Event bus for volume events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VolumeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    pub fn publish(&self, event: VolumeEvent) {
        // Ignore SendError (no subscribers)
        let _ = self.sender.send(event);
    }
}
