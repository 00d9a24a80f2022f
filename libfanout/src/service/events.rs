//! Event system for publish and sync progress
//!
//! An in-process event bus built on `tokio::sync::broadcast`. The
//! orchestrators emit events while they work; any number of subscribers
//! (the daemon's log, a future websocket bridge) can consume them.
//!
//! Emitting never blocks: with no subscribers the event is dropped, and a
//! lagging subscriber misses the oldest events instead of slowing emitters.
//!
//! # Example
//!
//! ```no_run
//! use libfanout::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     post_id: "abc123".to_string(),
//!     org_id: "org-1".to_string(),
//!     platforms: vec!["facebook".to_string()],
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: Event) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted by the orchestrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A post was claimed and fan-out begins
    PublishStarted {
        post_id: String,
        org_id: String,
        platforms: Vec<String>,
    },

    /// One platform finished its publish attempt
    PlatformPublished {
        post_id: String,
        platform: String,
        success: bool,
        remote_post_id: Option<String>,
        error: Option<String>,
    },

    /// Fan-out finished and the aggregated status was stored
    PublishCompleted { post_id: String, status: String },

    /// The job failed before an aggregated status could be stored
    PublishFailed { post_id: String, error: String },

    /// A new inbound message was stored by sync
    MessageReceived {
        org_id: String,
        contact_id: String,
        message_id: String,
        platform: String,
    },

    /// A sync run finished
    SyncCompleted { total: u64 },
}
