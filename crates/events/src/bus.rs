//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`SessionEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` between the session
//! orchestrator, its poll callbacks, and any observers.

use chrono::{DateTime, Utc};
use madsea_core::job::SessionProgress;
use madsea_core::state::SessionState;
use madsea_core::types::SceneId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::notification::Notification;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    /// The orchestrator moved between states.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Aggregate progress of the running batch changed.
    Progress(SessionProgress),

    /// Progress of a single-scene generation.
    SceneProgress { scene_id: SceneId, percent: u8 },

    /// A scene received its output.
    SceneGenerated {
        scene_id: SceneId,
        image: Option<String>,
    },

    /// A message for the user.
    Notification(Notification),
}

/// A session event with the time it was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(from: SessionState, to: SessionState) -> Self {
        Self::new(SessionEventKind::StateChanged { from, to })
    }

    pub fn progress(progress: SessionProgress) -> Self {
        Self::new(SessionEventKind::Progress(progress))
    }

    pub fn notification(notification: Notification) -> Self {
        Self::new(SessionEventKind::Notification(notification))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use madsea_events::bus::{EventBus, SessionEvent};
/// use madsea_events::Notification;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SessionEvent::notification(Notification::info("ready")));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: SessionEvent) {
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Shorthand for publishing a notification.
    pub fn notify(&self, notification: Notification) {
        self.publish(SessionEvent::notification(notification));
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationLevel;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::state_changed(
            SessionState::Idle,
            SessionState::Submitting,
        ));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(
            received.kind,
            SessionEventKind::StateChanged {
                from: SessionState::Idle,
                to: SessionState::Submitting,
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.notify(Notification::warning("pick a style"));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.kind, e2.kind);
        match e1.kind {
            SessionEventKind::Notification(n) => {
                assert_eq!(n.level, NotificationLevel::Warning);
            }
            other => panic!("Expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(SessionEvent::progress(SessionProgress::started(3)));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = SessionEvent::progress(SessionProgress::started(3));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["totalScenes"], 3);
        assert!(json["timestamp"].is_string());
    }
}
