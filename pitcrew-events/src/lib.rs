//! PITCREW Events - Conversation lifecycle broadcasting
//!
//! Best-effort, fire-and-forget notifications describing conversation and
//! meeting milestones. Observers (a WebSocket layer, a TUI, tests) subscribe
//! to the bus; delivery failure to one subscriber never affects another, and
//! publishing with no subscribers at all is fine.

use pitcrew_core::{AgentKind, ConversationKind, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Milestones broadcast while conversations and meetings run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FloorEvent {
    /// A pairwise conversation began.
    ConversationStart {
        conversation_id: EntityId,
        initiator: AgentKind,
        target: AgentKind,
        topic: String,
        trigger: String,
        timestamp: Timestamp,
    },

    /// One utterance was appended to a transcript (pairwise or meeting).
    TurnMessage {
        conversation_id: EntityId,
        turn: usize,
        speaker: AgentKind,
        speaker_name: String,
        content: String,
        /// Meeting round (1-based); None for pairwise turns.
        round: Option<u32>,
        timestamp: Timestamp,
    },

    /// A pairwise conversation finished.
    ConversationEnd {
        conversation_id: EntityId,
        conclusion: String,
        turn_count: usize,
        timestamp: Timestamp,
    },

    /// A meeting convened.
    MeetingStart {
        conversation_id: EntityId,
        kind: ConversationKind,
        /// Slot name or trigger label ("morning", "emergency", "user_debate").
        trigger: String,
        participants: Vec<AgentKind>,
        topic: String,
        timestamp: Timestamp,
    },

    /// A meeting adjourned.
    MeetingEnd {
        conversation_id: EntityId,
        trigger: String,
        conclusion: String,
        timestamp: Timestamp,
    },
}

impl FloorEvent {
    /// Stable label for logging and wire-level filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationStart { .. } => "conversation_start",
            Self::TurnMessage { .. } => "turn_message",
            Self::ConversationEnd { .. } => "conversation_end",
            Self::MeetingStart { .. } => "meeting_start",
            Self::MeetingEnd { .. } => "meeting_end",
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// Broadcast bus for floor events, backed by a tokio broadcast channel.
///
/// Slow subscribers lag and drop events rather than applying backpressure to
/// the conversation engine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FloorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Non-blocking; an empty
    /// subscriber list simply drops the event.
    pub fn publish(&self, event: FloorEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receiver_count) => {
                debug!(event_type, receivers = receiver_count, "broadcast event");
            }
            Err(_) => {
                debug!(event_type, "no receivers for event");
            }
        }
    }

    /// Subscribe to all future events. The receiver must be polled to avoid
    /// lagging.
    pub fn subscribe(&self) -> broadcast::Receiver<FloorEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pitcrew_core::new_entity_id;

    fn end_event() -> FloorEvent {
        FloorEvent::ConversationEnd {
            conversation_id: new_entity_id(),
            conclusion: "agreed".to_string(),
            turn_count: 4,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(end_event());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "conversation_end");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        // Must not panic or block.
        bus.publish(end_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new(16);
        let dead = bus.subscribe();
        let mut live = bus.subscribe();
        drop(dead);
        bus.publish(end_event());
        assert!(live.recv().await.is_ok());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = FloorEvent::TurnMessage {
            conversation_id: new_entity_id(),
            turn: 2,
            speaker: AgentKind::News,
            speaker_name: "Bolt".to_string(),
            content: "headline crossed".to_string(),
            round: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_message");
        assert_eq!(json["speaker"], "news");
        assert_eq!(json["turn"], 2);
    }

    #[test]
    fn test_event_type_labels() {
        assert_eq!(end_event().event_type(), "conversation_end");
        let start = FloorEvent::MeetingStart {
            conversation_id: new_entity_id(),
            kind: ConversationKind::Meeting,
            trigger: "morning".to_string(),
            participants: AgentKind::all().to_vec(),
            topic: "t".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(start.event_type(), "meeting_start");
    }
}
