//! Mode/Control Bus
//!
//! Opaque pub/sub channel between the core and its host (UI panels,
//! other contexts). Publishing never fails: events sent with no live
//! subscriber are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::generator::Suggestion;
use crate::model::{Message, Mode};

const DEFAULT_CAPACITY: usize = 64;

/// Who raised a control event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The surrounding host (UI, another context)
    Host,
    /// The orchestrator itself
    Core,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    ModeChanged {
        mode: Mode,
        reason: Option<String>,
    },
    EmergencyStop {
        origin: Origin,
    },
    ConversationUpdate {
        conversation_id: Option<String>,
        messages: Vec<Message>,
    },
    Suggestions {
        /// Referenced by feedback on these suggestions
        request_id: String,
        suggestions: Vec<Suggestion>,
    },
    SuggestionFailed {
        error: String,
    },
    Escalated {
        reason: String,
    },
    GoalCompleted {
        summary: String,
    },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::ModeChanged { .. } => "mode_changed",
            ControlEvent::EmergencyStop { .. } => "emergency_stop",
            ControlEvent::ConversationUpdate { .. } => "conversation_update",
            ControlEvent::Suggestions { .. } => "suggestions",
            ControlEvent::SuggestionFailed { .. } => "suggestion_failed",
            ControlEvent::Escalated { .. } => "escalated",
            ControlEvent::GoalCompleted { .. } => "goal_completed",
        }
    }
}

/// Broadcast bus, cheap to clone
#[derive(Clone)]
pub struct ControlBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl ControlBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ControlEvent) {
        debug!("Bus: {}", event.name());
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Ask the core to stop immediately
    pub fn request_emergency_stop(&self) {
        self.publish(ControlEvent::EmergencyStop { origin: Origin::Host });
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = ControlBus::new();
        bus.publish(ControlEvent::Escalated { reason: "dropped".into() });

        let mut rx = bus.subscribe();
        bus.request_emergency_stop();

        let event = rx.recv().await.unwrap();
        assert_eq!(event, ControlEvent::EmergencyStop { origin: Origin::Host });
        assert_eq!(event.name(), "emergency_stop");
    }

    #[test]
    fn test_event_wire_format() {
        let event = ControlEvent::ModeChanged {
            mode: Mode::Autonomous,
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mode_changed");
        assert_eq!(json["mode"], "autonomous");
    }
}
