//! Shared publish/subscribe event channel
//!
//! The bus is the seam between this pipeline and the rest of the platform:
//! error notifications arrive on it, and a completion event is published
//! back when a fix ships. Topics are independent broadcast channels, so a
//! slow subscriber on one topic never affects another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Topic carrying raw error notifications from producing components.
pub const TOPIC_ERRORS: &str = "errors.reported";

/// Topic carrying fix-completed notifications back to the platform.
pub const TOPIC_FIX_COMPLETED: &str = "fix.completed";

/// Buffered events per topic before lagging subscribers start losing them.
const TOPIC_CAPACITY: usize = 256;

/// Correlation identifiers attached to an error notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Raw error notification as delivered on [`TOPIC_ERRORS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source_id: String,
    pub message: String,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub stack_trace_text: Option<String>,
    #[serde(default)]
    pub context: Option<ErrorContext>,
    pub timestamp_ms: i64,
    /// Hint from the originating component that the failure is reproducible.
    #[serde(default)]
    pub reproducible: bool,
}

impl ErrorEvent {
    /// Event timestamp as UTC, falling back to now for garbage values.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_else(Utc::now)
    }
}

/// Everything that travels over the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Error(ErrorEvent),
    FixCompleted { error_id: Uuid, pr_url: String },
}

/// Topic-keyed broadcast bus.
///
/// Constructed once at the composition root and handed to each component
/// explicitly. There is no global accessor.
pub struct EventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusEvent> {
        let mut topics = self.topics.lock().expect("bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish an event, returning how many subscribers received it.
    /// Zero subscribers is not an error.
    pub fn publish(&self, topic: &str, event: BusEvent) -> usize {
        self.sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to a topic. Events published before the subscription are
    /// not replayed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusEvent> {
        self.sender(topic).subscribe()
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

    fn sample_event() -> ErrorEvent {
        ErrorEvent {
            source_id: "worker-1".to_string(),
            message: "boom".to_string(),
            error_kind: Some("TypeError".to_string()),
            stack_trace_text: None,
            context: None,
            timestamp_ms: 1_700_000_000_000,
            reproducible: false,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TOPIC_ERRORS);
        let delivered = bus.publish(TOPIC_ERRORS, BusEvent::Error(sample_event()));
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            BusEvent::Error(e) => assert_eq!(e.message, "boom"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let mut errors = bus.subscribe(TOPIC_ERRORS);
        bus.publish(TOPIC_FIX_COMPLETED, BusEvent::FixCompleted {
            error_id: Uuid::new_v4(),
            pr_url: "https://example.com/pr/1".to_string(),
        });
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nobody.listens", BusEvent::Error(sample_event())), 0);
    }

    #[test]
    fn test_event_timestamp_fallback() {
        let mut event = sample_event();
        event.timestamp_ms = i64::MAX;
        // Out-of-range millis fall back to the current time instead of panicking.
        let ts = event.timestamp();
        assert!(ts.timestamp() > 0);
    }
}
