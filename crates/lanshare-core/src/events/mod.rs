//! Realtime events for connected viewers.
//!
//! The upload manager publishes through the [`EventSink`] trait once a file
//! has been finalized. Delivery is fire-and-forget: a sink never reports
//! failure back, so a missing or slow viewer can never undo a finalization.
//!
//! [`EventBus`] is the sink used by the web server. It fans events out over
//! a `tokio::sync::broadcast` channel that the SSE endpoint subscribes to.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of events buffered per slow subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Receiver of upload notifications.
pub trait EventSink: Send + Sync {
    /// A finalized file is now part of the visible set.
    fn notify_file_ready(&self, name: &str, size: u64);
}

/// Event pushed to connected viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A file finished uploading
    FileReady {
        /// Final file name (after collision renaming)
        name: String,
        /// Size in bytes
        size: u64,
    },
    /// A text message was posted
    Message {
        /// Message body
        content: String,
        /// Local time the message was posted (`YYYY-mm-dd HH:MM:SS`)
        time: String,
    },
}

impl ServerEvent {
    /// SSE event name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FileReady { .. } => "file_ready",
            Self::Message { .. } => "message",
        }
    }
}

/// A posted text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMessage {
    /// Message body
    pub content: String,
    /// Local time the message was posted
    pub time: String,
}

impl TextMessage {
    /// Create a message stamped with the current local time.
    #[must_use]
    pub fn now(content: impl Into<String>) -> Self {
        Self::at(content, Local::now())
    }

    /// Create a message stamped with `time`.
    #[must_use]
    pub fn at(content: impl Into<String>, time: DateTime<Local>) -> Self {
        Self {
            content: content.into(),
            time: time.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<TextMessage> for ServerEvent {
    fn from(msg: TextMessage) -> Self {
        Self::Message {
            content: msg.content,
            time: msg.time,
        }
    }
}

/// Broadcast fan-out of [`ServerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: ServerEvent) -> usize {
        let kind = event.kind();
        let delivered = self.tx.send(event).unwrap_or(0);
        tracing::debug!(kind, delivered, "Published event");
        delivered
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn notify_file_ready(&self, name: &str, size: u64) {
        self.publish(ServerEvent::FileReady {
            name: name.to_string(),
            size,
        });
    }
}

/// Sink that drops every event (offline tools, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify_file_ready(&self, name: &str, size: u64) {
        tracing::trace!(name, size, "Dropping file-ready event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_bus_delivers_file_ready() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.notify_file_ready("report.pdf", 42);

        let event = rx.recv().await.expect("event");
        assert_eq!(
            event,
            ServerEvent::FileReady {
                name: "report.pdf".into(),
                size: 42
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(TextMessage::now("hi").into()), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = ServerEvent::FileReady {
            name: "a.txt".into(),
            size: 3,
        };
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"type\":\"file_ready\""));
        assert!(json.contains("\"name\":\"a.txt\""));
        assert_eq!(event.kind(), "file_ready");
    }

    #[test]
    fn test_message_time_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let msg = TextMessage::at("hello", time);
        assert_eq!(msg.time, "2024-03-09 07:05:01");
    }
}
