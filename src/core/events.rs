//! Annotation change events and the pending-event queue
//!
//! Request-handling code announces annotation mutations by pushing a
//! [`PendingEvent`] onto the [`EventQueue`]. The push never blocks; the
//! broker's dispatch cycle drains the queue on its own schedule.
//!
//! # Architecture
//!
//! ```text
//! create/update/delete ──┐
//!                        ├──▶ EventQueue::push() ──▶ mpsc channel ──▶ dispatch cycle (drain)
//! other request paths ───┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Kind of change applied to an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationAction {
    Create,
    Update,
    Delete,
}

impl AnnotationAction {
    /// Wire name of the action, also used as the notification frame type
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationAction::Create => "create",
            AnnotationAction::Update => "update",
            AnnotationAction::Delete => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, AnnotationAction::Delete)
    }
}

impl fmt::Display for AnnotationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(AnnotationAction::Create),
            "update" => Ok(AnnotationAction::Update),
            "delete" => Ok(AnnotationAction::Delete),
            other => Err(format!("unknown annotation action '{}'", other)),
        }
    }
}

/// A queued annotation change awaiting dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Unique event ID, for log correlation
    pub id: Uuid,
    /// The annotation that changed
    pub annotation_id: String,
    /// What happened to it
    pub action: AnnotationAction,
    /// Client instance that originated the change, if known
    pub sender_client_id: Option<String>,
    /// When the event was queued
    pub enqueued_at: DateTime<Utc>,
}

impl PendingEvent {
    pub fn new(
        annotation_id: impl Into<String>,
        action: AnnotationAction,
        sender_client_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            annotation_id: annotation_id.into(),
            action,
            sender_client_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Whether this event was originated by the given client instance
    pub fn is_from(&self, client_id: Option<&str>) -> bool {
        match (self.sender_client_id.as_deref(), client_id) {
            (Some(sender), Some(client)) => sender == client,
            _ => false,
        }
    }
}

/// Unbounded multi-producer queue of pending events
///
/// Producers call [`push`](Self::push) from any thread without waiting.
/// The single consumer (the dispatch cycle) takes everything queued so far
/// with [`drain`](Self::drain).
#[derive(Debug)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<PendingEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<PendingEvent>>,
    len: AtomicUsize,
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            len: AtomicUsize::new(0),
        }
    }

    /// Queue an event
    ///
    /// Never blocks. The receiver lives as long as the queue, so the send
    /// cannot fail while `self` is alive.
    pub fn push(&self, event: PendingEvent) {
        self.len.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(event).is_err() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Take every event queued so far, in arrival order
    pub async fn drain(&self) -> Vec<PendingEvent> {
        let mut receiver = self.receiver.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        self.len.fetch_sub(events.len(), Ordering::Relaxed);
        events
    }

    /// Number of events waiting for the next dispatch cycle
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(AnnotationAction::Create.as_str(), "create");
        assert_eq!(AnnotationAction::Update.as_str(), "update");
        assert_eq!(AnnotationAction::Delete.as_str(), "delete");
        assert_eq!(
            serde_json::to_value(AnnotationAction::Delete).unwrap(),
            "delete"
        );
    }

    #[test]
    fn test_action_from_str_is_case_insensitive() {
        assert_eq!(
            "UPDATE".parse::<AnnotationAction>(),
            Ok(AnnotationAction::Update)
        );
        assert!("archive".parse::<AnnotationAction>().is_err());
    }

    #[test]
    fn test_pending_event_is_from() {
        let event = PendingEvent::new(
            "ann1",
            AnnotationAction::Update,
            Some("tab-1".to_string()),
        );
        assert!(event.is_from(Some("tab-1")));
        assert!(!event.is_from(Some("tab-2")));
        assert!(!event.is_from(None));

        let anonymous = PendingEvent::new("ann1", AnnotationAction::Update, None);
        assert!(!anonymous.is_from(None));
        assert!(!anonymous.is_from(Some("tab-1")));
    }

    #[tokio::test]
    async fn test_queue_drains_in_arrival_order() {
        let queue = EventQueue::new();
        queue.push(PendingEvent::new("a", AnnotationAction::Create, None));
        queue.push(PendingEvent::new("b", AnnotationAction::Update, None));
        queue.push(PendingEvent::new("c", AnnotationAction::Delete, None));
        assert_eq!(queue.len(), 3);

        let drained = queue.drain().await;
        let ids: Vec<_> = drained.iter().map(|e| e.annotation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(queue.is_empty());

        // Nothing left for the next cycle
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_accepts_concurrent_producers() {
        let queue = Arc::new(EventQueue::new());

        let mut handles = Vec::new();
        for producer in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    queue.push(PendingEvent::new(
                        format!("ann-{}-{}", producer, n),
                        AnnotationAction::Create,
                        None,
                    ));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len(), 400);
        assert_eq!(queue.drain().await.len(), 400);
    }
}
