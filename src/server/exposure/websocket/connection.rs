//! Handle to a live WebSocket connection
//!
//! The socket itself is owned by the connection's write loop. Everything else
//! (protocol handler, registry, subscriptions, send workers) holds a cheap,
//! cloneable [`ConnectionHandle`] that pushes [`Outbound`] items to that loop.
//! Once the write loop is gone every send fails, which is how a send racing
//! a disconnect fails harmlessly.
//!
//! The outbound queue is bounded. A message that finds it full is dropped and
//! counted instead of waiting, so a client that stops reading costs at most
//! `capacity` queued messages. One extra slot is reserved up front for the
//! close frame, which therefore always fits.

use super::protocol::{CloseStatus, ServerMessage};
use crate::core::{NotifyError, NotifyResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};
use uuid::Uuid;

/// Outbound queue size used by [`ConnectionHandle::with_id`]
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Items consumed by a connection's write loop
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send a message
    Message(ServerMessage),
    /// Send a close frame and stop
    Close { status: CloseStatus, reason: String },
}

/// Send/close capability for one connection
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Arc<str>,
    tx: mpsc::Sender<Outbound>,
    close_slot: Arc<Mutex<Option<OwnedPermit<Outbound>>>>,
    dropped: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh `conn_` ID and room for `capacity` messages
    ///
    /// Returns the handle and the receiver the write loop drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(format!("conn_{}", Uuid::new_v4().simple()), capacity)
    }

    /// Create a handle with a caller-chosen ID and the default capacity
    pub fn with_id(id: impl Into<String>) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(id, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Create a handle with a caller-chosen ID and room for `capacity` messages
    ///
    /// `capacity` is clamped to at least one.
    pub fn with_capacity(
        id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        // Cannot fail on a fresh channel with at least two slots
        let close_slot = tx.clone().try_reserve_owned().ok();
        let handle = Self {
            id: Arc::from(id.into()),
            tx,
            close_slot: Arc::new(Mutex::new(close_slot)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for the client without waiting
    ///
    /// Fails if the connection is closed or its queue is full. A message
    /// rejected for a full queue is counted in [`dropped`](Self::dropped).
    pub fn send(&self, message: ServerMessage) -> NotifyResult<()> {
        match self.tx.try_send(Outbound::Message(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    connection_id = %self.id,
                    dropped,
                    "Outbound queue full, dropping message"
                );
                Err(NotifyError::Internal(format!(
                    "connection {} outbound queue is full",
                    self.id
                )))
            }
            Err(TrySendError::Closed(_)) => Err(NotifyError::Internal(format!(
                "connection {} is closed",
                self.id
            ))),
        }
    }

    /// Ask the write loop to close the socket with the given status
    ///
    /// Uses the reserved slot, so it succeeds even when the queue is full.
    /// Returns `false` if the connection was already gone or a close was
    /// already requested.
    pub fn close(&self, status: CloseStatus, reason: impl Into<String>) -> bool {
        if self.tx.is_closed() {
            return false;
        }

        let permit = self
            .close_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match permit {
            Some(permit) => {
                let _ = permit.send(Outbound::Close {
                    status,
                    reason: reason.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Whether the write loop has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_has_prefixed_unique_id() {
        let (a, _rx_a) = ConnectionHandle::new(8);
        let (b, _rx_b) = ConnectionHandle::new(8);

        assert!(a.id().starts_with("conn_"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_send_reaches_receiver() {
        let (conn, mut rx) = ConnectionHandle::with_id("c1");
        conn.send(ServerMessage::pong(None)).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Message(ServerMessage::pong(None))
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (conn, rx) = ConnectionHandle::with_id("c1");
        drop(rx);

        assert!(conn.is_closed());
        assert!(conn.send(ServerMessage::pong(None)).is_err());
        assert!(!conn.close(CloseStatus::Normal, "bye"));
        assert_eq!(conn.dropped(), 0);
    }

    #[test]
    fn test_close_is_queued_after_pending_messages() {
        let (conn, mut rx) = ConnectionHandle::with_id("c1");
        conn.send(ServerMessage::pong(None)).unwrap();
        assert!(conn.close(CloseStatus::ProtocolError, "too early"));

        assert!(matches!(rx.try_recv().unwrap(), Outbound::Message(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                status: CloseStatus::ProtocolError,
                reason: "too early".to_string()
            }
        );
    }

    #[test]
    fn test_clones_share_channel() {
        let (conn, mut rx) = ConnectionHandle::with_id("c1");
        let clone = conn.clone();
        clone.send(ServerMessage::pong(None)).unwrap();

        assert_eq!(clone.id(), "c1");
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (conn, mut rx) = ConnectionHandle::with_capacity("c1", 2);

        assert!(conn.send(ServerMessage::pong(None)).is_ok());
        assert!(conn.send(ServerMessage::pong(None)).is_ok());
        assert!(conn.send(ServerMessage::pong(None)).is_err());
        assert!(conn.send(ServerMessage::pong(None)).is_err());

        assert_eq!(conn.dropped(), 2);
        assert_eq!(rx.len(), 2);
        // Not closed, just full
        assert!(!conn.is_closed());

        rx.try_recv().unwrap();
        assert!(conn.send(ServerMessage::pong(None)).is_ok());
        assert_eq!(conn.dropped(), 2);
    }

    #[test]
    fn test_close_fits_into_full_queue() {
        let (conn, mut rx) = ConnectionHandle::with_capacity("c1", 1);
        conn.send(ServerMessage::pong(None)).unwrap();
        assert!(conn.send(ServerMessage::pong(None)).is_err());

        assert!(conn.close(CloseStatus::ServerError, "overloaded"));

        assert!(matches!(rx.try_recv().unwrap(), Outbound::Message(_)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                status: CloseStatus::ServerError,
                ..
            }
        ));
    }

    #[test]
    fn test_only_first_close_is_queued() {
        let (conn, mut rx) = ConnectionHandle::with_id("c1");
        let clone = conn.clone();

        assert!(conn.close(CloseStatus::Normal, "bye"));
        assert!(!clone.close(CloseStatus::ServerError, "again"));

        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                status: CloseStatus::Normal,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capacity_is_clamped() {
        let (conn, _rx) = ConnectionHandle::with_capacity("c1", 0);
        assert!(conn.send(ServerMessage::pong(None)).is_ok());
        assert!(conn.send(ServerMessage::pong(None)).is_err());
    }
}
