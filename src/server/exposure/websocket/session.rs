//! Per-connection protocol state machine
//!
//! ```text
//! Unauthenticated ──access-token ok──▶ Authenticated
//!        │                                  │
//!        └──── fatal error / disconnect ────┴──▶ Closed
//! ```
//!
//! One [`ProtocolHandler`] exists per socket and is driven by that socket's
//! read loop, so frames of one connection are handled strictly in order.
//! Handler-level failures never escape: they are logged and turned into a
//! close frame with the matching [`CloseStatus`].

use super::connection::ConnectionHandle;
use super::protocol::{ClientMessage, CloseStatus, ServerMessage};
use super::registry::ConnectionRegistry;
use crate::broker::MessageBroker;
use crate::core::{Authenticator, NotifyError, NotifyResult, UserContext};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Terminal
    Closed,
}

/// Drives the protocol for a single connection
pub struct ProtocolHandler {
    connection: ConnectionHandle,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<MessageBroker>,
    authenticator: Arc<dyn Authenticator>,
    state: SessionState,
}

impl ProtocolHandler {
    pub fn new(
        connection: ConnectionHandle,
        registry: Arc<ConnectionRegistry>,
        broker: Arc<MessageBroker>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            connection,
            registry,
            broker,
            authenticator,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Called once when the socket opens
    ///
    /// A token supplied with the upgrade request is tried right away. Unlike
    /// the `access-token` message, a rejected token leaves the connection
    /// open so the client can still authenticate explicitly.
    pub async fn on_connect(&mut self, access_token: Option<&str>) {
        tracing::debug!(connection_id = %self.connection.id(), "WebSocket connected");

        let Some(token) = access_token.filter(|token| !token.is_empty()) else {
            return;
        };

        if let Err(e) = self.authenticate(token).await {
            tracing::debug!(
                connection_id = %self.connection.id(),
                error = %e,
                "Connect-time authentication failed, waiting for access-token message"
            );
        }
    }

    /// Process one inbound text frame
    ///
    /// Frames arriving after the session closed are ignored.
    pub async fn on_frame(&mut self, text: &str) {
        if self.is_closed() {
            return;
        }

        let outcome = AssertUnwindSafe(self.process_frame(text))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    error_code = e.error_code(),
                    error = %e,
                    "Closing connection after handler error"
                );
                self.close(CloseStatus::for_error(&e), e.to_string());
            }
            Err(_) => {
                tracing::error!(
                    connection_id = %self.connection.id(),
                    "Message handler panicked"
                );
                self.close(CloseStatus::ServerError, "internal error");
            }
        }
    }

    async fn process_frame(&mut self, text: &str) -> NotifyResult<()> {
        let message = ClientMessage::decode(text)?;
        let kind = message.kind().to_string();
        tracing::trace!(connection_id = %self.connection.id(), kind = %kind, "Handling message");

        self.handle_message(message).await.inspect_err(|e| {
            tracing::debug!(
                connection_id = %self.connection.id(),
                kind = %kind,
                error = %e,
                "Message rejected"
            );
        })
    }

    /// Apply a decoded message to the session
    pub async fn handle_message(&mut self, message: ClientMessage) -> NotifyResult<()> {
        match message {
            ClientMessage::AccessToken { value } => {
                if self.state == SessionState::Authenticated {
                    tracing::debug!(
                        connection_id = %self.connection.id(),
                        "Already authenticated, ignoring access-token"
                    );
                    return Ok(());
                }
                self.authenticate(&value).await
            }
            ClientMessage::Ping { id } => self.reply(ServerMessage::pong(id)),
            ClientMessage::WhoAmI { id } => self.who_am_i(id).await,
            ClientMessage::ClientId { value } => {
                let user = self.require_user("client_id").await?;
                if !user.set_client_id(value) {
                    tracing::debug!(
                        connection_id = %self.connection.id(),
                        "Client id already set, ignoring"
                    );
                }
                Ok(())
            }
            ClientMessage::Filter { filter } => {
                let user = self.require_user("filter").await?;
                self.broker
                    .subscribe(&filter, self.connection.clone(), user)
                    .await
            }
            ClientMessage::Unknown { kind } => {
                tracing::debug!(
                    connection_id = %self.connection.id(),
                    kind = %kind,
                    "Ignoring unknown message type"
                );
                Ok(())
            }
        }
    }

    /// Resolve a token and register the connection under that user
    async fn authenticate(&mut self, token: &str) -> NotifyResult<()> {
        if token.is_empty() {
            return Err(NotifyError::Authentication(
                "missing access token".to_string(),
            ));
        }

        let user = self
            .authenticator
            .resolve_user(token)
            .await?
            .ok_or_else(|| {
                NotifyError::Authentication("invalid or expired access token".to_string())
            })?;

        let account = user.account_id();
        self.registry
            .register(self.connection.clone(), Arc::new(user))
            .await?;
        self.state = SessionState::Authenticated;

        tracing::info!(
            connection_id = %self.connection.id(),
            user = %account,
            "WebSocket authenticated"
        );

        Ok(())
    }

    async fn who_am_i(&self, id: Option<Value>) -> NotifyResult<()> {
        let user = self.require_user("whoami").await?;
        self.reply(ServerMessage::who_you_are(id, user.account_id()))
    }

    /// The registered user, or a protocol error naming the offending message
    async fn require_user(&self, kind: &str) -> NotifyResult<Arc<UserContext>> {
        self.registry
            .lookup_user(self.connection.id())
            .await
            .ok_or_else(|| {
                NotifyError::Protocol(format!("'{}' sent before authentication", kind))
            })
    }

    fn reply(&self, message: ServerMessage) -> NotifyResult<()> {
        self.connection.send(message)
    }

    /// Close the connection with a status; later calls are no-ops
    pub fn close(&mut self, status: CloseStatus, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Closed;

        let reason = reason.into();
        tracing::debug!(
            connection_id = %self.connection.id(),
            code = status.code(),
            reason = %reason,
            "Closing WebSocket"
        );
        self.connection.close(status, reason);
    }

    /// Called once when the socket is gone
    ///
    /// Unregisters the connection, then drops its subscription.
    pub async fn on_disconnect(&mut self) {
        self.state = SessionState::Closed;
        let connection_id = self.connection.id();

        if let Err(e) = self.registry.unregister(connection_id).await {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to unregister connection"
            );
        }
        self.broker.unsubscribe_all(connection_id).await;

        tracing::debug!(connection_id = %connection_id, "WebSocket disconnected");
    }
}
