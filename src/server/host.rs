//! Server host holding the notification core's shared state
//!
//! The host owns the connection registry, the message broker and the
//! authenticator, and is handed to the WebSocket exposure as router state.
//! Applications keep an `Arc<NotifyHost>` to publish annotation changes.

use crate::broker::{DispatcherHandle, MessageBroker};
use crate::config::NotifyConfig;
use crate::core::{AnnotationAction, Authenticator};
use crate::server::exposure::websocket::connection::ConnectionHandle;
use crate::server::exposure::websocket::registry::ConnectionRegistry;
use crate::server::exposure::websocket::session::ProtocolHandler;
use std::sync::{Arc, Mutex, MutexGuard};

/// Host context containing all notification state
///
/// # Example
///
/// ```rust,ignore
/// let (app, host) = NotifyServerBuilder::new()
///     .with_annotation_lookup(store)
///     .build()?;
///
/// // From the annotation write path:
/// host.publish("ann1", AnnotationAction::Update, Some("tab-1"));
/// ```
pub struct NotifyHost {
    /// Effective configuration
    pub config: Arc<NotifyConfig>,

    /// Authenticated connections
    pub registry: Arc<ConnectionRegistry>,

    /// Subscriptions, pending events and fan-out
    pub broker: Arc<MessageBroker>,

    /// Token resolution for new connections
    pub authenticator: Arc<dyn Authenticator>,

    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl NotifyHost {
    pub fn new(
        config: NotifyConfig,
        broker: Arc<MessageBroker>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            broker,
            authenticator,
            dispatcher: Mutex::new(None),
        }
    }

    /// Announce an annotation change to subscribers
    pub fn publish(
        &self,
        annotation_id: &str,
        action: AnnotationAction,
        sender_client_id: Option<&str>,
    ) -> bool {
        self.broker.publish(annotation_id, action, sender_client_id)
    }

    /// Create the protocol handler for a freshly opened connection
    pub fn session(&self, connection: ConnectionHandle) -> ProtocolHandler {
        ProtocolHandler::new(
            connection,
            self.registry.clone(),
            self.broker.clone(),
            self.authenticator.clone(),
        )
    }

    /// Start the periodic dispatcher with the configured timing
    ///
    /// Returns `false` if it is already running.
    pub fn start_dispatcher(&self) -> bool {
        let mut dispatcher = self.dispatcher_slot();
        if dispatcher.is_some() {
            return false;
        }

        *dispatcher = Some(self.broker.spawn_dispatcher(
            self.config.broker.dispatch_interval(),
            self.config.broker.initial_delay(),
        ));
        true
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatcher_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the dispatcher, if running
    pub async fn shutdown(&self) {
        let handle = self.dispatcher_slot().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    fn dispatcher_slot(&self) -> MutexGuard<'_, Option<DispatcherHandle>> {
        // The slot stays consistent even if a holder panicked
        self.dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
