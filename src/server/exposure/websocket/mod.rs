//! WebSocket exposure of the notification core
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ /ws ──▶ ws_handler() ──▶ ProtocolHandler ──▶ ConnectionRegistry
//!                                               │
//!                                        filter message
//!                                               │
//! publish() ──▶ MessageBroker ──dispatch cycle──▶ SendPool ──▶ Client
//! ```
//!
//! See [`protocol`] for the wire format.

pub mod connection;
mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use connection::{ConnectionHandle, Outbound};
pub use handler::ConnectParams;
pub use protocol::{ClientMessage, CloseStatus, ServerMessage};
pub use registry::ConnectionRegistry;
pub use session::{ProtocolHandler, SessionState};

use crate::server::host::NotifyHost;
use anyhow::Result;
use axum::{Router, routing::get};
use std::sync::Arc;

/// WebSocket API exposure implementation
///
/// Consumes a `NotifyHost` and produces an Axum router serving the configured
/// WebSocket path.
pub struct WebSocketExposure;

impl WebSocketExposure {
    /// Build the WebSocket router from a host
    ///
    /// Starts the host's dispatch loop if it is not running yet, so this must
    /// be called inside a Tokio runtime.
    pub fn build_router(host: Arc<NotifyHost>) -> Result<Router> {
        if !host.start_dispatcher() {
            tracing::debug!("Dispatch loop already running");
        }

        let path = host.config.server.path.clone();
        let router = Router::new()
            .route(&path, get(handler::ws_handler))
            .with_state(host);

        Ok(router)
    }
}
