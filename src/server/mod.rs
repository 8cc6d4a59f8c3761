//! Server module wiring the notification core to HTTP
//!
//! This module provides:
//! - `NotifyServerBuilder` to assemble configuration and collaborators
//! - `NotifyHost` holding the registry, broker and authenticator
//! - The exposures: WebSocket (upgrade handler, protocol, session state) and
//!   REST (health, annotation writes)

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::NotifyServerBuilder;
pub use exposure::websocket::ConnectionRegistry;
pub use exposure::{RestExposure, WebSocketExposure};
pub use host::NotifyHost;
