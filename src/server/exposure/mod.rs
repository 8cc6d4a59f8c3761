//! API exposures of the notification core
//!
//! Each exposure consumes a `NotifyHost` and produces a Router for its
//! protocol. WebSocket carries the notification protocol; REST carries health
//! checks and, for the in-memory store, annotation writes.

pub mod rest;
pub mod websocket;

pub use rest::RestExposure;
pub use websocket::WebSocketExposure;
