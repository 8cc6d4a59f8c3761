//! # Annotation Notify
//!
//! Real-time notification core for an annotation service. Clients keep a
//! WebSocket open, authenticate, subscribe with a document-URI filter and
//! receive `create` / `update` / `delete` notifications for annotations they
//! are allowed to see.
//!
//! ## Features
//!
//! - **Connection Registry**: authenticated connections and their users
//! - **Protocol Handler**: per-connection state machine over a small JSON protocol
//! - **Subscription Filters**: validated `/uri one_of [...]` clauses
//! - **Message Broker**: non-blocking `publish`, periodic dispatch, bounded send pool
//! - **Self-Echo Suppression**: a browser tab never hears about its own edits
//! - **Configuration-Based**: timing, pool sizes and dev tokens from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use annotation_notify::prelude::*;
//!
//! let store = InMemoryAnnotationStore::new();
//! let (app, host) = NotifyServerBuilder::new()
//!     .with_config(NotifyConfig::from_yaml_file("notify.yaml")?)
//!     .with_annotation_lookup(store.clone())
//!     .build()?;
//!
//! // After an annotation was saved:
//! store.insert(Annotation::new("ann1", "https://example.com/article", true))?;
//! host.publish("ann1", AnnotationAction::Create, Some("tab-1"));
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core Types ===
    pub use crate::core::{
        Annotation, AnnotationAction, AnnotationConverter, AnnotationLookup, Authenticator,
        FilterError, JsonAnnotationConverter, NotifyError, NotifyResult, RawClause, RawFilter,
        StaticTokenAuthenticator, SubscriptionFilter, UserContext, parse_filter,
    };

    // === Broker ===
    pub use crate::broker::{DispatcherHandle, MessageBroker, SendPool};

    // === Storage ===
    pub use crate::storage::InMemoryAnnotationStore;

    // === Config ===
    pub use crate::config::{AuthConfig, BrokerConfig, NotifyConfig, ServerConfig, TokenEntry};

    // === Server ===
    pub use crate::server::{
        ConnectionRegistry, NotifyHost, NotifyServerBuilder, RestExposure, WebSocketExposure,
    };

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
