//! NotifyServerBuilder for fluent API to build the notification server

use super::host::NotifyHost;
use super::exposure::{RestExposure, WebSocketExposure};
use crate::broker::{MessageBroker, SendPool};
use crate::config::NotifyConfig;
use crate::core::{
    AnnotationConverter, AnnotationLookup, Authenticator, JsonAnnotationConverter,
    StaticTokenAuthenticator,
};
use crate::storage::InMemoryAnnotationStore;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Builder for the WebSocket notification server
///
/// # Example
///
/// ```ignore
/// let (app, host) = NotifyServerBuilder::new()
///     .with_config(NotifyConfig::from_yaml_file("notify.yaml")?)
///     .with_annotation_lookup(store)
///     .build()?;
/// ```
pub struct NotifyServerBuilder {
    config: NotifyConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    lookup: Option<Arc<dyn AnnotationLookup>>,
    converter: Option<Arc<dyn AnnotationConverter>>,
    store: Option<InMemoryAnnotationStore>,
}

impl NotifyServerBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: NotifyConfig::default(),
            authenticator: None,
            lookup: None,
            converter: None,
            store: None,
        }
    }

    pub fn with_config(mut self, config: NotifyConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the authenticator
    ///
    /// Defaults to a [`StaticTokenAuthenticator`] built from `auth.tokens`.
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Set the annotation lookup (required)
    pub fn with_annotation_lookup(mut self, lookup: impl AnnotationLookup + 'static) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    /// Use an in-memory store as the lookup and expose it over REST
    ///
    /// Besides serving lookups, the store gets `PUT` and `DELETE
    /// /annotations/{id}` routes that write to it and publish the change.
    pub fn with_annotation_store(mut self, store: InMemoryAnnotationStore) -> Self {
        self.lookup = Some(Arc::new(store.clone()));
        self.store = Some(store);
        self
    }

    /// Set the payload converter
    ///
    /// Defaults to [`JsonAnnotationConverter`].
    pub fn with_converter(mut self, converter: impl AnnotationConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Build the transport-agnostic host
    ///
    /// Spawns the send workers, so this must run inside a Tokio runtime. The
    /// dispatch loop is started by [`WebSocketExposure::build_router`] or
    /// [`NotifyHost::start_dispatcher`].
    pub fn build_host(self) -> Result<NotifyHost> {
        self.config.validate()?;

        let lookup = self.lookup.ok_or_else(|| {
            anyhow::anyhow!("AnnotationLookup is required. Call .with_annotation_lookup()")
        })?;
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(JsonAnnotationConverter));
        let authenticator = match self.authenticator {
            Some(authenticator) => authenticator,
            None => {
                let static_tokens = StaticTokenAuthenticator::from_config(&self.config.auth);
                if static_tokens.is_empty() {
                    tracing::warn!(
                        "No authenticator configured and auth.tokens is empty; \
                         no connection will be able to authenticate"
                    );
                }
                Arc::new(static_tokens)
            }
        };

        let pool = SendPool::new(
            self.config.broker.workers(),
            self.config.broker.send_backlog,
        );
        let broker = Arc::new(MessageBroker::new(lookup, converter, pool));

        Ok(NotifyHost::new(self.config, broker, authenticator))
    }

    /// Build the router and the host behind it
    ///
    /// The router serves the WebSocket endpoint and the REST routes with
    /// request tracing. Keep the host to publish changes; dropping every copy
    /// of it stops the dispatcher.
    pub fn build(mut self) -> Result<(Router, Arc<NotifyHost>)> {
        let store = self.store.take();
        let host = Arc::new(self.build_host()?);

        let router = WebSocketExposure::build_router(host.clone())?
            .merge(RestExposure::build_router(host.clone(), store)?)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
        Ok((router, host))
    }

    /// Serve on the configured address with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C), then stops the dispatcher.
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.server.bind_addr.clone();
        let (app, host) = self.build()?;
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(
            "Notification server listening on {}{}",
            addr,
            host.config.server.path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        host.shutdown().await;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for NotifyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenEntry;
    use crate::storage::InMemoryAnnotationStore;

    // ── Constructor tests ────────────────────────────────────────────────

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = NotifyServerBuilder::new();
        assert!(builder.authenticator.is_none());
        assert!(builder.lookup.is_none());
        assert!(builder.converter.is_none());
        assert!(builder.store.is_none());
        assert_eq!(builder.config.server.path, "/ws");
    }

    #[test]
    fn test_setters_store_collaborators() {
        let builder = NotifyServerBuilder::default()
            .with_annotation_lookup(InMemoryAnnotationStore::new())
            .with_converter(JsonAnnotationConverter)
            .with_authenticator(StaticTokenAuthenticator::new());
        assert!(builder.lookup.is_some());
        assert!(builder.converter.is_some());
        assert!(builder.authenticator.is_some());
    }

    #[test]
    fn test_annotation_store_doubles_as_lookup() {
        let builder =
            NotifyServerBuilder::new().with_annotation_store(InMemoryAnnotationStore::new());
        assert!(builder.lookup.is_some());
        assert!(builder.store.is_some());
    }

    // ── build_host ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_build_host_without_lookup_fails() {
        let result = NotifyServerBuilder::new().build_host();
        let err_msg = format!("{}", result.err().expect("should be Err"));
        assert!(
            err_msg.contains("AnnotationLookup is required"),
            "error should mention AnnotationLookup: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_build_host_rejects_invalid_config() {
        let mut config = NotifyConfig::default();
        config.broker.send_backlog = 0;

        let result = NotifyServerBuilder::new()
            .with_config(config)
            .with_annotation_lookup(InMemoryAnnotationStore::new())
            .build_host();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_host_uses_configured_pool_size() {
        let mut config = NotifyConfig::default();
        config.broker.send_workers = Some(3);
        config.broker.send_backlog = 7;

        let host = NotifyServerBuilder::new()
            .with_config(config)
            .with_annotation_lookup(InMemoryAnnotationStore::new())
            .build_host()
            .expect("build_host should succeed");

        assert_eq!(host.broker.pool().workers(), 3);
        assert_eq!(host.broker.pool().capacity(), 7);
        assert!(!host.is_dispatching());
    }

    #[tokio::test]
    async fn test_default_authenticator_uses_config_tokens() {
        let mut config = NotifyConfig::default();
        config.auth.tokens.push(TokenEntry {
            token: "dev-token".to_string(),
            login: "jane".to_string(),
            authority: "example.org".to_string(),
        });

        let host = NotifyServerBuilder::new()
            .with_config(config)
            .with_annotation_lookup(InMemoryAnnotationStore::new())
            .build_host()
            .expect("build_host should succeed");

        let user = host
            .authenticator
            .resolve_user("dev-token")
            .await
            .unwrap()
            .expect("token should resolve");
        assert_eq!(user.account_id(), "acct:jane@example.org");
    }

    // ── build (router) ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_build_starts_dispatcher() {
        let (router, host) = NotifyServerBuilder::new()
            .with_annotation_lookup(InMemoryAnnotationStore::new())
            .build()
            .expect("build should produce a Router");

        let _ = router;
        assert!(host.is_dispatching());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_with_annotation_store() {
        // REST and WebSocket routes merge without overlapping
        let (_router, host) = NotifyServerBuilder::new()
            .with_annotation_store(InMemoryAnnotationStore::new())
            .build()
            .expect("build should produce a Router");

        assert!(host.is_dispatching());
        host.shutdown().await;
    }
}
