//! REST exposure for health checks and annotation writes
//!
//! - `GET /health`, `GET /healthz`: liveness plus connection, subscription
//!   and backlog counts
//! - `PUT /annotations/{id}`: store an annotation and publish `create` (new)
//!   or `update` (replaced)
//! - `DELETE /annotations/{id}`: remove an annotation and publish `delete`
//!
//! The annotation routes are only mounted when the server owns an
//! [`InMemoryAnnotationStore`]. The optional `X-Client-Id` header names the
//! client instance that made the change, so that instance is not notified.

use crate::core::{Annotation, AnnotationAction, NotifyError, NotifyResult};
use crate::server::host::NotifyHost;
use crate::storage::InMemoryAnnotationStore;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Header carrying the writer's client instance ID
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Body of `PUT /annotations/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationWrite {
    pub uri: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub body: Value,
}

/// REST API exposure implementation
pub struct RestExposure;

#[derive(Clone)]
struct AnnotationState {
    host: Arc<NotifyHost>,
    store: InMemoryAnnotationStore,
}

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// `store` must be the lookup the host's broker reads from, otherwise
    /// published changes cannot be resolved.
    pub fn build_router(
        host: Arc<NotifyHost>,
        store: Option<InMemoryAnnotationStore>,
    ) -> Result<Router> {
        let mut app = Self::health_routes(host.clone());

        if let Some(store) = store {
            app = app.merge(Self::annotation_routes(AnnotationState { host, store }));
        }

        Ok(app)
    }

    fn health_routes(host: Arc<NotifyHost>) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/healthz", get(health_check))
            .with_state(host)
    }

    fn annotation_routes(state: AnnotationState) -> Router {
        Router::new()
            .route(
                "/annotations/{id}",
                put(put_annotation).delete(delete_annotation),
            )
            .with_state(state)
    }
}

async fn health_check(State(host): State<Arc<NotifyHost>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "annotation-notify",
        "connections": host.registry.connection_count().await,
        "subscriptions": host.broker.subscription_count().await,
        "pending_events": host.broker.pending_count(),
        "dropped_sends": host.broker.pool().dropped(),
    }))
}

async fn put_annotation(
    State(state): State<AnnotationState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(write): Json<AnnotationWrite>,
) -> NotifyResult<(StatusCode, Json<Value>)> {
    if write.uri.is_empty() {
        return Err(NotifyError::InvalidArgument(
            "annotation uri must not be empty".to_string(),
        ));
    }

    let annotation = Annotation::new(id.clone(), write.uri, write.shared).with_body(write.body);
    let previous = state.store.insert(annotation)?;

    let (status, action) = match previous {
        Some(_) => (StatusCode::OK, AnnotationAction::Update),
        None => (StatusCode::CREATED, AnnotationAction::Create),
    };
    let queued = state.host.publish(&id, action, client_id(&headers));

    tracing::debug!(annotation_id = %id, action = %action, queued, "Annotation written");

    Ok((
        status,
        Json(json!({ "id": id, "action": action, "queued": queued })),
    ))
}

async fn delete_annotation(
    State(state): State<AnnotationState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> NotifyResult<Json<Value>> {
    let removed = state.store.remove(&id)?.is_some();
    let queued = state
        .host
        .publish(&id, AnnotationAction::Delete, client_id(&headers));

    tracing::debug!(annotation_id = %id, removed, queued, "Annotation deleted");

    Ok(Json(json!({
        "id": id,
        "action": AnnotationAction::Delete,
        "removed": removed,
        "queued": queued,
    })))
}

fn client_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
