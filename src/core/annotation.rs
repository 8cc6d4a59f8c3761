//! Annotation model and the collaborators the broker consumes
//!
//! The broker never owns annotations. It asks an [`AnnotationLookup`] for the
//! current state of a changed annotation and an [`AnnotationConverter`] for
//! the representation a particular subscriber is allowed to see.

use super::auth::UserContext;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The parts of a stored annotation the notification core relies on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    /// URI of the document the annotation is attached to
    pub document_uri: String,
    /// Whether the annotation is visible to other users
    pub shared: bool,
    /// Everything else, passed through to the converter
    #[serde(default)]
    pub body: Value,
}

impl Annotation {
    pub fn new(id: impl Into<String>, document_uri: impl Into<String>, shared: bool) -> Self {
        Self {
            id: id.into(),
            document_uri: document_uri.into(),
            shared,
            body: Value::Null,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// Fetches the current state of an annotation
#[async_trait]
pub trait AnnotationLookup: Send + Sync {
    /// `Ok(None)` when the annotation no longer exists
    async fn find_by_id(&self, annotation_id: &str) -> Result<Option<Annotation>>;
}

/// Renders an annotation for one specific subscriber
#[async_trait]
pub trait AnnotationConverter: Send + Sync {
    async fn to_wire_format(&self, annotation: &Annotation, viewer: &UserContext) -> Result<Value>;
}

/// Default converter producing a flat JSON object
///
/// Fields of an object `body` are copied first, so the core fields always win.
/// The `viewer` field names the account the payload was rendered for.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAnnotationConverter;

#[async_trait]
impl AnnotationConverter for JsonAnnotationConverter {
    async fn to_wire_format(&self, annotation: &Annotation, viewer: &UserContext) -> Result<Value> {
        let mut rendered = match &annotation.body {
            Value::Object(fields) => fields.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("body".to_string(), other.clone());
                map
            }
        };

        rendered.insert("id".to_string(), json!(annotation.id));
        rendered.insert("uri".to_string(), json!(annotation.document_uri));
        rendered.insert("shared".to_string(), json!(annotation.shared));
        rendered.insert("viewer".to_string(), json!(viewer.account_id()));

        Ok(Value::Object(rendered))
    }
}

/// Payload announcing that an annotation was deleted
///
/// Built from the ID alone; no lookup is needed.
pub fn deletion_payload(annotation_id: &str) -> Value {
    json!({ "id": annotation_id })
}
