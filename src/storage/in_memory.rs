//! In-memory implementation of AnnotationLookup for testing and development

use crate::core::{Annotation, AnnotationLookup};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// In-memory annotation store
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryAnnotationStore {
    annotations: Arc<RwLock<HashMap<String, Annotation>>>,
}

impl InMemoryAnnotationStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an annotation, returning the replaced one
    pub fn insert(&self, annotation: Annotation) -> Result<Option<Annotation>> {
        let mut annotations = self
            .annotations
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        Ok(annotations.insert(annotation.id.clone(), annotation))
    }

    /// Remove an annotation, returning it if it existed
    pub fn remove(&self, annotation_id: &str) -> Result<Option<Annotation>> {
        let mut annotations = self
            .annotations
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        Ok(annotations.remove(annotation_id))
    }

    /// Insert every annotation of a JSON array file
    ///
    /// Returns how many were loaded.
    pub fn load_json_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let annotations: Vec<Annotation> = serde_json::from_str(&content)?;

        let count = annotations.len();
        for annotation in annotations {
            self.insert(annotation)?;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.annotations.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnnotationLookup for InMemoryAnnotationStore {
    async fn find_by_id(&self, annotation_id: &str) -> Result<Option<Annotation>> {
        let annotations = self
            .annotations
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(annotations.get(annotation_id).cloned())
    }
}
