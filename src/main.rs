//! Standalone notification server
//!
//! Usage: `annotation-notify-server [config.yaml] [annotations.json]`
//!
//! `annotations.json` holds a list of annotations to preload
//! (`[{"id": "...", "document_uri": "...", "shared": true, "body": {...}}]`).
//! Changes are written through the REST routes, which store the annotation
//! and notify subscribers:
//!
//! ```text
//! curl -X PUT localhost:8080/annotations/ann1 -H 'content-type: application/json' \
//!      -d '{"uri": "https://example.com/article", "shared": true}'
//! curl -X DELETE localhost:8080/annotations/ann1
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use annotation_notify::config::NotifyConfig;
use annotation_notify::server::NotifyServerBuilder;
use annotation_notify::storage::InMemoryAnnotationStore;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);

    let config = match args.next() {
        Some(path) => NotifyConfig::from_yaml_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => {
            tracing::info!("No configuration file given, using defaults");
            NotifyConfig::default()
        }
    };

    let store = InMemoryAnnotationStore::new();
    if let Some(path) = args.next() {
        let seeded = store
            .load_json_file(&path)
            .with_context(|| format!("Failed to load annotations from {}", path))?;
        tracing::info!(count = seeded, "Annotations preloaded");
    }

    NotifyServerBuilder::new()
        .with_config(config)
        .with_annotation_store(store)
        .serve()
        .await
}
