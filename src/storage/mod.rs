//! Storage implementations for the annotation lookup collaborator

pub mod in_memory;

pub use in_memory::InMemoryAnnotationStore;
