//! Memtrust-State: collaborator seams for the memory trust layer
//!
//! This crate defines the interfaces to the external services the trust model
//! relies on but does not own: the vector index ("semantic store") and the
//! embedding computation.
//!
//! ## Layer 0 - Collaborators
//!
//! Focus: Narrow async traits, shared document types, and in-memory fakes.
//!
//! ## Key Components
//!
//! - `SemanticStore`: Upsert/query/delete/get/list of documents keyed by id
//! - `Embedder`: Text to vector conversion
//! - `fakes`: `InMemorySemanticStore` and `HashingEmbedder` for tests

mod error;
pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use storage_traits::{
    cosine_similarity, namespace_or_default, Document, Embedder, Hit, Metadata, SemanticStore,
    StorageResult, StoreQuery, DEFAULT_NAMESPACE,
};
