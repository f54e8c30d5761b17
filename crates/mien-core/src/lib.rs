//! mien-core — Identity matching over normalized face embeddings.
//!
//! Holds the pure matching logic: the embedding type and its L2
//! normalization, the similarity-store contract, and the two-threshold
//! enroll/identify engine. No HTTP, no inference — those live in the
//! miend daemon and mien-vision.

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{EngineError, Enrollment, MatchEngine, MatchOutcome, MatchThresholds};
pub use store::{MemoryStore, Neighbor, SimilarityStore, StoreError};
pub use types::{Embedding, EMBEDDING_DIM};
