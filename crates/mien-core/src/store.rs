use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity key '{0}' already exists")]
    DuplicateKey(String),
    #[error("similarity store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Unavailable(Box::new(err))
    }
}

/// The nearest stored record within a query radius.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub key: String,
    pub distance: f32,
}

/// Persistent set of (identity key, normalized embedding) pairs.
///
/// The store is the source of truth for key uniqueness: `insert` fails with
/// [`StoreError::DuplicateKey`] on collision, and the engine queries
/// `exists_key` before every enrollment. All embeddings handed to the store
/// are already normalized — the engine enforces that invariant, the store
/// only persists and measures.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Exact-match existence check on the identity key.
    async fn exists_key(&self, key: &str) -> Result<bool, StoreError>;

    /// The single closest stored embedding with distance strictly less than
    /// `radius`, or `None` if nothing is that close. Ties between equal
    /// distances are broken arbitrarily.
    async fn nearest_within(
        &self,
        query: &Embedding,
        radius: f32,
    ) -> Result<Option<Neighbor>, StoreError>;

    /// Persist a new record. Durable before returning.
    async fn insert(&self, key: &str, embedding: &Embedding) -> Result<(), StoreError>;
}

/// In-memory reference store: a linear scan over a guarded map.
///
/// Backs the engine's unit tests and the daemon's HTTP tests; the production
/// store lives in miend on SQLite.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Embedding>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SimilarityStore for MemoryStore {
    async fn exists_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().expect("store mutex poisoned").contains_key(key))
    }

    async fn nearest_within(
        &self,
        query: &Embedding,
        radius: f32,
    ) -> Result<Option<Neighbor>, StoreError> {
        let records = self.records.lock().expect("store mutex poisoned");
        let mut best: Option<Neighbor> = None;
        for (key, stored) in records.iter() {
            let distance = query.euclidean_distance(stored);
            if distance >= radius {
                continue;
            }
            match &best {
                Some(b) if b.distance <= distance => {}
                _ => best = Some(Neighbor { key: key.clone(), distance }),
            }
        }
        Ok(best)
    }

    async fn insert(&self, key: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_owned()));
        }
        records.insert(key.to_owned(), embedding.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    fn basis(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        Embedding::new(v)
    }

    fn negated_basis(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = -1.0;
        Embedding::new(v)
    }

    #[tokio::test]
    async fn test_exists_key_after_insert() {
        let store = MemoryStore::new();
        assert!(!store.exists_key("MRN-1").await.unwrap());
        store.insert("MRN-1", &basis(0)).await.unwrap();
        assert!(store.exists_key("MRN-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_duplicate_key_rejected() {
        let store = MemoryStore::new();
        store.insert("MRN-1", &basis(0)).await.unwrap();
        let err = store.insert("MRN-1", &basis(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(k) if k == "MRN-1"));
    }

    #[tokio::test]
    async fn test_nearest_within_returns_closest() {
        let store = MemoryStore::new();
        // basis(1) is at distance sqrt(2), negated_basis(0) at exactly 2.0
        store.insert("far", &negated_basis(0)).await.unwrap();
        store.insert("near", &basis(1)).await.unwrap();
        let hit = store.nearest_within(&basis(0), 3.0).await.unwrap().unwrap();
        assert_eq!(hit.key, "near");
        assert!((hit.distance - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_nearest_within_radius_is_strict() {
        let store = MemoryStore::new();
        // Opposite unit vectors sit at distance exactly 2.0.
        store.insert("opposite", &negated_basis(0)).await.unwrap();
        assert!(store.nearest_within(&basis(0), 2.0).await.unwrap().is_none());
        let hit = store.nearest_within(&basis(0), 2.5).await.unwrap().unwrap();
        assert_eq!(hit.key, "opposite");
        assert_eq!(hit.distance, 2.0);
    }

    #[tokio::test]
    async fn test_nearest_within_empty_store() {
        let store = MemoryStore::new();
        assert!(store.nearest_within(&basis(0), 2.0).await.unwrap().is_none());
    }
}
