//! SQLite-backed similarity store.
//!
//! One row per identity: the MRN as primary key, the normalized embedding
//! as a little-endian f32 blob, and an RFC 3339 creation timestamp. The
//! nearest-neighbor query scans rows and measures distance in Rust — at
//! patient-gallery scale a linear scan beats maintaining an index, and the
//! store contract only promises the query shape, not the engine behind it.
//!
//! Key uniqueness is enforced here by the PRIMARY KEY, which also closes
//! the same-key check-then-insert race between concurrent enrollments.

use async_trait::async_trait;
use chrono::Utc;
use mien_core::{Embedding, Neighbor, SimilarityStore, StoreError};
use rusqlite::params;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS face_identities (
    mrn        TEXT PRIMARY KEY,
    embedding  BLOB NOT NULL,
    created_at TEXT NOT NULL
);
";

#[derive(Debug, Error)]
#[error("embedding blob has invalid length {0}")]
struct BadBlobLength(usize);

pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::unavailable)?;
        }
        let conn =
            tokio_rusqlite::Connection::open(path).await.map_err(StoreError::unavailable)?;
        Self::init(conn).await
    }

    /// In-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            tokio_rusqlite::Connection::open_in_memory().await.map_err(StoreError::unavailable)?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(StoreError::unavailable)?;
        Ok(Self { conn })
    }

    /// Number of stored identities.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let n: u64 =
                    conn.query_row("SELECT COUNT(*) FROM face_identities", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(StoreError::unavailable)
    }
}

#[async_trait]
impl SimilarityStore for SqliteStore {
    async fn exists_key(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_owned();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT 1 FROM face_identities WHERE mrn = ?1")?;
                Ok(stmt.exists(params![key])?)
            })
            .await
            .map_err(StoreError::unavailable)
    }

    async fn nearest_within(
        &self,
        query: &Embedding,
        radius: f32,
    ) -> Result<Option<Neighbor>, StoreError> {
        let query = query.clone();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT mrn, embedding FROM face_identities")?;
                let mut rows = stmt.query([])?;
                let mut best: Option<Neighbor> = None;
                while let Some(row) = rows.next()? {
                    let mrn: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    let stored = blob_to_embedding(&blob).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Blob,
                            Box::new(e),
                        )
                    })?;
                    let distance = query.euclidean_distance(&stored);
                    if distance >= radius {
                        continue;
                    }
                    match &best {
                        Some(b) if b.distance <= distance => {}
                        _ => best = Some(Neighbor { key: mrn, distance }),
                    }
                }
                Ok(best)
            })
            .await
            .map_err(StoreError::unavailable)
    }

    async fn insert(&self, key: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let mrn = key.to_owned();
        let blob = embedding_to_blob(embedding);
        let created_at = Utc::now().to_rfc3339();

        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO face_identities (mrn, embedding, created_at) VALUES (?1, ?2, ?3)",
                )?;
                stmt.execute(params![mrn, blob, created_at])?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateKey(key.to_owned()))
            }
            Err(e) => Err(StoreError::unavailable(e)),
        }
    }
}

/// Serialize an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding.values() {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Result<Embedding, BadBlobLength> {
    if blob.len() % 4 != 0 {
        return Err(BadBlobLength(blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::{StoreError, EMBEDDING_DIM};

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

    #[test]
    fn test_blob_round_trip() {
        let e = Embedding::new((0..EMBEDDING_DIM).map(|i| (i as f32).sin()).collect());
        let blob = embedding_to_blob(&e);
        assert_eq!(blob.len(), EMBEDDING_DIM * 4);
        let back = blob_to_embedding(&blob).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_blob_rejects_truncated_data() {
        assert!(blob_to_embedding(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_insert_and_exists() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(!store.exists_key("MRN-1").await.unwrap());
        store.insert("MRN-1", &basis(0)).await.unwrap();
        assert!(store.exists_key("MRN-1").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert("MRN-1", &basis(0)).await.unwrap();
        let err = store.insert("MRN-1", &basis(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(k) if k == "MRN-1"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nearest_within_picks_closest_and_respects_radius() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        // negated_basis(0) sits at distance exactly 2.0 from basis(0),
        // basis(1) at sqrt(2).
        store.insert("opposite", &negated_basis(0)).await.unwrap();
        store.insert("orthogonal", &basis(1)).await.unwrap();

        let hit = store.nearest_within(&basis(0), 3.0).await.unwrap().unwrap();
        assert_eq!(hit.key, "orthogonal");
        assert!((hit.distance - 2.0f32.sqrt()).abs() < 1e-6);

        // Strictly-less: a neighbor at exactly the radius is not returned.
        // basis(1) sits at exactly sqrt(2) from basis(0).
        assert!(store.nearest_within(&basis(0), 2.0f32.sqrt()).await.unwrap().is_none());
        assert!(store.nearest_within(&negated_basis(1), 1.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nearest_within_empty_store() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.nearest_within(&basis(0), 2.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert("MRN-1", &basis(5)).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert!(store.exists_key("MRN-1").await.unwrap());
        let hit = store.nearest_within(&basis(5), 0.4).await.unwrap().unwrap();
        assert_eq!(hit.key, "MRN-1");
        assert!(hit.distance < 1e-6);
    }
}
