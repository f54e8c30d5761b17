//! The enroll/identify decision core.
//!
//! Both operations share the same two-tier nearest-neighbor gate: the store
//! is queried with the wider candidate radius, and the single returned
//! neighbor is accepted only if it clears the tighter accept threshold. The
//! gap between the two leaves a safety margin against borderline distances
//! introduced by normalization and float noise.

use std::sync::Arc;
use thiserror::Error;

use crate::store::{SimilarityStore, StoreError};
use crate::types::{Embedding, EMBEDDING_DIM};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("identity key '{0}' is already registered")]
    DuplicateIdentityKey(String),
    #[error("face is already registered under identity key '{0}'")]
    FaceAlreadyRegistered(String),
    #[error("no registered identity matches the supplied face")]
    UnknownIdentity,
    #[error("similarity store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

/// Distance cutoffs for the two-tier nearest-neighbor gate.
///
/// These are calibration values for the specific embedding model, not
/// algorithmic constants — a different encoder needs re-tuned thresholds.
/// They are therefore configuration, surfaced through the daemon
/// environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// Pre-filter radius for the store query. Anything farther is never
    /// transferred out of the store.
    pub candidate: f32,
    /// Accept boundary. A neighbor matches only if its distance is strictly
    /// below this.
    pub accept: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self { candidate: 0.4, accept: 0.35 }
    }
}

/// Confirmation of a successful enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub key: String,
}

/// Outcome of an identify operation.
///
/// `NoMatch` is only reachable in soft mode — in strict mode an unmatched
/// face surfaces as [`EngineError::UnknownIdentity`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match { key: String, distance: f32 },
    NoMatch,
}

/// Stateless enroll/identify engine over a similarity store.
///
/// Each call is a single-shot unit of work: at most one store read and one
/// optional write, no session state. The store is the only shared mutable
/// resource.
///
/// Enrollment's uniqueness checks and its insert are not one atomic store
/// operation: two concurrent enrollments of the same face under different
/// keys can both pass the nearest-neighbor check before either inserts. The
/// store's key-uniqueness enforcement closes the same-key race; the
/// same-face race is an accepted gap, documented in DESIGN.md.
pub struct MatchEngine {
    store: Arc<dyn SimilarityStore>,
    thresholds: MatchThresholds,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn SimilarityStore>, thresholds: MatchThresholds) -> Self {
        if thresholds.accept > thresholds.candidate {
            tracing::warn!(
                accept = thresholds.accept,
                candidate = thresholds.candidate,
                "accept threshold exceeds candidate radius; matches between them are unreachable"
            );
        }
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    /// Register a new identity key bound to a face embedding.
    ///
    /// Rejects the key if it is already present, and the face if its nearest
    /// stored neighbor is within the accept threshold under any other key.
    pub async fn enroll(
        &self,
        key: &str,
        embedding: &Embedding,
    ) -> Result<Enrollment, EngineError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(EngineError::InvalidInput("identity key must not be empty".into()));
        }
        let query = checked_normalize(embedding)?;

        if self.store.exists_key(key).await.map_err(read_error)? {
            return Err(EngineError::DuplicateIdentityKey(key.to_owned()));
        }

        if let Some(hit) = self
            .store
            .nearest_within(&query, self.thresholds.candidate)
            .await
            .map_err(read_error)?
        {
            if hit.distance < self.thresholds.accept {
                tracing::info!(
                    key,
                    existing = %hit.key,
                    distance = hit.distance,
                    "enroll rejected: face already registered"
                );
                return Err(EngineError::FaceAlreadyRegistered(hit.key));
            }
        }

        match self.store.insert(key, &query).await {
            Ok(()) => {
                tracing::info!(key, "identity enrolled");
                Ok(Enrollment { key: key.to_owned() })
            }
            // Backstop for the check-then-insert race on the same key.
            Err(StoreError::DuplicateKey(k)) => Err(EngineError::DuplicateIdentityKey(k)),
            Err(err) => Err(EngineError::StoreUnavailable(err)),
        }
    }

    /// Look up the identity key matching a face embedding.
    ///
    /// `strict` distinguishes an authentication-style lookup (no match is an
    /// error) from a soft lookup (no match is a normal outcome).
    pub async fn identify(
        &self,
        embedding: &Embedding,
        strict: bool,
    ) -> Result<MatchOutcome, EngineError> {
        let query = checked_normalize(embedding)?;

        let hit = self
            .store
            .nearest_within(&query, self.thresholds.candidate)
            .await
            .map_err(read_error)?;

        if let Some(hit) = hit {
            if hit.distance < self.thresholds.accept {
                tracing::debug!(key = %hit.key, distance = hit.distance, "identity matched");
                return Ok(MatchOutcome::Match { key: hit.key, distance: hit.distance });
            }
        }

        if strict {
            Err(EngineError::UnknownIdentity)
        } else {
            Ok(MatchOutcome::NoMatch)
        }
    }
}

/// Validate dimensionality and normalize. Runs before any store access.
fn checked_normalize(embedding: &Embedding) -> Result<Embedding, EngineError> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(EngineError::InvalidInput(format!(
            "embedding must have {} components, got {}",
            EMBEDDING_DIM,
            embedding.len()
        )));
    }
    Ok(embedding.normalized())
}

/// A read-path store failure is always an infrastructure fault — never a
/// duplicate, never "no match".
fn read_error(err: StoreError) -> EngineError {
    EngineError::StoreUnavailable(err)
}
