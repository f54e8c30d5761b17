use serde::{Deserialize, Serialize};

/// Dimensionality of the face embeddings this service works with.
///
/// The upstream encoder produces 128-dimensional vectors; the engine rejects
/// anything else before touching the store.
pub const EMBEDDING_DIM: usize = 128;

/// Face embedding vector.
///
/// The type itself does not force a length — raw vectors arrive from the
/// encoder and are validated at the engine boundary. Every embedding the
/// engine compares or stores has been L2-normalized first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Rescale to unit Euclidean length.
    ///
    /// The zero vector has no direction; it is returned unchanged rather
    /// than treated as an error. Idempotent within floating tolerance.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm == 0.0 {
            return self.clone();
        }
        Embedding { values: self.values.iter().map(|x| x / norm).collect() }
    }

    /// Euclidean distance to another embedding.
    ///
    /// Over normalized vectors the range is [0, 2]; smaller = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}
