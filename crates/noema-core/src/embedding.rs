//! The embedding type and the single global dimensionality constant.
//!
//! There is exactly one `D` for the whole engine (see SPEC_FULL.md §9,
//! "Dimension policy"). Every API that accepts a vector validates its
//! length against `D` and rejects mismatches rather than slicing or
//! padding silently.

use crate::error::{NoemaError, Result};
use serde::{Deserialize, Serialize};

/// The system-wide embedding dimensionality.
pub const D: usize = 1536;

/// A fixed-length, unit-L2-normalized embedding vector.
///
/// Construction always validates length and, in debug builds, approximate
/// unit norm; callers that already know their vector is valid (e.g.
/// deserializing a value this crate itself wrote) can skip the norm check
/// via [`Embedding::from_raw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Build an embedding, validating length against [`D`] and normalizing
    /// it to unit L2 norm if it isn't already (within tolerance).
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != D {
            return Err(NoemaError::DimensionError {
                expected: D,
                got: values.len(),
            });
        }
        Ok(Self(normalize(values)))
    }

    /// Build an embedding from values already known to be `D`-length and
    /// unit-normalized, skipping re-normalization. Used internally when
    /// reconstructing from storage.
    pub fn from_raw(values: Vec<f32>) -> Result<Self> {
        if values.len() != D {
            return Err(NoemaError::DimensionError {
                expected: D,
                got: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Cosine similarity. Both operands are unit-normalized by
    /// construction, so this is just the dot product, but we don't assume
    /// that invariant survived external round-tripping.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }
}

fn normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-8 {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}

/// Cosine similarity between two equal-length slices. Returns 0.0 if
/// either vector has ~zero norm, rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na < 1e-8 || nb < 1e-8 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Euclidean (L2) distance between two equal-length slices.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        let err = Embedding::new(vec![0.0; 10]).unwrap_err();
        assert!(matches!(err, NoemaError::DimensionError { expected: D, got: 10 }));
    }

    #[test]
    fn normalizes_to_unit_length() {
        let mut values = vec![0.0f32; D];
        values[0] = 3.0;
        values[1] = 4.0;
        let emb = Embedding::new(values).unwrap();
        let norm: f32 = emb.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        let mut values = vec![0.1f32; D];
        values[5] = 0.9;
        let emb = Embedding::new(values).unwrap();
        assert!((emb.cosine_similarity(&emb) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0f32; D];
        let mut b = vec![0.0f32; D];
        b[0] = 1.0;
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
