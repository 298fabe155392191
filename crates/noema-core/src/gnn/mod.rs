//! The GNN enhancer: a small stack of project→activation→residual
//! layers, sitting behind the embedding cache.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{EmbeddingCache, Fingerprint, DEFAULT_BYTE_CAP, DEFAULT_ENTRY_CAP, DEFAULT_TTL};
use crate::embedding::{Embedding, D};
use crate::tensor::{self, Activation, Matrix};

/// One layer's weights, the unit [`GnnEnhancer::load_weights`] and
/// [`GnnEnhancer::persist_weights`] exchange as an opaque bincode blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
    pub activation: ActivationKind,
    pub residual: bool,
}

/// Serializable mirror of [`tensor::Activation`] (which intentionally
/// carries no `Serialize` impl of its own, since it's a pure compute-time
/// tag, not persisted state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
}

impl From<ActivationKind> for Activation {
    fn from(k: ActivationKind) -> Self {
        match k {
            ActivationKind::Relu => Activation::Relu,
            ActivationKind::LeakyRelu => Activation::LeakyRelu,
            ActivationKind::Tanh => Activation::Tanh,
            ActivationKind::Sigmoid => Activation::Sigmoid,
        }
    }
}

struct Layer {
    weights: Matrix,
    activation: Activation,
    residual: bool,
}

/// Result of [`GnnEnhancer::enhance`].
#[derive(Debug, Clone)]
pub struct EnhanceResult {
    pub enhanced: Vec<f32>,
    pub from_cache: bool,
}

/// A stack of `num_layers` project→activation→residual layers with a
/// read-through cache in front of it.
pub struct GnnEnhancer {
    layers: Vec<Layer>,
    cache: EmbeddingCache,
}

impl GnnEnhancer {
    /// Builds an enhancer with `num_layers` identity-ish layers (small
    /// random weights would come from training; a freshly-constructed
    /// enhancer starts at identity so it's a safe no-op until trained).
    pub fn new(num_layers: usize) -> Self {
        let layers = (0..num_layers)
            .map(|_| Layer {
                weights: identity_matrix(D),
                activation: Activation::Relu,
                residual: true,
            })
            .collect();
        Self {
            layers,
            cache: EmbeddingCache::new(DEFAULT_ENTRY_CAP, DEFAULT_BYTE_CAP, DEFAULT_TTL),
        }
    }

    pub fn with_cache(layers_count: usize, cache: EmbeddingCache) -> Self {
        let mut enhancer = Self::new(layers_count);
        enhancer.cache = cache;
        enhancer
    }

    /// Runs the layer stack, consulting the read-through cache first. On
    /// cache hit, returns the stored vector unchanged. On miss, computes,
    /// stores, and returns the freshly-enhanced vector. On dimension
    /// mismatch or non-finite output, returns the input embedding
    /// unchanged and logs a warning — enhancement is never mandatory.
    pub fn enhance(&self, embedding: &Embedding, neighborhood: &[String]) -> EnhanceResult {
        let key = Fingerprint::compute(embedding.as_slice(), neighborhood);
        if let Some(cached) = self.cache.get(key) {
            return EnhanceResult {
                enhanced: cached.into_vec(),
                from_cache: true,
            };
        }

        match self.apply_layers(embedding.as_slice()) {
            Ok(enhanced) => {
                if let Ok(emb) = Embedding::from_raw(enhanced.clone()) {
                    self.cache.put(key, emb, neighborhood.to_vec());
                }
                tracing::debug!(dim = enhanced.len(), "gnn enhancement computed");
                EnhanceResult {
                    enhanced,
                    from_cache: false,
                }
            }
            Err(reason) => {
                warn!(reason, "gnn enhancement failed, passing input through unchanged");
                EnhanceResult {
                    enhanced: embedding.as_slice().to_vec(),
                    from_cache: false,
                }
            }
        }
    }

    fn apply_layers(&self, x: &[f32]) -> Result<Vec<f32>, &'static str> {
        let mut current = x.to_vec();
        for layer in &self.layers {
            current = self.apply_layer(layer, &current)?;
        }
        Ok(current)
    }

    fn apply_layer(&self, layer: &Layer, x: &[f32]) -> Result<Vec<f32>, &'static str> {
        let y = tensor::project(x, &layer.weights).map_err(|_| "dimension mismatch")?;
        let z = tensor::apply(layer.activation, &y);
        let combined = if layer.residual {
            z.iter().zip(x).map(|(a, b)| a + b).collect::<Vec<f32>>()
        } else {
            z
        };
        if !tensor::is_finite(&combined) {
            return Err("non-finite layer output");
        }
        Ok(l2_normalize(combined))
    }

    /// Loads layer weights from a bincode-encoded blob, replacing the
    /// current stack. Returns an error string (never panics) if the blob
    /// doesn't decode.
    pub fn load_weights(&mut self, blob: &[u8]) -> Result<(), String> {
        let decoded: Vec<LayerWeights> =
            bincode::deserialize(blob).map_err(|e| format!("failed to decode weights: {e}"))?;
        let mut layers = Vec::with_capacity(decoded.len());
        for lw in decoded {
            let weights =
                Matrix::new(lw.rows, lw.cols, lw.data).map_err(|e| format!("invalid matrix: {e}"))?;
            layers.push(Layer {
                weights,
                activation: lw.activation.into(),
                residual: lw.residual,
            });
        }
        self.layers = layers;
        Ok(())
    }

    /// Encodes the current layer stack as an opaque bincode blob, for the
    /// history/checkpoint store.
    pub fn persist_weights(&self) -> Vec<u8> {
        let snapshot: Vec<LayerWeights> = self
            .layers
            .iter()
            .map(|l| LayerWeights {
                rows: l.weights.rows,
                cols: l.weights.cols,
                data: l.weights.as_slice().to_vec(),
                activation: match l.activation {
                    Activation::Relu => ActivationKind::Relu,
                    Activation::LeakyRelu => ActivationKind::LeakyRelu,
                    Activation::Tanh => ActivationKind::Tanh,
                    Activation::Sigmoid => ActivationKind::Sigmoid,
                },
                residual: l.residual,
            })
            .collect();
        bincode::serialize(&snapshot).expect("in-memory layer stack always serializes")
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

fn identity_matrix(n: usize) -> Matrix {
    let mut m = Matrix::zeros(n, n);
    for i in 0..n {
        m.set(i, i, 1.0);
    }
    m
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-8 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(fill: f32) -> Embedding {
        let mut v = vec![fill; D];
        v[0] = 1.0;
        Embedding::new(v).unwrap()
    }

    #[test]
    fn enhance_caches_on_second_call() {
        let enhancer = GnnEnhancer::new(1);
        let e = emb(0.01);
        let first = enhancer.enhance(&e, &["n1".to_string()]);
        assert!(!first.from_cache);
        let second = enhancer.enhance(&e, &["n1".to_string()]);
        assert!(second.from_cache);
        assert_eq!(first.enhanced, second.enhanced);
    }

    #[test]
    fn enhance_output_has_expected_dimension() {
        let enhancer = GnnEnhancer::new(2);
        let e = emb(0.01);
        let result = enhancer.enhance(&e, &[]);
        assert_eq!(result.enhanced.len(), D);
    }

    #[test]
    fn load_weights_rejects_garbage_blob() {
        let mut enhancer = GnnEnhancer::new(1);
        assert!(enhancer.load_weights(b"not a valid bincode blob").is_err());
    }

    #[test]
    fn persist_then_load_weights_roundtrips() {
        let enhancer = GnnEnhancer::new(2);
        let blob = enhancer.persist_weights();
        let mut fresh = GnnEnhancer::new(2);
        fresh.load_weights(&blob).unwrap();
        assert_eq!(fresh.num_layers(), 2);
    }

    #[test]
    fn malformed_weights_leave_enhancer_passthrough_safe() {
        let mut enhancer = GnnEnhancer::new(1);
        // Wrong matrix shape should be rejected without poisoning state.
        let bogus = vec![LayerWeights {
            rows: 2,
            cols: 3,
            data: vec![0.0; 5], // one short
            activation: ActivationKind::Relu,
            residual: true,
        }];
        let blob = bincode::serialize(&bogus).unwrap();
        assert!(enhancer.load_weights(&blob).is_err());
        // Original layer stack is untouched.
        assert_eq!(enhancer.num_layers(), 1);
    }
}
