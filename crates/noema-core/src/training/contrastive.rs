//! Triplet formation and backpropagation over the GNN layer stack.
//!
//! The trainer keeps its own copy of the layer stack (distinct from
//! [`crate::gnn::GnnEnhancer`]'s inference-time copy) and syncs it back
//! via the same bincode blob format after a successful batch — see
//! [`ContrastiveTrainer::weights_snapshot`].
//!
//! Backprop approximation: query/positive/negative are each forward-
//! passed through the shared layer stack (a standard triplet/siamese
//! setup), but the final per-layer L2 normalize is treated as a
//! stop-gradient rescale rather than differentiated through — only
//! project→activation→residual participate in the backward pass, per
//! [`crate::tensor::layer_backward`]'s contract.

use crate::config::TrainingConfig;
use crate::embedding::euclidean_distance;
use crate::gnn::{ActivationKind, LayerWeights};
use crate::tensor::{self, Activation, Matrix};

struct TrainableLayer {
    weights: Matrix,
    activation: Activation,
    residual: bool,
}

struct LayerCache {
    input: Vec<f32>,
    pre_activation: Vec<f32>,
    post_activation: Vec<f32>,
}

/// One trajectory's contribution to a batch, already reduced to the
/// single embedding the trainer should use (enhanced if present, else
/// base) and its quality label.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub embedding: Vec<f32>,
    pub quality: f32,
}

/// Stats for one batch, per spec.md §4.9.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub epoch: usize,
    pub batch_index: usize,
    pub loss: f32,
    pub gradient_norm: f32,
    pub active_triplets: usize,
    pub total_triplets: usize,
    pub training_time_ms: f64,
}

/// Per-epoch summary: mean loss over its batches, with an improvement
/// flag against the best loss seen so far.
#[derive(Debug, Clone)]
pub struct EpochResult {
    pub epoch: usize,
    pub average_loss: f32,
    pub improved: bool,
}

pub struct ContrastiveTrainer {
    config: TrainingConfig,
    layers: Vec<TrainableLayer>,
    best_loss: Option<f32>,
}

impl ContrastiveTrainer {
    pub fn new(config: TrainingConfig, dim: usize, num_layers: usize) -> Self {
        let layers = (0..num_layers)
            .map(|_| TrainableLayer {
                weights: identity_matrix(dim),
                activation: Activation::Relu,
                residual: true,
            })
            .collect();
        Self {
            config,
            layers,
            best_loss: None,
        }
    }

    /// Loads the layer stack from the same bincode blob format
    /// [`crate::gnn::GnnEnhancer`] exchanges with the history/checkpoint
    /// store.
    pub fn from_weights(config: TrainingConfig, blob: &[u8]) -> Result<Self, String> {
        let decoded: Vec<LayerWeights> =
            bincode::deserialize(blob).map_err(|e| format!("failed to decode weights: {e}"))?;
        let mut layers = Vec::with_capacity(decoded.len());
        for lw in decoded {
            layers.push(TrainableLayer {
                weights: Matrix::new(lw.rows, lw.cols, lw.data).map_err(|e| e.to_string())?,
                activation: lw.activation.into(),
                residual: lw.residual,
            });
        }
        Ok(Self {
            config,
            layers,
            best_loss: None,
        })
    }

    /// Exchanges with [`crate::gnn::GnnEnhancer::load_weights`] so a
    /// successful training run can be batch-persisted into the enhancer.
    pub fn weights_snapshot(&self) -> Vec<u8> {
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

    fn forward_with_cache(&self, x: &[f32]) -> (Vec<f32>, Vec<LayerCache>) {
        let mut current = x.to_vec();
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let y = match tensor::project(&current, &layer.weights) {
                Ok(y) => y,
                Err(_) => {
                    // Dimension mismatch: pass through unchanged and stop
                    // accumulating cache for this and remaining layers.
                    return (current, caches);
                }
            };
            let z = tensor::apply(layer.activation, &y);
            let combined = if layer.residual {
                z.iter().zip(&current).map(|(a, b)| a + b).collect::<Vec<f32>>()
            } else {
                z.clone()
            };
            caches.push(LayerCache {
                input: current.clone(),
                pre_activation: y,
                post_activation: z,
            });
            current = normalize_inplace(combined);
        }
        (current, caches)
    }

    /// `d_output` is the gradient w.r.t. the forward pass's final output
    /// (post stop-gradient normalize). Returns per-layer weight gradients,
    /// outermost layer first... reversed to match `self.layers` order.
    fn backward(&self, d_output: &[f32], caches: &[LayerCache]) -> Vec<Matrix> {
        let mut grads = vec![Matrix::zeros(0, 0); self.layers.len()];
        let mut d_current = d_output.to_vec();
        for (i, (layer, cache)) in self.layers.iter().zip(caches).enumerate().rev() {
            let saved = match layer.activation {
                Activation::Relu | Activation::LeakyRelu => &cache.pre_activation,
                Activation::Tanh | Activation::Sigmoid => &cache.post_activation,
            };
            match tensor::layer_backward(
                &d_current,
                layer.activation,
                saved,
                &layer.weights,
                &cache.input,
                layer.residual,
            ) {
                Ok(grad) => {
                    grads[i] = grad.d_weights;
                    d_current = grad.d_x;
                }
                Err(_) => break,
            }
        }
        grads
    }

    /// Runs one full batch: drop invalid samples, partition by quality,
    /// form triplets, backprop, clip, and apply an SGD step.
    pub fn train_batch(&mut self, epoch: usize, batch_index: usize, samples: &[TrainingSample]) -> BatchResult {
        let start = std::time::Instant::now();

        let valid: Vec<&TrainingSample> = samples
            .iter()
            .filter(|s| !s.embedding.is_empty() && s.quality.is_finite() && tensor::is_finite(&s.embedding))
            .collect();
        if valid.is_empty() {
            return BatchResult {
                epoch,
                batch_index,
                training_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                ..Default::default()
            };
        }

        let dim = valid[0].embedding.len();
        let query: Vec<f32> = mean_vector(valid.iter().map(|s| s.embedding.as_slice()), dim);

        let positives: Vec<&Vec<f32>> = valid
            .iter()
            .filter(|s| s.quality >= self.config.positive_quality)
            .map(|s| &s.embedding)
            .collect();
        let negatives: Vec<&Vec<f32>> = valid
            .iter()
            .filter(|s| s.quality < self.config.negative_quality)
            .map(|s| &s.embedding)
            .collect();

        let mut total_triplets = 0usize;
        let mut active_triplets = 0usize;
        let mut loss_sum = 0.0f32;
        let mut accumulated: Vec<Matrix> = self
            .layers
            .iter()
            .map(|l| Matrix::zeros(l.weights.rows, l.weights.cols))
            .collect();

        for pos in &positives {
            for neg in &negatives {
                if pos.len() != dim || neg.len() != dim {
                    continue;
                }
                total_triplets += 1;

                let (qf, q_cache) = self.forward_with_cache(&query);
                let (pf, p_cache) = self.forward_with_cache(pos);
                let (nf, n_cache) = self.forward_with_cache(neg);

                let d_qp = euclidean_distance(&qf, &pf);
                let d_qn = euclidean_distance(&qf, &nf);
                let triplet_loss = (d_qp - d_qn + self.config.margin).max(0.0);
                loss_sum += triplet_loss;

                if triplet_loss > 0.0 {
                    active_triplets += 1;
                    let (d_qf_from_qp, d_pf) = distance_gradient(&qf, &pf, d_qp);
                    let (d_qf_from_qn, d_nf) = distance_gradient(&qf, &nf, d_qn);
                    let d_qf: Vec<f32> = d_qf_from_qp
                        .iter()
                        .zip(&d_qf_from_qn)
                        .map(|(a, b)| a - b)
                        .collect();
                    let d_nf: Vec<f32> = d_nf.iter().map(|v| -v).collect();

                    for (acc, grad) in accumulated.iter_mut().zip(self.backward(&d_qf, &q_cache)) {
                        add_into(acc, &grad);
                    }
                    for (acc, grad) in accumulated.iter_mut().zip(self.backward(&d_pf, &p_cache)) {
                        add_into(acc, &grad);
                    }
                    for (acc, grad) in accumulated.iter_mut().zip(self.backward(&d_nf, &n_cache)) {
                        add_into(acc, &grad);
                    }
                }
            }
        }

        let batch_loss = if total_triplets > 0 {
            loss_sum / total_triplets as f32
        } else {
            0.0
        };

        let mut gradient_norm = 0.0f32;
        if total_triplets > 0 {
            let scale = 1.0 / total_triplets as f32;
            for (layer, grad) in self.layers.iter_mut().zip(accumulated.iter_mut()) {
                let data = grad.as_mut_slice();
                for v in data.iter_mut() {
                    *v *= scale;
                }
                tensor::sanitize_gradient(data);
                tensor::clip_by_norm(data, self.config.clip_max_norm);
                gradient_norm = gradient_norm.max(l2_norm(data));
                apply_sgd_step(&mut layer.weights, data, self.config.learning_rate);
            }
        }

        BatchResult {
            epoch,
            batch_index,
            loss: batch_loss,
            gradient_norm,
            active_triplets,
            total_triplets,
            training_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Averages `batches`' losses and flags whether it improved on the
    /// best loss seen across this trainer's lifetime.
    pub fn finish_epoch(&mut self, epoch: usize, batches: &[BatchResult]) -> EpochResult {
        let average_loss = if batches.is_empty() {
            0.0
        } else {
            batches.iter().map(|b| b.loss).sum::<f32>() / batches.len() as f32
        };
        let improved = match self.best_loss {
            Some(best) => average_loss < best,
            None => true,
        };
        if improved {
            self.best_loss = Some(average_loss);
        }
        EpochResult {
            epoch,
            average_loss,
            improved,
        }
    }
}

fn identity_matrix(n: usize) -> Matrix {
    let mut m = Matrix::zeros(n, n);
    for i in 0..n {
        m.set(i, i, 1.0);
    }
    m
}

fn normalize_inplace(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-8 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn mean_vector<'a>(vectors: impl Iterator<Item = &'a [f32]>, dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;
    for v in vectors {
        if v.len() != dim {
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
        count += 1;
    }
    if count > 0 {
        for s in &mut sum {
            *s /= count as f32;
        }
    }
    sum
}

/// Gradient of `euclidean_distance(a, b)` w.r.t. `a` and `b`, guarding
/// against division by a near-zero distance.
fn distance_gradient(a: &[f32], b: &[f32], distance: f32) -> (Vec<f32>, Vec<f32>) {
    if distance < 1e-8 {
        return (vec![0.0; a.len()], vec![0.0; b.len()]);
    }
    let d_a: Vec<f32> = a.iter().zip(b).map(|(x, y)| (x - y) / distance).collect();
    let d_b: Vec<f32> = d_a.iter().map(|v| -v).collect();
    (d_a, d_b)
}

fn add_into(acc: &mut Matrix, grad: &Matrix) {
    if acc.rows != grad.rows || acc.cols != grad.cols {
        return;
    }
    for (a, g) in acc.as_mut_slice().iter_mut().zip(grad.as_slice()) {
        *a += g;
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn apply_sgd_step(weights: &mut Matrix, gradient: &[f32], learning_rate: f32) {
    for (w, g) in weights.as_mut_slice().iter_mut().zip(gradient) {
        *w -= learning_rate * g;
    }
}
