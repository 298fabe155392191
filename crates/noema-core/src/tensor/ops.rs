//! Core dense tensor operations: projection, softmax, attention,
//! aggregation, and their backward passes.
//!
//! All operations are pure and allocation-explicit — callers own the
//! accumulators. None of them panic on empty input; each returns a zero
//! tensor of the shape it would otherwise have produced.

use super::activations::{apply_backward, Activation};
use super::matrix::Matrix;
use crate::error::{NoemaError, Result};

/// `y_i = sum_j W[i][j] * x[j]`. `W` is `[O × I]`, `x` is length `I`,
/// output is length `O`.
pub fn project(x: &[f32], w: &Matrix) -> Result<Vec<f32>> {
    if x.len() != w.cols {
        return Err(NoemaError::DimensionError {
            expected: w.cols,
            got: x.len(),
        });
    }
    let mut y = vec![0.0f32; w.rows];
    for i in 0..w.rows {
        let row = w.row(i);
        y[i] = row.iter().zip(x).map(|(wij, xj)| wij * xj).sum();
    }
    Ok(y)
}

/// Gradient of [`project`]: `dW_ij = dY_i * x_j`, `dx = W^T dY`.
pub struct ProjectGrad {
    pub d_weights: Matrix,
    pub d_x: Vec<f32>,
}

pub fn project_backward(d_y: &[f32], w: &Matrix, x: &[f32]) -> Result<ProjectGrad> {
    if d_y.len() != w.rows {
        return Err(NoemaError::DimensionError {
            expected: w.rows,
            got: d_y.len(),
        });
    }
    if x.len() != w.cols {
        return Err(NoemaError::DimensionError {
            expected: w.cols,
            got: x.len(),
        });
    }
    let mut d_weights = Matrix::zeros(w.rows, w.cols);
    for i in 0..w.rows {
        for j in 0..w.cols {
            d_weights.set(i, j, d_y[i] * x[j]);
        }
    }
    let mut d_x = vec![0.0f32; w.cols];
    for j in 0..w.cols {
        d_x[j] = (0..w.rows).map(|i| w.get(i, j) * d_y[i]).sum();
    }
    Ok(ProjectGrad { d_weights, d_x })
}

/// Numerically-stable softmax (max-shift). Output sums to `1.0 ± 1e-6`.
/// Empty input returns an empty vector.
pub fn softmax(z: &[f32]) -> Vec<f32> {
    if z.is_empty() {
        return Vec::new();
    }
    let max = z.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = z.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        // Degenerate input (e.g. all -inf): fall back to a uniform
        // distribution rather than dividing by zero.
        let n = z.len() as f32;
        return vec![1.0 / n; z.len()];
    }
    exps.iter().map(|&e| e / sum).collect()
}

/// `dz_i = sigma_i * (dsigma_i - sum_j sigma_j * dsigma_j)`.
pub fn softmax_backward(d_sigma: &[f32], sigma: &[f32]) -> Vec<f32> {
    if sigma.is_empty() {
        return Vec::new();
    }
    let dot: f32 = sigma.iter().zip(d_sigma).map(|(s, d)| s * d).sum();
    sigma
        .iter()
        .zip(d_sigma)
        .map(|(&s, &d)| s * (d - dot))
        .collect()
}

/// Mean or weighted sum of neighbor feature vectors along the feature
/// axis. `dim` is the feature dimension to use when `neighbors` is empty.
pub fn aggregate(neighbors: &[Vec<f32>], weights: Option<&[f32]>, dim: usize) -> Result<Vec<f32>> {
    if neighbors.is_empty() {
        return Ok(vec![0.0f32; dim]);
    }
    for n in neighbors {
        if n.len() != dim {
            return Err(NoemaError::DimensionError {
                expected: dim,
                got: n.len(),
            });
        }
    }
    let mut out = vec![0.0f32; dim];
    match weights {
        Some(w) => {
            if w.len() != neighbors.len() {
                return Err(NoemaError::DimensionError {
                    expected: neighbors.len(),
                    got: w.len(),
                });
            }
            for (n, &wi) in neighbors.iter().zip(w) {
                for (o, v) in out.iter_mut().zip(n) {
                    *o += wi * v;
                }
            }
        }
        None => {
            let inv_n = 1.0 / neighbors.len() as f32;
            for n in neighbors {
                for (o, v) in out.iter_mut().zip(n) {
                    *o += inv_n * v;
                }
            }
        }
    }
    Ok(out)
}

/// Distributes `d_out` back to each neighbor: weighted by `weights` if
/// given, or uniformly by `1/n` otherwise.
pub fn aggregate_backward(
    d_out: &[f32],
    weights: Option<&[f32]>,
    n: usize,
) -> Vec<Vec<f32>> {
    if n == 0 {
        return Vec::new();
    }
    match weights {
        Some(w) => w
            .iter()
            .map(|&wi| d_out.iter().map(|&g| wi * g).collect())
            .collect(),
        None => {
            let inv_n = 1.0 / n as f32;
            (0..n)
                .map(|_| d_out.iter().map(|&g| inv_n * g).collect())
                .collect()
        }
    }
}

/// Result of a single-query attention forward pass.
pub struct AttentionResult {
    pub output: Vec<f32>,
    pub weights: Vec<f32>,
}

/// Scaled dot-product attention for one query over a set of neighbor
/// key/value pairs. Empty `keys`/`values` returns a zero output of `V`'s
/// feature dimension `v_dim` and empty weights.
pub fn attention(
    query: &[f32],
    keys: &[Vec<f32>],
    values: &[Vec<f32>],
    scale: f32,
    v_dim: usize,
) -> Result<AttentionResult> {
    if keys.len() != values.len() {
        return Err(NoemaError::DimensionError {
            expected: keys.len(),
            got: values.len(),
        });
    }
    if keys.is_empty() {
        return Ok(AttentionResult {
            output: vec![0.0f32; v_dim],
            weights: Vec::new(),
        });
    }
    let scores: Vec<f32> = keys
        .iter()
        .map(|k| {
            let dot: f32 = query.iter().zip(k).map(|(q, kk)| q * kk).sum();
            dot * scale
        })
        .collect();
    let weights = softmax(&scores);
    let output = aggregate(values, Some(&weights), v_dim)?;
    Ok(AttentionResult { output, weights })
}

/// Gradient of [`attention`] for the single-query case.
pub struct AttentionGrad {
    pub d_query: Vec<f32>,
    pub d_keys: Vec<Vec<f32>>,
    pub d_values: Vec<Vec<f32>>,
}

pub fn attention_backward(
    d_output: &[f32],
    query: &[f32],
    keys: &[Vec<f32>],
    values: &[Vec<f32>],
    weights: &[f32],
    scale: f32,
) -> AttentionGrad {
    if keys.is_empty() {
        return AttentionGrad {
            d_query: vec![0.0f32; query.len()],
            d_keys: Vec::new(),
            d_values: Vec::new(),
        };
    }
    let d_values = aggregate_backward(d_output, Some(weights), values.len());

    // d_weights_i = dot(d_output, V_i)
    let d_weights: Vec<f32> = values
        .iter()
        .map(|v| v.iter().zip(d_output).map(|(vi, g)| vi * g).sum())
        .collect();
    let d_scores = softmax_backward(&d_weights, weights);

    let mut d_query = vec![0.0f32; query.len()];
    let mut d_keys = Vec::with_capacity(keys.len());
    for (k, &ds) in keys.iter().zip(&d_scores) {
        for (dq, kk) in d_query.iter_mut().zip(k) {
            *dq += ds * kk * scale;
        }
        d_keys.push(query.iter().map(|q| ds * q * scale).collect());
    }

    AttentionGrad {
        d_query,
        d_keys,
        d_values,
    }
}

/// Multi-weight (multi-head) attention backward.
///
/// **Documented approximation** (see SPEC_FULL.md §9 / spec.md §9,
/// "Multi-weight attention backward"): rather than keeping each head's
/// `dK`/`dQ` contribution separate, this collapses them into a single sum
/// over heads. That is exact when heads don't share downstream gradient
/// interactions but is an approximation whenever the caller later treats
/// `d_keys`/`d_query` as if they came from one head. Callers that need an
/// exact per-head gradient should call [`attention_backward`] once per
/// head and keep the results separate instead of summing them here.
pub fn attention_multi_backward(
    d_outputs: &[Vec<f32>],
    query: &[f32],
    keys: &[Vec<f32>],
    values: &[Vec<f32>],
    weights_per_head: &[Vec<f32>],
    scale: f32,
) -> AttentionGrad {
    let mut d_query = vec![0.0f32; query.len()];
    let mut d_keys: Vec<Vec<f32>> = keys.iter().map(|k| vec![0.0f32; k.len()]).collect();
    let mut d_values: Vec<Vec<f32>> = values.iter().map(|v| vec![0.0f32; v.len()]).collect();

    for (d_out, weights) in d_outputs.iter().zip(weights_per_head) {
        let grad = attention_backward(d_out, query, keys, values, weights, scale);
        for (acc, g) in d_query.iter_mut().zip(&grad.d_query) {
            *acc += g;
        }
        for (acc, g) in d_keys.iter_mut().zip(&grad.d_keys) {
            for (a, gi) in acc.iter_mut().zip(g) {
                *a += gi;
            }
        }
        for (acc, g) in d_values.iter_mut().zip(&grad.d_values) {
            for (a, gi) in acc.iter_mut().zip(g) {
                *a += gi;
            }
        }
    }

    AttentionGrad {
        d_query,
        d_keys,
        d_values,
    }
}

/// Composes an activation backward with a projection backward: the
/// standard `project -> activation -> residual` layer used by
/// [`crate::gnn::GnnEnhancer`], run in reverse. `saved` follows
/// [`apply_backward`]'s contract (pre-activation for Relu/LeakyRelu,
/// post-activation for Tanh/Sigmoid). `d_activated` is the gradient with
/// respect to `z` (the activation output, i.e. the pre-normalize,
/// pre-residual-add value); when `residual` is set, that same gradient is
/// added back into `dx`, since `x' = z + x` splits its incoming gradient
/// equally between both branches.
pub fn layer_backward(
    d_activated: &[f32],
    activation: Activation,
    saved: &[f32],
    w: &Matrix,
    x: &[f32],
    residual: bool,
) -> Result<ProjectGrad> {
    let d_y = apply_backward(activation, d_activated, saved);
    let mut grad = project_backward(&d_y, w, x)?;
    if residual {
        for (dx, &da) in grad.d_x.iter_mut().zip(d_activated) {
            *dx += da;
        }
    }
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Matrix {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    #[test]
    fn project_identity_is_passthrough() {
        let w = identity(4);
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = project(&x, &w).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn project_rejects_dimension_mismatch() {
        let w = identity(4);
        assert!(project(&[1.0, 2.0], &w).is_err());
    }

    /// Testable property #1: project_backward(ones, W, x).dx == W^T . ones
    #[test]
    fn project_backward_dx_matches_transpose_times_ones() {
        let w = Matrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let x = vec![1.0, 1.0, 1.0];
        let ones = vec![1.0, 1.0];
        let grad = project_backward(&ones, &w, &x).unwrap();
        // W^T . ones = column sums of W
        assert!((grad.d_x[0] - 5.0).abs() < 1e-5); // 1 + 4
        assert!((grad.d_x[1] - 7.0).abs() < 1e-5); // 2 + 5
        assert!((grad.d_x[2] - 9.0).abs() < 1e-5); // 3 + 6
    }

    /// Testable property #2: sum(softmax(z)) == 1, and shift-invariance.
    #[test]
    fn softmax_sums_to_one_and_is_shift_invariant() {
        let z = vec![1.0, 2.0, 3.0, -1.0];
        let s1 = softmax(&z);
        let sum: f32 = s1.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);

        let shifted: Vec<f32> = z.iter().map(|v| v + 42.0).collect();
        let s2 = softmax(&shifted);
        for (a, b) in s1.iter().zip(&s2) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn softmax_empty_is_empty() {
        assert!(softmax(&[]).is_empty());
    }

    /// Testable property #3: sum(softmax_backward(g, sigma)) ~= 0.
    #[test]
    fn softmax_backward_sums_to_zero() {
        let z = vec![0.5, 1.5, -0.5];
        let sigma = softmax(&z);
        let g = vec![0.3, -0.2, 0.7];
        let dz = softmax_backward(&g, &sigma);
        let sum: f32 = dz.iter().sum();
        assert!(sum.abs() < 1e-5);
    }

    #[test]
    fn aggregate_mean_of_two() {
        let neighbors = vec![vec![1.0, 1.0], vec![3.0, 5.0]];
        let out = aggregate(&neighbors, None, 2).unwrap();
        assert_eq!(out, vec![2.0, 3.0]);
    }

    #[test]
    fn aggregate_empty_returns_zero_vector() {
        let out = aggregate(&[], None, 3).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn attention_single_neighbor_returns_its_value() {
        let query = vec![1.0, 0.0];
        let keys = vec![vec![1.0, 0.0]];
        let values = vec![vec![7.0, 8.0]];
        let result = attention(&query, &keys, &values, 1.0, 2).unwrap();
        assert!((result.output[0] - 7.0).abs() < 1e-5);
        assert!((result.output[1] - 8.0).abs() < 1e-5);
        assert!((result.weights[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn attention_empty_neighbors_returns_zero() {
        let result = attention(&[1.0, 0.0], &[], &[], 1.0, 3).unwrap();
        assert_eq!(result.output, vec![0.0, 0.0, 0.0]);
        assert!(result.weights.is_empty());
    }
}
