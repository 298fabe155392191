//! Hand-rolled dense tensor math for the GNN substrate.
//!
//! There is no tensor-framework dependency here by design: every op below
//! operates on plain `Vec<f32>`/[`Matrix`] and ships a matched backward
//! pass, so the whole forward/backward contract stays auditable in one
//! place instead of behind an autodiff graph.

mod activations;
mod grad;
mod matrix;
mod ops;

pub use activations::{
    apply, apply_backward, leaky_relu, leaky_relu_backward, relu, relu_backward, sigmoid,
    sigmoid_backward, tanh, tanh_backward, Activation, LEAKY_RELU_ALPHA,
};
pub use grad::{clip_by_norm, is_finite, sanitize_gradient, DEFAULT_CLIP_NORM};
pub use matrix::Matrix;
pub use ops::{
    aggregate, aggregate_backward, attention, attention_backward, attention_multi_backward,
    layer_backward, project, project_backward, softmax, softmax_backward, AttentionGrad,
    AttentionResult, ProjectGrad,
};
