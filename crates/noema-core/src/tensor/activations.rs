//! Elementwise activation functions and their matched backward passes.
//!
//! Each backward consumes whichever of pre-/post-activation values makes
//! the derivative cheapest to express: `relu`/`leaky_relu` need the
//! pre-activation sign, `tanh`/`sigmoid` need the post-activation value.

/// Leaky ReLU negative-slope default.
pub const LEAKY_RELU_ALPHA: f32 = 0.01;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
}

pub fn relu(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| if v > 0.0 { v } else { 0.0 }).collect()
}

/// `dy` is the upstream gradient, `pre` is the pre-activation input.
pub fn relu_backward(dy: &[f32], pre: &[f32]) -> Vec<f32> {
    dy.iter()
        .zip(pre)
        .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
        .collect()
}

pub fn leaky_relu(x: &[f32]) -> Vec<f32> {
    x.iter()
        .map(|&v| if v > 0.0 { v } else { LEAKY_RELU_ALPHA * v })
        .collect()
}

pub fn leaky_relu_backward(dy: &[f32], pre: &[f32]) -> Vec<f32> {
    dy.iter()
        .zip(pre)
        .map(|(&g, &x)| if x > 0.0 { g } else { LEAKY_RELU_ALPHA * g })
        .collect()
}

pub fn tanh(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v.tanh()).collect()
}

/// `post` is the post-activation (tanh) output.
pub fn tanh_backward(dy: &[f32], post: &[f32]) -> Vec<f32> {
    dy.iter()
        .zip(post)
        .map(|(&g, &y)| g * (1.0 - y * y))
        .collect()
}

pub fn sigmoid(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect()
}

/// `post` is the post-activation (sigmoid) output.
pub fn sigmoid_backward(dy: &[f32], post: &[f32]) -> Vec<f32> {
    dy.iter()
        .zip(post)
        .map(|(&g, &y)| g * y * (1.0 - y))
        .collect()
}

pub fn apply(kind: Activation, x: &[f32]) -> Vec<f32> {
    match kind {
        Activation::Relu => relu(x),
        Activation::LeakyRelu => leaky_relu(x),
        Activation::Tanh => tanh(x),
        Activation::Sigmoid => sigmoid(x),
    }
}

/// Backward dispatch. `saved` is the pre-activation input for
/// Relu/LeakyRelu and the post-activation output for Tanh/Sigmoid,
/// matching each forward's documented contract.
pub fn apply_backward(kind: Activation, dy: &[f32], saved: &[f32]) -> Vec<f32> {
    match kind {
        Activation::Relu => relu_backward(dy, saved),
        Activation::LeakyRelu => leaky_relu_backward(dy, saved),
        Activation::Tanh => tanh_backward(dy, saved),
        Activation::Sigmoid => sigmoid_backward(dy, saved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_zeroes_negatives() {
        let y = relu(&[-1.0, 0.0, 2.0]);
        assert_eq!(y, vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn relu_backward_gates_on_sign() {
        let dy = relu_backward(&[1.0, 1.0, 1.0], &[-1.0, 0.0, 2.0]);
        assert_eq!(dy, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn leaky_relu_keeps_small_negative_slope() {
        let y = leaky_relu(&[-2.0]);
        assert!((y[0] - (-0.02)).abs() < 1e-6);
    }

    #[test]
    fn sigmoid_backward_matches_derivative_at_zero() {
        let post = sigmoid(&[0.0]);
        let grad = sigmoid_backward(&[1.0], &post);
        // sigmoid'(0) = 0.25
        assert!((grad[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn tanh_backward_matches_derivative_at_zero() {
        let post = tanh(&[0.0]);
        let grad = tanh_backward(&[1.0], &post);
        assert!((grad[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_input_returns_empty_not_panic() {
        assert!(relu(&[]).is_empty());
        assert!(relu_backward(&[], &[]).is_empty());
    }
}
