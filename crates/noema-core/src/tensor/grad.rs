//! Gradient hygiene: norm clipping and non-finite sanitization.
//!
//! Every backward pass in this module ends up feeding a trainer (see
//! [`crate::training::contrastive`]) that runs unattended, off the main
//! reasoning path. A single `NaN`/`inf` gradient must never propagate into
//! persisted weights, so these helpers are the one chokepoint every
//! trainer routes through before applying an update.

/// Default max L2 norm applied when a caller doesn't have a more specific
/// budget in mind.
pub const DEFAULT_CLIP_NORM: f32 = 5.0;

/// Scales `grad` down in place so its L2 norm does not exceed `max_norm`.
/// Leaves it untouched if already within budget. No-ops on empty input.
pub fn clip_by_norm(grad: &mut [f32], max_norm: f32) {
    if grad.is_empty() || max_norm <= 0.0 {
        return;
    }
    let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
    if norm > max_norm && norm.is_finite() {
        let scale = max_norm / norm;
        for g in grad.iter_mut() {
            *g *= scale;
        }
    }
}

/// True iff every element is finite (`not NaN`, `not +-inf`).
pub fn is_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Replaces non-finite entries with `0.0` in place. Returns the number of
/// entries that were replaced, so callers can log how often this fires.
pub fn sanitize_gradient(grad: &mut [f32]) -> usize {
    let mut replaced = 0;
    for g in grad.iter_mut() {
        if !g.is_finite() {
            *g = 0.0;
            replaced += 1;
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_by_norm_leaves_small_gradients_alone() {
        let mut g = vec![0.1, 0.2];
        let original = g.clone();
        clip_by_norm(&mut g, 5.0);
        assert_eq!(g, original);
    }

    #[test]
    fn clip_by_norm_scales_down_large_gradients() {
        let mut g = vec![3.0, 4.0]; // norm = 5
        clip_by_norm(&mut g, 1.0);
        let norm = g.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clip_by_norm_empty_is_noop() {
        let mut g: Vec<f32> = vec![];
        clip_by_norm(&mut g, 1.0);
        assert!(g.is_empty());
    }

    #[test]
    fn is_finite_detects_nan_and_inf() {
        assert!(is_finite(&[1.0, 2.0]));
        assert!(!is_finite(&[1.0, f32::NAN]));
        assert!(!is_finite(&[f32::INFINITY]));
    }

    #[test]
    fn sanitize_gradient_zeroes_non_finite_entries() {
        let mut g = vec![1.0, f32::NAN, f32::INFINITY, 2.0];
        let replaced = sanitize_gradient(&mut g);
        assert_eq!(replaced, 2);
        assert_eq!(g, vec![1.0, 0.0, 0.0, 2.0]);
    }
}
