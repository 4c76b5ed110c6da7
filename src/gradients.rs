//! Gradient Utilities
//!
//! Global L2 norm and norm clipping over a flat list of gradient tensors.
//! Both networks clip with the same routine; the norm is also the
//! trainer's early warning for divergence (a non-finite norm means a
//! non-finite gradient somewhere).
//!
//! ```text
//! norm = sqrt(sum over all tensors of g_i^2)
//! if norm > max_norm: scale every gradient by max_norm / norm
//! ```

use crate::tensor::Tensor;

/// L2 norm across all tensors in the list.
pub fn grad_norm(tensors: &[&Tensor]) -> f32 {
    tensors
        .iter()
        .map(|t| t.sum_sq())
        .sum::<f32>()
        .sqrt()
}

/// Clip gradients to `max_norm` in place, preserving direction.
///
/// Returns the pre-clip norm so callers can log it or detect divergence.
pub fn clip_gradients(tensors: &mut [&mut Tensor], max_norm: f32) -> f32 {
    let norm = tensors
        .iter()
        .map(|t| t.sum_sq())
        .sum::<f32>()
        .sqrt();

    if norm > max_norm && norm.is_finite() {
        let scale = max_norm / norm;
        for t in tensors.iter_mut() {
            t.scale(scale);
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_over_multiple_tensors() {
        let a = Tensor::new(vec![3.0], vec![1]);
        let b = Tensor::new(vec![4.0], vec![1]);
        assert!((grad_norm(&[&a, &b]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn clip_scales_down_only_when_needed() {
        let mut a = Tensor::new(vec![3.0], vec![1]);
        let mut b = Tensor::new(vec![4.0], vec![1]);
        let norm = clip_gradients(&mut [&mut a, &mut b], 1.0);
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((a.data[0] - 0.6).abs() < 1e-6);
        assert!((b.data[0] - 0.8).abs() < 1e-6);

        // Already under the limit: untouched.
        let mut c = Tensor::new(vec![0.1], vec![1]);
        clip_gradients(&mut [&mut c], 1.0);
        assert_eq!(c.data[0], 0.1);
    }

    #[test]
    fn non_finite_norm_is_reported_not_scaled() {
        let mut a = Tensor::new(vec![f32::NAN], vec![1]);
        let norm = clip_gradients(&mut [&mut a], 1.0);
        assert!(norm.is_nan());
        assert!(a.data[0].is_nan());
    }
}
