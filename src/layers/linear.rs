//! Linear Layer
//!
//! Affine transformation `y = x @ W + b` over a batch of row vectors,
//! with the input cached for the backward pass:
//!
//! ```text
//! grad_W = x^T @ grad_y
//! grad_b = column sums of grad_y
//! grad_x = grad_y @ W^T
//! ```

use crate::tensor::Tensor;

/// Deterministic pseudo-random initialization.
///
/// A small LCG keeps initialization reproducible without touching the
/// run's sampling stream; `scale` sets the magnitude of initial weights.
pub fn random_init(size: usize, seed: u64, scale: f32) -> Vec<f32> {
    let mut rng = seed;
    (0..size)
        .map(|_| {
            rng = rng.wrapping_mul(1103515245).wrapping_add(12345);
            let val = ((rng / 65536) % 32768) as f32 / 32768.0;
            (val - 0.5) * 2.0 * scale
        })
        .collect()
}

/// Fully connected layer.
pub struct Linear {
    /// Weight matrix `[in_features, out_features]`.
    pub weight: Tensor,
    /// Bias vector `[out_features]`.
    pub bias: Tensor,
}

impl Linear {
    /// Create a layer with He-scaled initialization and zero bias.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = (2.0 / in_features as f32).sqrt();
        Self {
            weight: Tensor::new(
                random_init(in_features * out_features, seed, scale),
                vec![in_features, out_features],
            ),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Forward pass over a `[batch, in_features]` input.
    pub fn forward(&self, x: &Tensor) -> (Tensor, LinearCache) {
        let mut y = x.matmul(&self.weight);
        y.add_row_bias(&self.bias);
        (y, LinearCache { x: x.clone() })
    }

    /// Backward pass: gradients for weight, bias, and input.
    pub fn backward(&self, grad_out: &Tensor, cache: &LinearCache) -> LinearGradients {
        let grad_weight = cache.x.transpose().matmul(grad_out);

        let out_features = self.bias.data.len();
        let mut grad_bias = Tensor::zeros(vec![out_features]);
        for row in grad_out.data.chunks(out_features) {
            for (b, &g) in grad_bias.data.iter_mut().zip(row) {
                *b += g;
            }
        }

        let grad_x = grad_out.matmul(&self.weight.transpose());

        LinearGradients {
            weight: grad_weight,
            bias: grad_bias,
            x: grad_x,
        }
    }
}

/// Cached forward input.
pub struct LinearCache {
    pub x: Tensor,
}

/// Gradients produced by [`Linear::backward`].
pub struct LinearGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient to pass to the previous layer.
    pub x: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loss = sum of outputs; checks analytic gradients against finite
    /// differences on a small layer.
    #[test]
    fn gradients_match_finite_difference() {
        let mut layer = Linear::new(3, 2, 99);
        let x = Tensor::new(vec![0.5, -1.0, 2.0, 1.5, 0.0, -0.5], vec![2, 3]);

        let (y, cache) = layer.forward(&x);
        let grad_out = Tensor::new(vec![1.0; y.data.len()], y.shape.clone());
        let grads = layer.backward(&grad_out, &cache);

        let eps = 1e-3;
        let loss = |layer: &Linear, x: &Tensor| -> f32 {
            let (y, _) = layer.forward(x);
            y.data.iter().sum()
        };

        for i in 0..layer.weight.data.len() {
            let orig = layer.weight.data[i];
            layer.weight.data[i] = orig + eps;
            let up = loss(&layer, &x);
            layer.weight.data[i] = orig - eps;
            let down = loss(&layer, &x);
            layer.weight.data[i] = orig;
            let numeric = (up - down) / (2.0 * eps);
            assert!(
                (numeric - grads.weight.data[i]).abs() < 1e-2,
                "weight grad {i}: numeric {numeric} vs analytic {}",
                grads.weight.data[i]
            );
        }

        for i in 0..layer.bias.data.len() {
            let orig = layer.bias.data[i];
            layer.bias.data[i] = orig + eps;
            let up = loss(&layer, &x);
            layer.bias.data[i] = orig - eps;
            let down = loss(&layer, &x);
            layer.bias.data[i] = orig;
            let numeric = (up - down) / (2.0 * eps);
            assert!((numeric - grads.bias.data[i]).abs() < 1e-2);
        }
    }

    #[test]
    fn init_is_deterministic() {
        let a = random_init(16, 7, 0.1);
        let b = random_init(16, 7, 0.1);
        assert_eq!(a, b);
        let c = random_init(16, 8, 0.1);
        assert_ne!(a, c);
    }
}
