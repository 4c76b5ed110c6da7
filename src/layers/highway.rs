//! Highway Layer
//!
//! Gated skip connection over the pooled convolution features:
//!
//! ```text
//! h = relu(x Wh + bh)       transform
//! t = sigmoid(x Wt + bt)    gate
//! y = t ⊙ h + (1 − t) ⊙ x
//! ```
//!
//! Lets the discriminator pass pooled features through unchanged where the
//! gate closes, which stabilizes early training when the transform path is
//! still random.

use crate::layers::activation::{relu, relu_grad, sigmoid, sigmoid_grad};
use crate::layers::linear::{Linear, LinearCache, LinearGradients};
use crate::tensor::Tensor;

/// Highway block over `[batch, features]` inputs.
pub struct Highway {
    pub transform: Linear,
    pub gate: Linear,
}

/// Forward intermediates needed by the backward pass.
pub struct HighwayCache {
    x: Tensor,
    h_pre: Tensor,
    t: Tensor,
    transform_cache: LinearCache,
    gate_cache: LinearCache,
}

/// Gradients for both internal linears plus the input.
pub struct HighwayGradients {
    pub transform: LinearGradients,
    pub gate: LinearGradients,
    pub x: Tensor,
}

impl Highway {
    pub fn new(features: usize, seed: u64) -> Self {
        Self {
            transform: Linear::new(features, features, seed),
            gate: Linear::new(features, features, seed.wrapping_add(31)),
        }
    }

    pub fn forward(&self, x: &Tensor) -> (Tensor, HighwayCache) {
        let (h_pre, transform_cache) = self.transform.forward(x);
        let (t_pre, gate_cache) = self.gate.forward(x);

        let t = Tensor::new(
            t_pre.data.iter().map(|&v| sigmoid(v)).collect(),
            t_pre.shape.clone(),
        );
        let y = Tensor::new(
            x.data
                .iter()
                .zip(&h_pre.data)
                .zip(&t.data)
                .map(|((&xv, &hv), &tv)| tv * relu(hv) + (1.0 - tv) * xv)
                .collect(),
            x.shape.clone(),
        );

        (
            y,
            HighwayCache {
                x: x.clone(),
                h_pre,
                t,
                transform_cache,
                gate_cache,
            },
        )
    }

    pub fn backward(&self, grad_out: &Tensor, cache: &HighwayCache) -> HighwayGradients {
        let n = grad_out.data.len();
        let mut dh_pre = vec![0.0f32; n];
        let mut dt_pre = vec![0.0f32; n];
        let mut dx_direct = vec![0.0f32; n];

        for i in 0..n {
            let g = grad_out.data[i];
            let t = cache.t.data[i];
            let h_pre = cache.h_pre.data[i];
            let x = cache.x.data[i];
            dh_pre[i] = g * t * relu_grad(h_pre);
            dt_pre[i] = g * (relu(h_pre) - x) * sigmoid_grad(t);
            dx_direct[i] = g * (1.0 - t);
        }

        let transform = self.transform.backward(
            &Tensor::new(dh_pre, grad_out.shape.clone()),
            &cache.transform_cache,
        );
        let gate = self.gate.backward(
            &Tensor::new(dt_pre, grad_out.shape.clone()),
            &cache.gate_cache,
        );

        let mut x_grad = Tensor::new(dx_direct, grad_out.shape.clone());
        x_grad.add_assign(&transform.x);
        x_grad.add_assign(&gate.x);

        HighwayGradients {
            transform,
            gate,
            x: x_grad,
        }
    }

    /// Parameter tensors in a fixed order.
    pub fn params(&self) -> Vec<&Tensor> {
        vec![
            &self.transform.weight,
            &self.transform.bias,
            &self.gate.weight,
            &self.gate.bias,
        ]
    }

    /// Mutable parameter tensors in the same order.
    pub fn params_mut(&mut self) -> Vec<&mut Tensor> {
        vec![
            &mut self.transform.weight,
            &mut self.transform.bias,
            &mut self.gate.weight,
            &mut self.gate.bias,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_gate_passes_input_through() {
        let mut hw = Highway::new(3, 17);
        // Push the gate strongly negative: sigmoid -> ~0, y -> x.
        hw.gate.bias = Tensor::new(vec![-30.0; 3], vec![3]);
        hw.gate.weight.fill_zero();
        let x = Tensor::new(vec![0.3, -0.6, 1.2], vec![1, 3]);
        let (y, _) = hw.forward(&x);
        for (a, b) in y.data.iter().zip(&x.data) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn gradients_match_finite_difference() {
        let mut hw = Highway::new(3, 23);
        let x = Tensor::new(vec![0.4, -0.2, 0.9, -0.5, 0.1, 0.7], vec![2, 3]);

        let (y, cache) = hw.forward(&x);
        let grad_out = Tensor::new(vec![1.0; y.data.len()], y.shape.clone());
        let grads = hw.backward(&grad_out, &cache);

        let loss = |hw: &Highway, x: &Tensor| -> f32 {
            let (y, _) = hw.forward(x);
            y.data.iter().sum()
        };
        let eps = 1e-3;

        for i in 0..hw.transform.weight.data.len() {
            let orig = hw.transform.weight.data[i];
            hw.transform.weight.data[i] = orig + eps;
            let up = loss(&hw, &x);
            hw.transform.weight.data[i] = orig - eps;
            let down = loss(&hw, &x);
            hw.transform.weight.data[i] = orig;
            let numeric = (up - down) / (2.0 * eps);
            assert!(
                (numeric - grads.transform.weight.data[i]).abs() < 2e-2,
                "transform weight {i}"
            );
        }

        let mut x_pert = x.clone();
        for i in 0..x.data.len() {
            let orig = x_pert.data[i];
            x_pert.data[i] = orig + eps;
            let up = loss(&hw, &x_pert);
            x_pert.data[i] = orig - eps;
            let down = loss(&hw, &x_pert);
            x_pert.data[i] = orig;
            let numeric = (up - down) / (2.0 * eps);
            assert!((numeric - grads.x.data[i]).abs() < 2e-2, "input grad {i}");
        }
    }
}
