//! GRU Cell
//!
//! The generator's recurrence. One step computes, for input `x` and
//! previous hidden state `h`:
//!
//! ```text
//! z  = sigmoid(x Wz + h Uz + bz)        update gate
//! r  = sigmoid(x Wr + h Ur + br)        reset gate
//! ĥ  = tanh(x Wh + (r ⊙ h) Uh + bh)     candidate state
//! h' = (1 − z) ⊙ h + z ⊙ ĥ
//! ```
//!
//! The backward pass is the chain rule through those four lines, with all
//! gate activations cached from the forward step. Weight gradients are
//! accumulated into a caller-owned [`GruGradients`] so one structure can
//! collect a whole unrolled sequence.

use crate::layers::activation::{sigmoid, sigmoid_grad, tanh_grad};
use crate::layers::linear::random_init;
use crate::tensor::{axpy, matvec, outer_acc, vecmat, Tensor};

/// GRU cell parameters. Input-to-hidden weights are `[input_dim, hidden]`,
/// hidden-to-hidden `[hidden, hidden]`, biases `[hidden]`.
pub struct GruCell {
    pub wz: Tensor,
    pub uz: Tensor,
    pub bz: Tensor,
    pub wr: Tensor,
    pub ur: Tensor,
    pub br: Tensor,
    pub wh: Tensor,
    pub uh: Tensor,
    pub bh: Tensor,
    hidden: usize,
}

/// Values cached by one forward step, needed for its backward step.
pub struct GruStepCache {
    pub x: Vec<f32>,
    pub h_prev: Vec<f32>,
    pub z: Vec<f32>,
    pub r: Vec<f32>,
    pub h_hat: Vec<f32>,
}

/// Accumulated gradients for all nine parameter tensors.
pub struct GruGradients {
    pub wz: Tensor,
    pub uz: Tensor,
    pub bz: Tensor,
    pub wr: Tensor,
    pub ur: Tensor,
    pub br: Tensor,
    pub wh: Tensor,
    pub uh: Tensor,
    pub bh: Tensor,
}

impl GruCell {
    pub fn new(input_dim: usize, hidden: usize, seed: u64) -> Self {
        let in_scale = (1.0 / input_dim as f32).sqrt();
        let hid_scale = (1.0 / hidden as f32).sqrt();
        let w = |s: u64| {
            Tensor::new(
                random_init(input_dim * hidden, seed.wrapping_add(s), in_scale),
                vec![input_dim, hidden],
            )
        };
        let u = |s: u64| {
            Tensor::new(
                random_init(hidden * hidden, seed.wrapping_add(s), hid_scale),
                vec![hidden, hidden],
            )
        };
        Self {
            wz: w(1),
            uz: u(2),
            bz: Tensor::zeros(vec![hidden]),
            wr: w(3),
            ur: u(4),
            br: Tensor::zeros(vec![hidden]),
            wh: w(5),
            uh: u(6),
            bh: Tensor::zeros(vec![hidden]),
            hidden,
        }
    }

    /// Hidden state dimension.
    pub fn hidden_dim(&self) -> usize {
        self.hidden
    }

    /// A zero initial hidden state.
    pub fn initial_state(&self) -> Vec<f32> {
        vec![0.0; self.hidden]
    }

    /// One forward step. Returns the new hidden state and the cache for
    /// the matching backward step.
    pub fn forward_step(&self, x: &[f32], h_prev: &[f32]) -> (Vec<f32>, GruStepCache) {
        let mut z = vecmat(x, &self.wz);
        axpy(&mut z, &vecmat(h_prev, &self.uz), 1.0);
        for (v, &b) in z.iter_mut().zip(&self.bz.data) {
            *v = sigmoid(*v + b);
        }

        let mut r = vecmat(x, &self.wr);
        axpy(&mut r, &vecmat(h_prev, &self.ur), 1.0);
        for (v, &b) in r.iter_mut().zip(&self.br.data) {
            *v = sigmoid(*v + b);
        }

        let rh: Vec<f32> = r.iter().zip(h_prev).map(|(&rv, &hv)| rv * hv).collect();
        let mut h_hat = vecmat(x, &self.wh);
        axpy(&mut h_hat, &vecmat(&rh, &self.uh), 1.0);
        for (v, &b) in h_hat.iter_mut().zip(&self.bh.data) {
            *v = (*v + b).tanh();
        }

        let h_new: Vec<f32> = z
            .iter()
            .zip(h_prev)
            .zip(&h_hat)
            .map(|((&zv, &hv), &cv)| (1.0 - zv) * hv + zv * cv)
            .collect();

        let cache = GruStepCache {
            x: x.to_vec(),
            h_prev: h_prev.to_vec(),
            z,
            r,
            h_hat,
        };
        (h_new, cache)
    }

    /// One backward step. `dh_next` is the gradient flowing into the step's
    /// output state. Parameter gradients accumulate into `grads`; the
    /// returned pair is `(dx, dh_prev)`.
    pub fn backward_step(
        &self,
        dh_next: &[f32],
        cache: &GruStepCache,
        grads: &mut GruGradients,
    ) -> (Vec<f32>, Vec<f32>) {
        let n = self.hidden;
        let GruStepCache {
            x,
            h_prev,
            z,
            r,
            h_hat,
        } = cache;

        // h' = (1 − z) h + z ĥ
        let mut dh_prev: Vec<f32> = (0..n).map(|i| dh_next[i] * (1.0 - z[i])).collect();
        let dz: Vec<f32> = (0..n).map(|i| dh_next[i] * (h_hat[i] - h_prev[i])).collect();
        let dh_hat: Vec<f32> = (0..n).map(|i| dh_next[i] * z[i]).collect();

        // Candidate: ĥ = tanh(x Wh + (r ⊙ h) Uh + bh)
        let da_h: Vec<f32> = (0..n).map(|i| dh_hat[i] * tanh_grad(h_hat[i])).collect();
        let rh: Vec<f32> = r.iter().zip(h_prev).map(|(&rv, &hv)| rv * hv).collect();
        outer_acc(&mut grads.wh, x, &da_h);
        outer_acc(&mut grads.uh, &rh, &da_h);
        axpy(&mut grads.bh.data, &da_h, 1.0);
        let mut dx = matvec(&self.wh, &da_h);
        let drh = matvec(&self.uh, &da_h);
        let dr: Vec<f32> = (0..n).map(|i| drh[i] * h_prev[i]).collect();
        for i in 0..n {
            dh_prev[i] += drh[i] * r[i];
        }

        // Update gate: z = sigmoid(x Wz + h Uz + bz)
        let da_z: Vec<f32> = (0..n).map(|i| dz[i] * sigmoid_grad(z[i])).collect();
        outer_acc(&mut grads.wz, x, &da_z);
        outer_acc(&mut grads.uz, h_prev, &da_z);
        axpy(&mut grads.bz.data, &da_z, 1.0);
        axpy(&mut dx, &matvec(&self.wz, &da_z), 1.0);
        axpy(&mut dh_prev, &matvec(&self.uz, &da_z), 1.0);

        // Reset gate: r = sigmoid(x Wr + h Ur + br)
        let da_r: Vec<f32> = (0..n).map(|i| dr[i] * sigmoid_grad(r[i])).collect();
        outer_acc(&mut grads.wr, x, &da_r);
        outer_acc(&mut grads.ur, h_prev, &da_r);
        axpy(&mut grads.br.data, &da_r, 1.0);
        axpy(&mut dx, &matvec(&self.wr, &da_r), 1.0);
        axpy(&mut dh_prev, &matvec(&self.ur, &da_r), 1.0);

        (dx, dh_prev)
    }

    /// Parameter tensors in a fixed order (checkpointing, interpolation).
    pub fn params(&self) -> Vec<&Tensor> {
        vec![
            &self.wz, &self.uz, &self.bz, &self.wr, &self.ur, &self.br, &self.wh, &self.uh,
            &self.bh,
        ]
    }

    /// Mutable parameter tensors in the same fixed order.
    pub fn params_mut(&mut self) -> Vec<&mut Tensor> {
        vec![
            &mut self.wz,
            &mut self.uz,
            &mut self.bz,
            &mut self.wr,
            &mut self.ur,
            &mut self.br,
            &mut self.wh,
            &mut self.uh,
            &mut self.bh,
        ]
    }
}

impl GruGradients {
    /// Zero gradients shaped like a cell's parameters.
    pub fn zeros_like(cell: &GruCell) -> Self {
        Self {
            wz: Tensor::zeros_like(&cell.wz),
            uz: Tensor::zeros_like(&cell.uz),
            bz: Tensor::zeros_like(&cell.bz),
            wr: Tensor::zeros_like(&cell.wr),
            ur: Tensor::zeros_like(&cell.ur),
            br: Tensor::zeros_like(&cell.br),
            wh: Tensor::zeros_like(&cell.wh),
            uh: Tensor::zeros_like(&cell.uh),
            bh: Tensor::zeros_like(&cell.bh),
        }
    }

    /// Element-wise accumulate another gradient set.
    pub fn add_assign(&mut self, other: &GruGradients) {
        for (dst, src) in self.tensors_mut().into_iter().zip(other.tensors()) {
            dst.add_assign(src);
        }
    }

    /// Gradient tensors in the cell's parameter order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        vec![
            &self.wz, &self.uz, &self.bz, &self.wr, &self.ur, &self.br, &self.wh, &self.uh,
            &self.bh,
        ]
    }

    /// Mutable gradient tensors in the cell's parameter order.
    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![
            &mut self.wz,
            &mut self.uz,
            &mut self.bz,
            &mut self.wr,
            &mut self.ur,
            &mut self.br,
            &mut self.wh,
            &mut self.uh,
            &mut self.bh,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss(cell: &GruCell, x: &[f32], h0: &[f32]) -> f32 {
        // Two chained steps, loss = sum of final state. Exercises both the
        // direct and through-time gradient paths.
        let (h1, _) = cell.forward_step(x, h0);
        let (h2, _) = cell.forward_step(x, &h1);
        h2.iter().sum()
    }

    #[test]
    fn backward_matches_finite_difference() {
        let mut cell = GruCell::new(3, 4, 1234);
        let x = vec![0.4, -0.7, 1.1];
        let h0 = vec![0.2, -0.1, 0.05, 0.3];

        // Analytic gradients through two unrolled steps.
        let (h1, cache1) = cell.forward_step(&x, &h0);
        let (h2, cache2) = cell.forward_step(&x, &h1);
        let mut grads = GruGradients::zeros_like(&cell);
        let dh2 = vec![1.0; h2.len()];
        let (_dx2, dh1) = cell.backward_step(&dh2, &cache2, &mut grads);
        let (_dx1, _dh0) = cell.backward_step(&dh1, &cache1, &mut grads);

        let eps = 1e-3;
        // Spot-check a few entries of every parameter tensor.
        let names = ["wz", "uz", "bz", "wr", "ur", "br", "wh", "uh", "bh"];
        for (p_idx, name) in names.iter().enumerate() {
            let len = cell.params()[p_idx].data.len();
            for &i in &[0usize, len / 2, len - 1] {
                let orig = cell.params()[p_idx].data[i];
                cell.params_mut()[p_idx].data[i] = orig + eps;
                let up = loss(&cell, &x, &h0);
                cell.params_mut()[p_idx].data[i] = orig - eps;
                let down = loss(&cell, &x, &h0);
                cell.params_mut()[p_idx].data[i] = orig;

                let numeric = (up - down) / (2.0 * eps);
                let analytic = grads.tensors()[p_idx].data[i];
                assert!(
                    (numeric - analytic).abs() < 2e-2,
                    "{name}[{i}]: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn forward_is_deterministic() {
        let cell = GruCell::new(2, 3, 7);
        let x = vec![1.0, -1.0];
        let h = cell.initial_state();
        let (h1, _) = cell.forward_step(&x, &h);
        let (h2, _) = cell.forward_step(&x, &h);
        assert_eq!(h1, h2);
    }

    #[test]
    fn gates_stay_bounded() {
        let cell = GruCell::new(2, 3, 21);
        let (h, cache) = cell.forward_step(&[10.0, -10.0], &[5.0, -5.0, 0.0]);
        assert!(cache.z.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(cache.r.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(cache.h_hat.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        assert!(h.iter().all(|&v| v.is_finite()));
    }
}
