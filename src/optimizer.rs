//! Optimizers
//!
//! Adam and Adagrad over a flat parameter list. Both networks hand their
//! parameters over in a fixed order (the same order their `params` methods
//! return), and the optimizer keeps one state slot per tensor.
//!
//! ## Adam
//!
//! ```text
//! m = β₁ m + (1 − β₁) g            first moment
//! v = β₂ v + (1 − β₂) g²           second moment
//! m̂ = m / (1 − β₁^t)               bias correction
//! v̂ = v / (1 − β₂^t)
//! θ = θ − lr · m̂ / (√v̂ + ε)
//! ```
//!
//! ## Adagrad
//!
//! ```text
//! a = a + g²                       accumulated squared gradient
//! θ = θ − lr · g / (√a + ε)
//! ```
//!
//! Weight decay is classic L2: `g <- g + wd · θ` before the moment
//! updates. Updates parallelize per-element with Rayon for large tensors,
//! sequential below a threshold.

use crate::config::OptimKind;
use crate::tensor::Tensor;
use rayon::prelude::*;

const PAR_UPDATE_LEN: usize = 4096;

/// Per-tensor optimizer state.
pub struct Slot {
    /// First moment (Adam) — unused by Adagrad.
    pub m: Tensor,
    /// Second moment (Adam) or accumulated squared gradient (Adagrad).
    pub v: Tensor,
}

/// Optimizer state for one network.
pub struct Optimizer {
    pub kind: OptimKind,
    pub slots: Vec<Slot>,
    pub step: usize,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Optimizer {
    /// Zero-initialized state matching a parameter list.
    pub fn new(kind: OptimKind, params: &[&Tensor]) -> Self {
        let slots = params
            .iter()
            .map(|p| Slot {
                m: Tensor::zeros_like(p),
                v: Tensor::zeros_like(p),
            })
            .collect();
        Self {
            kind,
            slots,
            step: 0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// Apply one update. `params` and `grads` must be in the construction
    /// order. `weight_decay` of zero disables the L2 term.
    pub fn apply(
        &mut self,
        params: &mut [&mut Tensor],
        grads: &[&Tensor],
        lr: f32,
        weight_decay: f32,
    ) {
        assert_eq!(params.len(), self.slots.len(), "parameter count changed");
        assert_eq!(grads.len(), self.slots.len(), "gradient count changed");
        self.step += 1;
        let step = self.step as f32;

        match self.kind {
            OptimKind::Adam => {
                let bias1 = 1.0 - self.beta1.powf(step);
                let bias2 = 1.0 - self.beta2.powf(step);
                let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);
                for ((param, grad), slot) in
                    params.iter_mut().zip(grads).zip(self.slots.iter_mut())
                {
                    let kernel = |((p, &g), (m, v)): ((&mut f32, &f32), (&mut f32, &mut f32))| {
                        let g = g + weight_decay * *p;
                        *m = beta1 * *m + (1.0 - beta1) * g;
                        *v = beta2 * *v + (1.0 - beta2) * g * g;
                        let m_hat = *m / bias1;
                        let v_hat = *v / bias2;
                        *p -= lr * m_hat / (v_hat.sqrt() + eps);
                    };
                    if param.data.len() >= PAR_UPDATE_LEN {
                        param
                            .data
                            .par_iter_mut()
                            .zip(grad.data.par_iter())
                            .zip(slot.m.data.par_iter_mut().zip(slot.v.data.par_iter_mut()))
                            .for_each(kernel);
                    } else {
                        param
                            .data
                            .iter_mut()
                            .zip(grad.data.iter())
                            .zip(slot.m.data.iter_mut().zip(slot.v.data.iter_mut()))
                            .for_each(kernel);
                    }
                }
            }
            OptimKind::Adagrad => {
                let eps = self.epsilon;
                for ((param, grad), slot) in
                    params.iter_mut().zip(grads).zip(self.slots.iter_mut())
                {
                    let kernel = |((p, &g), a): ((&mut f32, &f32), &mut f32)| {
                        let g = g + weight_decay * *p;
                        *a += g * g;
                        *p -= lr * g / (a.sqrt() + eps);
                    };
                    if param.data.len() >= PAR_UPDATE_LEN {
                        param
                            .data
                            .par_iter_mut()
                            .zip(grad.data.par_iter())
                            .zip(slot.v.data.par_iter_mut())
                            .for_each(kernel);
                    } else {
                        param
                            .data
                            .iter_mut()
                            .zip(grad.data.iter())
                            .zip(slot.v.data.iter_mut())
                            .for_each(kernel);
                    }
                }
            }
        }
    }

    /// State tensors in a fixed order (checkpointing).
    pub fn state_tensors(&self) -> Vec<&Tensor> {
        self.slots.iter().flat_map(|s| [&s.m, &s.v]).collect()
    }

    /// Mutable state tensors in the same order (checkpoint restore).
    pub fn state_tensors_mut(&mut self) -> Vec<&mut Tensor> {
        self.slots
            .iter_mut()
            .flat_map(|s| [&mut s.m, &mut s.v])
            .collect()
    }
}
