//! Dropout
//!
//! Inverted dropout over a feature tensor. Active only when the caller
//! passes `training = true` (the discriminator's `train_step`); scoring
//! always runs with dropout disabled. The mask is drawn from the run's
//! seeded RNG so training remains reproducible.

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

/// Dropout with a fixed rate.
pub struct Dropout {
    pub rate: f32,
}

/// Mask recorded by the forward pass; `None` when dropout was inactive.
pub struct DropoutCache {
    pub mask: Option<Vec<bool>>,
    pub scale: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&rate),
            "dropout rate must be in [0, 1)"
        );
        Self { rate }
    }

    /// Forward pass. Pass-through when not training or rate is zero.
    pub fn forward(&self, x: &Tensor, training: bool, rng: &mut StdRng) -> (Tensor, DropoutCache) {
        if !training || self.rate == 0.0 {
            return (
                x.clone(),
                DropoutCache {
                    mask: None,
                    scale: 1.0,
                },
            );
        }

        let scale = 1.0 / (1.0 - self.rate);
        let mut mask = Vec::with_capacity(x.data.len());
        let mut out = Tensor::zeros_like(x);
        for i in 0..x.data.len() {
            let keep = rng.random::<f32>() > self.rate;
            mask.push(keep);
            if keep {
                out.data[i] = x.data[i] * scale;
            }
        }
        (
            out,
            DropoutCache {
                mask: Some(mask),
                scale,
            },
        )
    }

    /// Route gradients through the same mask.
    pub fn backward(&self, grad_out: &Tensor, cache: &DropoutCache) -> Tensor {
        match &cache.mask {
            None => grad_out.clone(),
            Some(mask) => {
                let mut grad_in = Tensor::zeros_like(grad_out);
                for (i, &keep) in mask.iter().enumerate() {
                    if keep {
                        grad_in.data[i] = grad_out.data[i] * cache.scale;
                    }
                }
                grad_in
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn inactive_outside_training() {
        let layer = Dropout::new(0.5);
        let mut rng = StdRng::seed_from_u64(1);
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]);
        let (y, cache) = layer.forward(&x, false, &mut rng);
        assert_eq!(y.data, x.data);
        assert!(cache.mask.is_none());
    }

    #[test]
    fn mask_is_reproducible_per_seed() {
        let layer = Dropout::new(0.5);
        let x = Tensor::new(vec![1.0; 64], vec![64]);
        let mut r1 = StdRng::seed_from_u64(9);
        let mut r2 = StdRng::seed_from_u64(9);
        let (y1, _) = layer.forward(&x, true, &mut r1);
        let (y2, _) = layer.forward(&x, true, &mut r2);
        assert_eq!(y1.data, y2.data);
    }

    #[test]
    fn backward_uses_forward_mask() {
        let layer = Dropout::new(0.5);
        let mut rng = StdRng::seed_from_u64(3);
        let x = Tensor::new(vec![1.0; 32], vec![32]);
        let (y, cache) = layer.forward(&x, true, &mut rng);
        let grad = Tensor::new(vec![1.0; 32], vec![32]);
        let grad_in = layer.backward(&grad, &cache);
        // Gradient flows exactly where the activation survived.
        for i in 0..32 {
            assert_eq!(grad_in.data[i] == 0.0, y.data[i] == 0.0);
        }
    }
}
