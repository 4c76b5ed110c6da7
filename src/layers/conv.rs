//! 1-D Convolution with Max-Over-Time Pooling
//!
//! The discriminator's encoder. Each filter of window size `k` slides over
//! the `[seq_len, embed_dim]` embedded sequence; a window is the `k`
//! consecutive embedding rows flattened into one vector, so a filter is an
//! affine map `[k * embed_dim] -> [count]` followed by ReLU. Max-over-time
//! pooling keeps, per output channel, the largest activation across all
//! window positions, recording where it came from for the backward pass.
//!
//! Filters run in parallel with Rayon; each filter's output range in the
//! pooled vector is disjoint, so parallelism cannot change any value.

use crate::layers::activation::relu_grad;
use crate::layers::linear::random_init;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// One group of equally sized convolution filters.
pub struct ConvFilter {
    /// Window size in tokens.
    pub size: usize,
    /// Flattened filter weights `[size * embed_dim, count]`.
    pub weight: Tensor,
    /// Bias `[count]`.
    pub bias: Tensor,
}

/// A bank of filter groups, one per configured window size.
pub struct ConvBank {
    pub filters: Vec<ConvFilter>,
    embed_dim: usize,
}

/// Per-filter pooling record: for every output channel, the winning window
/// position and its pre-activation value.
pub struct ConvCache {
    pub x: Tensor,
    pub argmax: Vec<Vec<usize>>,
    pub pre_at_max: Vec<Vec<f32>>,
}

/// Gradients for every filter group, in bank order.
pub struct ConvGradients {
    pub weights: Vec<Tensor>,
    pub biases: Vec<Tensor>,
}

impl ConvBank {
    /// Build a bank from `(size, count)` pairs.
    pub fn new(embed_dim: usize, sizes: &[usize], counts: &[usize], seed: u64) -> Self {
        assert_eq!(sizes.len(), counts.len());
        let filters = sizes
            .iter()
            .zip(counts)
            .enumerate()
            .map(|(i, (&size, &count))| {
                let fan_in = size * embed_dim;
                let scale = (2.0 / fan_in as f32).sqrt();
                ConvFilter {
                    size,
                    weight: Tensor::new(
                        random_init(fan_in * count, seed.wrapping_add(i as u64 * 7919), scale),
                        vec![fan_in, count],
                    ),
                    bias: Tensor::zeros(vec![count]),
                }
            })
            .collect();
        Self { filters, embed_dim }
    }

    /// Total pooled feature width (sum of filter counts).
    pub fn total_features(&self) -> usize {
        self.filters.iter().map(|f| f.bias.data.len()).sum()
    }

    /// Forward pass over one embedded sequence `[seq_len, embed_dim]`.
    /// Returns the pooled feature vector and the pooling cache.
    pub fn forward(&self, x: &Tensor) -> (Vec<f32>, ConvCache) {
        let seq_len = x.rows();
        let dim = self.embed_dim;

        let per_filter: Vec<(Vec<f32>, Vec<usize>, Vec<f32>)> = self
            .filters
            .par_iter()
            .map(|filter| {
                let count = filter.bias.data.len();
                let windows = seq_len + 1 - filter.size;
                let mut pooled = vec![0.0f32; count];
                let mut argmax = vec![0usize; count];
                let mut pre_at_max = vec![f32::NEG_INFINITY; count];

                for t in 0..windows {
                    let window = &x.data[t * dim..(t + filter.size) * dim];
                    for c in 0..count {
                        let mut pre = filter.bias.data[c];
                        for (j, &w_val) in window.iter().enumerate() {
                            pre += w_val * filter.weight.data[j * count + c];
                        }
                        if pre > pre_at_max[c] {
                            pre_at_max[c] = pre;
                            argmax[c] = t;
                            pooled[c] = pre.max(0.0);
                        }
                    }
                }
                (pooled, argmax, pre_at_max)
            })
            .collect();

        let mut pooled = Vec::with_capacity(self.total_features());
        let mut argmax = Vec::with_capacity(self.filters.len());
        let mut pre_at_max = Vec::with_capacity(self.filters.len());
        for (p, a, m) in per_filter {
            pooled.extend(p);
            argmax.push(a);
            pre_at_max.push(m);
        }

        (
            pooled,
            ConvCache {
                x: x.clone(),
                argmax,
                pre_at_max,
            },
        )
    }

    /// Backward pass. `grad_pooled` spans the concatenated feature vector;
    /// parameter gradients accumulate into `grads` and the embedding-row
    /// gradient into `grad_x`.
    pub fn backward(
        &self,
        grad_pooled: &[f32],
        cache: &ConvCache,
        grads: &mut ConvGradients,
        grad_x: &mut Tensor,
    ) {
        let dim = self.embed_dim;
        let mut offset = 0usize;
        for (f_idx, filter) in self.filters.iter().enumerate() {
            let count = filter.bias.data.len();
            for c in 0..count {
                let g = grad_pooled[offset + c];
                let pre = cache.pre_at_max[f_idx][c];
                // ReLU: no gradient when the winning pre-activation was
                // non-positive (pooled value was clamped to zero).
                if g == 0.0 || relu_grad(pre) == 0.0 {
                    continue;
                }
                let t = cache.argmax[f_idx][c];
                let window = &cache.x.data[t * dim..(t + filter.size) * dim];
                for (j, &w_val) in window.iter().enumerate() {
                    grads.weights[f_idx].data[j * count + c] += g * w_val;
                    grad_x.data[t * dim + j] += g * filter.weight.data[j * count + c];
                }
                grads.biases[f_idx].data[c] += g;
            }
            offset += count;
        }
    }

    /// Parameter tensors in a fixed order.
    pub fn params(&self) -> Vec<&Tensor> {
        self.filters
            .iter()
            .flat_map(|f| [&f.weight, &f.bias])
            .collect()
    }

    /// Mutable parameter tensors in the same order.
    pub fn params_mut(&mut self) -> Vec<&mut Tensor> {
        self.filters
            .iter_mut()
            .flat_map(|f| [&mut f.weight, &mut f.bias])
            .collect()
    }
}

impl ConvGradients {
    pub fn zeros_like(bank: &ConvBank) -> Self {
        Self {
            weights: bank
                .filters
                .iter()
                .map(|f| Tensor::zeros_like(&f.weight))
                .collect(),
            biases: bank
                .filters
                .iter()
                .map(|f| Tensor::zeros_like(&f.bias))
                .collect(),
        }
    }

    pub fn add_assign(&mut self, other: &ConvGradients) {
        for (dst, src) in self.weights.iter_mut().zip(&other.weights) {
            dst.add_assign(src);
        }
        for (dst, src) in self.biases.iter_mut().zip(&other.biases) {
            dst.add_assign(src);
        }
    }

    /// Gradient tensors in the bank's parameter order.
    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        self.weights
            .iter_mut()
            .zip(self.biases.iter_mut())
            .flat_map(|(w, b)| [w, b])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> ConvBank {
        ConvBank::new(3, &[2, 3], &[4, 2], 55)
    }

    #[test]
    fn pooled_width_is_total_filters() {
        let bank = bank();
        assert_eq!(bank.total_features(), 6);
        let x = Tensor::new((0..15).map(|i| (i as f32) * 0.1 - 0.7).collect(), vec![5, 3]);
        let (pooled, _) = bank.forward(&x);
        assert_eq!(pooled.len(), 6);
        assert!(pooled.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn pooling_picks_maximum_window() {
        // One filter of size 1 and one channel: pooling reduces to the max
        // ReLU response over positions.
        let mut bank = ConvBank::new(2, &[1], &[1], 3);
        bank.filters[0].weight = Tensor::new(vec![1.0, 0.0], vec![2, 1]);
        bank.filters[0].bias = Tensor::zeros(vec![1]);
        let x = Tensor::new(vec![0.5, 9.0, 2.0, 9.0, -3.0, 9.0], vec![3, 2]);
        let (pooled, cache) = bank.forward(&x);
        assert_eq!(pooled, vec![2.0]);
        assert_eq!(cache.argmax[0][0], 1);
    }

    #[test]
    fn gradients_match_finite_difference() {
        let mut bank = bank();
        let x = Tensor::new(
            (0..15).map(|i| ((i * 13 + 5) % 9) as f32 * 0.2 - 0.8).collect(),
            vec![5, 3],
        );

        let (_pooled, cache) = bank.forward(&x);
        let grad_pooled = vec![1.0; bank.total_features()];
        let mut grads = ConvGradients::zeros_like(&bank);
        let mut grad_x = Tensor::zeros_like(&x);
        bank.backward(&grad_pooled, &cache, &mut grads, &mut grad_x);

        let loss = |bank: &ConvBank, x: &Tensor| -> f32 {
            let (pooled, _) = bank.forward(x);
            pooled.iter().sum()
        };
        let eps = 1e-3;

        // Filter weights. Max-pool argmax is stable under small nudges for
        // generic inputs, so finite differences apply.
        for f in 0..bank.filters.len() {
            let len = bank.filters[f].weight.data.len();
            for &i in &[0usize, len / 3, len - 1] {
                let orig = bank.filters[f].weight.data[i];
                bank.filters[f].weight.data[i] = orig + eps;
                let up = loss(&bank, &x);
                bank.filters[f].weight.data[i] = orig - eps;
                let down = loss(&bank, &x);
                bank.filters[f].weight.data[i] = orig;
                let numeric = (up - down) / (2.0 * eps);
                assert!(
                    (numeric - grads.weights[f].data[i]).abs() < 2e-2,
                    "filter {f} weight {i}: numeric {numeric} vs {}",
                    grads.weights[f].data[i]
                );
            }
        }

        // Input gradient.
        let mut x_pert = x.clone();
        for &i in &[0usize, 7, 14] {
            let orig = x_pert.data[i];
            x_pert.data[i] = orig + eps;
            let up = loss(&bank, &x_pert);
            x_pert.data[i] = orig - eps;
            let down = loss(&bank, &x_pert);
            x_pert.data[i] = orig;
            let numeric = (up - down) / (2.0 * eps);
            assert!((numeric - grad_x.data[i]).abs() < 2e-2);
        }
    }
}
