//! Rollout Policy
//!
//! The reward estimator that bridges the non-differentiable gap between
//! discriminator and generator. Token sampling breaks gradient flow, so
//! the generator is credited per prefix instead: for a sequence of length
//! `L` and each prefix length `t < L`, the policy draws `rollout_num`
//! Monte-Carlo completions, scores each with the discriminator, and
//! averages. The complete sequence (`t == L`) is scored directly.
//!
//! Completions are sampled from a **snapshot** of the generator — an owned
//! copy of its parameters, never a reference into the live model. After
//! every generator update the snapshot is blended toward the live
//! parameters at `rollout_update_rate`; at `k_steps` epoch boundaries the
//! trainer forces an exact copy ([`RolloutPolicy::resync`]) so the
//! snapshot cannot drift indefinitely. The snapshot is written only by
//! those two copy operations, never by gradient descent.

use crate::data::Sequence;
use crate::discriminator::Discriminator;
use crate::generator::{Generator, GeneratorNet};
use rand::rngs::StdRng;

/// One scalar reward per token of a sequence, each in `[0, 1]`.
pub type RewardVector = Vec<f32>;

/// Monte-Carlo reward estimator over a lagging generator snapshot.
pub struct RolloutPolicy {
    net: GeneratorNet,
    rollout_num: usize,
    update_rate: f32,
}

impl RolloutPolicy {
    /// Snapshot the generator's current parameters.
    pub fn new(generator: &Generator, rollout_num: usize, update_rate: f32) -> Self {
        Self {
            net: generator.net.clone_net(),
            rollout_num,
            update_rate,
        }
    }

    /// Estimate a full reward vector for every sequence in the batch.
    ///
    /// Sequential over sequences and completions: the estimate must be a
    /// pure function of (snapshot, discriminator, rng), so the single RNG
    /// stream is consumed in a fixed order.
    pub fn rewards(
        &self,
        batch: &[Sequence],
        discriminator: &Discriminator,
        rng: &mut StdRng,
    ) -> Vec<RewardVector> {
        batch
            .iter()
            .map(|seq| self.reward_vector(seq, discriminator, rng))
            .collect()
    }

    fn reward_vector(
        &self,
        seq: &Sequence,
        discriminator: &Discriminator,
        rng: &mut StdRng,
    ) -> RewardVector {
        let len = seq.len();
        let mut rewards = Vec::with_capacity(len);

        for t in 1..len {
            let completions: Vec<Sequence> = (0..self.rollout_num)
                .map(|_| Sequence::generated(self.net.continue_from(&seq.ids[..t], rng, 1.0)))
                .collect();
            let scores = discriminator.score(&completions);
            rewards.push(scores.iter().sum::<f32>() / self.rollout_num as f32);
        }

        // Final prefix is the whole sequence: direct score, no completion.
        let direct = discriminator.score(std::slice::from_ref(seq));
        rewards.push(direct[0]);

        rewards
    }

    /// Blend the snapshot toward the live generator:
    /// `snapshot <- rate * generator + (1 - rate) * snapshot`.
    /// A rate of zero leaves the snapshot untouched.
    pub fn refresh(&mut self, generator: &Generator) {
        if self.update_rate == 0.0 {
            return;
        }
        for (dst, src) in self
            .net
            .params_mut()
            .into_iter()
            .zip(generator.net.params())
        {
            dst.lerp_from(src, self.update_rate);
        }
    }

    /// Forced full resynchronization: snapshot becomes an exact copy.
    pub fn resync(&mut self, generator: &Generator) {
        for (dst, src) in self
            .net
            .params_mut()
            .into_iter()
            .zip(generator.net.params())
        {
            dst.copy_from(src);
        }
    }

    /// Snapshot parameters (checkpointing, tests).
    pub fn params(&self) -> Vec<&crate::tensor::Tensor> {
        self.net.params()
    }

    /// Mutable snapshot parameters (checkpoint restore).
    pub fn params_mut(&mut self) -> Vec<&mut crate::tensor::Tensor> {
        self.net.params_mut()
    }

    /// Completions per prefix.
    pub fn rollout_num(&self) -> usize {
        self.rollout_num
    }
}
