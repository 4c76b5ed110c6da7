//! Discriminator
//!
//! Binary classifier over token sequences: its score is the probability
//! that a sequence was drawn from the real corpus rather than produced by
//! the generator.
//!
//! Topology (the convolutional family from the configuration surface):
//! embedding → parallel 1-D convolutions with max-over-time pooling →
//! dropout → highway → readout → dropout → fully connected ReLU layer →
//! sigmoid scalar.
//!
//! Dropout is active only inside [`Discriminator::train_step`]; `score`
//! always runs the deterministic path. Training is binary cross-entropy
//! with label 1 for real and 0 for generated sequences, L2 weight decay,
//! and gradient clipping.

use crate::config::{DiscriminatorSettings, GanSettings, ReadoutKind};
use crate::data::{EmbeddingTable, Sequence};
use crate::error::{PuckError, Result};
use crate::gradients::clip_gradients;
use crate::layers::conv::{ConvCache, ConvGradients};
use crate::layers::{
    relu, relu_grad, sigmoid, ConvBank, Dropout, Embedding, Highway, Linear,
};
use crate::optimizer::Optimizer;
use crate::tensor::Tensor;
use crate::vocab::Vocabulary;
use rand::rngs::StdRng;
use rayon::prelude::*;

/// Discriminator network parameters.
pub struct DiscriminatorNet {
    pub embedding: Embedding,
    pub conv: ConvBank,
    pub highway: Highway,
    pub fc: Linear,
    pub out: Linear,
    readout: ReadoutKind,
    sequence_len: usize,
}

impl DiscriminatorNet {
    pub fn new(
        gan: &GanSettings,
        settings: &DiscriminatorSettings,
        pretrained: Option<(&Vocabulary, &EmbeddingTable)>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if gan.sequence_len == 0 || gan.vocab_size == 0 {
            return Err(PuckError::config(
                "gan",
                "sequence_len and vocab_size must be positive",
            ));
        }
        let embedding = match pretrained {
            Some((vocab, table)) => {
                Embedding::with_pretrained(vocab, table, settings.input_dim, rng)
            }
            None => Embedding::new(gan.vocab_size, settings.input_dim, gan.seed ^ 0xd15c),
        };
        let conv = ConvBank::new(
            settings.input_dim,
            &settings.filter_sizes,
            &settings.num_filters,
            gan.seed ^ 0xc04f,
        );
        let features = conv.total_features();
        Ok(Self {
            embedding,
            conv,
            highway: Highway::new(features, gan.seed ^ 0x41a7),
            fc: Linear::new(features, settings.hidden_dim, gan.seed ^ 0x6b2d),
            out: Linear::new(settings.hidden_dim, 1, gan.seed ^ 0x1f93),
            readout: settings.readout,
            sequence_len: gan.sequence_len,
        })
    }

    /// Parameter tensors in a fixed order.
    pub fn params(&self) -> Vec<&Tensor> {
        let mut all = vec![&self.embedding.weight];
        all.extend(self.conv.params());
        all.extend(self.highway.params());
        all.push(&self.fc.weight);
        all.push(&self.fc.bias);
        all.push(&self.out.weight);
        all.push(&self.out.bias);
        all
    }

    /// Mutable parameter tensors in the same order.
    pub fn params_mut(&mut self) -> Vec<&mut Tensor> {
        let mut all = vec![&mut self.embedding.weight];
        all.extend(self.conv.params_mut());
        all.extend(self.highway.params_mut());
        all.push(&mut self.fc.weight);
        all.push(&mut self.fc.bias);
        all.push(&mut self.out.weight);
        all.push(&mut self.out.bias);
        all
    }
}

/// Forward intermediates for one scored batch.
struct DiscCache {
    padded: Vec<Vec<u32>>,
    conv_caches: Vec<ConvCache>,
    drop1: crate::layers::DropoutCache,
    highway_cache: crate::layers::HighwayCache,
    highway_out: Tensor,
    drop2: crate::layers::DropoutCache,
    fc_pre: Tensor,
    fc_cache: crate::layers::LinearCache,
    out_cache: crate::layers::LinearCache,
    probs: Vec<f32>,
}

/// The discriminator with its optimizer state and training policy.
pub struct Discriminator {
    pub net: DiscriminatorNet,
    pub optimizer: Optimizer,
    dropout1: Dropout,
    dropout2: Dropout,
    lr: f32,
    wd: f32,
    clip_grad: f32,
}

impl Discriminator {
    pub fn new(
        gan: &GanSettings,
        settings: &DiscriminatorSettings,
        pretrained: Option<(&Vocabulary, &EmbeddingTable)>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let net = DiscriminatorNet::new(gan, settings, pretrained, rng)?;
        let optimizer = Optimizer::new(settings.optim, &net.params());
        Ok(Self {
            net,
            optimizer,
            dropout1: Dropout::new(settings.dropout_prob1),
            dropout2: Dropout::new(settings.dropout_prob2),
            lr: settings.lr,
            wd: settings.wd,
            clip_grad: settings.clip_grad,
        })
    }

    /// Probability that each sequence in the batch is real, in `[0, 1]`.
    /// Deterministic: dropout disabled.
    pub fn score(&self, batch: &[Sequence]) -> Vec<f32> {
        // The RNG is unused on the non-training path.
        let mut unused = <StdRng as rand::SeedableRng>::seed_from_u64(0);
        let cache = self.forward(batch, false, &mut unused);
        cache.probs
    }

    fn forward(&self, batch: &[Sequence], training: bool, rng: &mut StdRng) -> DiscCache {
        let net = &self.net;
        let width = net.sequence_len;
        let padded: Vec<Vec<u32>> = batch.iter().map(|s| s.padded(width)).collect();

        // Per-sequence embedding + convolution, ordered by batch index.
        let per_seq: Vec<(Vec<f32>, ConvCache)> = padded
            .par_iter()
            .map(|ids| {
                let embedded = net.embedding.lookup(ids);
                net.conv.forward(&embedded)
            })
            .collect();

        let features = net.conv.total_features();
        let mut pooled = Tensor::zeros(vec![batch.len(), features]);
        let mut conv_caches = Vec::with_capacity(batch.len());
        for (i, (row, cache)) in per_seq.into_iter().enumerate() {
            pooled.row_mut(i).copy_from_slice(&row);
            conv_caches.push(cache);
        }

        let (d1, drop1) = self.dropout1.forward(&pooled, training, rng);
        let (highway_out, highway_cache) = net.highway.forward(&d1);
        let ro = net.readout.forward(&highway_out);
        let (d2, drop2) = self.dropout2.forward(&ro, training, rng);
        let (fc_pre, fc_cache) = net.fc.forward(&d2);
        let fc_act = Tensor::new(
            fc_pre.data.iter().map(|&v| relu(v)).collect(),
            fc_pre.shape.clone(),
        );
        let (logits, out_cache) = net.out.forward(&fc_act);
        let probs = logits.data.iter().map(|&v| sigmoid(v)).collect();

        DiscCache {
            padded,
            conv_caches,
            drop1,
            highway_cache,
            highway_out,
            drop2,
            fc_pre,
            fc_cache,
            out_cache,
            probs,
        }
    }

    /// One supervised update: binary cross-entropy with label 1 for the
    /// real batch and 0 for the generated batch. Returns the loss.
    pub fn train_step(
        &mut self,
        real: &[Sequence],
        fake: &[Sequence],
        rng: &mut StdRng,
    ) -> Result<f32> {
        let mut combined: Vec<Sequence> = Vec::with_capacity(real.len() + fake.len());
        combined.extend_from_slice(real);
        combined.extend_from_slice(fake);
        let labels: Vec<f32> = std::iter::repeat(1.0)
            .take(real.len())
            .chain(std::iter::repeat(0.0).take(fake.len()))
            .collect();

        let cache = self.forward(&combined, true, rng);
        let n = combined.len() as f32;

        let mut loss = 0.0f32;
        let mut grad_logits = Tensor::zeros(vec![combined.len(), 1]);
        for (i, (&p, &y)) in cache.probs.iter().zip(&labels).enumerate() {
            let p_safe = p.clamp(1e-7, 1.0 - 1e-7);
            loss -= (y * p_safe.ln() + (1.0 - y) * (1.0 - p_safe).ln()) / n;
            // d(BCE)/d(logit) through the sigmoid collapses to p - y.
            grad_logits.data[i] = (p - y) / n;
        }

        let net = &self.net;

        // Output head.
        let mut out_grads = net.out.backward(&grad_logits, &cache.out_cache);
        let mut d_fc_pre = out_grads.x;
        for (g, &pre) in d_fc_pre.data.iter_mut().zip(&cache.fc_pre.data) {
            *g *= relu_grad(pre);
        }
        let fc_grads = net.fc.backward(&d_fc_pre, &cache.fc_cache);

        // Back through dropout2, readout, highway, dropout1.
        let d_ro = self.dropout2.backward(&fc_grads.x, &cache.drop2);
        let d_highway_out = net.readout.backward(&d_ro, &cache.highway_out);
        let highway_grads = net.highway.backward(&d_highway_out, &cache.highway_cache);
        let d_pooled = self.dropout1.backward(&highway_grads.x, &cache.drop1);

        // Per-sequence convolution and embedding gradients, reduced in
        // batch order.
        let per_seq: Vec<(ConvGradients, Tensor)> = (0..combined.len())
            .into_par_iter()
            .map(|i| {
                let mut conv_grads = ConvGradients::zeros_like(&net.conv);
                let conv_cache = &cache.conv_caches[i];
                let mut grad_x = Tensor::zeros_like(&conv_cache.x);
                net.conv
                    .backward(d_pooled.row(i), conv_cache, &mut conv_grads, &mut grad_x);
                let mut grad_emb = Tensor::zeros_like(&net.embedding.weight);
                Embedding::accumulate_grad(&mut grad_emb, &cache.padded[i], &grad_x);
                (conv_grads, grad_emb)
            })
            .collect();

        let mut conv_total = ConvGradients::zeros_like(&net.conv);
        let mut emb_total = Tensor::zeros_like(&net.embedding.weight);
        for (cg, eg) in &per_seq {
            conv_total.add_assign(cg);
            emb_total.add_assign(eg);
        }

        // Assemble gradients in the net's parameter order, clip, update.
        let mut highway_grads = highway_grads;
        let mut fc_grads = fc_grads;
        let mut grad_list: Vec<&mut Tensor> = vec![&mut emb_total];
        grad_list.extend(conv_total.tensors_mut());
        grad_list.push(&mut highway_grads.transform.weight);
        grad_list.push(&mut highway_grads.transform.bias);
        grad_list.push(&mut highway_grads.gate.weight);
        grad_list.push(&mut highway_grads.gate.bias);
        grad_list.push(&mut fc_grads.weight);
        grad_list.push(&mut fc_grads.bias);
        grad_list.push(&mut out_grads.weight);
        grad_list.push(&mut out_grads.bias);

        let norm = clip_gradients(&mut grad_list, self.clip_grad);
        if !loss.is_finite() || !norm.is_finite() {
            return Err(PuckError::TrainingDiverged {
                phase: "discriminator",
                step: self.optimizer.step,
                value: if loss.is_finite() { norm } else { loss },
            });
        }

        let grads: Vec<&Tensor> = grad_list.into_iter().map(|t| &*t).collect();
        self.optimizer
            .apply(&mut self.net.params_mut(), &grads, self.lr, self.wd);
        Ok(loss)
    }

    /// Validation loss without updating parameters (early stopping).
    pub fn validation_loss(&self, real: &[Sequence], fake: &[Sequence]) -> f32 {
        let real_scores = self.score(real);
        let fake_scores = self.score(fake);
        let n = (real.len() + fake.len()) as f32;
        let mut loss = 0.0f32;
        for &p in &real_scores {
            loss -= p.clamp(1e-7, 1.0 - 1e-7).ln() / n;
        }
        for &p in &fake_scores {
            loss -= (1.0 - p.clamp(1e-7, 1.0 - 1e-7)).ln() / n;
        }
        loss
    }
}

/// Halts discriminator pretraining once validation loss stops improving.
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    rounds_since_best: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            rounds_since_best: 0,
        }
    }

    /// Record a validation loss; returns true when training should stop.
    /// A patience of zero disables early stopping.
    pub fn should_stop(&mut self, val_loss: f32) -> bool {
        if self.patience == 0 {
            return false;
        }
        if val_loss < self.best - 1e-6 {
            self.best = val_loss;
            self.rounds_since_best = 0;
            false
        } else {
            self.rounds_since_best += 1;
            self.rounds_since_best >= self.patience
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainConfig;
    use rand::SeedableRng;

    fn tiny_config() -> TrainConfig {
        let mut cfg = TrainConfig::default();
        cfg.gan.vocab_size = 12;
        cfg.gan.sequence_len = 6;
        cfg.discriminator.input_dim = 5;
        cfg.discriminator.hidden_dim = 6;
        cfg.discriminator.filter_sizes = vec![2, 3];
        cfg.discriminator.num_filters = vec![4, 4];
        cfg.discriminator.dropout_prob1 = 0.0;
        cfg.discriminator.dropout_prob2 = 0.0;
        cfg.discriminator.lr = 0.05;
        cfg.discriminator.wd = 0.0;
        cfg
    }

    #[test]
    fn scores_are_probabilities() {
        let cfg = tiny_config();
        let mut rng = StdRng::seed_from_u64(cfg.gan.seed);
        let disc = Discriminator::new(&cfg.gan, &cfg.discriminator, None, &mut rng).unwrap();
        let batch: Vec<Sequence> = (0..5)
            .map(|i| Sequence::generated(vec![i as u32 + 1, 2, 3]))
            .collect();
        let scores = disc.score(&batch);
        assert_eq!(scores.len(), 5);
        assert!(scores.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn scoring_is_deterministic() {
        let cfg = tiny_config();
        let mut rng = StdRng::seed_from_u64(1);
        let disc = Discriminator::new(&cfg.gan, &cfg.discriminator, None, &mut rng).unwrap();
        let batch = vec![Sequence::real(vec![4, 5, 6])];
        assert_eq!(disc.score(&batch), disc.score(&batch));
    }

    #[test]
    fn training_separates_distinct_populations() {
        let cfg = tiny_config();
        let mut rng = StdRng::seed_from_u64(2);
        let mut disc = Discriminator::new(&cfg.gan, &cfg.discriminator, None, &mut rng).unwrap();

        // Real sequences use low token ids, fakes use high ones.
        let real: Vec<Sequence> = (0..8)
            .map(|i| Sequence::real(vec![1 + (i % 3) as u32, 2, 3, 1]))
            .collect();
        let fake: Vec<Sequence> = (0..8)
            .map(|i| Sequence::generated(vec![9 + (i % 3) as u32, 10, 11, 9]))
            .collect();

        for _ in 0..80 {
            disc.train_step(&real, &fake, &mut rng).unwrap();
        }
        let real_mean: f32 =
            disc.score(&real).iter().sum::<f32>() / real.len() as f32;
        let fake_mean: f32 =
            disc.score(&fake).iter().sum::<f32>() / fake.len() as f32;
        assert!(
            real_mean > fake_mean + 0.2,
            "no separation: real {real_mean} vs fake {fake_mean}"
        );
    }

    #[test]
    fn identical_populations_score_near_half() {
        let cfg = tiny_config();
        let mut rng = StdRng::seed_from_u64(3);
        let mut disc = Discriminator::new(&cfg.gan, &cfg.discriminator, None, &mut rng).unwrap();

        let ids = vec![3u32, 4, 5, 6];
        let real: Vec<Sequence> = (0..8).map(|_| Sequence::real(ids.clone())).collect();
        let fake: Vec<Sequence> = (0..8).map(|_| Sequence::generated(ids.clone())).collect();

        for _ in 0..120 {
            disc.train_step(&real, &fake, &mut rng).unwrap();
        }
        let mean: f32 = disc.score(&real).iter().sum::<f32>() / real.len() as f32;
        assert!(
            (mean - 0.5).abs() < 0.15,
            "indistinguishable data should score near 0.5, got {mean}"
        );
    }

    #[test]
    fn early_stopping_waits_for_patience() {
        let mut stop = EarlyStopping::new(2);
        assert!(!stop.should_stop(1.0));
        assert!(!stop.should_stop(0.8)); // improved
        assert!(!stop.should_stop(0.9)); // 1 stale round
        assert!(stop.should_stop(0.85)); // 2 stale rounds
    }

    #[test]
    fn zero_patience_never_stops() {
        let mut stop = EarlyStopping::new(0);
        for _ in 0..10 {
            assert!(!stop.should_stop(1.0));
        }
    }
}
