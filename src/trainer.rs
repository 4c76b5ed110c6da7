//! Adversarial Training Orchestrator
//!
//! [`GanTrainer`] owns every piece of mutable training state — generator,
//! discriminator, rollout snapshot, RNG, statistics — for the lifetime of
//! a run, and drives the state machine
//!
//! ```text
//! Init -> PretrainG -> PretrainD -> Epoch{G-phase -> D-phase} x total_epochs -> Terminal
//! ```
//!
//! Phases are strictly sequential on one logical thread: the discriminator
//! never observes the generator mid-update and vice versa. Inside a phase,
//! per-sequence work may be data-parallel, but every reduction is a
//! fixed-order sum, so parallelism never changes a computed number.
//!
//! Each adversarial epoch runs `g_steps` rounds of
//! {sample → rollout rewards → policy-gradient update → snapshot refresh}
//! followed by `d_steps` rounds of
//! {sample fresh generated batch → discriminator update}, and epochs whose
//! index is a multiple of `k_steps` begin with a forced full rollout
//! resync.
//!
//! ## Failure policy
//!
//! - Non-finite loss: the phase aborts with `TrainingDiverged`; the run
//!   can resume from the last checkpoint.
//! - Malformed sequence (id outside the vocabulary): dropped from its
//!   batch with a logged warning and counted; an emptied batch skips the
//!   step. Never silent — see [`RunStats`].
//! - Corpus/checkpoint I/O at init: fatal.
//!
//! Checkpoints happen only between epochs — the one point where a
//! consistent snapshot of all three states exists by construction.

use crate::checkpoint::{self, CheckpointData, CheckpointView};
use crate::config::TrainConfig;
use crate::data::{BatchSampler, Corpus, EmbeddingTable, Sequence};
use crate::discriminator::{Discriminator, EarlyStopping};
use crate::error::{PuckError, Result};
use crate::generator::Generator;
use crate::rollout::RolloutPolicy;
use crate::training_logger::TrainingLogger;
use crate::vocab::Vocabulary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Trainer state machine position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    PretrainG,
    PretrainD,
    Adversarial,
    Terminal,
}

/// Counters exposed for monitoring and tests. Every recovered error is
/// counted here; nothing is dropped silently.
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub generator_updates: usize,
    pub discriminator_updates: usize,
    pub resyncs: usize,
    /// Epoch indices at which a forced resync happened.
    pub resync_epochs: Vec<usize>,
    pub malformed_dropped: usize,
    pub skipped_steps: usize,
    pub epochs_completed: usize,
    pub last_generator_loss: f32,
    pub last_discriminator_loss: f32,
    pub last_mean_reward: f32,
}

/// The adversarial training orchestrator.
pub struct GanTrainer {
    config: TrainConfig,
    vocab: Vocabulary,
    corpus: Corpus,
    generator: Generator,
    discriminator: Discriminator,
    rollout: RolloutPolicy,
    sampler: BatchSampler,
    rng: StdRng,
    phase: Phase,
    epoch: usize,
    stats: RunStats,
    logger: Option<TrainingLogger>,
}

impl std::fmt::Debug for GanTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GanTrainer")
            .field("phase", &self.phase)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl GanTrainer {
    /// Validate the configuration against the corpus and build all
    /// networks. Fails fast with `Configuration` errors before any
    /// training step.
    pub fn new(
        config: TrainConfig,
        corpus: Corpus,
        vocab: Vocabulary,
        embeddings: Option<&EmbeddingTable>,
    ) -> Result<Self> {
        config.validate()?;
        if corpus.is_empty() {
            return Err(PuckError::config("corpus", "no usable sequences"));
        }
        if config.gan.batch_size > corpus.len() {
            return Err(PuckError::config(
                "gan.batch_size",
                format!(
                    "batch_size {} exceeds corpus size {}",
                    config.gan.batch_size,
                    corpus.len()
                ),
            ));
        }
        if vocab.len() > config.gan.vocab_size {
            return Err(PuckError::config(
                "gan.vocab_size",
                format!(
                    "vocabulary has {} tokens but vocab_size is {}",
                    vocab.len(),
                    config.gan.vocab_size
                ),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.gan.seed);
        let pretrained = embeddings.map(|table| (&vocab, table));
        let generator = Generator::new(&config.gan, &config.generator, pretrained, &mut rng)?;
        let pretrained = embeddings.map(|table| (&vocab, table));
        let discriminator =
            Discriminator::new(&config.gan, &config.discriminator, pretrained, &mut rng)?;
        let rollout = RolloutPolicy::new(
            &generator,
            config.gan.rollout_num,
            config.gan.rollout_update_rate,
        );
        let sampler = BatchSampler::new(&corpus, config.gan.batch_size);

        Ok(Self {
            config,
            vocab,
            corpus,
            generator,
            discriminator,
            rollout,
            sampler,
            rng,
            phase: Phase::Init,
            epoch: 0,
            stats: RunStats::default(),
            logger: None,
        })
    }

    /// Attach a CSV/console logger.
    pub fn set_logger(&mut self, logger: TrainingLogger) {
        self.logger = Some(logger);
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    pub fn rollout(&self) -> &RolloutPolicy {
        &self.rollout
    }

    /// Full schedule: pretraining, then every adversarial epoch.
    pub fn run(&mut self) -> Result<&RunStats> {
        self.pretrain()?;
        while self.epoch < self.config.gan.total_epochs {
            self.step_epoch()?;
        }
        self.phase = Phase::Terminal;
        Ok(&self.stats)
    }

    /// Run both pretraining phases if they have not run yet.
    pub fn pretrain(&mut self) -> Result<()> {
        if self.phase != Phase::Init {
            return Ok(());
        }
        self.phase = Phase::PretrainG;
        self.pretrain_generator()?;
        self.phase = Phase::PretrainD;
        self.pretrain_discriminator()?;
        self.phase = Phase::Adversarial;
        Ok(())
    }

    /// Maximum-likelihood pretraining of the generator on real batches.
    fn pretrain_generator(&mut self) -> Result<()> {
        for pre_epoch in 0..self.config.generator.pre_epochs {
            self.sampler.shuffle(&mut self.rng);
            let mut total = 0.0f32;
            let mut steps = 0usize;
            while let Some(batch) = self.sampler.next_batch(&self.corpus) {
                let batch = self.sanitize_batch(batch);
                if batch.is_empty() {
                    self.stats.skipped_steps += 1;
                    continue;
                }
                total += self.generator.pretrain_step(&batch)?;
                steps += 1;
            }
            if steps > 0 {
                let mean = total / steps as f32;
                self.stats.last_generator_loss = mean;
                self.log(0, "pretrain-g", pre_epoch, mean, None);
            }
        }
        Ok(())
    }

    /// Supervised discriminator pretraining on real versus
    /// initial-generator batches, with an early-stopping validation split.
    fn pretrain_discriminator(&mut self) -> Result<()> {
        let gan = &self.config.gan;
        let n = gan.generated_num.max(gan.batch_size).min(
            // Real side is capped by the corpus.
            self.corpus.len().max(gan.batch_size),
        );
        let fake: Vec<Sequence> = self
            .generator
            .net
            .sample(n, &mut self.rng, 1.0);
        let real: Vec<Sequence> = self
            .corpus
            .sequences()
            .iter()
            .cycle()
            .take(n)
            .cloned()
            .collect();

        // Hold out a tenth of each side for validation.
        let holdout = (n / 10).max(1);
        let (fake_train, fake_val) = fake.split_at(n - holdout);
        let (real_train, real_val) = real.split_at(n - holdout);

        if fake_train.is_empty() {
            return Ok(());
        }
        let mut stopper = EarlyStopping::new(self.config.discriminator.early_stopping);
        let batch = gan.batch_size.min(fake_train.len());

        for epoch in 0..self.config.discriminator.epochs {
            let mut total = 0.0f32;
            let mut steps = 0usize;
            for (real_chunk, fake_chunk) in real_train.chunks(batch).zip(fake_train.chunks(batch))
            {
                total += self
                    .discriminator
                    .train_step(real_chunk, fake_chunk, &mut self.rng)?;
                steps += 1;
            }
            let val_loss = self.discriminator.validation_loss(real_val, fake_val);
            if steps > 0 {
                self.stats.last_discriminator_loss = total / steps as f32;
            }
            self.log(0, "pretrain-d", epoch, val_loss, None);
            if stopper.should_stop(val_loss) {
                break;
            }
        }
        Ok(())
    }

    /// One adversarial epoch: forced resync when due, then the G-phase and
    /// D-phase schedules.
    pub fn step_epoch(&mut self) -> Result<()> {
        self.pretrain()?;

        let gan = self.config.gan.clone();

        // Forced full resync at every k_steps boundary, overriding the
        // incremental interpolation.
        if self.epoch % gan.k_steps == 0 {
            self.rollout.resync(&self.generator);
            self.stats.resyncs += 1;
            self.stats.resync_epochs.push(self.epoch);
        }

        // G-phase.
        for step in 0..gan.g_steps {
            let batch = self
                .generator
                .net
                .sample(gan.batch_size, &mut self.rng, 1.0);
            let batch = self.sanitize_batch(batch);
            if batch.is_empty() {
                self.stats.skipped_steps += 1;
                continue;
            }
            let rewards = self
                .rollout
                .rewards(&batch, &self.discriminator, &mut self.rng);
            let mean_reward = {
                let total: f32 = rewards.iter().flat_map(|r| r.iter()).sum();
                let count: usize = rewards.iter().map(Vec::len).sum();
                total / count.max(1) as f32
            };
            let loss = self.generator.policy_gradient_update(&batch, &rewards)?;
            self.rollout.refresh(&self.generator);
            self.stats.generator_updates += 1;
            self.stats.last_generator_loss = loss;
            self.stats.last_mean_reward = mean_reward;
            self.log(self.epoch, "g-phase", step, loss, Some(mean_reward));
        }

        // D-phase: fresh generated batch every round.
        for step in 0..gan.d_steps {
            let fake = self
                .generator
                .net
                .sample(gan.batch_size, &mut self.rng, 1.0);
            let real = match self.sampler.next_batch(&self.corpus) {
                Some(batch) => batch,
                None => {
                    self.sampler.shuffle(&mut self.rng);
                    self.sampler
                        .next_batch(&self.corpus)
                        .expect("non-empty corpus yields at least one batch")
                }
            };
            match self.train_discriminator_on(real, fake)? {
                Some(loss) => {
                    self.log(self.epoch, "d-phase", step, loss, None);
                }
                None => continue,
            }
        }

        self.epoch += 1;
        self.stats.epochs_completed += 1;
        Ok(())
    }

    /// One discriminator update on explicit batches. Malformed sequences
    /// are dropped and counted; returns `Ok(None)` when either side ends
    /// up empty and the step is skipped.
    pub fn train_discriminator_on(
        &mut self,
        real: Vec<Sequence>,
        fake: Vec<Sequence>,
    ) -> Result<Option<f32>> {
        let real = self.sanitize_batch(real);
        let fake = self.sanitize_batch(fake);
        if real.is_empty() || fake.is_empty() {
            self.stats.skipped_steps += 1;
            return Ok(None);
        }
        let loss = self
            .discriminator
            .train_step(&real, &fake, &mut self.rng)?;
        self.stats.discriminator_updates += 1;
        self.stats.last_discriminator_loss = loss;
        Ok(Some(loss))
    }

    /// Drop sequences with out-of-vocabulary ids, warning and counting
    /// each one.
    fn sanitize_batch(&mut self, batch: Vec<Sequence>) -> Vec<Sequence> {
        let vocab_size = self.config.gan.vocab_size;
        let mut kept = Vec::with_capacity(batch.len());
        for (index, seq) in batch.into_iter().enumerate() {
            if seq.is_empty() {
                eprintln!("warning: dropping empty sequence at batch index {index}");
                self.stats.malformed_dropped += 1;
                continue;
            }
            match seq.validate(vocab_size, index) {
                Ok(()) => kept.push(seq),
                Err(err) => {
                    eprintln!("warning: {err}; dropping sequence from batch");
                    self.stats.malformed_dropped += 1;
                }
            }
        }
        kept
    }

    /// The job surface: sample `n` sequences at the configured decode
    /// temperature and return each with its discriminator score.
    pub fn generate_scored(&mut self, n: usize) -> Vec<(Sequence, f32)> {
        let temperature = self.generator.decode_temperature();
        let batch = self.generator.net.sample(n, &mut self.rng, temperature);
        let scores = self.discriminator.score(&batch);
        batch.into_iter().zip(scores).collect()
    }

    /// Save a checkpoint at the epoch boundary.
    ///
    /// Draws the seed for the continued RNG stream, persists it, and
    /// reseeds this run with the same value on success — so a run resumed
    /// from the file and the run that wrote it produce identical
    /// next-step outputs.
    pub fn save_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let next_seed: u64 = self.rng.random();
        let view = CheckpointView {
            config: &self.config,
            vocab: &self.vocab,
            epoch: self.epoch,
            next_seed,
            baseline_ema: self.generator.baseline_ema(),
            generator_params: self.generator.net.params(),
            generator_opt_step: self.generator.optimizer.step,
            generator_opt_state: self.generator.optimizer.state_tensors(),
            discriminator_params: self.discriminator.net.params(),
            discriminator_opt_step: self.discriminator.optimizer.step,
            discriminator_opt_state: self.discriminator.optimizer.state_tensors(),
            rollout_params: self.rollout.params(),
        };
        checkpoint::save(&view, path)?;
        // The continued run and a run resumed from this file must follow
        // the same stream, so both restart from the persisted seed — and
        // from a fresh batch sampler, whose position is not persisted.
        self.rng = StdRng::seed_from_u64(next_seed);
        self.sampler = BatchSampler::new(&self.corpus, self.config.gan.batch_size);
        Ok(())
    }

    /// Rebuild a trainer from checkpoint contents and the (re-loaded)
    /// corpus. Pretraining is considered done; the run resumes at the
    /// stored epoch.
    pub fn resume(data: CheckpointData, corpus: Corpus) -> Result<Self> {
        let mut trainer = Self::new(data.config, corpus, data.vocab, None)?;

        restore_params(trainer.generator.net.params_mut(), &data.generator_params)?;
        restore_params(
            trainer.generator.optimizer.state_tensors_mut(),
            &data.generator_opt_state,
        )?;
        trainer.generator.optimizer.step = data.generator_opt_step;

        restore_params(
            trainer.discriminator.net.params_mut(),
            &data.discriminator_params,
        )?;
        restore_params(
            trainer.discriminator.optimizer.state_tensors_mut(),
            &data.discriminator_opt_state,
        )?;
        trainer.discriminator.optimizer.step = data.discriminator_opt_step;

        restore_params(trainer.rollout.params_mut(), &data.rollout_params)?;

        trainer.generator.set_baseline_ema(data.baseline_ema);
        trainer.rng = StdRng::seed_from_u64(data.next_seed);
        trainer.epoch = data.epoch;
        trainer.phase = Phase::Adversarial;
        Ok(trainer)
    }
}

fn restore_params(mut targets: Vec<&mut crate::tensor::Tensor>, saved: &[crate::tensor::Tensor]) -> Result<()> {
    if targets.len() != saved.len() {
        return Err(PuckError::config(
            "checkpoint",
            format!(
                "tensor count mismatch: model has {}, checkpoint has {}",
                targets.len(),
                saved.len()
            ),
        ));
    }
    for (dst, src) in targets.iter_mut().zip(saved) {
        if dst.shape != src.shape {
            return Err(PuckError::config(
                "checkpoint",
                format!("tensor shape mismatch: {:?} vs {:?}", dst.shape, src.shape),
            ));
        }
        dst.copy_from(src);
    }
    Ok(())
}

impl GanTrainer {
    /// Best-effort metrics logging; a failed write warns but never aborts
    /// training.
    fn log(&mut self, epoch: usize, phase: &str, step: usize, loss: f32, reward: Option<f32>) {
        if let Some(logger) = &mut self.logger {
            if let Err(e) = logger.log(epoch, phase, step, loss, reward) {
                eprintln!("warning: failed to write training log: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::EOS_TOKEN;

    fn tiny_config() -> TrainConfig {
        let mut cfg = TrainConfig::default();
        cfg.gan.vocab_size = 10;
        cfg.gan.sequence_len = 8;
        cfg.gan.batch_size = 4;
        cfg.gan.rollout_num = 2;
        cfg.gan.g_steps = 1;
        cfg.gan.d_steps = 2;
        cfg.gan.k_steps = 3;
        cfg.gan.total_epochs = 2;
        cfg.gan.generated_num = 8;
        cfg.generator.embed_dim = 4;
        cfg.generator.hidden_dim = 4;
        cfg.generator.pre_epochs = 1;
        cfg.discriminator.input_dim = 4;
        cfg.discriminator.hidden_dim = 4;
        cfg.discriminator.filter_sizes = vec![2, 3];
        cfg.discriminator.num_filters = vec![3, 3];
        cfg.discriminator.epochs = 2;
        cfg.discriminator.early_stopping = 2;
        cfg
    }

    fn tiny_corpus() -> (Corpus, Vocabulary) {
        let lines: Vec<String> = [
            "what causes rain",
            "what causes wind",
            "who invented zero",
            "who discovered oxygen",
            "what is rain",
            "who is rain",
            "what causes oxygen",
            "who invented rain",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let vocab = Vocabulary::from_corpus(&lines, 10).unwrap();
        let corpus = Corpus::encode(&lines, &vocab, 8);
        (corpus, vocab)
    }

    #[test]
    fn init_rejects_oversized_batch() {
        let (corpus, vocab) = tiny_corpus();
        let mut cfg = tiny_config();
        cfg.gan.batch_size = 1000;
        let err = GanTrainer::new(cfg, corpus, vocab, None).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn init_rejects_vocab_larger_than_configured() {
        let (corpus, vocab) = tiny_corpus();
        let mut cfg = tiny_config();
        cfg.gan.vocab_size = 3;
        let err = GanTrainer::new(cfg, corpus, vocab, None).unwrap_err();
        assert!(err.to_string().contains("vocab"));
    }

    #[test]
    fn phases_advance_in_order() {
        let (corpus, vocab) = tiny_corpus();
        let mut trainer = GanTrainer::new(tiny_config(), corpus, vocab, None).unwrap();
        assert_eq!(trainer.phase(), Phase::Init);
        trainer.pretrain().unwrap();
        assert_eq!(trainer.phase(), Phase::Adversarial);
        trainer.run().unwrap();
        assert_eq!(trainer.phase(), Phase::Terminal);
        assert_eq!(trainer.stats().epochs_completed, 2);
    }

    #[test]
    fn eos_token_exists_in_every_vocab() {
        let (_, vocab) = tiny_corpus();
        assert_eq!(vocab.id(EOS_TOKEN), Some(Vocabulary::EOS));
    }
}
