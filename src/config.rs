//! Training Configuration
//!
//! The configuration surface mirrors the three sections of the original
//! profile files: `[gan]` for the adversarial schedule, `[generator]` and
//! `[discriminator]` for the two networks. A configuration is a single JSON
//! document:
//!
//! ```json
//! {
//!   "gan": {
//!     "rollout_update_rate": 0.8, "rollout_num": 16,
//!     "g_steps": 1, "d_steps": 5, "k_steps": 15,
//!     "seed": 42, "batch_size": 64, "total_epochs": 200,
//!     "generated_num": 6400, "vocab_size": 5000, "sequence_len": 20
//!   },
//!   "generator": { "embed_dim": 32, "hidden_dim": 32, "lr": 0.01, ... },
//!   "discriminator": { "input_dim": 64, "filter_sizes": [2, 3], ... }
//! }
//! ```
//!
//! Architecture choices (`optim`, `encoder`, `readout`, `baseline`) are
//! closed enums resolved once at construction — never string dispatch
//! inside the training loop.
//!
//! All consistency rules are enforced by [`TrainConfig::validate`] before
//! any training step runs; violations surface as
//! [`PuckError::Configuration`](crate::error::PuckError).

use crate::error::{PuckError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Optimizer family for a network's updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimKind {
    Adam,
    Adagrad,
}

/// Discriminator encoder family.
///
/// Only the convolutional family is implemented; the enum stays closed so a
/// future tree-structured encoder is a new variant, not a string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Cnn,
}

/// Readout nonlinearity applied to the discriminator's highway output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadoutKind {
    Identity,
    Sqnl,
}

/// Variance-reduction baseline for the policy-gradient objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    /// Raw rewards, no subtraction.
    None,
    /// Subtract the per-position mean reward of the batch.
    BatchMean,
    /// Subtract an exponential moving average of the mean reward.
    Ema,
}

/// `[gan]` section: the adversarial schedule and shared data dimensions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GanSettings {
    /// Fraction of generator parameters blended into the rollout snapshot
    /// after every generator update; must lie in `[0, 1]`.
    pub rollout_update_rate: f32,
    /// Monte-Carlo completions per prefix when estimating rewards.
    pub rollout_num: usize,
    /// Generator policy-gradient rounds per epoch.
    pub g_steps: usize,
    /// Discriminator retraining rounds per epoch.
    pub d_steps: usize,
    /// Epoch cadence of the forced full rollout resync.
    pub k_steps: usize,
    /// Seed for every random stream of the run.
    pub seed: u64,
    /// Sequences per gradient step.
    pub batch_size: usize,
    /// Adversarial epochs to run.
    pub total_epochs: usize,
    /// Generated sequences drawn for discriminator pretraining.
    pub generated_num: usize,
    /// Fixed vocabulary size (including the PAD/EOS token).
    pub vocab_size: usize,
    /// Maximum (and padded) sequence length.
    pub sequence_len: usize,
}

/// `[generator]` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Token embedding dimension.
    pub embed_dim: usize,
    /// GRU hidden state dimension.
    pub hidden_dim: usize,
    /// Learning rate.
    pub lr: f32,
    /// Gradient clipping threshold (global L2 norm).
    pub clip_grad: f32,
    /// Optimizer family.
    pub optim: OptimKind,
    /// Maximum-likelihood pretraining epochs before adversarial training.
    pub pre_epochs: usize,
    /// Policy-gradient baseline strategy.
    pub baseline: Baseline,
    /// Softmax temperature used by the decode/job surface (not training).
    pub decode_temperature: f32,
}

/// `[discriminator]` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscriminatorSettings {
    /// Encoder family (closed set; CNN only).
    pub encoder: EncoderKind,
    /// Readout applied after the highway layer.
    pub readout: ReadoutKind,
    /// Token embedding dimension of the discriminator's own table.
    pub input_dim: usize,
    /// Width of the fully-connected layer between highway and output.
    pub hidden_dim: usize,
    /// Convolution window sizes; paired with `num_filters`.
    pub filter_sizes: Vec<usize>,
    /// Filter count per window size; same length as `filter_sizes`.
    pub num_filters: Vec<usize>,
    /// Dropout on pooled features (training only).
    pub dropout_prob1: f32,
    /// Dropout after the readout (training only).
    pub dropout_prob2: f32,
    /// Learning rate.
    pub lr: f32,
    /// L2 weight decay.
    pub wd: f32,
    /// Gradient clipping threshold.
    pub clip_grad: f32,
    /// Optimizer family.
    pub optim: OptimKind,
    /// Maximum pretraining epochs.
    pub epochs: usize,
    /// Early-stopping patience (pretraining rounds without improvement).
    pub early_stopping: usize,
}

/// Complete training configuration: the three sections together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    pub gan: GanSettings,
    pub generator: GeneratorSettings,
    pub discriminator: DiscriminatorSettings,
}

impl Default for TrainConfig {
    /// The small profile: quick runs on modest corpora.
    fn default() -> Self {
        Self {
            gan: GanSettings {
                rollout_update_rate: 0.8,
                rollout_num: 16,
                g_steps: 1,
                d_steps: 5,
                k_steps: 15,
                seed: 42,
                batch_size: 64,
                total_epochs: 200,
                generated_num: 6400,
                vocab_size: 5000,
                sequence_len: 20,
            },
            generator: GeneratorSettings {
                embed_dim: 32,
                hidden_dim: 32,
                lr: 1e-2,
                clip_grad: 5.0,
                optim: OptimKind::Adam,
                pre_epochs: 120,
                baseline: Baseline::BatchMean,
                decode_temperature: 1.0,
            },
            discriminator: DiscriminatorSettings {
                encoder: EncoderKind::Cnn,
                readout: ReadoutKind::Identity,
                input_dim: 64,
                hidden_dim: 64,
                filter_sizes: vec![1, 2, 3, 4, 5],
                num_filters: vec![100, 200, 200, 200, 200],
                dropout_prob1: 0.5,
                dropout_prob2: 0.25,
                lr: 1e-4,
                wd: 1e-4,
                clip_grad: 5.0,
                optim: OptimKind::Adagrad,
                epochs: 50,
                early_stopping: 5,
            },
        }
    }
}

impl TrainConfig {
    /// The large profile: longer sequences, wider networks.
    pub fn large() -> Self {
        let mut cfg = Self::default();
        cfg.gan.sequence_len = 40;
        cfg.gan.vocab_size = 20_000;
        cfg.generator.embed_dim = 128;
        cfg.generator.hidden_dim = 128;
        cfg.discriminator.input_dim = 128;
        cfg.discriminator.hidden_dim = 128;
        cfg.discriminator.filter_sizes = vec![1, 2, 3, 4, 5, 6, 8, 10];
        cfg.discriminator.num_filters = vec![100, 200, 200, 200, 200, 100, 100, 100];
        cfg
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PuckError::io(format!("reading config {}", path.display()), e))?;
        Self::from_json(&text)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| PuckError::config("json", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check internal consistency. Called before any training step.
    pub fn validate(&self) -> Result<()> {
        let gan = &self.gan;
        if !(0.0..=1.0).contains(&gan.rollout_update_rate) {
            return Err(PuckError::config(
                "gan.rollout_update_rate",
                format!("must be in [0, 1], got {}", gan.rollout_update_rate),
            ));
        }
        for (field, value) in [
            ("gan.rollout_num", gan.rollout_num),
            ("gan.g_steps", gan.g_steps),
            ("gan.d_steps", gan.d_steps),
            ("gan.k_steps", gan.k_steps),
            ("gan.batch_size", gan.batch_size),
            ("gan.vocab_size", gan.vocab_size),
            ("gan.sequence_len", gan.sequence_len),
        ] {
            if value == 0 {
                return Err(PuckError::config(field, "must be a positive integer"));
            }
        }
        if self.generator.lr <= 0.0 || !self.generator.lr.is_finite() {
            return Err(PuckError::config(
                "generator.lr",
                format!("must be positive and finite, got {}", self.generator.lr),
            ));
        }
        if self.discriminator.lr <= 0.0 || !self.discriminator.lr.is_finite() {
            return Err(PuckError::config(
                "discriminator.lr",
                format!("must be positive and finite, got {}", self.discriminator.lr),
            ));
        }
        if self.generator.embed_dim == 0 || self.generator.hidden_dim == 0 {
            return Err(PuckError::config(
                "generator",
                "embed_dim and hidden_dim must be positive",
            ));
        }
        if self.generator.decode_temperature <= 0.0 {
            return Err(PuckError::config(
                "generator.decode_temperature",
                "must be positive",
            ));
        }
        let disc = &self.discriminator;
        if disc.input_dim == 0 || disc.hidden_dim == 0 {
            return Err(PuckError::config(
                "discriminator",
                "input_dim and hidden_dim must be positive",
            ));
        }
        if disc.filter_sizes.is_empty() {
            return Err(PuckError::config(
                "discriminator.filter_sizes",
                "at least one filter size is required",
            ));
        }
        if disc.filter_sizes.len() != disc.num_filters.len() {
            return Err(PuckError::config(
                "discriminator.num_filters",
                format!(
                    "length {} does not match filter_sizes length {}",
                    disc.num_filters.len(),
                    disc.filter_sizes.len()
                ),
            ));
        }
        for (&size, &count) in disc.filter_sizes.iter().zip(&disc.num_filters) {
            if size == 0 || count == 0 {
                return Err(PuckError::config(
                    "discriminator.filter_sizes",
                    "filter sizes and counts must be positive",
                ));
            }
            if size > gan.sequence_len {
                return Err(PuckError::config(
                    "discriminator.filter_sizes",
                    format!(
                        "filter size {} exceeds sequence_len {}",
                        size, gan.sequence_len
                    ),
                ));
            }
        }
        for (field, p) in [
            ("discriminator.dropout_prob1", disc.dropout_prob1),
            ("discriminator.dropout_prob2", disc.dropout_prob2),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(PuckError::config(
                    field,
                    format!("must be in [0, 1), got {p}"),
                ));
            }
        }
        Ok(())
    }

    /// Total pooled feature width of the discriminator's conv bank.
    pub fn total_filters(&self) -> usize {
        self.discriminator.num_filters.iter().sum()
    }
}
