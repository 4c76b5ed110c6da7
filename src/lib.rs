//! Puck: Adversarial Query Generation
//!
//! A SeqGAN-style training loop for generating knowledge-graph query
//! sentences, implemented from scratch in Rust. Named after Shakespeare's
//! mischievous trickster from *A Midsummer Night's Dream*.
//!
//! A sequence **generator** (embedding → GRU → softmax) is trained
//! jointly with a convolutional **discriminator** that scores sequences
//! as real or generated. Because token sampling is not differentiable,
//! the generator learns by policy gradient: a **rollout policy** — a
//! lagging snapshot of the generator — completes every prefix of a
//! sampled sequence by Monte Carlo and averages the discriminator's
//! scores into a per-token reward. The [`trainer::GanTrainer`] alternates
//! maximum-likelihood pretraining, discriminator pretraining, and the
//! adversarial epoch schedule.
//!
//! # Modules
//!
//! - [`config`] - sectioned hyperparameter surface with fail-fast validation
//! - [`vocab`] / [`data`] - vocabulary, sequences, corpus, embeddings
//! - [`tensor`] / [`layers`] - the hand-coded forward/backward substrate
//! - [`generator`] / [`discriminator`] / [`rollout`] - the three models
//! - [`trainer`] - the phase state machine that owns a run
//! - [`checkpoint`] - atomic binary snapshots for resume
//!
//! # Example
//!
//! ```rust,no_run
//! use puck::config::TrainConfig;
//! use puck::data::Corpus;
//! use puck::trainer::GanTrainer;
//! use puck::vocab::Vocabulary;
//!
//! let config = TrainConfig::default();
//! let lines = Corpus::read_lines("queries.txt")?;
//! let vocab = Vocabulary::from_corpus(&lines, config.gan.vocab_size)?;
//! let corpus = Corpus::encode(&lines, &vocab, config.gan.sequence_len);
//!
//! let mut trainer = GanTrainer::new(config, corpus, vocab, None)?;
//! trainer.run()?;
//! for (seq, score) in trainer.generate_scored(10) {
//!     println!("{:.3}  {}", score, trainer.vocab().render(&seq.ids));
//! }
//! # Ok::<(), puck::PuckError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod discriminator;
pub mod error;
pub mod generator;
pub mod gradients;
pub mod layers;
pub mod optimizer;
pub mod rollout;
pub mod tensor;
pub mod trainer;
pub mod training_logger;
pub mod vocab;

// Re-export the types most callers touch.
pub use config::TrainConfig;
pub use data::{Corpus, Provenance, Sequence};
pub use error::{PuckError, Result};
pub use rollout::RewardVector;
pub use tensor::Tensor;
pub use trainer::{GanTrainer, Phase, RunStats};
pub use training_logger::TrainingLogger;
pub use vocab::Vocabulary;
