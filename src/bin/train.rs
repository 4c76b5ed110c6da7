//! Adversarial training entry point.
//!
//! ```bash
//! # Train with the default (small) profile
//! cargo run --release --bin train -- --corpus queries.txt
//!
//! # Custom configuration, pretrained embeddings, CSV metrics
//! cargo run --release --bin train -- \
//!     --corpus queries.txt --config profile.json \
//!     --embeddings glove.txt --log training_log.csv
//!
//! # Resume from a checkpoint
//! cargo run --release --bin train -- --corpus queries.txt \
//!     --resume puck_checkpoint.bin
//! ```

use clap::Parser;
use puck::config::TrainConfig;
use puck::data::{Corpus, EmbeddingTable};
use puck::trainer::GanTrainer;
use puck::vocab::Vocabulary;
use puck::{checkpoint, PuckError, TrainingLogger};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "train", about = "Adversarial query-generation training")]
struct Args {
    /// Whitespace-tokenized corpus, one query per line
    #[arg(long)]
    corpus: PathBuf,

    /// JSON configuration (defaults to the small profile)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the large profile instead of the small one
    #[arg(long)]
    large: bool,

    /// Optional pretrained embedding table (token v1 v2 ... per line)
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// Resume from an existing checkpoint
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Where to write checkpoints
    #[arg(long, default_value = "puck_checkpoint.bin")]
    checkpoint: PathBuf,

    /// Save a checkpoint every N adversarial epochs
    #[arg(long, default_value = "10")]
    checkpoint_every: usize,

    /// CSV metrics log path
    #[arg(long)]
    log: Option<PathBuf>,

    /// Override the configured number of adversarial epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Sequences to generate and score after training
    #[arg(long, default_value = "10")]
    generate: usize,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), PuckError> {
    let mut trainer = match &args.resume {
        Some(path) => {
            println!("Resuming from {}...", path.display());
            let data = checkpoint::load(path)?;
            let lines = Corpus::read_lines(&args.corpus)?;
            let corpus = Corpus::encode(&lines, &data.vocab, data.config.gan.sequence_len);
            GanTrainer::resume(data, corpus)?
        }
        None => {
            let mut config = match &args.config {
                Some(path) => TrainConfig::from_file(path)?,
                None if args.large => TrainConfig::large(),
                None => TrainConfig::default(),
            };
            if let Some(epochs) = args.epochs {
                config.gan.total_epochs = epochs;
            }

            let lines = Corpus::read_lines(&args.corpus)?;
            println!("Loaded {} corpus lines", lines.len());
            let vocab = Vocabulary::from_corpus(&lines, config.gan.vocab_size)?;
            println!("Vocabulary: {} tokens", vocab.len());
            let corpus = Corpus::encode(&lines, &vocab, config.gan.sequence_len);

            let embeddings = args
                .embeddings
                .as_ref()
                .map(EmbeddingTable::load)
                .transpose()?;
            GanTrainer::new(config, corpus, vocab, embeddings.as_ref())?
        }
    };

    if let Some(path) = &args.log {
        let logger = TrainingLogger::new(path)
            .map_err(|e| PuckError::io(format!("creating log {}", path.display()), e))?;
        trainer.set_logger(logger);
    }

    trainer.pretrain()?;
    println!("Starting adversarial training at epoch {}", trainer.epoch());

    let total_epochs = trainer.config().gan.total_epochs;
    while trainer.epoch() < total_epochs {
        trainer.step_epoch()?;
        if args.checkpoint_every > 0 && trainer.epoch() % args.checkpoint_every == 0 {
            if let Err(e) = trainer.save_checkpoint(&args.checkpoint) {
                // Retryable: the previous checkpoint is still intact.
                eprintln!("warning: {e}");
            }
        }
    }

    trainer.save_checkpoint(&args.checkpoint)?;
    println!("Checkpoint written to {}", args.checkpoint.display());

    let stats = trainer.stats().clone();
    println!(
        "Run: {} G updates, {} D updates, {} resyncs, {} malformed dropped, {} steps skipped",
        stats.generator_updates,
        stats.discriminator_updates,
        stats.resyncs,
        stats.malformed_dropped,
        stats.skipped_steps
    );

    if args.generate > 0 {
        println!("\nGenerated queries (discriminator score | text):");
        for (seq, score) in trainer.generate_scored(args.generate) {
            println!("  {:.3} | {}", score, trainer.vocab().render(&seq.ids));
        }
    }

    Ok(())
}
