//! Training Logger
//!
//! Tracks training metrics to a CSV file and the console. One row per
//! logged step, tagged with the phase that produced it, so a single file
//! covers pretraining and the adversarial epochs.
//!
//! ## CSV columns
//!
//! - `epoch`: outer epoch index (0 during pretraining)
//! - `phase`: `pretrain-g`, `pretrain-d`, `g-phase`, or `d-phase`
//! - `step`: step counter within the phase
//! - `elapsed_seconds`: time since the logger was created
//! - `loss`: phase loss (cross-entropy, surrogate, or BCE)
//! - `mean_reward`: mean rollout reward for generator phases, empty
//!   otherwise

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// CSV + console metrics logger.
pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write the header row.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut log_file = File::create(path)?;
        writeln!(log_file, "epoch,phase,step,elapsed_seconds,loss,mean_reward")?;
        Ok(Self {
            log_file,
            start_time: Instant::now(),
        })
    }

    /// Log one step. Flushes immediately so a crashed run keeps its rows.
    pub fn log(
        &mut self,
        epoch: usize,
        phase: &str,
        step: usize,
        loss: f32,
        mean_reward: Option<f32>,
    ) -> std::io::Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let reward_field = mean_reward
            .map(|r| format!("{r:.4}"))
            .unwrap_or_default();
        writeln!(
            self.log_file,
            "{epoch},{phase},{step},{elapsed:.2},{loss:.4},{reward_field}"
        )?;
        self.log_file.flush()?;

        match mean_reward {
            Some(r) => println!(
                "Epoch {epoch:4} | {phase:<10} | step {step:4} | {elapsed:7.1}s | loss {loss:.4} | reward {r:.4}"
            ),
            None => println!(
                "Epoch {epoch:4} | {phase:<10} | step {step:4} | {elapsed:7.1}s | loss {loss:.4}"
            ),
        }
        Ok(())
    }
}
