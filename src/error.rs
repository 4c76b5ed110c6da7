//! Error taxonomy for training runs.
//!
//! Every failure mode of the training loop maps to one variant here:
//!
//! - [`PuckError::Configuration`] — invalid or inconsistent hyperparameter;
//!   always surfaced before the first training step.
//! - [`PuckError::TrainingDiverged`] — a non-finite loss or reward; aborts
//!   the current phase, the run may be resumed from the last checkpoint.
//! - [`PuckError::MalformedSequence`] — a token id outside the vocabulary;
//!   the sequence is dropped from its batch and counted, never fatal on its
//!   own.
//! - [`PuckError::Checkpoint`] — checkpoint I/O; fatal at load, retryable
//!   at save (a failed save leaves the previous file intact).
//! - [`PuckError::Io`] — corpus/embedding file I/O, fatal at startup.
//!
//! Recovered errors are never silent: the trainer logs a warning and counts
//! them in [`RunStats`](crate::trainer::RunStats).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for puck operations.
pub type Result<T> = std::result::Result<T, PuckError>;

/// Errors that can occur while configuring or running a training run.
#[derive(Error, Debug)]
pub enum PuckError {
    /// A hyperparameter is missing, out of range, or inconsistent with the
    /// rest of the configuration.
    #[error("invalid configuration for '{field}': {message}")]
    Configuration { field: String, message: String },

    /// A loss or reward became non-finite during the named phase.
    #[error("training diverged in {phase} at step {step}: loss = {value}")]
    TrainingDiverged {
        phase: &'static str,
        step: usize,
        value: f32,
    },

    /// A sequence carried a token id outside `[0, vocab_size)`.
    #[error("malformed sequence at batch index {index}: token id {token} >= vocab size {vocab_size}")]
    MalformedSequence {
        index: usize,
        token: u32,
        vocab_size: usize,
    },

    /// Checkpoint save/load failure.
    #[error("checkpoint {op} failed for {path}: {source}")]
    Checkpoint {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Corpus or embedding file I/O failure.
    #[error("io error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PuckError {
    /// Create an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the run may continue (after dropping the offending input).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedSequence { .. } | Self::Checkpoint { op: "save", .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_sequence_is_recoverable() {
        let err = PuckError::MalformedSequence {
            index: 3,
            token: 99,
            vocab_size: 10,
        };
        assert!(err.is_recoverable());
        let msg = err.to_string();
        assert!(msg.contains("99"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn diverged_is_fatal_to_phase() {
        let err = PuckError::TrainingDiverged {
            phase: "policy-gradient",
            step: 12,
            value: f32::NAN,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("policy-gradient"));
    }

    #[test]
    fn save_failures_are_retryable_load_failures_are_not() {
        let save = PuckError::Checkpoint {
            op: "save",
            path: "x.bin".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let load = PuckError::Checkpoint {
            op: "load",
            path: "x.bin".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(save.is_recoverable());
        assert!(!load.is_recoverable());
    }
}
