//! Corpus Loading and Batching
//!
//! Sequences, batches, the real-corpus loader, and the optional pretrained
//! embedding table. A corpus is loaded once at startup; batches of real
//! sequences are then drawn in shuffled order, resetting each epoch.
//!
//! ## Example
//!
//! ```rust,no_run
//! use puck::data::Corpus;
//! use puck::vocab::Vocabulary;
//!
//! let lines = Corpus::read_lines("queries.txt")?;
//! let vocab = Vocabulary::from_corpus(&lines, 5000)?;
//! let corpus = Corpus::encode(&lines, &vocab, 20);
//! println!("{} sequences", corpus.len());
//! # Ok::<(), puck::PuckError>(())
//! ```

use crate::error::{PuckError, Result};
use crate::vocab::Vocabulary;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Where a sequence came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Drawn from the training corpus.
    Real,
    /// Produced by the generator.
    Generated,
}

/// An ordered list of token ids with a provenance tag.
///
/// The stored ids are the true (unpadded) sequence; [`Sequence::padded`]
/// right-pads with EOS to a fixed width for batching.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub ids: Vec<u32>,
    pub provenance: Provenance,
}

impl Sequence {
    /// A real-corpus sequence.
    pub fn real(ids: Vec<u32>) -> Self {
        Self {
            ids,
            provenance: Provenance::Real,
        }
    }

    /// A generator-produced sequence.
    pub fn generated(ids: Vec<u32>) -> Self {
        Self {
            ids,
            provenance: Provenance::Generated,
        }
    }

    /// True length (before padding).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the sequence holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids right-padded with EOS to `width`.
    pub fn padded(&self, width: usize) -> Vec<u32> {
        let mut out = self.ids.clone();
        out.truncate(width);
        out.resize(width, Vocabulary::EOS);
        out
    }

    /// Check every token id against the vocabulary size.
    pub fn validate(&self, vocab_size: usize, index: usize) -> Result<()> {
        for &id in &self.ids {
            if id as usize >= vocab_size {
                return Err(PuckError::MalformedSequence {
                    index,
                    token: id,
                    vocab_size,
                });
            }
        }
        Ok(())
    }
}

/// The real training corpus: encoded sequences plus draw order.
#[derive(Clone, Debug)]
pub struct Corpus {
    sequences: Vec<Sequence>,
}

impl Corpus {
    /// Read raw whitespace-tokenized lines from a file, skipping blanks.
    pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PuckError::io(format!("reading corpus {}", path.display()), e))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Encode lines against a fixed vocabulary.
    ///
    /// Lines containing a token outside the vocabulary are skipped (the
    /// vocabulary is fixed once training starts); kept sequences are
    /// truncated to `sequence_len`.
    pub fn encode(lines: &[String], vocab: &Vocabulary, sequence_len: usize) -> Self {
        let mut sequences = Vec::with_capacity(lines.len());
        let mut skipped = 0usize;
        for line in lines {
            let ids: Option<Vec<u32>> = line
                .split_whitespace()
                .map(|token| vocab.id(token))
                .collect();
            match ids {
                Some(mut ids) if !ids.is_empty() => {
                    ids.truncate(sequence_len);
                    sequences.push(Sequence::real(ids));
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            eprintln!(
                "warning: skipped {skipped} corpus lines with out-of-vocabulary tokens"
            );
        }
        Self { sequences }
    }

    /// Build a corpus directly from sequences (tests, resumed runs).
    pub fn from_sequences(sequences: Vec<Sequence>) -> Self {
        Self { sequences }
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether the corpus holds no sequences.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// All sequences in load order.
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }
}

/// Draws shuffled real batches from a corpus, reshuffling every epoch.
///
/// Mirrors a sliding data loader: `next_batch` returns `None` once the
/// epoch is exhausted and resets for the next pass.
pub struct BatchSampler {
    order: Vec<usize>,
    position: usize,
    batch_size: usize,
}

impl BatchSampler {
    pub fn new(corpus: &Corpus, batch_size: usize) -> Self {
        Self {
            order: (0..corpus.len()).collect(),
            position: 0,
            batch_size,
        }
    }

    /// Shuffle the draw order for a new epoch.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.order.shuffle(rng);
        self.position = 0;
    }

    /// Next real batch, or `None` when the epoch is exhausted (resets).
    pub fn next_batch(&mut self, corpus: &Corpus) -> Option<Vec<Sequence>> {
        if self.position + self.batch_size > self.order.len() {
            self.position = 0;
            return None;
        }
        let batch: Vec<Sequence> = self.order[self.position..self.position + self.batch_size]
            .iter()
            .map(|&i| corpus.sequences()[i].clone())
            .collect();
        self.position += self.batch_size;
        Some(batch)
    }

    /// Number of full batches per epoch.
    pub fn batches_per_epoch(&self) -> usize {
        self.order.len() / self.batch_size
    }
}

/// Optional pretrained embedding table, keyed by surface token.
///
/// File format: one token per line followed by its vector components,
/// whitespace separated (the common text embedding export format). The
/// core treats this as an opaque provider; rows are only consulted once,
/// when embedding layers are initialized.
#[derive(Clone, Debug)]
pub struct EmbeddingTable {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingTable {
    /// Load a table from a text file. Fails on inconsistent dimensions.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PuckError::io(format!("reading embeddings {}", path.display()), e))?;
        let mut vectors = HashMap::new();
        let mut dim = 0usize;
        for (line_no, line) in text.lines().enumerate() {
            let mut parts = line.split_whitespace();
            let Some(token) = parts.next() else { continue };
            let values: std::result::Result<Vec<f32>, _> =
                parts.map(str::parse::<f32>).collect();
            let values = values.map_err(|e| {
                PuckError::io(
                    format!("parsing embedding line {}: {e}", line_no + 1),
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad float"),
                )
            })?;
            if values.is_empty() {
                continue;
            }
            if dim == 0 {
                dim = values.len();
            } else if values.len() != dim {
                return Err(PuckError::io(
                    format!(
                        "embedding line {}: dimension {} != {}",
                        line_no + 1,
                        values.len(),
                        dim
                    ),
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "ragged table"),
                ));
            }
            vectors.insert(token.to_string(), values);
        }
        Ok(Self { dim, vectors })
    }

    /// Build a table in memory (tests).
    pub fn from_pairs(dim: usize, pairs: impl IntoIterator<Item = (String, Vec<f32>)>) -> Self {
        Self {
            dim,
            vectors: pairs.into_iter().collect(),
        }
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Pretrained vector for a token, if present.
    pub fn get(&self, token: &str) -> Option<&[f32]> {
        self.vectors.get(token).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn small_corpus() -> (Corpus, Vocabulary) {
        let lines: Vec<String> = [
            "what causes rain",
            "what causes wind",
            "who invented zero",
            "who discovered oxygen",
            "what is rain",
            "who is rain",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let vocab = Vocabulary::from_corpus(&lines, 64).unwrap();
        let corpus = Corpus::encode(&lines, &vocab, 8);
        (corpus, vocab)
    }

    #[test]
    fn encode_keeps_in_vocab_lines() {
        let (corpus, _) = small_corpus();
        assert_eq!(corpus.len(), 6);
    }

    #[test]
    fn padded_is_fixed_width_eos_tail() {
        let seq = Sequence::real(vec![3, 4]);
        let padded = seq.padded(5);
        assert_eq!(padded, vec![3, 4, 0, 0, 0]);
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn padded_truncates_overlong() {
        let seq = Sequence::real(vec![1, 2, 3, 4, 5]);
        assert_eq!(seq.padded(3), vec![1, 2, 3]);
    }

    #[test]
    fn validate_flags_out_of_range_ids() {
        let seq = Sequence::generated(vec![1, 99, 2]);
        let err = seq.validate(10, 7).unwrap_err();
        assert!(err.to_string().contains("99"));
        assert!(seq.validate(100, 7).is_ok());
    }

    #[test]
    fn sampler_covers_epoch_then_resets() {
        let (corpus, _) = small_corpus();
        let mut sampler = BatchSampler::new(&corpus, 2);
        let mut rng = StdRng::seed_from_u64(7);
        sampler.shuffle(&mut rng);
        let mut batches = 0;
        while let Some(batch) = sampler.next_batch(&corpus) {
            assert_eq!(batch.len(), 2);
            assert!(batch.iter().all(|s| s.provenance == Provenance::Real));
            batches += 1;
        }
        assert_eq!(batches, 3);
        // Exhausted epoch resets; next call yields again.
        assert!(sampler.next_batch(&corpus).is_some());
    }

    #[test]
    fn embedding_table_lookup() {
        let table = EmbeddingTable::from_pairs(
            3,
            [("rain".to_string(), vec![0.1, 0.2, 0.3])],
        );
        assert_eq!(table.dim(), 3);
        assert_eq!(table.get("rain"), Some(&[0.1, 0.2, 0.3][..]));
        assert!(table.get("sun").is_none());
    }
}
