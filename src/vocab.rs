//! Vocabulary
//!
//! A fixed token-to-id mapping built once from the corpus before training
//! starts and immutable afterwards. Id 0 is the designated padding/end
//! token ([`Vocabulary::EOS`]): sequences are right-padded with it for
//! batching, and the generator stops sampling when it emits it.

use crate::error::{PuckError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Surface form of the padding/end token.
pub const EOS_TOKEN: &str = "</s>";

/// Fixed token<->id mapping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vocabulary {
    tokens: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl Vocabulary {
    /// Id of the padding/end token, always 0.
    pub const EOS: u32 = 0;

    /// Build a vocabulary from explicit tokens. [`EOS_TOKEN`] is inserted
    /// at id 0; duplicates and occurrences of [`EOS_TOKEN`] in the input
    /// are ignored.
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        let mut vocab = Self {
            tokens: vec![EOS_TOKEN.to_string()],
            index: HashMap::new(),
        };
        vocab.index.insert(EOS_TOKEN.to_string(), 0);
        for token in tokens {
            if !vocab.index.contains_key(&token) {
                vocab.index.insert(token.clone(), vocab.tokens.len() as u32);
                vocab.tokens.push(token);
            }
        }
        vocab
    }

    /// Build a vocabulary of at most `max_size` entries (including EOS)
    /// from whitespace-tokenized lines, keeping the most frequent tokens.
    /// Ties break by first appearance so the result is deterministic.
    pub fn from_corpus(lines: &[String], max_size: usize) -> Result<Self> {
        if max_size < 2 {
            return Err(PuckError::config(
                "gan.vocab_size",
                "must be at least 2 (EOS plus one real token)",
            ));
        }
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut order = 0usize;
        for line in lines {
            for token in line.split_whitespace() {
                let entry = counts.entry(token).or_insert_with(|| {
                    order += 1;
                    (0, order)
                });
                entry.0 += 1;
            }
        }
        let mut ranked: Vec<(&str, (usize, usize))> = counts
            .into_iter()
            .filter(|(token, _)| *token != EOS_TOKEN)
            .collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked.truncate(max_size - 1);
        Ok(Self::new(ranked.into_iter().map(|(t, _)| t.to_string())))
    }

    /// Number of tokens, including EOS.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when only EOS is present.
    pub fn is_empty(&self) -> bool {
        self.tokens.len() <= 1
    }

    /// Id of a token, if present.
    pub fn id(&self, token: &str) -> Option<u32> {
        self.index.get(token).copied()
    }

    /// Surface form of an id, if in range.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Whether `id` is a valid token id.
    pub fn contains_id(&self, id: u32) -> bool {
        (id as usize) < self.tokens.len()
    }

    /// Render a sequence of ids as text, stopping at the first EOS.
    pub fn render(&self, ids: &[u32]) -> String {
        ids.iter()
            .take_while(|&&id| id != Self::EOS)
            .filter_map(|&id| self.token(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Rebuild the reverse index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
    }

    /// All tokens in id order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}
