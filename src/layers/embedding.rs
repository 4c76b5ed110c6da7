//! Token Embedding Layer
//!
//! A lookup table mapping token ids to dense vectors. The forward pass
//! gathers rows; the backward pass scatter-adds row gradients back into
//! the table. Rows can be seeded from a pretrained embedding table, with
//! missing tokens falling back to small Gaussian noise.

use crate::data::EmbeddingTable;
use crate::layers::linear::random_init;
use crate::tensor::{axpy, Tensor};
use crate::vocab::Vocabulary;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Embedding table `[vocab_size, dim]`.
pub struct Embedding {
    pub weight: Tensor,
}

impl Embedding {
    /// Random initialization.
    pub fn new(vocab_size: usize, dim: usize, seed: u64) -> Self {
        let scale = (1.0 / dim as f32).sqrt();
        Self {
            weight: Tensor::new(random_init(vocab_size * dim, seed, scale), vec![
                vocab_size, dim,
            ]),
        }
    }

    /// Initialization seeded from a pretrained table where tokens match;
    /// unmatched rows draw from a small Gaussian.
    pub fn with_pretrained(
        vocab: &Vocabulary,
        table: &EmbeddingTable,
        dim: usize,
        rng: &mut StdRng,
    ) -> Self {
        let normal = Normal::new(0.0f32, 0.1).expect("valid stddev");
        let mut weight = Tensor::zeros(vec![vocab.len(), dim]);
        for (id, token) in vocab.tokens().iter().enumerate() {
            let row = weight.row_mut(id);
            match table.get(token) {
                Some(vector) if vector.len() == dim => row.copy_from_slice(vector),
                _ => {
                    for v in row.iter_mut() {
                        *v = normal.sample(rng);
                    }
                }
            }
        }
        Self { weight }
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.weight.cols()
    }

    /// Gather rows for a sequence of ids into a `[len, dim]` tensor.
    pub fn lookup(&self, ids: &[u32]) -> Tensor {
        let dim = self.dim();
        let mut out = Tensor::zeros(vec![ids.len(), dim]);
        for (t, &id) in ids.iter().enumerate() {
            out.row_mut(t).copy_from_slice(self.weight.row(id as usize));
        }
        out
    }

    /// Borrow one embedding row.
    pub fn row(&self, id: u32) -> &[f32] {
        self.weight.row(id as usize)
    }

    /// Scatter-add per-position gradients back into a table gradient.
    pub fn accumulate_grad(grad_table: &mut Tensor, ids: &[u32], grad_rows: &Tensor) {
        for (t, &id) in ids.iter().enumerate() {
            axpy(grad_table.row_mut(id as usize), grad_rows.row(t), 1.0);
        }
    }
}
