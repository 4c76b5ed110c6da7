//! Network Building Blocks
//!
//! Every layer follows the same contract: `forward` returns the output
//! plus a cache of the intermediates its `backward` needs, and `backward`
//! turns an upstream gradient plus that cache into parameter and input
//! gradients. No autograd — every gradient is written out explicitly.

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod embedding;
pub mod gru;
pub mod highway;
pub mod linear;

pub use activation::{relu, relu_grad, sigmoid, sigmoid_grad, sqnl, sqnl_grad, tanh_grad};
pub use conv::{ConvBank, ConvCache, ConvGradients};
pub use dropout::{Dropout, DropoutCache};
pub use embedding::Embedding;
pub use gru::{GruCell, GruGradients, GruStepCache};
pub use highway::{Highway, HighwayCache, HighwayGradients};
pub use linear::{random_init, Linear, LinearCache, LinearGradients};
