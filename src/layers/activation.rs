//! Activation Functions
//!
//! Scalar activations used by the generator and discriminator, each paired
//! with its derivative. Sigmoid and tanh derivatives are expressed in
//! terms of the *output* (cheaper, since forward values are cached); ReLU
//! and SQNL derivatives take the pre-activation input.
//!
//! SQNL is the square nonlinearity used as an optional discriminator
//! readout: piecewise quadratic, saturating at ±1.

use crate::config::ReadoutKind;
use crate::tensor::Tensor;

/// Logistic sigmoid.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of sigmoid given its output `y = sigmoid(x)`.
pub fn sigmoid_grad(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Derivative of tanh given its output `y = tanh(x)`.
pub fn tanh_grad(y: f32) -> f32 {
    1.0 - y * y
}

/// Rectified linear unit.
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Derivative of ReLU given the pre-activation input.
pub fn relu_grad(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Square nonlinearity:
///
/// ```text
/// sqnl(x) =  1              x >  2
///            x - x²/4       0 <= x <= 2
///            x + x²/4      -2 <= x <  0
///           -1              x < -2
/// ```
pub fn sqnl(x: f32) -> f32 {
    if x > 2.0 {
        1.0
    } else if x >= 0.0 {
        x - x * x / 4.0
    } else if x >= -2.0 {
        x + x * x / 4.0
    } else {
        -1.0
    }
}

/// Derivative of SQNL given the pre-activation input.
pub fn sqnl_grad(x: f32) -> f32 {
    if !(-2.0..=2.0).contains(&x) {
        0.0
    } else if x >= 0.0 {
        1.0 - x / 2.0
    } else {
        1.0 + x / 2.0
    }
}

impl ReadoutKind {
    /// Apply the readout element-wise.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        match self {
            ReadoutKind::Identity => x.clone(),
            ReadoutKind::Sqnl => Tensor::new(
                x.data.iter().map(|&v| sqnl(v)).collect(),
                x.shape.clone(),
            ),
        }
    }

    /// Gradient with respect to the readout's input, given the upstream
    /// gradient and the cached input.
    pub fn backward(&self, grad_out: &Tensor, input: &Tensor) -> Tensor {
        match self {
            ReadoutKind::Identity => grad_out.clone(),
            ReadoutKind::Sqnl => Tensor::new(
                grad_out
                    .data
                    .iter()
                    .zip(&input.data)
                    .map(|(&g, &x)| g * sqnl_grad(x))
                    .collect(),
                grad_out.shape.clone(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_symmetry() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid(3.0) + sigmoid(-3.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sqnl_saturates() {
        assert_eq!(sqnl(5.0), 1.0);
        assert_eq!(sqnl(-5.0), -1.0);
        assert!((sqnl(2.0) - 1.0).abs() < 1e-6);
        assert!((sqnl(-2.0) + 1.0).abs() < 1e-6);
        assert_eq!(sqnl(0.0), 0.0);
    }

    #[test]
    fn sqnl_grad_matches_finite_difference() {
        let eps = 1e-3;
        for &x in &[-1.5f32, -0.5, 0.0, 0.5, 1.5] {
            let numeric = (sqnl(x + eps) - sqnl(x - eps)) / (2.0 * eps);
            assert!(
                (numeric - sqnl_grad(x)).abs() < 1e-2,
                "sqnl grad mismatch at {x}"
            );
        }
    }

    #[test]
    fn sigmoid_grad_matches_finite_difference() {
        let eps = 1e-3;
        for &x in &[-2.0f32, -0.3, 0.0, 0.7, 2.0] {
            let numeric = (sigmoid(x + eps) - sigmoid(x - eps)) / (2.0 * eps);
            assert!((numeric - sigmoid_grad(sigmoid(x))).abs() < 1e-3);
        }
    }
}
