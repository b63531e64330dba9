//! Reference and fused module implementations
//!
//! Each accelerated component ships in two flavors:
//! - a reference implementation (the semantics a model was trained against)
//! - a fused implementation with the same observable behavior but a faster
//!   kernel formulation (online softmax, single-pass normalization)
//!
//! Injection policies in [`crate::inject::policy`] know how to swap the
//! former for the latter inside a live model graph.

use crate::error::{InyectarError, Result};
use crate::tensor::{Parameter, Tensor};

mod attention;
pub use attention::{AttentionKernel, FlashSelfAttention, SelfAttention};
mod norm;
pub use norm::{FusedLayerNorm, LayerNorm};
mod softmax;
pub use softmax::{FusedScaleMaskSoftmax, ScaleMaskSoftmax};

/// Linear transformation: `y = x W + b`
///
/// Building block for the attention projections. Weight shape is
/// `[in_features, out_features]`, bias `[out_features]`. Weights initialize
/// to a small deterministic pattern; real values arrive via [`Linear::assign`]
/// when a policy copies parameters from an original module.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Input features
    in_features: usize,
    /// Output features
    out_features: usize,
    /// Weight matrix `[in_features, out_features]`
    weight: Parameter,
    /// Bias vector `[out_features]`
    bias: Parameter,
}

impl Linear {
    /// Create a new linear layer
    ///
    /// # Errors
    ///
    /// Returns error if either dimension is zero.
    pub fn new(in_features: usize, out_features: usize) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(InyectarError::InvalidShape {
                reason: format!(
                    "Linear dimensions must be > 0, got in={in_features}, out={out_features}"
                ),
            });
        }

        let init = |size: usize| -> Vec<f32> {
            (0..size).map(|i| (i as f32 * 0.001).sin() * 0.02).collect()
        };

        Ok(Self {
            in_features,
            out_features,
            weight: Parameter::new(Tensor::from_vec(
                vec![in_features, out_features],
                init(in_features * out_features),
            )?),
            bias: Parameter::new(Tensor::zeros(vec![out_features])?),
        })
    }

    /// Input feature count
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output feature count
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Weight parameter
    #[must_use]
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Bias parameter
    #[must_use]
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    /// Install weight and bias copied from another module
    ///
    /// `name` is the projection's attribute name (`"q"`, `"o"`, ...) and is
    /// only used to label shape errors.
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::ParamShapeMismatch`] if either parameter
    /// doesn't match this layer's declared shape.
    pub fn assign(&mut self, weight: Parameter, bias: Parameter, name: &str) -> Result<()> {
        let expected_w = [self.in_features, self.out_features];
        if weight.shape() != expected_w {
            return Err(InyectarError::ParamShapeMismatch {
                name: format!("{name}.weight"),
                expected: expected_w.to_vec(),
                actual: weight.shape().to_vec(),
            });
        }
        let expected_b = [self.out_features];
        if bias.shape() != expected_b {
            return Err(InyectarError::ParamShapeMismatch {
                name: format!("{name}.bias"),
                expected: expected_b.to_vec(),
                actual: bias.shape().to_vec(),
            });
        }
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }

    /// Forward pass: `[seq, in_features] -> [seq, out_features]`
    ///
    /// # Errors
    ///
    /// Returns error if the input's last dimension doesn't match
    /// `in_features`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let shape = input.shape();
        let last = shape[shape.len() - 1];
        if last != self.in_features {
            return Err(InyectarError::InvalidShape {
                reason: format!(
                    "Linear expected last dimension {}, got {last}",
                    self.in_features
                ),
            });
        }

        let rows = input.size() / self.in_features;
        let data = input.data();
        let w = self.weight.data();
        let b = self.bias.data();

        let mut output = vec![0.0f32; rows * self.out_features];
        for i in 0..rows {
            for j in 0..self.out_features {
                let mut sum = b[j];
                for l in 0..self.in_features {
                    sum += data[i * self.in_features + l] * w[l * self.out_features + j];
                }
                output[i * self.out_features + j] = sum;
            }
        }

        let mut out_shape = shape.to_vec();
        let ndim = out_shape.len();
        out_shape[ndim - 1] = self.out_features;
        Tensor::from_vec(out_shape, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_identity_weight() {
        let mut linear = Linear::new(2, 2).unwrap();
        linear
            .assign(
                Parameter::new(
                    Tensor::from_vec(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
                ),
                Parameter::new(Tensor::from_vec(vec![2], vec![0.5, -0.5]).unwrap()),
                "id",
            )
            .unwrap();

        let input = Tensor::from_vec(vec![1, 2], vec![3.0, 4.0]).unwrap();
        let output = linear.forward(&input).unwrap();
        assert_eq!(output.data(), &[3.5, 3.5]);
    }

    #[test]
    fn test_linear_rejects_zero_dims() {
        assert!(Linear::new(0, 4).is_err());
        assert!(Linear::new(4, 0).is_err());
    }

    #[test]
    fn test_linear_assign_shape_mismatch() {
        let mut linear = Linear::new(4, 4).unwrap();
        let bad = Parameter::new(Tensor::zeros(vec![4, 2]).unwrap());
        let bias = Parameter::new(Tensor::zeros(vec![4]).unwrap());
        let err = linear.assign(bad, bias, "q").unwrap_err();
        match err {
            InyectarError::ParamShapeMismatch { name, .. } => assert_eq!(name, "q.weight"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_linear_forward_wrong_input_dim() {
        let linear = Linear::new(4, 8).unwrap();
        let input = Tensor::from_vec(vec![2, 3], vec![0.0; 6]).unwrap();
        assert!(linear.forward(&input).is_err());
    }
}
