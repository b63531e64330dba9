//! Layer normalization modules
//!
//! `LayerNorm` is the reference two-pass implementation (mean, then
//! variance). `FusedLayerNorm` mirrors the single-pass fused kernels shipped
//! by acceleration libraries: one traversal accumulating sum and sum of
//! squares per row, rows processed in parallel. Both share parameters and
//! produce identical outputs up to float accumulation order.
//!
//! # References
//!
//! Layer Normalization: <https://arxiv.org/abs/1607.06450>

use std::any::Any;

use rayon::prelude::*;

use crate::error::{InyectarError, Result};
use crate::graph::{Module, ModuleKind};
use crate::tensor::{Parameter, Tensor};

fn validate_last_dim(shape: &[usize], d_model: usize) -> Result<()> {
    if shape.is_empty() {
        return Err(InyectarError::InvalidShape {
            reason: "Input tensor cannot be empty".to_string(),
        });
    }
    let last = shape[shape.len() - 1];
    if last != d_model {
        return Err(InyectarError::InvalidShape {
            reason: format!("Last dimension {last} doesn't match normalized shape {d_model}"),
        });
    }
    Ok(())
}

fn check_param(name: &str, param: &Parameter, d_model: usize) -> Result<()> {
    if param.shape() != [d_model] {
        return Err(InyectarError::ParamShapeMismatch {
            name: name.to_string(),
            expected: vec![d_model],
            actual: param.shape().to_vec(),
        });
    }
    Ok(())
}

/// Reference layer normalization
///
/// Normalizes across the feature dimension:
/// ```text
/// y = (x - mean(x)) / sqrt(variance(x) + eps) * weight + bias
/// ```
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Feature dimension to normalize
    d_model: usize,
    /// Epsilon for numerical stability
    eps: f32,
    /// Scale parameter (gamma)
    weight: Parameter,
    /// Shift parameter (beta)
    bias: Parameter,
}

impl LayerNorm {
    /// Type tag for [`LayerNorm`]
    pub const KIND: ModuleKind = ModuleKind::new("inyectar.modules.norm", "LayerNorm");

    /// Create a layer normalization module
    ///
    /// # Errors
    ///
    /// Returns error if `d_model` is zero.
    pub fn new(d_model: usize, eps: f32) -> Result<Self> {
        if d_model == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "d_model must be > 0".to_string(),
            });
        }
        Ok(Self {
            d_model,
            eps,
            weight: Parameter::new(Tensor::from_vec(vec![d_model], vec![1.0; d_model])?),
            bias: Parameter::new(Tensor::zeros(vec![d_model])?),
        })
    }

    /// Feature dimension
    #[must_use]
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Epsilon value
    #[must_use]
    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Scale parameter
    #[must_use]
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Shift parameter
    #[must_use]
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    /// Install weight and bias copied from another module
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::ParamShapeMismatch`] on incompatible shapes.
    pub fn assign(&mut self, weight: Parameter, bias: Parameter) -> Result<()> {
        check_param("weight", &weight, self.d_model)?;
        check_param("bias", &bias, self.d_model)?;
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }
}

impl Module for LayerNorm {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        validate_last_dim(input.shape(), self.d_model)?;

        let data = input.data();
        let num_rows = data.len() / self.d_model;
        let w = self.weight.data();
        let b = self.bias.data();

        let mut output = Vec::with_capacity(data.len());
        for row_idx in 0..num_rows {
            let row = &data[row_idx * self.d_model..(row_idx + 1) * self.d_model];

            #[allow(clippy::cast_precision_loss)]
            let mean: f32 = row.iter().sum::<f32>() / self.d_model as f32;

            #[allow(clippy::cast_precision_loss)]
            let variance: f32 = row
                .iter()
                .map(|&x| {
                    let diff = x - mean;
                    diff * diff
                })
                .sum::<f32>()
                / self.d_model as f32;

            let inv_std = 1.0 / (variance + self.eps).sqrt();
            for (i, &x) in row.iter().enumerate() {
                output.push((x - mean) * inv_std * w[i] + b[i]);
            }
        }

        debug_assert!(
            output.iter().all(|&x| x.is_finite()),
            "LayerNorm produced NaN or Inf values - check input distribution"
        );

        Tensor::from_vec(input.shape().to_vec(), output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Fused layer normalization
///
/// Single-pass statistics: each row is traversed once accumulating sum and
/// sum of squares, and rows run in parallel. Output matches [`LayerNorm`]
/// up to accumulation order.
#[derive(Debug, Clone)]
pub struct FusedLayerNorm {
    /// Feature dimension to normalize
    d_model: usize,
    /// Epsilon for numerical stability
    eps: f32,
    /// Scale parameter (gamma)
    weight: Parameter,
    /// Shift parameter (beta)
    bias: Parameter,
}

impl FusedLayerNorm {
    /// Type tag for [`FusedLayerNorm`]
    pub const KIND: ModuleKind = ModuleKind::new("inyectar.modules.norm", "FusedLayerNorm");

    /// Create a fused layer normalization module
    ///
    /// # Errors
    ///
    /// Returns error if `d_model` is zero.
    pub fn new(d_model: usize, eps: f32) -> Result<Self> {
        if d_model == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "d_model must be > 0".to_string(),
            });
        }
        Ok(Self {
            d_model,
            eps,
            weight: Parameter::new(Tensor::from_vec(vec![d_model], vec![1.0; d_model])?),
            bias: Parameter::new(Tensor::zeros(vec![d_model])?),
        })
    }

    /// Feature dimension
    #[must_use]
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Epsilon value
    #[must_use]
    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Scale parameter
    #[must_use]
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Shift parameter
    #[must_use]
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    /// Install weight and bias copied from another module
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::ParamShapeMismatch`] on incompatible shapes.
    pub fn assign(&mut self, weight: Parameter, bias: Parameter) -> Result<()> {
        check_param("weight", &weight, self.d_model)?;
        check_param("bias", &bias, self.d_model)?;
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }
}

impl Module for FusedLayerNorm {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        validate_last_dim(input.shape(), self.d_model)?;

        let data = input.data();
        let d_model = self.d_model;
        let eps = self.eps;
        let w = self.weight.data();
        let b = self.bias.data();

        let output: Vec<f32> = data
            .par_chunks(d_model)
            .flat_map(|row| {
                let mut sum = 0.0f32;
                let mut sum_sq = 0.0f32;
                for &x in row {
                    sum += x;
                    sum_sq += x * x;
                }
                #[allow(clippy::cast_precision_loss)]
                let n = d_model as f32;
                let mean = sum / n;
                let variance = (sum_sq / n - mean * mean).max(0.0);
                let inv_std = 1.0 / (variance + eps).sqrt();

                row.iter()
                    .enumerate()
                    .map(|(i, &x)| (x - mean) * inv_std * w[i] + b[i])
                    .collect::<Vec<f32>>()
            })
            .collect();

        Tensor::from_vec(input.shape().to_vec(), output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
