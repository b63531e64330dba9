//! Scale-mask-softmax modules
//!
//! Attention-score post-processing as a standalone module: multiply by a
//! fixed scale, optionally apply a causal mask, then softmax over the last
//! dimension. `ScaleMaskSoftmax` is the reference three-step version;
//! `FusedScaleMaskSoftmax` folds scaling, masking, and the max/sum pass into
//! one traversal per row, the shape fused softmax kernels take.
//!
//! Neither variant carries learnable parameters.

use std::any::Any;

use rayon::prelude::*;

use crate::error::{InyectarError, Result};
use crate::graph::{Module, ModuleKind};
use crate::tensor::{Parameter, Tensor};

/// Validate a score tensor and return (rows, q_len, k_len)
///
/// Causal masking needs the last two dimensions to form square score
/// blocks `[q_len, k_len]` with `q_len == k_len`.
fn validate_scores(shape: &[usize], causal: bool) -> Result<(usize, usize, usize)> {
    if shape.len() < 2 {
        return Err(InyectarError::InvalidShape {
            reason: format!("Expected score tensor with >= 2 dims, got shape {shape:?}"),
        });
    }
    let k_len = shape[shape.len() - 1];
    let q_len = shape[shape.len() - 2];
    if causal && q_len != k_len {
        return Err(InyectarError::InvalidShape {
            reason: format!(
                "Causal masking requires square score blocks, got [{q_len}, {k_len}]"
            ),
        });
    }
    let rows: usize = shape[..shape.len() - 1].iter().product();
    Ok((rows, q_len, k_len))
}

/// Reference scale-mask-softmax
///
/// Three explicit steps over `[..., q_len, k_len]` score tensors: scale,
/// causal mask (set positions `j > i` to negative infinity), row softmax
/// with max subtraction.
#[derive(Debug, Clone)]
pub struct ScaleMaskSoftmax {
    /// Multiplier applied to every score before masking
    scale: f32,
    /// Mask out positions after the query index
    causal: bool,
}

impl ScaleMaskSoftmax {
    /// Type tag for [`ScaleMaskSoftmax`]
    pub const KIND: ModuleKind = ModuleKind::new("inyectar.modules.softmax", "ScaleMaskSoftmax");

    /// Create a reference scale-mask-softmax
    #[must_use]
    pub fn new(scale: f32, causal: bool) -> Self {
        Self { scale, causal }
    }

    /// Score multiplier
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Whether the causal mask is applied
    #[must_use]
    pub fn causal(&self) -> bool {
        self.causal
    }
}

impl Module for ScaleMaskSoftmax {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        Vec::new()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (rows, q_len, k_len) = validate_scores(input.shape(), self.causal)?;
        let data = input.data();

        let mut output = Vec::with_capacity(data.len());
        for row_idx in 0..rows {
            let row = &data[row_idx * k_len..(row_idx + 1) * k_len];
            let q_idx = row_idx % q_len;

            // Step 1 + 2: scale, then mask.
            let mut scores: Vec<f32> = row
                .iter()
                .enumerate()
                .map(|(j, &x)| {
                    if self.causal && j > q_idx {
                        f32::NEG_INFINITY
                    } else {
                        x * self.scale
                    }
                })
                .collect();

            // Step 3: softmax with max subtraction.
            let max_val = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for score in &mut scores {
                let exp_val = (*score - max_val).exp();
                *score = exp_val;
                sum += exp_val;
            }
            let inv_sum = 1.0 / sum;
            output.extend(scores.iter().map(|&e| e * inv_sum));
        }

        Tensor::from_vec(input.shape().to_vec(), output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Fused scale-mask-softmax
///
/// One traversal per row: masked positions are skipped instead of set to
/// negative infinity, scaling happens inside the max/exp pass, and rows run
/// in parallel.
#[derive(Debug, Clone)]
pub struct FusedScaleMaskSoftmax {
    /// Multiplier applied to every score
    scale: f32,
    /// Mask out positions after the query index
    causal: bool,
}

impl FusedScaleMaskSoftmax {
    /// Type tag for [`FusedScaleMaskSoftmax`]
    pub const KIND: ModuleKind =
        ModuleKind::new("inyectar.modules.softmax", "FusedScaleMaskSoftmax");

    /// Create a fused scale-mask-softmax
    #[must_use]
    pub fn new(scale: f32, causal: bool) -> Self {
        Self { scale, causal }
    }

    /// Score multiplier
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Whether the causal mask is applied
    #[must_use]
    pub fn causal(&self) -> bool {
        self.causal
    }
}

impl Module for FusedScaleMaskSoftmax {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        Vec::new()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, q_len, k_len) = validate_scores(input.shape(), self.causal)?;
        let data = input.data();
        let scale = self.scale;
        let causal = self.causal;

        let output: Vec<f32> = data
            .par_chunks(k_len)
            .enumerate()
            .flat_map(|(row_idx, row)| {
                let q_idx = row_idx % q_len;
                let live = if causal { q_idx + 1 } else { k_len };

                let mut max_val = f32::NEG_INFINITY;
                for &x in &row[..live] {
                    max_val = max_val.max(x * scale);
                }

                let mut out = vec![0.0f32; k_len];
                let mut sum = 0.0;
                for (j, &x) in row[..live].iter().enumerate() {
                    let exp_val = (x * scale - max_val).exp();
                    out[j] = exp_val;
                    sum += exp_val;
                }
                let inv_sum = 1.0 / sum;
                for val in &mut out[..live] {
                    *val *= inv_sum;
                }
                out
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
