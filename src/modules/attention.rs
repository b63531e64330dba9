//! Attention modules
//!
//! Contains:
//! - `SelfAttention`: reference multi-head self-attention. Scores are raw
//!   `q . k` dot products; the `1/sqrt(head_dim)` scale is folded into the
//!   trained query projection, so the forward pass applies none itself.
//! - `FlashSelfAttention`: fused replacement. Its kernels divide scores by
//!   `sqrt(head_dim)` internally, so weights copied from a `SelfAttention`
//!   must be pre-multiplied to cancel that scale (the injection policy's
//!   job, see [`crate::inject::policy::FlashAttentionPolicy`]).
//!
//! # References
//!
//! - "Attention is All You Need" - Vaswani et al., 2017
//! - "FlashAttention: Fast and Memory-Efficient Exact Attention" - Dao et al., 2022

use std::any::Any;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{InyectarError, Result};
use crate::graph::{Module, ModuleKind};
use crate::tensor::{Parameter, Tensor};

use super::Linear;

/// Fused attention kernel variants
///
/// Selected by name through the injection policy's `kernel` config key,
/// mirroring how accelerated backends expose several interchangeable
/// implementations of the same contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKernel {
    /// Row-parallel online-softmax attention
    Flash,
    /// Block-tiled attention with running max/sum statistics
    Tiled,
}

impl AttentionKernel {
    /// Parse a kernel name
    ///
    /// # Errors
    ///
    /// Returns error for unknown kernel names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "flash" => Ok(Self::Flash),
            "tiled" => Ok(Self::Tiled),
            other => Err(InyectarError::InvalidConfiguration(format!(
                "unknown attention kernel '{other}' (expected 'flash' or 'tiled')"
            ))),
        }
    }

    /// Canonical kernel name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Tiled => "tiled",
        }
    }
}

/// K/V tile width for the tiled kernel
const TILE: usize = 64;

fn validate_input(shape: &[usize], d_model: usize) -> Result<usize> {
    if shape.len() != 2 {
        return Err(InyectarError::InvalidShape {
            reason: format!("Expected 2D tensor [seq_len, d_model], got shape {shape:?}"),
        });
    }
    if shape[1] != d_model {
        return Err(InyectarError::InvalidShape {
            reason: format!("Expected d_model={d_model}, got {}", shape[1]),
        });
    }
    Ok(shape[0])
}

/// Reference multi-head self-attention
///
/// Q/K/V/O projections are square `[d_model, d_model]` with one head group
/// per `head_dim` slice. Scores are unscaled dot products; softmax runs with
/// max subtraction for stability.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    /// Model (hidden) dimension
    d_model: usize,
    /// Number of attention heads
    num_heads: usize,
    /// Dimension per head (`d_model / num_heads`)
    head_dim: usize,
    /// Restrict each query to positions at or before it
    causal: bool,
    /// Query projection
    q: Linear,
    /// Key projection
    k: Linear,
    /// Value projection
    v: Linear,
    /// Output projection
    o: Linear,
}

impl SelfAttention {
    /// Type tag for [`SelfAttention`]
    pub const KIND: ModuleKind = ModuleKind::new("inyectar.modules.attention", "SelfAttention");

    /// Create a reference attention module
    ///
    /// # Errors
    ///
    /// Returns error if `d_model` or `num_heads` is zero, or `d_model` is
    /// not divisible by `num_heads`.
    pub fn new(d_model: usize, num_heads: usize, causal: bool) -> Result<Self> {
        if d_model == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "d_model must be > 0".to_string(),
            });
        }
        if num_heads == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "num_heads must be > 0".to_string(),
            });
        }
        if !d_model.is_multiple_of(num_heads) {
            return Err(InyectarError::InvalidShape {
                reason: format!("d_model {d_model} must be divisible by num_heads {num_heads}"),
            });
        }

        Ok(Self {
            d_model,
            num_heads,
            head_dim: d_model / num_heads,
            causal,
            q: Linear::new(d_model, d_model)?,
            k: Linear::new(d_model, d_model)?,
            v: Linear::new(d_model, d_model)?,
            o: Linear::new(d_model, d_model)?,
        })
    }

    /// Model dimension
    #[must_use]
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Number of heads
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Dimension per head
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Whether attention is causal
    #[must_use]
    pub fn causal(&self) -> bool {
        self.causal
    }

    /// Query projection
    #[must_use]
    pub fn q(&self) -> &Linear {
        &self.q
    }

    /// Key projection
    #[must_use]
    pub fn k(&self) -> &Linear {
        &self.k
    }

    /// Value projection
    #[must_use]
    pub fn v(&self) -> &Linear {
        &self.v
    }

    /// Output projection
    #[must_use]
    pub fn o(&self) -> &Linear {
        &self.o
    }

    /// Mutable query projection
    pub fn q_mut(&mut self) -> &mut Linear {
        &mut self.q
    }

    /// Mutable key projection
    pub fn k_mut(&mut self) -> &mut Linear {
        &mut self.k
    }

    /// Mutable value projection
    pub fn v_mut(&mut self) -> &mut Linear {
        &mut self.v
    }

    /// Mutable output projection
    pub fn o_mut(&mut self) -> &mut Linear {
        &mut self.o
    }
}

impl Module for SelfAttention {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![
            ("q.weight", self.q.weight()),
            ("q.bias", self.q.bias()),
            ("k.weight", self.k.weight()),
            ("k.bias", self.k.bias()),
            ("v.weight", self.v.weight()),
            ("v.bias", self.v.bias()),
            ("o.weight", self.o.weight()),
            ("o.bias", self.o.bias()),
        ]
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let seq_len = validate_input(input.shape(), self.d_model)?;

        let q = self.q.forward(input)?;
        let k = self.k.forward(input)?;
        let v = self.v.forward(input)?;

        let q_data = q.data();
        let k_data = k.data();
        let v_data = v.data();

        let mut concat = vec![0.0f32; seq_len * self.d_model];

        for head in 0..self.num_heads {
            let off = head * self.head_dim;

            for i in 0..seq_len {
                let kv_end = if self.causal { i + 1 } else { seq_len };

                // Unscaled scores: the trained q projection carries the scale.
                let mut scores = Vec::with_capacity(kv_end);
                for j in 0..kv_end {
                    let mut dot = 0.0;
                    for d in 0..self.head_dim {
                        dot += q_data[i * self.d_model + off + d]
                            * k_data[j * self.d_model + off + d];
                    }
                    scores.push(dot);
                }

                let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut exp_sum = 0.0;
                for score in &mut scores {
                    let exp_val = (*score - max_score).exp();
                    *score = exp_val;
                    exp_sum += exp_val;
                }
                let inv_sum = 1.0 / exp_sum;

                for d in 0..self.head_dim {
                    let mut sum = 0.0;
                    for (j, &w) in scores.iter().enumerate() {
                        sum += w * v_data[j * self.d_model + off + d];
                    }
                    concat[i * self.d_model + off + d] = sum * inv_sum;
                }
            }
        }

        debug_assert!(
            concat.iter().all(|&x| x.is_finite()),
            "SelfAttention produced NaN or Inf values - check input scaling"
        );

        self.o
            .forward(&Tensor::from_vec(vec![seq_len, self.d_model], concat)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Fused flash-style multi-head self-attention
///
/// Same architecture as [`SelfAttention`], different score formulation: the
/// kernel applies `1/sqrt(head_dim)` to every score internally and never
/// materializes the full score matrix. Online max/sum statistics keep the
/// softmax exact.
#[derive(Debug, Clone)]
pub struct FlashSelfAttention {
    /// Model (hidden) dimension
    d_model: usize,
    /// Number of attention heads
    num_heads: usize,
    /// Dimension per head
    head_dim: usize,
    /// Kernel-internal score scale: `1 / sqrt(head_dim)`
    scale: f32,
    /// Restrict each query to positions at or before it
    causal: bool,
    /// Selected kernel variant
    kernel: AttentionKernel,
    /// Query projection
    q: Linear,
    /// Key projection
    k: Linear,
    /// Value projection
    v: Linear,
    /// Output projection
    o: Linear,
}

impl FlashSelfAttention {
    /// Type tag for [`FlashSelfAttention`]
    pub const KIND: ModuleKind =
        ModuleKind::new("inyectar.modules.attention", "FlashSelfAttention");

    /// Create a fused attention module
    ///
    /// # Errors
    ///
    /// Returns error if `d_model` or `num_heads` is zero, or `d_model` is
    /// not divisible by `num_heads`.
    pub fn new(
        d_model: usize,
        num_heads: usize,
        causal: bool,
        kernel: AttentionKernel,
    ) -> Result<Self> {
        if d_model == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "d_model must be > 0".to_string(),
            });
        }
        if num_heads == 0 {
            return Err(InyectarError::InvalidShape {
                reason: "num_heads must be > 0".to_string(),
            });
        }
        if !d_model.is_multiple_of(num_heads) {
            return Err(InyectarError::InvalidShape {
                reason: format!("d_model {d_model} must be divisible by num_heads {num_heads}"),
            });
        }

        let head_dim = d_model / num_heads;
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (head_dim as f32).sqrt();

        Ok(Self {
            d_model,
            num_heads,
            head_dim,
            scale,
            causal,
            kernel,
            q: Linear::new(d_model, d_model)?,
            k: Linear::new(d_model, d_model)?,
            v: Linear::new(d_model, d_model)?,
            o: Linear::new(d_model, d_model)?,
        })
    }

    /// Model dimension
    #[must_use]
    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Number of heads
    #[must_use]
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Dimension per head
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Whether attention is causal
    #[must_use]
    pub fn causal(&self) -> bool {
        self.causal
    }

    /// Selected kernel variant
    #[must_use]
    pub fn kernel(&self) -> AttentionKernel {
        self.kernel
    }

    /// Query projection
    #[must_use]
    pub fn q(&self) -> &Linear {
        &self.q
    }

    /// Key projection
    #[must_use]
    pub fn k(&self) -> &Linear {
        &self.k
    }

    /// Value projection
    #[must_use]
    pub fn v(&self) -> &Linear {
        &self.v
    }

    /// Output projection
    #[must_use]
    pub fn o(&self) -> &Linear {
        &self.o
    }

    /// Mutable query projection
    pub fn q_mut(&mut self) -> &mut Linear {
        &mut self.q
    }

    /// Mutable key projection
    pub fn k_mut(&mut self) -> &mut Linear {
        &mut self.k
    }

    /// Mutable value projection
    pub fn v_mut(&mut self) -> &mut Linear {
        &mut self.v
    }

    /// Mutable output projection
    pub fn o_mut(&mut self) -> &mut Linear {
        &mut self.o
    }

    /// One query row against its K/V range, online softmax over tiles
    fn attend_row(
        &self,
        q_data: &[f32],
        k_data: &[f32],
        v_data: &[f32],
        head_off: usize,
        q_idx: usize,
        kv_len: usize,
    ) -> Vec<f32> {
        let d_model = self.d_model;
        let head_dim = self.head_dim;

        let mut row_output = vec![0.0f32; head_dim];
        let mut row_max = f32::NEG_INFINITY;
        let mut row_sum = 0.0f32;

        let num_tiles = kv_len.div_ceil(TILE);
        for tile_idx in 0..num_tiles {
            let kv_start = tile_idx * TILE;
            let kv_end = (kv_start + TILE).min(kv_len);

            let mut scores: Vec<f32> = (kv_start..kv_end)
                .map(|kv_idx| {
                    let mut dot = 0.0;
                    for d in 0..head_dim {
                        dot += q_data[q_idx * d_model + head_off + d]
                            * k_data[kv_idx * d_model + head_off + d];
                    }
                    dot * self.scale
                })
                .collect();

            let tile_max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let old_max = row_max;
            let new_max = old_max.max(tile_max);
            row_max = new_max;

            let mut tile_sum = 0.0;
            for score in &mut scores {
                let exp_val = (*score - new_max).exp();
                *score = exp_val;
                tile_sum += exp_val;
            }

            // Renormalize earlier tiles against the new running max.
            let correction = (old_max - new_max).exp();
            for out_val in &mut row_output {
                *out_val *= correction;
            }
            row_sum = row_sum * correction + tile_sum;

            for (j, kv_idx) in (kv_start..kv_end).enumerate() {
                let weight = scores[j];
                for d in 0..head_dim {
                    row_output[d] += weight * v_data[kv_idx * d_model + head_off + d];
                }
            }
        }

        let inv_sum = 1.0 / row_sum;
        for out_val in &mut row_output {
            *out_val *= inv_sum;
        }
        row_output
    }

    fn forward_flash(&self, q: &Tensor, k: &Tensor, v: &Tensor, seq_len: usize) -> Vec<f32> {
        let q_data = q.data();
        let k_data = k.data();
        let v_data = v.data();
        let d_model = self.d_model;
        let head_dim = self.head_dim;

        let rows: Vec<Vec<f32>> = (0..seq_len * self.num_heads)
            .into_par_iter()
            .map(|task| {
                let head = task / seq_len;
                let q_idx = task % seq_len;
                let kv_len = if self.causal { q_idx + 1 } else { seq_len };
                self.attend_row(q_data, k_data, v_data, head * head_dim, q_idx, kv_len)
            })
            .collect();

        let mut concat = vec![0.0f32; seq_len * d_model];
        for (task, row) in rows.into_iter().enumerate() {
            let head = task / seq_len;
            let q_idx = task % seq_len;
            let off = head * head_dim;
            concat[q_idx * d_model + off..q_idx * d_model + off + head_dim]
                .copy_from_slice(&row);
        }
        concat
    }

    fn forward_tiled(&self, q: &Tensor, k: &Tensor, v: &Tensor, seq_len: usize) -> Vec<f32> {
        let q_data = q.data();
        let k_data = k.data();
        let v_data = v.data();
        let d_model = self.d_model;
        let head_dim = self.head_dim;

        let mut concat = vec![0.0f32; seq_len * d_model];
        for head in 0..self.num_heads {
            let off = head * head_dim;
            for q_idx in 0..seq_len {
                let kv_len = if self.causal { q_idx + 1 } else { seq_len };
                let row = self.attend_row(q_data, k_data, v_data, off, q_idx, kv_len);
                concat[q_idx * d_model + off..q_idx * d_model + off + head_dim]
                    .copy_from_slice(&row);
            }
        }
        concat
    }
}

impl Module for FlashSelfAttention {
    fn kind(&self) -> ModuleKind {
        Self::KIND
    }

    fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        vec![
            ("q.weight", self.q.weight()),
            ("q.bias", self.q.bias()),
            ("k.weight", self.k.weight()),
            ("k.bias", self.k.bias()),
            ("v.weight", self.v.weight()),
            ("v.bias", self.v.bias()),
            ("o.weight", self.o.weight()),
            ("o.bias", self.o.bias()),
        ]
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let seq_len = validate_input(input.shape(), self.d_model)?;

        let q = self.q.forward(input)?;
        let k = self.k.forward(input)?;
        let v = self.v.forward(input)?;

        let concat = match self.kernel {
            AttentionKernel::Flash => self.forward_flash(&q, &k, &v, seq_len),
            AttentionKernel::Tiled => self.forward_tiled(&q, &k, &v, seq_len),
        };

        self.o
            .forward(&Tensor::from_vec(vec![seq_len, self.d_model], concat)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq: usize, d_model: usize) -> Tensor {
        let data: Vec<f32> = (0..seq * d_model)
            .map(|i| ((i as f32 * 0.37).sin()) * 0.5)
            .collect();
        Tensor::from_vec(vec![seq, d_model], data).unwrap()
    }

    #[test]
    fn test_self_attention_shape() {
        let attn = SelfAttention::new(16, 4, false).unwrap();
        let out = attn.forward(&input(6, 16)).unwrap();
        assert_eq!(out.shape(), &[6, 16]);
    }

    #[test]
    fn test_self_attention_rejects_indivisible_heads() {
        assert!(SelfAttention::new(10, 3, false).is_err());
    }

    #[test]
    fn test_kernel_parse() {
        assert_eq!(AttentionKernel::parse("flash").unwrap(), AttentionKernel::Flash);
        assert_eq!(AttentionKernel::parse("tiled").unwrap(), AttentionKernel::Tiled);
        assert!(AttentionKernel::parse("cutlass").is_err());
    }

    #[test]
    fn test_flash_matches_tiled() {
        let x = input(9, 16);
        let flash = FlashSelfAttention::new(16, 4, true, AttentionKernel::Flash).unwrap();
        let mut tiled = FlashSelfAttention::new(16, 4, true, AttentionKernel::Tiled).unwrap();
        // Same projections in both modules.
        tiled
            .q_mut()
            .assign(flash.q().weight().clone(), flash.q().bias().clone(), "q")
            .unwrap();
        tiled
            .k_mut()
            .assign(flash.k().weight().clone(), flash.k().bias().clone(), "k")
            .unwrap();
        tiled
            .v_mut()
            .assign(flash.v().weight().clone(), flash.v().bias().clone(), "v")
            .unwrap();
        tiled
            .o_mut()
            .assign(flash.o().weight().clone(), flash.o().bias().clone(), "o")
            .unwrap();

        let a = flash.forward(&x).unwrap();
        let b = tiled.forward(&x).unwrap();
        for (lhs, rhs) in a.data().iter().zip(b.data()) {
            assert!((lhs - rhs).abs() < 1e-5, "{lhs} vs {rhs}");
        }
    }

    #[test]
    fn test_fused_matches_reference_after_unscale() {
        // The fused kernel divides scores by sqrt(head_dim); multiplying the
        // q weights by sqrt(head_dim) must reproduce the reference output.
        let d_model = 16;
        let num_heads = 4;
        let x = input(7, d_model);

        let reference = SelfAttention::new(d_model, num_heads, false).unwrap();
        let mut fused =
            FlashSelfAttention::new(d_model, num_heads, false, AttentionKernel::Flash).unwrap();

        #[allow(clippy::cast_precision_loss)]
        let scale = ((d_model / num_heads) as f32).sqrt();
        fused
            .q_mut()
            .assign(
                reference.q().weight().scaled(scale),
                reference.q().bias().clone(),
                "q",
            )
            .unwrap();
        fused
            .k_mut()
            .assign(
                reference.k().weight().clone(),
                reference.k().bias().clone(),
                "k",
            )
            .unwrap();
        fused
            .v_mut()
            .assign(
                reference.v().weight().clone(),
                reference.v().bias().clone(),
                "v",
            )
            .unwrap();
        fused
            .o_mut()
            .assign(
                reference.o().weight().clone(),
                reference.o().bias().clone(),
                "o",
            )
            .unwrap();

        let expected = reference.forward(&x).unwrap();
        let actual = fused.forward(&x).unwrap();
        for (lhs, rhs) in expected.data().iter().zip(actual.data()) {
            assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");
        }
    }

    #[test]
    fn test_causal_first_row_sees_only_itself() {
        // With causal masking, output row 0 attends only to position 0, so
        // it must equal o(v_0) regardless of later positions.
        let d_model = 8;
        let attn = SelfAttention::new(d_model, 2, true).unwrap();

        let a = input(5, d_model);
        let mut changed = a.data().to_vec();
        for val in changed.iter_mut().skip(d_model) {
            *val += 1.0;
        }
        let b = Tensor::from_vec(vec![5, d_model], changed).unwrap();

        let out_a = attn.forward(&a).unwrap();
        let out_b = attn.forward(&b).unwrap();
        for d in 0..d_model {
            assert!((out_a.data()[d] - out_b.data()[d]).abs() < 1e-6);
        }
    }
}
