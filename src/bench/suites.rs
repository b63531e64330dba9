//! Preset benchmark suites
//!
//! Reference-vs-fused comparisons for each accelerated component, over the
//! shape grids the kernels are usually tuned on. Every suite runs both
//! precisions; a candidate whose constructor fails for a shape is recorded
//! as skipped rather than failing the run.

use crate::bench::{bench_with_options, BenchConfig, BenchOptions, BenchReport, DType};
use crate::error::Result;
use crate::graph::Module;
use crate::modules::{
    AttentionKernel, FlashSelfAttention, FusedLayerNorm, FusedScaleMaskSoftmax, LayerNorm,
    ScaleMaskSoftmax, SelfAttention,
};

const LAYER_NORM_EPS: f32 = 1e-5;

fn layer_norm_candidate(label: &str, dtype: DType, fused: bool) -> BenchConfig {
    BenchConfig::new(label, dtype, move |shape, _| {
        let d_model = *shape.last()?;
        if fused {
            FusedLayerNorm::new(d_model, LAYER_NORM_EPS)
                .ok()
                .map(|m| Box::new(m) as Box<dyn Module>)
        } else {
            LayerNorm::new(d_model, LAYER_NORM_EPS)
                .ok()
                .map(|m| Box::new(m) as Box<dyn Module>)
        }
    })
}

/// Layer normalization: reference vs fused
///
/// Shape grid is (batch, seq, hidden size).
///
/// # Errors
///
/// Returns an error if a forward pass fails.
pub fn layer_norm_suite(options: &BenchOptions) -> Result<BenchReport> {
    let shapes = vec![
        vec![32, 128, 768],
        vec![8, 512, 1024],
        vec![16, 512, 8192],
        vec![4, 2048, 8192],
    ];
    let configs = vec![
        layer_norm_candidate("LayerNorm (FP32)", DType::F32, false),
        layer_norm_candidate("FusedLayerNorm (FP32)", DType::F32, true),
        layer_norm_candidate("LayerNorm (FP16)", DType::F16, false),
        layer_norm_candidate("FusedLayerNorm (FP16)", DType::F16, true),
    ];
    bench_with_options(&shapes, &configs, "LayerNorm: reference vs fused", options)
}

fn softmax_candidate(label: &str, dtype: DType, scale: f32, fused: bool) -> BenchConfig {
    BenchConfig::new(label, dtype, move |_, _| {
        if fused {
            Some(Box::new(FusedScaleMaskSoftmax::new(scale, true)) as Box<dyn Module>)
        } else {
            Some(Box::new(ScaleMaskSoftmax::new(scale, true)) as Box<dyn Module>)
        }
    })
}

/// Causal scale-mask-softmax: reference vs fused
///
/// Shape grid is (batch, head, seq, seq); scale is the usual
/// `1/sqrt(head_dim)` for 64-dim heads.
///
/// # Errors
///
/// Returns an error if a forward pass fails.
pub fn softmax_suite(options: &BenchOptions) -> Result<BenchReport> {
    let shapes = vec![vec![4, 16, 512, 512]];
    let scale = 0.125;
    let configs = vec![
        softmax_candidate("ScaleMaskSoftmax (FP32)", DType::F32, scale, false),
        softmax_candidate("FusedScaleMaskSoftmax (FP32)", DType::F32, scale, true),
        softmax_candidate("ScaleMaskSoftmax (FP16)", DType::F16, scale, false),
        softmax_candidate("FusedScaleMaskSoftmax (FP16)", DType::F16, scale, true),
    ];
    bench_with_options(
        &shapes,
        &configs,
        "Softmax with causal mask: reference vs fused",
        options,
    )
}

fn attention_candidate(
    label: &str,
    num_heads: usize,
    kernel: Option<AttentionKernel>,
) -> BenchConfig {
    BenchConfig::new(label, DType::F32, move |shape, _| {
        let d_model = *shape.last()?;
        match kernel {
            None => SelfAttention::new(d_model, num_heads, true)
                .ok()
                .map(|m| Box::new(m) as Box<dyn Module>),
            Some(kernel) => FlashSelfAttention::new(d_model, num_heads, true, kernel)
                .ok()
                .map(|m| Box::new(m) as Box<dyn Module>),
        }
    })
}

/// Causal self-attention: reference vs fused kernels
///
/// Shape grid is (seq, d_model); `num_heads` must divide each `d_model` or
/// the candidate is skipped for that shape.
///
/// # Errors
///
/// Returns an error if a forward pass fails.
pub fn attention_suite(num_heads: usize, options: &BenchOptions) -> Result<BenchReport> {
    let shapes = vec![vec![128, 768], vec![256, 768], vec![512, 768]];
    let configs = vec![
        attention_candidate("SelfAttention (FP32)", num_heads, None),
        attention_candidate("FlashSelfAttention/flash (FP32)", num_heads, Some(AttentionKernel::Flash)),
        attention_candidate("FlashSelfAttention/tiled (FP32)", num_heads, Some(AttentionKernel::Tiled)),
    ];
    bench_with_options(
        &shapes,
        &configs,
        "Self-attention: reference vs fused",
        options,
    )
}
