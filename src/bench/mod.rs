//! Benchmark harness for kernel comparison
//!
//! Times candidate module implementations over a matrix of shapes and
//! dtypes. Each candidate is a [`BenchConfig`]: a constructor that may
//! return `None` (backend unavailable, the cell is recorded as skipped), an
//! optional input generator, and an optional per-iteration reset hook.
//! The harness calls the candidates; the candidates never call the harness.
//!
//! Results are latency statistics per (shape, candidate) cell, printable as
//! an aligned table and serializable for regression tracking.

#![allow(clippy::cast_precision_loss)] // Statistical functions need usize->f64

use std::fmt;
use std::time::Instant;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::Module;
use crate::probe;
use crate::tensor::Tensor;

pub mod suites;

// ============================================================================
// Candidate configuration
// ============================================================================

/// Input element precision for a benchmark candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floats
    F32,
    /// 16-bit floats (values round-trip through `half::f16`)
    F16,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "fp32"),
            Self::F16 => write!(f, "fp16"),
        }
    }
}

/// Builds a candidate instance for one (shape, dtype) cell
///
/// Returning `None` means "unavailable, skip this cell".
pub type Constructor = Box<dyn Fn(&[usize], DType) -> Option<Box<dyn Module>> + Send + Sync>;

/// Builds the input tensor for one (shape, dtype) cell
pub type InputGenerator = Box<dyn Fn(&[usize], DType) -> Result<Tensor> + Send + Sync>;

/// Hook run between timed iterations (state reset)
pub type ResetHook = Box<dyn Fn(&mut dyn Module, &Tensor) + Send + Sync>;

/// One benchmark candidate
pub struct BenchConfig {
    /// Row label, e.g. `"LayerNorm (FP32)"`
    pub label: String,
    /// Input precision for this candidate
    pub dtype: DType,
    constructor: Constructor,
    gen_inputs: Option<InputGenerator>,
    reset: Option<ResetHook>,
}

impl BenchConfig {
    /// Create a candidate from a constructor closure
    pub fn new(
        label: &str,
        dtype: DType,
        constructor: impl Fn(&[usize], DType) -> Option<Box<dyn Module>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.to_string(),
            dtype,
            constructor: Box::new(constructor),
            gen_inputs: None,
            reset: None,
        }
    }

    /// Candidate that only exists when `backend` resolves
    ///
    /// Wraps the constructor so the cell is skipped whenever the
    /// availability probe reports the backend missing.
    pub fn gated(
        label: &str,
        dtype: DType,
        backend: &str,
        constructor: impl Fn(&[usize], DType) -> Option<Box<dyn Module>> + Send + Sync + 'static,
    ) -> Self {
        let backend = backend.to_string();
        Self::new(label, dtype, move |shape, dtype| {
            if probe::is_available(&backend) {
                constructor(shape, dtype)
            } else {
                None
            }
        })
    }

    /// Use a custom input generator instead of the default one
    #[must_use]
    pub fn with_gen_inputs(
        mut self,
        gen_inputs: impl Fn(&[usize], DType) -> Result<Tensor> + Send + Sync + 'static,
    ) -> Self {
        self.gen_inputs = Some(Box::new(gen_inputs));
        self
    }

    /// Run a reset hook between timed iterations
    #[must_use]
    pub fn with_reset(
        mut self,
        reset: impl Fn(&mut dyn Module, &Tensor) + Send + Sync + 'static,
    ) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }
}

/// Iteration counts for a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchOptions {
    /// Untimed warmup iterations per cell
    pub warmup: usize,
    /// Timed iterations per cell
    pub iters: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            warmup: 5,
            iters: 20,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Latency statistics for one (shape, candidate) cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellStats {
    /// Candidate label
    pub label: String,
    /// Input shape
    pub shape: Vec<usize>,
    /// Input precision
    pub dtype: DType,
    /// Mean latency (ms)
    pub mean_ms: f64,
    /// Median latency (ms)
    pub p50_ms: f64,
    /// 95th percentile latency (ms)
    pub p95_ms: f64,
    /// Standard deviation (ms)
    pub std_dev_ms: f64,
    /// Whether the candidate was unavailable for this cell
    pub skipped: bool,
}

/// Full result of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    /// Run title
    pub title: String,
    /// Per-cell statistics, shape-major order
    pub cells: Vec<CellStats>,
}

impl BenchReport {
    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(
            f,
            "{:<36} {:>20} {:>10} {:>10} {:>10}",
            "Candidate", "Shape", "Mean(ms)", "P50(ms)", "P95(ms)"
        )?;
        for cell in &self.cells {
            let shape = format!("{:?}", cell.shape);
            if cell.skipped {
                writeln!(f, "{:<36} {shape:>20} {:>10} {:>10} {:>10}", cell.label, "-", "-", "-")?;
            } else {
                writeln!(
                    f,
                    "{:<36} {shape:>20} {:>10.3} {:>10.3} {:>10.3}",
                    cell.label, cell.mean_ms, cell.p50_ms, cell.p95_ms
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Compute percentile of a dataset
fn percentile(data: &[f64], p: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let idx = ((sorted.len() as f64 * p / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[idx]
}

/// Compute standard deviation
fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

// ============================================================================
// Harness
// ============================================================================

/// Default deterministic input for a cell
///
/// F16 inputs are generated by rounding each value through `half::f16`,
/// modeling the precision a reduced-precision pipeline feeds the kernel.
///
/// # Errors
///
/// Returns error if the shape is invalid.
pub fn default_inputs(shape: &[usize], dtype: DType) -> Result<Tensor> {
    let size: usize = shape.iter().product();
    let data: Vec<f32> = (0..size)
        .map(|i| {
            let x = ((i as f32) * 0.19).sin() * 0.5;
            match dtype {
                DType::F32 => x,
                DType::F16 => f16::from_f32(x).to_f32(),
            }
        })
        .collect();
    Tensor::from_vec(shape.to_vec(), data)
}

/// Time every candidate over every shape
///
/// # Errors
///
/// Returns an error if input generation or a forward pass fails; skipped
/// cells (constructor returned `None`) are not errors.
pub fn bench(shapes: &[Vec<usize>], configs: &[BenchConfig], title: &str) -> Result<BenchReport> {
    bench_with_options(shapes, configs, title, &BenchOptions::default())
}

/// [`bench`] with explicit warmup/iteration counts
///
/// # Errors
///
/// Returns an error if input generation or a forward pass fails.
pub fn bench_with_options(
    shapes: &[Vec<usize>],
    configs: &[BenchConfig],
    title: &str,
    options: &BenchOptions,
) -> Result<BenchReport> {
    let mut cells = Vec::with_capacity(shapes.len() * configs.len());

    for shape in shapes {
        for config in configs {
            let Some(mut module) = (config.constructor)(shape, config.dtype) else {
                cells.push(CellStats {
                    label: config.label.clone(),
                    shape: shape.clone(),
                    dtype: config.dtype,
                    mean_ms: 0.0,
                    p50_ms: 0.0,
                    p95_ms: 0.0,
                    std_dev_ms: 0.0,
                    skipped: true,
                });
                continue;
            };

            let input = match &config.gen_inputs {
                Some(gen_inputs) => gen_inputs(shape, config.dtype)?,
                None => default_inputs(shape, config.dtype)?,
            };

            for _ in 0..options.warmup {
                module.forward(&input)?;
            }

            let mut samples = Vec::with_capacity(options.iters);
            for _ in 0..options.iters {
                if let Some(reset) = &config.reset {
                    reset(module.as_mut(), &input);
                }
                let start = Instant::now();
                module.forward(&input)?;
                samples.push(start.elapsed().as_secs_f64() * 1000.0);
            }

            cells.push(CellStats {
                label: config.label.clone(),
                shape: shape.clone(),
                dtype: config.dtype,
                mean_ms: samples.iter().sum::<f64>() / samples.len() as f64,
                p50_ms: percentile(&samples, 50.0),
                p95_ms: percentile(&samples, 95.0),
                std_dev_ms: std_dev(&samples),
                skipped: false,
            });
        }
    }

    Ok(BenchReport {
        title: title.to_string(),
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{FusedLayerNorm, LayerNorm};

    fn norm_candidate(label: &str, fused: bool) -> BenchConfig {
        BenchConfig::new(label, DType::F32, move |shape, _| {
            let d_model = *shape.last()?;
            if fused {
                FusedLayerNorm::new(d_model, 1e-5)
                    .ok()
                    .map(|m| Box::new(m) as Box<dyn Module>)
            } else {
                LayerNorm::new(d_model, 1e-5)
                    .ok()
                    .map(|m| Box::new(m) as Box<dyn Module>)
            }
        })
    }

    #[test]
    fn test_bench_produces_cell_per_shape_and_candidate() {
        let shapes = vec![vec![4, 16], vec![8, 16]];
        let configs = vec![
            norm_candidate("Reference (FP32)", false),
            norm_candidate("Fused (FP32)", true),
        ];
        let options = BenchOptions {
            warmup: 1,
            iters: 3,
        };

        let report = bench_with_options(&shapes, &configs, "LayerNorm", &options).unwrap();
        assert_eq!(report.cells.len(), 4);
        assert!(report.cells.iter().all(|c| !c.skipped));
        assert!(report.cells.iter().all(|c| c.mean_ms >= 0.0));
    }

    #[test]
    fn test_unavailable_constructor_is_skipped() {
        let shapes = vec![vec![4, 16]];
        let configs = vec![BenchConfig::new("Missing backend", DType::F32, |_, _| None)];
        let report = bench(&shapes, &configs, "Skips").unwrap();
        assert_eq!(report.cells.len(), 1);
        assert!(report.cells[0].skipped);
    }

    #[test]
    fn test_gated_candidate_skips_missing_backend() {
        let shapes = vec![vec![4, 16]];
        let configs = vec![BenchConfig::gated(
            "Fused (imaginary accelerator)",
            DType::F32,
            "imaginary_accelerator_lib",
            |shape, _| {
                FusedLayerNorm::new(*shape.last()?, 1e-5)
                    .ok()
                    .map(|m| Box::new(m) as Box<dyn Module>)
            },
        )];
        let report = bench(&shapes, &configs, "Gated").unwrap();
        assert!(report.cells[0].skipped);
    }

    #[test]
    fn test_f16_inputs_are_degraded() {
        let full = default_inputs(&[4], DType::F32).unwrap();
        let half_prec = default_inputs(&[4], DType::F16).unwrap();
        // Same generator, but the f16 row went through a precision round-trip.
        for (a, b) in full.data().iter().zip(half_prec.data()) {
            assert!((a - b).abs() < 1e-2);
        }
        assert_ne!(full.data(), half_prec.data());
    }

    #[test]
    fn test_report_display_includes_labels() {
        let shapes = vec![vec![2, 16]];
        let configs = vec![norm_candidate("Reference (FP32)", false)];
        let options = BenchOptions {
            warmup: 0,
            iters: 2,
        };
        let report = bench_with_options(&shapes, &configs, "Title line", &options).unwrap();
        let text = report.to_string();
        assert!(text.contains("Title line"));
        assert!(text.contains("Reference (FP32)"));
    }

    #[test]
    fn test_percentile_and_std_dev() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&data, 50.0), 3.0);
        assert_eq!(percentile(&data, 100.0), 5.0);
        assert!((std_dev(&data) - 1.581).abs() < 1e-3);
    }
}
