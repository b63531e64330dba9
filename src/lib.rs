//! # Inyectar
//!
//! Policy-driven module injection and kernel benchmarking for transformer
//! models.
//!
//! Inyectar (Spanish: "to inject") swaps reference model components (layer
//! normalization, softmax, attention) for fused kernel implementations with
//! equivalent semantics, directly inside a live model graph. A stateless
//! [`inject::InjectPolicy`] per target module type knows how to read the
//! original's configuration, build the replacement, and copy parameters
//! across, including the numeric rescaling that compensates for a fused
//! kernel's internal conventions.
//!
//! ## Example
//!
//! ```rust
//! use inyectar::graph::{Block, ModelGraph};
//! use inyectar::inject::policy::{FlashAttentionPolicy, FusedLayerNormPolicy};
//! use inyectar::inject::Injector;
//! use inyectar::modules::{LayerNorm, SelfAttention};
//!
//! // A small model: root -> { attn, norm }
//! let mut graph = ModelGraph::new(Box::new(Block));
//! let root = graph.root();
//! graph.add_child(root, "attn", Box::new(SelfAttention::new(64, 4, true).unwrap())).unwrap();
//! graph.add_child(root, "norm", Box::new(LayerNorm::new(64, 1e-5).unwrap())).unwrap();
//!
//! // Swap every matched module for its fused equivalent.
//! let injector = Injector::new()
//!     .with_policy(FlashAttentionPolicy)
//!     .with_policy(FusedLayerNormPolicy);
//! let report = injector.inject(&mut graph).unwrap();
//! assert_eq!(report.replaced.len(), 2);
//! ```
//!
//! ## Components
//!
//! - [`probe`]: availability checks for optional acceleration backends
//! - [`graph`]: the module trait and arena-owned model graph
//! - [`modules`]: reference and fused implementations of each component
//! - [`inject`]: the policy contract, concrete policies, and the injector
//! - [`bench`]: the shape/dtype timing harness and preset suites
//!
//! Injection runs once at model-load time, single-threaded; callers
//! serialize it against any other mutation of the graph. Callers that need
//! a specific accelerated backend check [`probe::is_available`] first and
//! keep the reference modules when it reports false.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 for scale factors is safe here

pub mod bench;
pub mod error;
pub mod graph;
pub mod inject;
pub mod modules;
pub mod probe;
mod tensor;

pub use error::{InyectarError, Result};
pub use graph::{ModelGraph, Module, ModuleKind, NodeId};
pub use inject::{InitConfig, InjectPolicy, InjectReport, Injector, ModelConfig};
pub use tensor::{Parameter, Tensor};
