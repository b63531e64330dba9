//! Concrete injection policies
//!
//! One policy per target module type. Each encodes that type's config
//! field names (and the mapping from the static [`ModelConfig`](crate::inject::ModelConfig)
//! vocabulary) plus its parameter-copy rules, including any numeric rescale
//! the fused kernel's internal convention requires.

mod attention;
pub use attention::FlashAttentionPolicy;
mod norm;
pub use norm::FusedLayerNormPolicy;
mod softmax;
pub use softmax::FusedSoftmaxPolicy;
