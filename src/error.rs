//! Error types for injection and benchmarking
//!
//! One crate-wide error enum covering module construction, configuration
//! extraction, parameter transfer, and graph manipulation. Policies never
//! catch their own errors; the injector adds node-path context on the way
//! out and the first failure aborts the whole traversal.

use thiserror::Error;

use crate::graph::NodeId;

/// Result type alias for inyectar operations
pub type Result<T> = std::result::Result<T, InyectarError>;

/// Errors that can occur during injection or benchmarking
#[derive(Debug, Error)]
pub enum InyectarError {
    /// Tensor or module shape validation failed
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Why the shape was rejected
        reason: String,
    },

    /// Data size doesn't match the requested shape
    #[error("data size {data_size} doesn't match shape {shape:?} (expected {expected})")]
    DataShapeMismatch {
        /// Actual number of elements provided
        data_size: usize,
        /// Requested shape
        shape: Vec<usize>,
        /// Element count the shape implies
        expected: usize,
    },

    /// A module or config object lacks a field the policy expects
    ///
    /// Indicates a type/version mismatch between policy and target. Always
    /// fatal to the injection attempt, never silently recovered.
    #[error("module '{module}' has no attribute '{field}'")]
    ConfigExtraction {
        /// Module or config type the policy was reading
        module: String,
        /// Missing field name
        field: String,
    },

    /// Copied parameter shapes are incompatible between original and replacement
    #[error("parameter '{name}' shape mismatch: expected {expected:?}, got {actual:?}")]
    ParamShapeMismatch {
        /// Parameter name
        name: String,
        /// Shape the replacement declares
        expected: Vec<usize>,
        /// Shape found on the original
        actual: Vec<usize>,
    },

    /// Two registered policies claim the same target module type
    #[error("policies '{first}' and '{second}' both target module type {kind}")]
    PolicyConflict {
        /// Policy registered first
        first: String,
        /// Policy registered second
        second: String,
        /// The contested module kind (namespace.name)
        kind: String,
    },

    /// A requested accelerated backend cannot be resolved
    ///
    /// The benchmark suites treat this as a skip; it is only surfaced when
    /// a caller demands a specific backend.
    #[error("backend '{0}' is not available")]
    UnavailableBackend(String),

    /// An InitConfig value has the wrong type for the requested key
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A graph handle doesn't point at a live node
    #[error("node {0:?} is not in the graph")]
    NodeNotFound(NodeId),

    /// A policy operation failed while injecting a specific node
    ///
    /// Wraps the policy error with the node path and failing operation so
    /// the top-level caller can diagnose which module broke the traversal.
    #[error("injection failed at '{path}' (policy '{policy}', {operation}): {source}")]
    Injection {
        /// Dotted path of the failing node, e.g. `root.encoder.attn`
        path: String,
        /// Name of the policy that was applied
        policy: &'static str,
        /// The policy operation that failed
        operation: &'static str,
        /// The underlying policy error
        #[source]
        source: Box<InyectarError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config_extraction() {
        let err = InyectarError::ConfigExtraction {
            module: "SelfAttention".to_string(),
            field: "d_model".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "module 'SelfAttention' has no attribute 'd_model'"
        );
    }

    #[test]
    fn test_error_display_param_shape_mismatch() {
        let err = InyectarError::ParamShapeMismatch {
            name: "q.weight".to_string(),
            expected: vec![768, 768],
            actual: vec![768, 512],
        };
        let msg = err.to_string();
        assert!(msg.contains("q.weight"));
        assert!(msg.contains("[768, 768]"));
        assert!(msg.contains("[768, 512]"));
    }

    #[test]
    fn test_injection_error_preserves_source() {
        use std::error::Error as _;

        let inner = InyectarError::ConfigExtraction {
            module: "LayerNorm".to_string(),
            field: "eps".to_string(),
        };
        let err = InyectarError::Injection {
            path: "root.norm".to_string(),
            policy: "fused_layer_norm",
            operation: "gen_init_config_from_object",
            source: Box::new(inner),
        };
        assert!(err.to_string().contains("root.norm"));
        assert!(err.source().is_some());
    }
}
