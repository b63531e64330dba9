//! Policy-driven module injection
//!
//! The injector walks a [`ModelGraph`], finds nodes whose type is claimed by
//! a registered [`InjectPolicy`], and swaps each one for a policy-built
//! replacement with equivalent semantics and a faster kernel:
//!
//! 1. the policy extracts an [`InitConfig`] from the original module (or
//!    from a static [`ModelConfig`] when building a fresh model),
//! 2. the replacement is instantiated from that config,
//! 3. learned parameters are copied across, with any numeric rescale the
//!    replacement kernel's internal convention requires,
//! 4. the parent slot's reference is swapped in a single store.
//!
//! The first failing node aborts the whole traversal; no rollback is
//! attempted. Callers that need all-or-nothing semantics snapshot the graph
//! themselves.
//!
//! ## Example
//!
//! ```
//! use inyectar::graph::{Block, ModelGraph, Module};
//! use inyectar::inject::policy::FusedLayerNormPolicy;
//! use inyectar::inject::Injector;
//! use inyectar::modules::{FusedLayerNorm, LayerNorm};
//!
//! let mut graph = ModelGraph::new(Box::new(Block));
//! let root = graph.root();
//! graph.add_child(root, "norm", Box::new(LayerNorm::new(64, 1e-5).unwrap())).unwrap();
//!
//! let injector = Injector::new().with_policy(FusedLayerNormPolicy);
//! let report = injector.inject(&mut graph).unwrap();
//!
//! assert_eq!(report.replaced.len(), 1);
//! let node = graph.lookup("norm").unwrap();
//! assert_eq!(graph.module(node).unwrap().kind(), FusedLayerNorm::KIND);
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{InyectarError, Result};
use crate::graph::{ModelGraph, Module, ModuleKind};

pub mod policy;

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Dimension or count
    Usize(usize),
    /// Floating-point hyperparameter
    Float(f64),
    /// Flag
    Bool(bool),
    /// Name, e.g. a kernel selection string
    Str(String),
}

impl From<usize> for ConfigValue {
    fn from(v: usize) -> Self {
        Self::Usize(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for ConfigValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Constructor arguments for a replacement module
///
/// An ordered name→value map, fully sufficient to construct a replacement
/// with architecture-equivalent shape to the original. Ephemeral: computed
/// and consumed within a single injection call. Also used as the policy
/// override set (the keyword-argument role): entries in an override config
/// replace or supplement extracted fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitConfig(BTreeMap<String, ConfigValue>);

impl InitConfig {
    /// Create an empty config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert a value
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Overlay every entry of `overrides` onto this config
    pub fn apply(&mut self, overrides: &InitConfig) {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Raw value lookup
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the config has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&ConfigValue> {
        self.0.get(key).ok_or_else(|| InyectarError::ConfigExtraction {
            module: "InitConfig".to_string(),
            field: key.to_string(),
        })
    }

    /// Typed dimension lookup
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or holds a non-integer value.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        match self.require(key)? {
            ConfigValue::Usize(v) => Ok(*v),
            other => Err(InyectarError::InvalidConfiguration(format!(
                "key '{key}' expected integer, got {other:?}"
            ))),
        }
    }

    /// Typed float lookup
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or holds a non-float value.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        match self.require(key)? {
            #[allow(clippy::cast_possible_truncation)]
            ConfigValue::Float(v) => Ok(*v as f32),
            other => Err(InyectarError::InvalidConfiguration(format!(
                "key '{key}' expected float, got {other:?}"
            ))),
        }
    }

    /// Typed flag lookup
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or holds a non-boolean value.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            ConfigValue::Bool(v) => Ok(*v),
            other => Err(InyectarError::InvalidConfiguration(format!(
                "key '{key}' expected bool, got {other:?}"
            ))),
        }
    }

    /// Typed name lookup
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or holds a non-string value.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            ConfigValue::Str(v) => Ok(v.as_str()),
            other => Err(InyectarError::InvalidConfiguration(format!(
                "key '{key}' expected string, got {other:?}"
            ))),
        }
    }
}

/// Static model configuration
///
/// The source object for [`InjectPolicy::gen_init_config_from_config`]:
/// describes a model family in its own vocabulary (`hidden_dim` where the
/// live modules say `d_model`), used when building a fresh model with fused
/// modules instead of injecting into an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hidden (model) dimension
    pub hidden_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Number of transformer blocks
    pub num_layers: usize,
    /// Layer norm epsilon
    pub eps: f32,
    /// Whether attention is causal
    pub causal: bool,
}

impl ModelConfig {
    /// Dimension per attention head
    ///
    /// # Errors
    ///
    /// Returns error if `num_heads` is zero or doesn't divide `hidden_dim`.
    pub fn head_dim(&self) -> Result<usize> {
        if self.num_heads == 0 || !self.hidden_dim.is_multiple_of(self.num_heads) {
            return Err(InyectarError::InvalidConfiguration(format!(
                "hidden_dim {} not divisible by num_heads {}",
                self.hidden_dim, self.num_heads
            )));
        }
        Ok(self.hidden_dim / self.num_heads)
    }
}

/// Strategy for replacing one module type with an accelerated equivalent
///
/// Policies are stateless: every operation is a pure function of its inputs
/// (plus the in-place mutation of `replacement` in `assign_params`). A
/// policy claims module types via [`target_modules`](Self::target_modules);
/// no two policies registered with one [`Injector`] may claim the same type.
pub trait InjectPolicy: Send + Sync {
    /// Short policy name used in reports and error context
    fn name(&self) -> &'static str;

    /// Module types this policy knows how to replace
    ///
    /// Queryable without a live model instance; resolved into the injector's
    /// lookup table before any traversal.
    fn target_modules(&self) -> &'static [ModuleKind];

    /// Read constructor arguments off a live original module
    ///
    /// `overrides` entries replace or supplement extracted fields (e.g. a
    /// kernel-selection name the legacy module doesn't carry).
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::ConfigExtraction`] if `orig` is not an
    /// instance of the expected target type.
    fn gen_init_config_from_object(
        &self,
        orig: &dyn Module,
        overrides: &InitConfig,
    ) -> Result<InitConfig>;

    /// Derive constructor arguments from a static model configuration
    ///
    /// Must produce the same key set as
    /// [`gen_init_config_from_object`](Self::gen_init_config_from_object).
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is inconsistent (e.g. head count
    /// doesn't divide the hidden dimension).
    fn gen_init_config_from_config(
        &self,
        config: &ModelConfig,
        overrides: &InitConfig,
    ) -> Result<InitConfig>;

    /// Instantiate the replacement module from an [`InitConfig`]
    ///
    /// # Errors
    ///
    /// Returns error if required keys are missing or invalid.
    fn inject_module(&self, config: &InitConfig) -> Result<Box<dyn Module>>;

    /// Copy every learnable parameter from `orig` into `replacement`
    ///
    /// Preserves each source parameter's `requires_grad` flag. Where the
    /// replacement kernel computes a mathematically different (but
    /// output-equivalent after correction) formulation, this applies the
    /// compensating transform to the copied weights. Mutates `replacement`
    /// only.
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::ParamShapeMismatch`] on incompatible shapes.
    fn assign_params(&self, replacement: &mut dyn Module, orig: &dyn Module) -> Result<()>;
}

/// Typed view of a module the policy expects to be of type `T`
///
/// Downcast failure means the node is not an instance of the claimed target
/// type; `field` names the first attribute the policy would have read.
pub(crate) fn downcast<'a, T: Any>(module: &'a dyn Module, field: &str) -> Result<&'a T> {
    module
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| InyectarError::ConfigExtraction {
            module: module.kind().to_string(),
            field: field.to_string(),
        })
}

/// Mutable typed view, for the replacement side of `assign_params`
pub(crate) fn downcast_mut<'a, T: Any>(
    module: &'a mut dyn Module,
    field: &str,
) -> Result<&'a mut T> {
    let kind = module.kind();
    module
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| InyectarError::ConfigExtraction {
            module: kind.to_string(),
            field: field.to_string(),
        })
}

/// One module swap performed by the injector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacedModule {
    /// Dotted path of the swapped node
    pub path: String,
    /// Policy that performed the swap
    pub policy: String,
    /// Original module kind
    pub from: String,
    /// Replacement module kind
    pub into: String,
}

/// Result of an injection pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectReport {
    /// Swaps in traversal order
    pub replaced: Vec<ReplacedModule>,
    /// Total nodes visited
    pub visited: usize,
}

/// Walks a model graph and substitutes matched modules per policy
///
/// Unmatched node types are left untouched (not an error). Construction and
/// parameter assignment are independent per matched node; the traversal
/// runs once, synchronously, at model-load time.
#[derive(Default)]
pub struct Injector {
    policies: Vec<Box<dyn InjectPolicy>>,
    overrides: InitConfig,
}

impl Injector {
    /// Create an injector with no policies
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style policy registration
    #[must_use]
    pub fn with_policy(mut self, policy: impl InjectPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Builder-style override set, forwarded to every policy
    #[must_use]
    pub fn with_overrides(mut self, overrides: InitConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Register a policy
    pub fn register(&mut self, policy: Box<dyn InjectPolicy>) {
        self.policies.push(policy);
    }

    /// Registered policy count
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no policies are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Build the module-kind → policy lookup
    ///
    /// # Errors
    ///
    /// Returns [`InyectarError::PolicyConflict`] if two policies claim the
    /// same module kind. Checked before any traversal so a conflicting
    /// registration can never partially modify a graph.
    pub fn policy_table(&self) -> Result<HashMap<ModuleKind, &dyn InjectPolicy>> {
        let mut table: HashMap<ModuleKind, &dyn InjectPolicy> = HashMap::new();
        for policy in &self.policies {
            for kind in policy.target_modules() {
                if let Some(existing) = table.insert(*kind, policy.as_ref()) {
                    return Err(InyectarError::PolicyConflict {
                        first: existing.name().to_string(),
                        second: policy.name().to_string(),
                        kind: kind.to_string(),
                    });
                }
            }
        }
        Ok(table)
    }

    /// Inject every matched node in `graph`
    ///
    /// Depth-first traversal; for each node claimed by a policy: extract
    /// config, build the replacement, copy parameters, swap the slot. The
    /// replacement's own children (the slot's unchanged edges) are still
    /// descended; replacement kinds are not re-matched against the table
    /// unless a policy claims them, so leaf replacements terminate.
    ///
    /// # Errors
    ///
    /// Returns the first policy failure wrapped with node path, policy name,
    /// and failing operation. The graph keeps whatever swaps happened before
    /// the failure.
    pub fn inject(&self, graph: &mut ModelGraph) -> Result<InjectReport> {
        let table = self.policy_table()?;

        let mut report = InjectReport::default();
        let mut stack = vec![(graph.root(), "root".to_string())];

        while let Some((id, path)) = stack.pop() {
            report.visited += 1;

            let kind = graph.module(id)?.kind();
            if let Some(policy) = table.get(&kind).copied() {
                let replacement = {
                    let orig = graph.module(id)?;
                    let config = policy
                        .gen_init_config_from_object(orig, &self.overrides)
                        .map_err(|e| wrap(&path, policy, "gen_init_config_from_object", e))?;
                    let mut replacement = policy
                        .inject_module(&config)
                        .map_err(|e| wrap(&path, policy, "inject_module", e))?;
                    policy
                        .assign_params(replacement.as_mut(), orig)
                        .map_err(|e| wrap(&path, policy, "assign_params", e))?;
                    replacement
                };

                let into = replacement.kind();
                graph.replace(id, replacement)?;
                report.replaced.push(ReplacedModule {
                    path: path.clone(),
                    policy: policy.name().to_string(),
                    from: kind.to_string(),
                    into: into.to_string(),
                });
            }

            for (name, child) in graph.children(id)?.iter().rev() {
                stack.push((*child, format!("{path}.{name}")));
            }
        }

        Ok(report)
    }
}

fn wrap(
    path: &str,
    policy: &dyn InjectPolicy,
    operation: &'static str,
    source: InyectarError,
) -> InyectarError {
    InyectarError::Injection {
        path: path.to_string(),
        policy: policy.name(),
        operation,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_config_typed_accessors() {
        let config = InitConfig::new()
            .with("d_model", 768usize)
            .with("eps", 1e-5f32)
            .with("causal", true)
            .with("kernel", "flash");

        assert_eq!(config.get_usize("d_model").unwrap(), 768);
        assert!((config.get_f32("eps").unwrap() - 1e-5).abs() < 1e-10);
        assert!(config.get_bool("causal").unwrap());
        assert_eq!(config.get_str("kernel").unwrap(), "flash");
    }

    #[test]
    fn test_init_config_missing_key() {
        let config = InitConfig::new();
        assert!(matches!(
            config.get_usize("d_model"),
            Err(InyectarError::ConfigExtraction { .. })
        ));
    }

    #[test]
    fn test_init_config_wrong_type() {
        let config = InitConfig::new().with("d_model", 768usize);
        assert!(matches!(
            config.get_str("d_model"),
            Err(InyectarError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_init_config_apply_overrides() {
        let mut config = InitConfig::new().with("kernel", "flash").with("d_model", 64usize);
        let overrides = InitConfig::new().with("kernel", "tiled");
        config.apply(&overrides);
        assert_eq!(config.get_str("kernel").unwrap(), "tiled");
        assert_eq!(config.get_usize("d_model").unwrap(), 64);
    }

    #[test]
    fn test_model_config_head_dim() {
        let config = ModelConfig {
            hidden_dim: 768,
            num_heads: 12,
            num_layers: 2,
            eps: 1e-5,
            causal: false,
        };
        assert_eq!(config.head_dim().unwrap(), 64);

        let bad = ModelConfig { num_heads: 7, ..config };
        assert!(bad.head_dim().is_err());
    }

    #[test]
    fn test_init_config_serde_round_trip() {
        let config = InitConfig::new()
            .with("d_model", 64usize)
            .with("kernel", "flash")
            .with("causal", false);
        let json = serde_json::to_string(&config).unwrap();
        let back: InitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
