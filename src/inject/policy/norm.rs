//! Layer norm injection policy

use crate::error::Result;
use crate::graph::{Module, ModuleKind};
use crate::inject::{downcast, downcast_mut, InitConfig, InjectPolicy, ModelConfig};
use crate::modules::{FusedLayerNorm, LayerNorm};

/// Replaces [`LayerNorm`] with [`FusedLayerNorm`]
///
/// Config keys: `d_model`, `eps`. Parameters are copied verbatim; the fused
/// kernel computes the same affine normalization, so no rescale is needed.
pub struct FusedLayerNormPolicy;

impl FusedLayerNormPolicy {
    const TARGETS: &'static [ModuleKind] = &[LayerNorm::KIND];
}

impl InjectPolicy for FusedLayerNormPolicy {
    fn name(&self) -> &'static str {
        "fused_layer_norm"
    }

    fn target_modules(&self) -> &'static [ModuleKind] {
        Self::TARGETS
    }

    fn gen_init_config_from_object(
        &self,
        orig: &dyn Module,
        overrides: &InitConfig,
    ) -> Result<InitConfig> {
        let norm = downcast::<LayerNorm>(orig, "d_model")?;
        let mut config = InitConfig::new()
            .with("d_model", norm.d_model())
            .with("eps", norm.eps());
        config.apply(overrides);
        Ok(config)
    }

    fn gen_init_config_from_config(
        &self,
        config: &ModelConfig,
        overrides: &InitConfig,
    ) -> Result<InitConfig> {
        let mut out = InitConfig::new()
            .with("d_model", config.hidden_dim)
            .with("eps", config.eps);
        out.apply(overrides);
        Ok(out)
    }

    fn inject_module(&self, config: &InitConfig) -> Result<Box<dyn Module>> {
        Ok(Box::new(FusedLayerNorm::new(
            config.get_usize("d_model")?,
            config.get_f32("eps")?,
        )?))
    }

    fn assign_params(&self, replacement: &mut dyn Module, orig: &dyn Module) -> Result<()> {
        let orig = downcast::<LayerNorm>(orig, "weight")?;
        let repl = downcast_mut::<FusedLayerNorm>(replacement, "weight")?;
        repl.assign(orig.weight().clone(), orig.bias().clone())
    }
}
