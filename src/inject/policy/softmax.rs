//! Scale-mask-softmax injection policy

use crate::error::Result;
use crate::graph::{Module, ModuleKind};
use crate::inject::{downcast, downcast_mut, InitConfig, InjectPolicy, ModelConfig};
use crate::modules::{FusedScaleMaskSoftmax, ScaleMaskSoftmax};

/// Replaces [`ScaleMaskSoftmax`] with [`FusedScaleMaskSoftmax`]
///
/// Config keys: `scale`, `causal`. Neither module carries learnable
/// parameters; `assign_params` only verifies both sides are the expected
/// types.
pub struct FusedSoftmaxPolicy;

impl FusedSoftmaxPolicy {
    const TARGETS: &'static [ModuleKind] = &[ScaleMaskSoftmax::KIND];
}

impl InjectPolicy for FusedSoftmaxPolicy {
    fn name(&self) -> &'static str {
        "fused_softmax"
    }

    fn target_modules(&self) -> &'static [ModuleKind] {
        Self::TARGETS
    }

    fn gen_init_config_from_object(
        &self,
        orig: &dyn Module,
        overrides: &InitConfig,
    ) -> Result<InitConfig> {
        let softmax = downcast::<ScaleMaskSoftmax>(orig, "scale")?;
        let mut config = InitConfig::new()
            .with("scale", softmax.scale())
            .with("causal", softmax.causal());
        config.apply(overrides);
        Ok(config)
    }

    fn gen_init_config_from_config(
        &self,
        config: &ModelConfig,
        overrides: &InitConfig,
    ) -> Result<InitConfig> {
        // The family's score scale is 1/sqrt(head_dim).
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (config.head_dim()? as f32).sqrt();
        let mut out = InitConfig::new()
            .with("scale", scale)
            .with("causal", config.causal);
        out.apply(overrides);
        Ok(out)
    }

    fn inject_module(&self, config: &InitConfig) -> Result<Box<dyn Module>> {
        Ok(Box::new(FusedScaleMaskSoftmax::new(
            config.get_f32("scale")?,
            config.get_bool("causal")?,
        )))
    }

    fn assign_params(&self, replacement: &mut dyn Module, orig: &dyn Module) -> Result<()> {
        downcast::<ScaleMaskSoftmax>(orig, "scale")?;
        downcast_mut::<FusedScaleMaskSoftmax>(replacement, "scale")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_sets_match() {
        let policy = FusedSoftmaxPolicy;
        let softmax = ScaleMaskSoftmax::new(0.125, true);
        let model_config = ModelConfig {
            hidden_dim: 512,
            num_heads: 8,
            num_layers: 1,
            eps: 1e-5,
            causal: true,
        };

        let from_object = policy
            .gen_init_config_from_object(&softmax, &InitConfig::new())
            .unwrap();
        let from_config = policy
            .gen_init_config_from_config(&model_config, &InitConfig::new())
            .unwrap();

        let object_keys: Vec<&str> = from_object.keys().collect();
        let config_keys: Vec<&str> = from_config.keys().collect();
        assert_eq!(object_keys, config_keys);
    }

    #[test]
    fn test_scale_round_trips() {
        let policy = FusedSoftmaxPolicy;
        let softmax = ScaleMaskSoftmax::new(0.125, true);

        let config = policy
            .gen_init_config_from_object(&softmax, &InitConfig::new())
            .unwrap();
        let module = policy.inject_module(&config).unwrap();
        let fused = module
            .as_any()
            .downcast_ref::<FusedScaleMaskSoftmax>()
            .unwrap();
        assert_eq!(fused.scale(), 0.125);
        assert!(fused.causal());
    }

    #[test]
    fn test_from_config_derives_head_scale() {
        let policy = FusedSoftmaxPolicy;
        let model_config = ModelConfig {
            hidden_dim: 512,
            num_heads: 8,
            num_layers: 1,
            eps: 1e-5,
            causal: false,
        };
        let config = policy
            .gen_init_config_from_config(&model_config, &InitConfig::new())
            .unwrap();
        // head_dim = 64, scale = 1/8
        assert!((config.get_f32("scale").unwrap() - 0.125).abs() < 1e-7);
    }
}
