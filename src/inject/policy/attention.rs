//! Attention injection policy

use crate::error::Result;
use crate::graph::{Module, ModuleKind};
use crate::inject::{downcast, downcast_mut, InitConfig, InjectPolicy, ModelConfig};
use crate::modules::{AttentionKernel, FlashSelfAttention, SelfAttention};

/// Replaces [`SelfAttention`] with [`FlashSelfAttention`]
///
/// Config keys: `d_model`, `num_heads`, `head_dim`, `causal`, `kernel`.
/// The `kernel` name is not present on the legacy module; it defaults to
/// `"flash"` and is typically supplied through the injector's overrides.
pub struct FlashAttentionPolicy;

impl FlashAttentionPolicy {
    const TARGETS: &'static [ModuleKind] = &[SelfAttention::KIND];
}

impl InjectPolicy for FlashAttentionPolicy {
    fn name(&self) -> &'static str {
        "flash_attention"
    }

    fn target_modules(&self) -> &'static [ModuleKind] {
        Self::TARGETS
    }

    fn gen_init_config_from_object(
        &self,
        orig: &dyn Module,
        overrides: &InitConfig,
    ) -> Result<InitConfig> {
        let attn = downcast::<SelfAttention>(orig, "d_model")?;
        let mut config = InitConfig::new()
            .with("d_model", attn.d_model())
            .with("num_heads", attn.num_heads())
            .with("head_dim", attn.head_dim())
            .with("causal", attn.causal())
            .with("kernel", AttentionKernel::Flash.as_str());
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
            .with("num_heads", config.num_heads)
            .with("head_dim", config.head_dim()?)
            .with("causal", config.causal)
            .with("kernel", AttentionKernel::Flash.as_str());
        out.apply(overrides);
        Ok(out)
    }

    fn inject_module(&self, config: &InitConfig) -> Result<Box<dyn Module>> {
        let kernel = AttentionKernel::parse(config.get_str("kernel")?)?;
        Ok(Box::new(FlashSelfAttention::new(
            config.get_usize("d_model")?,
            config.get_usize("num_heads")?,
            config.get_bool("causal")?,
            kernel,
        )?))
    }

    fn assign_params(&self, replacement: &mut dyn Module, orig: &dyn Module) -> Result<()> {
        let orig = downcast::<SelfAttention>(orig, "q")?;
        let repl = downcast_mut::<FlashSelfAttention>(replacement, "q")?;

        // The fused kernel divides scores by sqrt(head_dim); the reference
        // folds that scale into its trained query projection, so the copied
        // q weight must be pre-multiplied to cancel it. Exact as long as the
        // query projection carries a zero bias (this family's convention);
        // the bias itself is copied untouched.
        #[allow(clippy::cast_precision_loss)]
        let scale = (orig.head_dim() as f32).sqrt();

        repl.q_mut()
            .assign(orig.q().weight().scaled(scale), orig.q().bias().clone(), "q")?;
        repl.k_mut()
            .assign(orig.k().weight().clone(), orig.k().bias().clone(), "k")?;
        repl.v_mut()
            .assign(orig.v().weight().clone(), orig.v().bias().clone(), "v")?;
        repl.o_mut()
            .assign(orig.o().weight().clone(), orig.o().bias().clone(), "o")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::LayerNorm;

    #[test]
    fn test_config_from_object() {
        let attn = SelfAttention::new(768, 12, true).unwrap();
        let policy = FlashAttentionPolicy;
        let config = policy
            .gen_init_config_from_object(&attn, &InitConfig::new())
            .unwrap();

        assert_eq!(config.get_usize("d_model").unwrap(), 768);
        assert_eq!(config.get_usize("num_heads").unwrap(), 12);
        assert_eq!(config.get_usize("head_dim").unwrap(), 64);
        assert!(config.get_bool("causal").unwrap());
        assert_eq!(config.get_str("kernel").unwrap(), "flash");
    }

    #[test]
    fn test_config_key_sets_match() {
        let policy = FlashAttentionPolicy;
        let attn = SelfAttention::new(64, 4, false).unwrap();
        let model_config = ModelConfig {
            hidden_dim: 64,
            num_heads: 4,
            num_layers: 1,
            eps: 1e-5,
            causal: false,
        };

        let from_object = policy
            .gen_init_config_from_object(&attn, &InitConfig::new())
            .unwrap();
        let from_config = policy
            .gen_init_config_from_config(&model_config, &InitConfig::new())
            .unwrap();

        let object_keys: Vec<&str> = from_object.keys().collect();
        let config_keys: Vec<&str> = from_config.keys().collect();
        assert_eq!(object_keys, config_keys);
    }

    #[test]
    fn test_override_selects_kernel() {
        let policy = FlashAttentionPolicy;
        let attn = SelfAttention::new(64, 4, false).unwrap();
        let overrides = InitConfig::new().with("kernel", "tiled");

        let config = policy.gen_init_config_from_object(&attn, &overrides).unwrap();
        let module = policy.inject_module(&config).unwrap();
        let fused = module.as_any().downcast_ref::<FlashSelfAttention>().unwrap();
        assert_eq!(fused.kernel(), AttentionKernel::Tiled);
    }

    #[test]
    fn test_wrong_module_type_is_config_extraction() {
        let policy = FlashAttentionPolicy;
        let norm = LayerNorm::new(64, 1e-5).unwrap();
        let result = policy.gen_init_config_from_object(&norm, &InitConfig::new());
        assert!(matches!(
            result,
            Err(crate::error::InyectarError::ConfigExtraction { .. })
        ));
    }

    #[test]
    fn test_assign_params_rescales_q_only() {
        let policy = FlashAttentionPolicy;
        let orig = SelfAttention::new(16, 4, false).unwrap();

        let config = policy
            .gen_init_config_from_object(&orig, &InitConfig::new())
            .unwrap();
        let mut replacement = policy.inject_module(&config).unwrap();
        policy.assign_params(replacement.as_mut(), &orig).unwrap();

        let fused = replacement
            .as_any()
            .downcast_ref::<FlashSelfAttention>()
            .unwrap();

        let scale = (orig.head_dim() as f32).sqrt();
        for (q_orig, q_fused) in orig
            .q()
            .weight()
            .data()
            .iter()
            .zip(fused.q().weight().data())
        {
            assert!((q_orig * scale - q_fused).abs() < 1e-6);
        }
        assert_eq!(fused.k().weight().data(), orig.k().weight().data());
        assert_eq!(fused.v().weight().data(), orig.v().weight().data());
        assert_eq!(fused.o().weight().data(), orig.o().weight().data());
    }
}
