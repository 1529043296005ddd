use crate::env;

/// Knobs of the normalization fusion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionConfig {
    /// Master switch for the pass.
    pub enabled: bool,
    /// Allow single-axis occurrences to become `LayerNormalization`.
    pub enable_layer_norm: bool,
    /// Allow multi-axis occurrences to become `InstanceNormalization`.
    pub enable_instance_norm: bool,
    /// Run [`DataflowGraph::verify`](crate::graph::DataflowGraph::verify) after every rewrite.
    pub verify_rewrites: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_layer_norm: true,
            enable_instance_norm: true,
            verify_rewrites: cfg!(debug_assertions),
        }
    }
}

impl FusionConfig {
    /// Defaults overridden by `FUSEGRAPH_DISABLE_NORM_FUSION` and
    /// `FUSEGRAPH_VERIFY_REWRITES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env::norm_fusion_disabled() {
            config.enabled = false;
        }
        if env::verify_rewrites_forced() {
            config.verify_rewrites = true;
        }
        config
    }
}
