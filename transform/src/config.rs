//! Transform configuration.

use bon::bon;
use tessera_ir::LoopForm;

/// Knobs shared by the rewrites and the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Preferred loop form. `Affine` falls back to generic loops when a bound is not affine.
    pub loop_form: LoopForm,
    /// Rewrites the driver may apply before giving up on reaching a fixpoint.
    pub max_rewrites: usize,
    /// Allocate promoted buffers at their exact runtime size instead of the full tile.
    pub promote_dynamic: bool,
    /// Zero-fill full-tile promoted buffers before copying in.
    pub promote_zero_fill: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self { loop_form: LoopForm::Affine, max_rewrites: 1000, promote_dynamic: false, promote_zero_fill: false }
    }
}

#[bon]
impl TransformConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] loop_form: LoopForm,
        #[builder(default = 1000)] max_rewrites: usize,
        #[builder(default = false)] promote_dynamic: bool,
        #[builder(default = false)] promote_zero_fill: bool,
    ) -> Self {
        Self { loop_form, max_rewrites, promote_dynamic, promote_zero_fill }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_LOOP_FORM` - `affine` or `loops` (default: `affine`)
    /// * `TESSERA_MAX_REWRITES` - Driver fixpoint budget (default: 1000)
    /// * `TESSERA_PROMOTE_DYNAMIC` - Exact-size promoted buffers if set
    /// * `TESSERA_PROMOTE_ZERO_FILL` - Zero-fill promoted buffers if set
    pub fn from_env() -> Self {
        let loop_form = std::env::var("TESSERA_LOOP_FORM").ok().and_then(|s| s.parse().ok()).unwrap_or_default();
        let max_rewrites = std::env::var("TESSERA_MAX_REWRITES").ok().and_then(|s| s.parse().ok()).unwrap_or(1000);
        let promote_dynamic = std::env::var("TESSERA_PROMOTE_DYNAMIC").is_ok();
        let promote_zero_fill = std::env::var("TESSERA_PROMOTE_ZERO_FILL").is_ok();

        Self { loop_form, max_rewrites, promote_dynamic, promote_zero_fill }
    }
}
