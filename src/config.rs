use crate::error::{CutoutError, Result};

/// Smallest shrink factor applied to the colour layer before masking
pub const MIN_RGB_SCALE: f32 = 0.97;
/// Largest shrink factor (no shrink)
pub const MAX_RGB_SCALE: f32 = 1.0;

pub const DEFAULT_FEATHER_PX: f32 = 6.0;
pub const DEFAULT_DILATE_PX: f32 = 2.0;
pub const DEFAULT_EMA_ALPHA: f32 = 0.6;
pub const DEFAULT_RGB_SCALE: f32 = 0.985;

/// Quality hint forwarded to the mask provider
///
/// The pipeline never interprets this; providers map it to whatever
/// model variant or inference resolution they support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelSelection {
    /// Square input, best for a subject filling most of the frame
    #[default]
    General,
    /// Wide, lower resolution input; cheaper per request
    Landscape,
}

/// How the smoothed mask edge is grown and softened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EdgeMode {
    /// One Gaussian blur with sigma `dilate_px + feather_px`.
    ///
    /// Growth comes only from the blur spreading alpha outwards, so the
    /// visible edge sits roughly half way down the falloff.
    #[default]
    CombinedBlur,
    /// Max-filter the mask by `dilate_px`, then blur with sigma `feather_px`.
    ///
    /// The solid region grows by exactly `dilate_px` pixels (square
    /// structuring element) before the feather, so edges end up thicker
    /// than with the combined blur at the same settings.
    GrowThenBlur,
}

/// Immutable pipeline configuration, fixed at session construction
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    model_selection: ModelSelection,
    feather_px: f32,
    dilate_px: f32,
    ema_alpha: f32,
    rgb_scale: f32,
    mask_request_divider: u32,
    edge_mode: EdgeMode,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn model_selection(&self) -> ModelSelection {
        self.model_selection
    }

    /// Edge-softening radius in pixels, always >= 0
    pub fn feather_px(&self) -> f32 {
        self.feather_px
    }

    /// Edge-growth radius in pixels, always >= 0
    pub fn dilate_px(&self) -> f32 {
        self.dilate_px
    }

    /// Weight of the newest raw mask in the running average, in [0, 1]
    pub fn ema_alpha(&self) -> f32 {
        self.ema_alpha
    }

    /// Shrink factor of the colour layer, in [0.97, 1.0]
    pub fn rgb_scale(&self) -> f32 {
        self.rgb_scale
    }

    /// Request a mask once every this many ticks, always >= 1
    pub fn mask_request_divider(&self) -> u32 {
        self.mask_request_divider
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_selection: ModelSelection::General,
            feather_px: DEFAULT_FEATHER_PX,
            dilate_px: DEFAULT_DILATE_PX,
            ema_alpha: DEFAULT_EMA_ALPHA,
            rgb_scale: DEFAULT_RGB_SCALE,
            mask_request_divider: 1,
            edge_mode: EdgeMode::CombinedBlur,
        }
    }
}

/// Builder validating each parameter independently
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }
}

impl PipelineConfigBuilder {
    pub fn model_selection(mut self, selection: ModelSelection) -> Self {
        self.config.model_selection = selection;
        self
    }

    pub fn feather_px(mut self, px: f32) -> Self {
        self.config.feather_px = px;
        self
    }

    pub fn dilate_px(mut self, px: f32) -> Self {
        self.config.dilate_px = px;
        self
    }

    pub fn ema_alpha(mut self, alpha: f32) -> Self {
        self.config.ema_alpha = alpha;
        self
    }

    pub fn rgb_scale(mut self, scale: f32) -> Self {
        self.config.rgb_scale = scale;
        self
    }

    pub fn mask_request_divider(mut self, divider: u32) -> Self {
        self.config.mask_request_divider = divider;
        self
    }

    pub fn edge_mode(mut self, mode: EdgeMode) -> Self {
        self.config.edge_mode = mode;
        self
    }

    /// Clamp every value into range
    ///
    /// Out-of-range numbers are coerced; only non-finite values are rejected.
    pub fn build(self) -> Result<PipelineConfig> {
        let c = self.config;

        Ok(PipelineConfig {
            model_selection: c.model_selection,
            feather_px: finite("feather_px", c.feather_px)?.max(0.0),
            dilate_px: finite("dilate_px", c.dilate_px)?.max(0.0),
            ema_alpha: finite("ema_alpha", c.ema_alpha)?.clamp(0.0, 1.0),
            rgb_scale: finite("rgb_scale", c.rgb_scale)?.clamp(MIN_RGB_SCALE, MAX_RGB_SCALE),
            mask_request_divider: c.mask_request_divider.max(1),
            edge_mode: c.edge_mode,
        })
    }
}

fn finite(name: &str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CutoutError::InvalidConfig(format!(
            "{} must be a finite number, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_are_in_range() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.mask_request_divider(), 1);
    }

    #[test]
    fn test_divider_zero_becomes_one() {
        let config = PipelineConfig::builder()
            .mask_request_divider(0)
            .build()
            .unwrap();
        assert_eq!(config.mask_request_divider(), 1);
    }

    #[test]
    fn test_rgb_scale_is_clamped() {
        let low = PipelineConfig::builder().rgb_scale(0.5).build().unwrap();
        let high = PipelineConfig::builder().rgb_scale(1.3).build().unwrap();
        assert_eq!(low.rgb_scale(), MIN_RGB_SCALE);
        assert_eq!(high.rgb_scale(), MAX_RGB_SCALE);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let err = PipelineConfig::builder().ema_alpha(f32::NAN).build();
        assert!(matches!(err, Err(CutoutError::InvalidConfig(_))));

        let err = PipelineConfig::builder().feather_px(f32::INFINITY).build();
        assert!(matches!(err, Err(CutoutError::InvalidConfig(_))));
    }

    proptest! {
        #[test]
        fn prop_built_config_respects_invariants(
            feather in -50.0f32..50.0,
            dilate in -50.0f32..50.0,
            alpha in -2.0f32..3.0,
            scale in 0.0f32..2.0,
            divider in 0u32..100,
        ) {
            let config = PipelineConfig::builder()
                .feather_px(feather)
                .dilate_px(dilate)
                .ema_alpha(alpha)
                .rgb_scale(scale)
                .mask_request_divider(divider)
                .build()
                .unwrap();

            prop_assert!(config.feather_px() >= 0.0);
            prop_assert!(config.dilate_px() >= 0.0);
            prop_assert!((0.0..=1.0).contains(&config.ema_alpha()));
            prop_assert!((MIN_RGB_SCALE..=MAX_RGB_SCALE).contains(&config.rgb_scale()));
            prop_assert_eq!(config.mask_request_divider(), divider.max(1));
        }
    }
}
