use crate::error::{CutoutError, Result};
use crate::segmentation::{empty_mask, Mask};

/// Exponential moving average over whole masks
///
/// Starts fully transparent, so the first response is blended against
/// zero rather than taken verbatim.
pub struct MaskSmoother {
    alpha: f32,
    smoothed: Mask,
    updates: u64,
}

impl MaskSmoother {
    /// # Arguments
    /// * `alpha` - Weight of the newest raw mask, in [0, 1]
    pub fn new(width: u32, height: u32, alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            smoothed: empty_mask(width, height),
            updates: 0,
        }
    }

    /// Blend `raw` into the running mask: `S = (1 - a) * S + a * R`
    ///
    /// Every pixel is touched, background included. `raw` and the running
    /// mask are distinct buffers, so each pixel's previous value is read
    /// before it is overwritten.
    pub fn update(&mut self, raw: &Mask) -> Result<&Mask> {
        if raw.dimensions() != self.smoothed.dimensions() {
            return Err(CutoutError::mismatch(
                "raw mask",
                self.smoothed.dimensions(),
                raw.dimensions(),
            ));
        }

        let _span = tracing::debug_span!("smooth").entered();

        let keep = 1.0 - self.alpha;
        for (s, r) in self.smoothed.iter_mut().zip(raw.iter()) {
            *s = keep * *s + self.alpha * r.clamp(0.0, 1.0);
        }
        self.updates += 1;

        Ok(&self.smoothed)
    }

    pub fn smoothed(&self) -> &Mask {
        &self.smoothed
    }

    /// Number of raw masks blended in so far
    pub fn updates(&self) -> u64 {
        self.updates
    }
}
