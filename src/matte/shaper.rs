use crate::config::EdgeMode;
use crate::error::{CutoutError, Result};
use crate::segmentation::{empty_mask, Mask};
use image::{imageops, Luma};

/// Grows and softens the smoothed mask edge
///
/// Radii are Gaussian standard deviations in pixels, matching the usual
/// `blur(Npx)` filter convention.
pub struct MaskShaper {
    dilate_px: f32,
    feather_px: f32,
    mode: EdgeMode,
    shaped: Mask,
}

impl MaskShaper {
    pub fn new(width: u32, height: u32, dilate_px: f32, feather_px: f32, mode: EdgeMode) -> Self {
        Self {
            dilate_px: dilate_px.max(0.0),
            feather_px: feather_px.max(0.0),
            mode,
            shaped: empty_mask(width, height),
        }
    }

    /// Recompute the shaped mask from `smoothed`
    pub fn shape(&mut self, smoothed: &Mask) -> Result<&Mask> {
        if smoothed.dimensions() != self.shaped.dimensions() {
            return Err(CutoutError::mismatch(
                "smoothed mask",
                self.shaped.dimensions(),
                smoothed.dimensions(),
            ));
        }

        let _span = tracing::debug_span!("shape", mode = ?self.mode).entered();

        match self.mode {
            EdgeMode::CombinedBlur => {
                let radius = self.dilate_px + self.feather_px;
                if radius > 0.0 {
                    self.shaped = imageops::blur(smoothed, radius);
                } else {
                    self.shaped.copy_from_slice(smoothed.as_raw());
                }
            }
            EdgeMode::GrowThenBlur => {
                let grown = grow(smoothed, self.dilate_px.round() as u32);
                self.shaped = if self.feather_px > 0.0 {
                    imageops::blur(&grown, self.feather_px)
                } else {
                    grown
                };
            }
        }

        Ok(&self.shaped)
    }

    pub fn shaped(&self) -> &Mask {
        &self.shaped
    }
}

/// Morphological dilation with a (2r+1)x(2r+1) square, done as two 1D max passes
fn grow(mask: &Mask, radius: u32) -> Mask {
    if radius == 0 {
        return mask.clone();
    }

    let (width, height) = mask.dimensions();
    let r = radius as i64;

    let horizontal = Mask::from_fn(width, height, |x, y| {
        let lo = (x as i64 - r).max(0) as u32;
        let hi = (x as i64 + r).min(width as i64 - 1) as u32;
        let peak = (lo..=hi)
            .map(|sx| mask.get_pixel(sx, y)[0])
            .fold(0.0f32, f32::max);
        Luma([peak])
    });

    Mask::from_fn(width, height, |x, y| {
        let lo = (y as i64 - r).max(0) as u32;
        let hi = (y as i64 + r).min(height as i64 - 1) as u32;
        let peak = (lo..=hi)
            .map(|sy| horizontal.get_pixel(x, sy)[0])
            .fold(0.0f32, f32::max);
        Luma([peak])
    })
}
