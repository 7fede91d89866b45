use crate::error::{CutoutError, Result};
use crate::segmentation::Mask;
use image::{imageops, DynamicImage, Rgba, Rgba32FImage, RgbaImage, RgbImage};

/// Post-blur only runs above this feather radius
const POST_BLUR_MIN_FEATHER_PX: f32 = 0.2;
/// Post-blur sigma as a fraction of the feather radius
const POST_BLUR_FEATHER_RATIO: f32 = 0.5;

/// Placement of the shrunk colour layer inside the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Centre a `(w * scale) x (h * scale)` rectangle in a `w x h` canvas
    pub fn centered(width: u32, height: u32, scale: f32) -> Self {
        let scaled = |extent: u32| ((extent as f32 * scale).round() as u32).clamp(1, extent.max(1));
        let (sw, sh) = (scaled(width), scaled(height));

        // A zero-sized canvas still gets a 1px layer; keep the offset at 0
        Self {
            x: width.saturating_sub(sw) / 2,
            y: height.saturating_sub(sh) / 2,
            width: sw,
            height: sh,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Builds the RGBA cut-out from a frame and the shaped mask
///
/// The output is alpha-premultiplied: every colour channel is at most its
/// alpha, and every pixel whose alpha is zero is written as `(0, 0, 0, 0)`.
pub struct Compositor {
    width: u32,
    height: u32,
    feather_px: f32,
    placement: Placement,
}

impl Compositor {
    pub fn new(width: u32, height: u32, rgb_scale: f32, feather_px: f32) -> Self {
        let scale = rgb_scale.clamp(crate::config::MIN_RGB_SCALE, crate::config::MAX_RGB_SCALE);

        Self {
            width,
            height,
            feather_px: feather_px.max(0.0),
            placement: Placement::centered(width, height, scale),
        }
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Render one frame into `out`
    ///
    /// Steps, in order:
    /// 1. Clear to transparent
    /// 2. Copy the frame, shrunk and centred, as opaque colour
    /// 3. Destination-in with the mask
    /// 4. Blur the masked result and draw it over itself (feather > 0.2px)
    pub fn composite(&self, frame: &RgbImage, mask: &Mask, out: &mut RgbaImage) -> Result<()> {
        let dims = (self.width, self.height);
        for (what, actual) in [
            ("frame", frame.dimensions()),
            ("shaped mask", mask.dimensions()),
            ("output buffer", out.dimensions()),
        ] {
            if actual != dims {
                return Err(CutoutError::mismatch(what, dims, actual));
            }
        }

        let _span = tracing::debug_span!("composite").entered();

        out.fill(0);
        self.draw_scaled(frame, out);
        apply_mask(out, mask);

        if self.feather_px > POST_BLUR_MIN_FEATHER_PX {
            soften_edges(out, self.feather_px * POST_BLUR_FEATHER_RATIO);
        }

        Ok(())
    }

    fn draw_scaled(&self, frame: &RgbImage, out: &mut RgbaImage) {
        let p = self.placement;
        let layer = if (p.width, p.height) == frame.dimensions() {
            DynamicImage::ImageRgb8(frame.clone()).into_rgba8()
        } else {
            let resized = imageops::resize(frame, p.width, p.height, imageops::FilterType::Triangle);
            DynamicImage::ImageRgb8(resized).into_rgba8()
        };

        imageops::replace(out, &layer, p.x as i64, p.y as i64);
    }
}

/// Scale each pixel by the mask, colour included, so the result is premultiplied
fn apply_mask(out: &mut RgbaImage, mask: &Mask) {
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        let coverage = pixel[3] as f32 / 255.0 * m[0].clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * coverage).round() as u8;
        let alpha = (255.0 * coverage).round() as u8;
        if alpha == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
        } else {
            *pixel = Rgba([scale(pixel[0]), scale(pixel[1]), scale(pixel[2]), alpha]);
        }
    }
}

/// Source-over a blurred copy of `out` onto itself
///
/// `out` is already premultiplied, so transparent pixels contribute no
/// colour and the softened edge never darkens towards black.
fn soften_edges(out: &mut RgbaImage, sigma: f32) {
    let premultiplied = Rgba32FImage::from_fn(out.width(), out.height(), |x, y| {
        let p = out.get_pixel(x, y);
        Rgba([
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ])
    });
    let blurred = imageops::blur(&premultiplied, sigma);

    for ((pixel, dst), src) in out
        .pixels_mut()
        .zip(premultiplied.pixels())
        .zip(blurred.pixels())
    {
        let keep = 1.0 - src[3];
        let over = |c: usize| src[c] + dst[c] * keep;
        let alpha = over(3);

        let alpha_u8 = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
        if alpha_u8 == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }

        let channel = |c: usize| ((over(c) * 255.0).round().clamp(0.0, 255.0) as u8).min(alpha_u8);
        *pixel = Rgba([channel(0), channel(1), channel(2), alpha_u8]);
    }
}
