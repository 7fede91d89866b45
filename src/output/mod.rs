mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::{Rgb, RgbImage, RgbaImage};

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Composite a premultiplied cut-out over a solid colour
pub fn flatten_over(cutout: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(cutout.width(), cutout.height(), |x, y| {
        let p = cutout.get_pixel(x, y);
        let a = p[3] as f32 / 255.0;
        let mix = |c: usize| {
            (p[c] as f32 + background[c] as f32 * (1.0 - a))
                .round()
                .min(255.0) as u8
        };
        Rgb([mix(0), mix(1), mix(2)])
    })
}

/// Visualize the cut-out's alpha as a grayscale image
pub fn alpha_to_rgb(cutout: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(cutout.width(), cutout.height(), |x, y| {
        let a = cutout.get_pixel(x, y)[3];
        Rgb([a, a, a])
    })
}

/// Parse `RRGGBB` or `#RRGGBB`
pub fn parse_hex_color(s: &str) -> Result<Rgb<u8>> {
    let hex = s.trim_start_matches('#');
    anyhow::ensure!(hex.len() == 6 && hex.is_ascii(), "Expected a RRGGBB colour, got {:?}", s);

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}
