mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;

/// Trait for live frame sources
///
/// Dimensions may change between sessions but never while one is running.
#[async_trait(?Send)]
pub trait FrameProvider {
    /// Capture the current frame
    fn current_frame(&mut self) -> Result<RgbImage>;

    /// Frame dimensions, `None` until the source has produced usable ones
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Whether non-zero dimensions are available
    fn is_ready(&self) -> bool {
        matches!(self.dimensions(), Some((w, h)) if w > 0 && h > 0)
    }

    /// Resolves once the source reports usable dimensions
    async fn ready(&self);
}
