use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::{ImageBuffer, Luma, RgbImage};
use std::sync::{Arc, Mutex};

/// Foreground probability per pixel: 0.0 = background, 1.0 = foreground
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Fully transparent mask of the given size
pub fn empty_mask(width: u32, height: u32) -> Mask {
    Mask::new(width, height)
}

/// Asynchronous source of foreground masks
///
/// This is the only capability the pipeline needs from a segmentation
/// backend. Latency is unbounded and any call may fail; the pipeline copes
/// with both. The returned mask must match the frame's dimensions.
#[async_trait]
pub trait MaskProvider: Send + Sync {
    async fn request_mask(&self, frame: Arc<RgbImage>) -> Result<Mask>;

    /// Drop any temporal state, called when a session starts
    fn reset_state(&self) {}
}

/// Trait for synchronous segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
pub trait SegmentationModel: Send {
    /// Process a frame and return a mask at the frame's dimensions
    fn segment(&mut self, frame: &RgbImage) -> Result<Mask>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Starting a new session
    fn reset_state(&mut self) {}

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Runs a blocking [`SegmentationModel`] on tokio's blocking pool
pub struct BlockingMaskProvider<M> {
    model: Arc<Mutex<M>>,
}

impl<M: SegmentationModel + 'static> BlockingMaskProvider<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }
}

#[async_trait]
impl<M: SegmentationModel + 'static> MaskProvider for BlockingMaskProvider<M> {
    async fn request_mask(&self, frame: Arc<RgbImage>) -> Result<Mask> {
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("Segmentation model lock poisoned"))?;
            model.segment(&frame)
        })
        .await
        .context("Segmentation task did not complete")?
    }

    fn reset_state(&self) {
        match self.model.lock() {
            Ok(mut model) => model.reset_state(),
            Err(_) => tracing::warn!("Segmentation model lock poisoned, state not reset"),
        }
    }
}
