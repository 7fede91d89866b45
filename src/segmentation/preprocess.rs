use super::types::Mask;
use anyhow::{ensure, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        Ok(tensor)
    }

    /// Resize a row-major model matte back to frame dimensions
    ///
    /// Values are clamped to [0, 1]; the resampling filter may overshoot.
    pub fn postprocess_matte(
        matte: Vec<f32>,
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Mask> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == (matte_width * matte_height) as usize,
            "Matte has {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        let Some(matte) = Mask::from_raw(matte_width, matte_height, matte) else {
            anyhow::bail!("Matte buffer does not fit {}x{}", matte_width, matte_height);
        };

        let mut mask = if (matte_width, matte_height) == (target_width, target_height) {
            matte
        } else {
            imageops::resize(
                &matte,
                target_width,
                target_height,
                imageops::FilterType::Triangle,
            )
        };

        for value in mask.iter_mut() {
            *value = value.clamp(0.0, 1.0);
        }

        Ok(mask)
    }
}
