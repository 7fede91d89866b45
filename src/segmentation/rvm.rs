use super::preprocess::Preprocessor;
use super::types::{Mask, SegmentationModel};
use crate::config::ModelSelection;
use anyhow::{ensure, Context, Result};
use image::RgbImage;
use ndarray::{Array1, ArrayD, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Recurrent hidden states, fed back on the next frame
    state: Option<[ArrayD<f32>; 4]>,

    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `selection` - Inference resolution: 512x512 for `General`,
    ///   384x216 for `Landscape`
    pub fn new<P: AsRef<Path>>(model_path: P, selection: ModelSelection) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {} ({:?})", path.display(), selection);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        let (width, height) = match selection {
            ModelSelection::General => (512, 512),
            ModelSelection::Landscape => (384, 216),
        };

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
            state: None,
            downsample_ratio: 0.25,
        })
    }

    /// The exported graph accepts 1x1x1x1 zeros as the initial recurrent state
    fn initial_state() -> [ArrayD<f32>; 4] {
        tracing::debug!("Initializing RVM hidden states");
        std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage) -> Result<Mask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let input = self.preprocessor.preprocess(frame)?;
        let ratio = Array1::from_elem(1, self.downsample_ratio);
        let [r1, r2, r3, r4] = self.state.take().unwrap_or_else(Self::initial_state);

        let (pha, next_state) = {
            let _infer_span = tracing::debug_span!("inference").entered();
            let outputs = self
                .session
                .run(ort::inputs![
                    "src" => TensorRef::from_array_view(input.view())?,
                    "r1i" => TensorRef::from_array_view(r1.view())?,
                    "r2i" => TensorRef::from_array_view(r2.view())?,
                    "r3i" => TensorRef::from_array_view(r3.view())?,
                    "r4i" => TensorRef::from_array_view(r4.view())?,
                    "downsample_ratio" => TensorRef::from_array_view(ratio.view())?,
                ])
                .context("Failed to run inference")?;

            // fgr is ignored; only the alpha matte and recurrent state are used
            let pha = outputs["pha"].try_extract_array::<f32>()?.to_owned();
            let next_state = [
                outputs["r1o"].try_extract_array::<f32>()?.to_owned(),
                outputs["r2o"].try_extract_array::<f32>()?.to_owned(),
                outputs["r3o"].try_extract_array::<f32>()?.to_owned(),
                outputs["r4o"].try_extract_array::<f32>()?.to_owned(),
            ];
            (pha, next_state)
        };
        self.state = Some(next_state);

        // pha shape: [1, 1, H, W]
        let shape = pha.shape();
        ensure!(shape.len() == 4, "Unexpected matte shape {:?}", shape);
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte: Vec<f32> = pha.iter().copied().collect();

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(
            matte,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.state = None;
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
