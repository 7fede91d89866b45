mod preprocess;
mod rvm;
pub mod types;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use types::{empty_mask, BlockingMaskProvider, Mask, MaskProvider, SegmentationModel};

use crate::config::ModelSelection;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Create the default mask provider (RVM on the blocking pool)
pub fn create_default_provider<P: AsRef<Path>>(
    model_path: P,
    selection: ModelSelection,
) -> Result<Arc<dyn MaskProvider>> {
    let model = RobustVideoMatting::new(model_path, selection)?;
    let (width, height) = model.input_size();
    tracing::info!("Segmentation input: {}x{}", width, height);
    Ok(Arc::new(BlockingMaskProvider::new(model)))
}
