//! Per-frame matte stages: temporal smoothing, edge shaping, compositing

mod compositor;
mod shaper;
mod smoother;

pub use compositor::{Compositor, Placement};
pub use shaper::MaskShaper;
pub use smoother::MaskSmoother;
