//! Real-time person cut-out from a live video stream.
//!
//! A [`Session`] pulls frames from a [`FrameProvider`], asks a
//! [`MaskProvider`] for foreground masks at a decimated rate, smooths and
//! feathers the mask over time, and composites a transparent-background
//! RGBA cut-out into an [`OutputBuffer`] on every tick.

pub mod capture;
pub mod config;
pub mod error;
pub mod matte;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use capture::FrameProvider;
pub use config::{EdgeMode, ModelSelection, PipelineConfig};
pub use error::{CutoutError, Result};
pub use pipeline::{OutputBuffer, Session, SessionState, StopHandle, TickOutcome};
pub use segmentation::{Mask, MaskProvider};
