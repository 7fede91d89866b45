use thiserror::Error;

/// Errors surfaced by the cut-out pipeline
///
/// Per-tick mask request failures are not represented here: they are
/// absorbed by the driver, which keeps compositing with the last good mask.
#[derive(Debug, Error)]
pub enum CutoutError {
    /// The session was built without a mask provider
    #[error("No mask provider supplied; a session cannot run without one")]
    ProviderUnavailable,

    /// The session was built without a frame provider
    #[error("No frame provider supplied")]
    FrameSourceUnavailable,

    /// An image's size drifted from the dimensions fixed at session start
    #[error("{what} is {actual_width}x{actual_height}, session is {width}x{height}")]
    DimensionMismatch {
        what: &'static str,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A configuration value could not be coerced into range
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A tick was requested before `start()` sized the buffers
    #[error("Session has not been started")]
    NotStarted,

    /// The frame provider failed to deliver a frame
    #[error("Frame capture failed: {0}")]
    Capture(#[source] anyhow::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, CutoutError>;

impl CutoutError {
    pub(crate) fn mismatch(what: &'static str, expected: (u32, u32), actual: (u32, u32)) -> Self {
        CutoutError::DimensionMismatch {
            what,
            width: expected.0,
            height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }
}
