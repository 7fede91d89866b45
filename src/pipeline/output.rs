use image::RgbaImage;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Read side of the session's RGBA output
///
/// The image is rewritten in place every tick. Consumers should sample it
/// once per presentation frame instead of holding on to a copy.
#[derive(Clone)]
pub struct OutputBuffer {
    image: Arc<RwLock<RgbaImage>>,
    generation: watch::Receiver<u64>,
}

impl OutputBuffer {
    /// Lock the current image for reading
    ///
    /// Keep the guard short-lived: the next composite waits for it.
    pub fn read(&self) -> RwLockReadGuard<'_, RgbaImage> {
        self.image.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current image
    pub fn snapshot(&self) -> RgbaImage {
        self.read().clone()
    }

    /// `(0, 0)` until the session has started
    pub fn dimensions(&self) -> (u32, u32) {
        self.read().dimensions()
    }

    /// Number of composites written so far
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Wait for the next composite; `false` once the session is gone
    pub async fn changed(&mut self) -> bool {
        self.generation.changed().await.is_ok()
    }
}

/// Write side, owned by the session
pub(crate) struct OutputWriter {
    image: Arc<RwLock<RgbaImage>>,
    generation: watch::Sender<u64>,
}

impl OutputWriter {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            image: Arc::new(RwLock::new(RgbaImage::new(0, 0))),
            generation,
        }
    }

    pub(crate) fn reader(&self) -> OutputBuffer {
        OutputBuffer {
            image: Arc::clone(&self.image),
            generation: self.generation.subscribe(),
        }
    }

    /// Replace the image with a transparent one of the session size
    pub(crate) fn allocate(&self, width: u32, height: u32) {
        *self.write() = RgbaImage::new(width, height);
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RgbaImage> {
        self.image.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}
