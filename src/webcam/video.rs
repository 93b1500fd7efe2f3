use crate::capture::MediaStream;
use image::RgbImage;
use std::sync::{Arc, Mutex, PoisonError};

/// Displays whatever stream is attached as its source
///
/// Clones share the same source slot.
#[derive(Clone, Default)]
pub struct VideoSurface {
    source: Arc<Mutex<Option<Arc<dyn MediaStream>>>>,
}

impl VideoSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `stream`, returning the stream it replaced
    pub fn set_source(&self, stream: Arc<dyn MediaStream>) -> Option<Arc<dyn MediaStream>> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(stream)
    }

    pub fn take_source(&self) -> Option<Arc<dyn MediaStream>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn source(&self) -> Option<Arc<dyn MediaStream>> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_source(&self) -> bool {
        self.source().is_some()
    }

    /// The frame currently on screen, if a live source has produced one
    pub fn current_frame(&self) -> Option<RgbImage> {
        self.source()
            .filter(|stream| stream.is_live())
            .and_then(|stream| stream.latest_frame())
    }
}
