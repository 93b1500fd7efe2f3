mod v4l_capture;

pub use v4l_capture::WebcamDevice;

use image::RgbImage;
use std::sync::Arc;

/// Requested tracks for a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Video only, no microphone
    pub const CAMERA_ONLY: Self = Self {
        audio: false,
        video: true,
    };
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera access was denied")]
    PermissionDenied,

    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported constraints: {0}")]
    Unsupported(String),
}

/// Something that can hand out live camera streams
pub trait CaptureDevice: Send + Sync {
    /// Open a stream matching `constraints`.
    ///
    /// Blocks until the device is open or has failed, so async callers
    /// should run it on a blocking task.
    fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, CaptureError>;
}

/// A live camera feed
pub trait MediaStream: Send + Sync {
    /// Most recent decoded frame, or `None` before the first one arrives
    fn latest_frame(&self) -> Option<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    fn is_live(&self) -> bool;

    /// Release the device. Calling it twice is harmless.
    fn stop(&self);
}
