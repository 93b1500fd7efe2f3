//! Per-frame callback scheduling.
//!
//! A [`FrameScheduler`] runs a callback once, just before the next frame
//! is due. Every request returns a [`FrameHandle`]; cancelling the handle
//! guarantees the callback never runs.

mod tokio_scheduler;

pub use tokio_scheduler::TokioFrameScheduler;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type FrameCallback = Box<dyn FnOnce() + Send + 'static>;

/// A pending next-frame callback
#[derive(Clone)]
pub struct FrameHandle {
    id: u64,
    canceled: Arc<AtomicBool>,
}

impl FrameHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("id", &self.id)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

pub trait FrameScheduler: Send + Sync {
    /// Run `callback` once before the next frame.
    ///
    /// Implementations must skip the callback if the returned handle has
    /// been cancelled by the time it is due, and must never run it before
    /// returning.
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle;
}
