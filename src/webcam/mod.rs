//! The capture/render widget.
//!
//! [`WebCam`] ties a camera, a [`ModelSession`] and a frame scheduler
//! together. Two actions drive it: [`WebCam::setup`] opens the camera and
//! starts loading the model, [`WebCam::start_loop`] begins the per-frame
//! estimate-and-draw cycle. Dropping the widget tears it down.

mod video;

pub use video::VideoSurface;

use crate::capture::{CaptureDevice, MediaConstraints, MediaStream};
use crate::render::Canvas;
use crate::schedule::{FrameHandle, FrameScheduler};
use crate::segmentation::{ModelLoader, ModelSession, OverlapPolicy};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    /// Camera attached, model load requested
    Ready,
    Looping,
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebCamOptions {
    pub overlap: OverlapPolicy,
}

struct Inner {
    device: Arc<dyn CaptureDevice>,
    scheduler: Arc<dyn FrameScheduler>,
    session: ModelSession,
    video: VideoSurface,
    canvas: Canvas,
    state: Mutex<LoopState>,
    pending: Mutex<Option<FrameHandle>>,
    capture: watch::Sender<CaptureStatus>,
}

pub struct WebCam {
    inner: Arc<Inner>,
}

impl WebCam {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        loader: Arc<dyn ModelLoader>,
        scheduler: Arc<dyn FrameScheduler>,
        canvas: Canvas,
        options: WebCamOptions,
    ) -> Self {
        let (capture, _) = watch::channel(CaptureStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                device,
                scheduler,
                session: ModelSession::new(loader, options.overlap),
                video: VideoSurface::new(),
                canvas,
                state: Mutex::new(LoopState::Idle),
                pending: Mutex::new(None),
                capture,
            }),
        }
    }

    /// Open the camera, then request the model load.
    ///
    /// The load is requested whether or not the camera opened, and is not
    /// awaited. Capture failures are reported through the returned status
    /// (and [`WebCam::subscribe_capture`]) rather than as an error.
    pub async fn setup(&self) -> CaptureStatus {
        if self.state() == LoopState::TornDown {
            tracing::warn!("setup called after teardown");
            return self.capture_status();
        }

        let device = Arc::clone(&self.inner.device);
        let acquired =
            tokio::task::spawn_blocking(move || device.acquire(&MediaConstraints::CAMERA_ONLY)).await;

        let outcome = match acquired {
            Ok(Ok(stream)) => {
                if self.inner.attach(stream) {
                    CaptureStatus::Ready
                } else {
                    return CaptureStatus::Idle;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Camera unavailable: {}", e);
                CaptureStatus::Failed(e.to_string())
            }
            Err(e) => {
                tracing::warn!("Camera acquisition task failed: {}", e);
                CaptureStatus::Failed(format!("capture task failed: {e}"))
            }
        };
        self.inner.capture.send_replace(outcome.clone());

        self.inner.session.load_model();
        outcome
    }

    /// Run one cycle now and keep rescheduling every frame until teardown.
    ///
    /// Calling it again while looping restarts the cycle rather than
    /// starting a second one.
    pub fn start_loop(&self) {
        Inner::run_frame(&self.inner);
    }

    /// Cancel the pending frame and release the camera. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    pub fn state(&self) -> LoopState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.inner.capture.borrow().clone()
    }

    pub fn subscribe_capture(&self) -> watch::Receiver<CaptureStatus> {
        self.inner.capture.subscribe()
    }

    pub fn session(&self) -> &ModelSession {
        &self.inner.session
    }

    pub fn video(&self) -> &VideoSurface {
        &self.inner.video
    }

    pub fn canvas(&self) -> &Canvas {
        &self.inner.canvas
    }

    /// Handle of the next scheduled cycle, if any
    pub fn pending_frame(&self) -> Option<FrameHandle> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for WebCam {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    /// Returns false when the widget was torn down while the camera opened.
    fn attach(&self, stream: Arc<dyn MediaStream>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LoopState::TornDown {
            stream.stop();
            return false;
        }

        let (width, height) = stream.resolution();
        tracing::info!("Camera attached at {}x{}", width, height);
        if let Some(previous) = self.video.set_source(stream) {
            tracing::debug!("Replacing previous camera stream");
            previous.stop();
        }
        if *state == LoopState::Idle {
            *state = LoopState::Ready;
        }
        true
    }

    fn run_frame(self: &Arc<Self>) {
        {
            // The handle is stored under the state lock so teardown always
            // sees, and cancels, the frame scheduled here
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == LoopState::TornDown {
                return;
            }
            *state = LoopState::Looping;

            // Schedule first; the next frame never waits on this one's estimate
            let next = Arc::clone(self);
            let handle = self.scheduler.request_frame(Box::new(move || next.run_frame()));
            let previous = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(handle);
            if let Some(previous) = previous {
                previous.cancel();
            }
        }

        self.session.estimate(&self.video, &self.canvas);
    }

    fn teardown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == LoopState::TornDown {
                return;
            }
            *state = LoopState::TornDown;
        }

        self.session.close();

        if let Some(pending) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            tracing::debug!("Canceling frame {}", pending.id());
            pending.cancel();
        }

        if let Some(stream) = self.video.take_source() {
            stream.stop();
            tracing::info!("Camera stream released");
        }
    }
}
