use super::{CaptureDevice, CaptureError, MediaConstraints, MediaStream};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Local webcam opened through nokhwa
pub struct WebcamDevice {
    device_index: u32,
}

impl WebcamDevice {
    pub fn new(device_index: u32) -> Self {
        Self { device_index }
    }
}

impl CaptureDevice for WebcamDevice {
    fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, CaptureError> {
        if constraints.audio {
            return Err(CaptureError::Unsupported("audio capture".into()));
        }
        if !constraints.video {
            return Err(CaptureError::Unsupported("no video track requested".into()));
        }

        tracing::info!("Opening webcam {}", self.device_index);

        let stream = WebcamStream::open(self.device_index)?;
        let (width, height) = stream.resolution();
        tracing::info!("Webcam streaming at {}x{}", width, height);

        Ok(Arc::new(stream))
    }
}

struct SharedFrame {
    latest: Mutex<Option<RgbImage>>,
    running: AtomicBool,
}

/// Stream backed by a dedicated capture thread.
///
/// The camera handle never leaves that thread; readers only see the newest
/// decoded frame.
pub struct WebcamStream {
    shared: Arc<SharedFrame>,
    width: u32,
    height: u32,
}

impl WebcamStream {
    fn open(device_index: u32) -> Result<Self, CaptureError> {
        let shared = Arc::new(SharedFrame {
            latest: Mutex::new(None),
            running: AtomicBool::new(true),
        });
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("webcam-{device_index}"))
            .spawn(move || capture_thread(device_index, worker, ready_tx))
            .map_err(|e| CaptureError::Unavailable(format!("failed to spawn capture thread: {e}")))?;

        let (width, height) = ready_rx
            .recv()
            .map_err(|_| CaptureError::Unavailable("capture thread exited during open".into()))??;

        Ok(Self {
            shared,
            width,
            height,
        })
    }
}

fn open_camera(device_index: u32) -> Result<Camera, CaptureError> {
    let index = CameraIndex::Index(device_index);
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = Camera::new(index, requested).map_err(classify)?;
    camera.open_stream().map_err(classify)?;
    Ok(camera)
}

fn classify(err: NokhwaError) -> CaptureError {
    let message = err.to_string();
    if message.to_lowercase().contains("permission") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Unavailable(message)
    }
}

fn capture_thread(
    device_index: u32,
    shared: Arc<SharedFrame>,
    ready: mpsc::SyncSender<Result<(u32, u32), CaptureError>>,
) {
    let mut camera = match open_camera(device_index) {
        Ok(camera) => camera,
        Err(e) => {
            shared.running.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(e));
            return;
        }
    };

    let resolution = camera.resolution();
    if ready.send(Ok((resolution.width(), resolution.height()))).is_err() {
        shared.running.store(false, Ordering::SeqCst);
    }

    while shared.running.load(Ordering::SeqCst) {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>());

        match decoded {
            Ok(frame) => {
                *shared.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
            }
            Err(e) => {
                tracing::warn!("Webcam {} stopped delivering frames: {}", device_index, e);
                break;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    if let Err(e) = camera.stop_stream() {
        tracing::debug!("Failed to stop webcam {} cleanly: {}", device_index, e);
    }
    tracing::info!("Webcam {} released", device_index);
}

impl MediaStream for WebcamStream {
    fn latest_frame(&self) -> Option<RgbImage> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_live(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.stop();
    }
}
