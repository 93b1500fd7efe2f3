//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use maskcam::capture::{CaptureDevice, CaptureError, MediaConstraints, MediaStream};
use maskcam::schedule::{FrameCallback, FrameHandle, FrameScheduler};
use maskcam::segmentation::{ModelLoader, SegmentationMap, SegmentationModel};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const FRAME_COLOR: Rgb<u8> = Rgb([200, 100, 40]);

/// Solid-colour frame
pub fn frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, FRAME_COLOR)
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream that always shows the same frame
pub struct MockStream {
    frame: Option<RgbImage>,
    stopped: AtomicBool,
}

impl MockStream {
    pub fn new(frame: Option<RgbImage>) -> Self {
        Self {
            frame,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaStream for MockStream {
    fn latest_frame(&self) -> Option<RgbImage> {
        self.frame.clone()
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.as_ref().map_or((0, 0), |f| f.dimensions())
    }

    fn is_live(&self) -> bool {
        !self.is_stopped()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`MockStream`] per acquire, or fails every time.
pub struct MockCaptureDevice {
    frame: Option<RgbImage>,
    failure: Option<fn() -> CaptureError>,
    open_delay: Option<Duration>,
    requests: Mutex<Vec<MediaConstraints>>,
    issued: Mutex<Vec<Arc<MockStream>>>,
}

impl MockCaptureDevice {
    pub fn streaming(frame: RgbImage) -> Self {
        Self {
            frame: Some(frame),
            failure: None,
            open_delay: None,
            requests: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: fn() -> CaptureError) -> Self {
        Self {
            frame: None,
            failure: Some(failure),
            open_delay: None,
            requests: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Block in `acquire` for `delay`, like a camera that is slow to open
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        locked(&self.requests).clone()
    }

    pub fn issued(&self) -> Vec<Arc<MockStream>> {
        locked(&self.issued).clone()
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, CaptureError> {
        locked(&self.requests).push(*constraints);
        if let Some(delay) = self.open_delay {
            std::thread::sleep(delay);
        }
        if let Some(failure) = self.failure {
            return Err(failure());
        }

        let stream = Arc::new(MockStream::new(self.frame.clone()));
        locked(&self.issued).push(Arc::clone(&stream));
        Ok(stream)
    }
}

/// Marks the left half of every frame as person
pub struct MockModel {
    id: usize,
    calls: Arc<Mutex<Vec<usize>>>,
    delay: Option<Duration>,
    fail: bool,
}

impl SegmentationModel for MockModel {
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMap> {
        locked(&self.calls).push(self.id);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            bail!("inference exploded");
        }

        let (width, height) = frame.dimensions();
        let data = (0..height)
            .flat_map(|_| (0..width).map(move |x| u8::from(x < width / 2)))
            .collect();
        SegmentationMap::new(width, height, data)
    }

    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }
}

/// Counts loads; the n-th successful load yields a model with id n.
#[derive(Default)]
pub struct MockLoader {
    loads: AtomicUsize,
    calls: Arc<Mutex<Vec<usize>>>,
    load_delay: Option<Duration>,
    segment_delay: Option<Duration>,
    fail_load: bool,
    fail_segment: bool,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_load: true,
            ..Self::default()
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn with_segment_delay(mut self, delay: Duration) -> Self {
        self.segment_delay = Some(delay);
        self
    }

    pub fn with_failing_segmentation(mut self) -> Self {
        self.fail_segment = true;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Model ids, one entry per `segment` call
    pub fn segment_calls(&self) -> Vec<usize> {
        locked(&self.calls).clone()
    }
}

impl ModelLoader for MockLoader {
    fn load(&self) -> Result<Box<dyn SegmentationModel>> {
        let id = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if self.fail_load {
            bail!("weights not found");
        }

        Ok(Box::new(MockModel {
            id,
            calls: Arc::clone(&self.calls),
            delay: self.segment_delay,
            fail: self.fail_segment,
        }))
    }
}

/// Scheduler driven by hand from the test
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    requests: AtomicUsize,
    queued: Mutex<Vec<(FrameHandle, FrameCallback)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `request_frame` calls
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Callbacks queued and not cancelled
    pub fn pending(&self) -> usize {
        locked(&self.queued)
            .iter()
            .filter(|(handle, _)| !handle.is_canceled())
            .count()
    }

    /// Simulate one display refresh. Returns how many callbacks ran.
    pub fn fire(&self) -> usize {
        let due = std::mem::take(&mut *locked(&self.queued));
        let mut ran = 0;
        for (handle, callback) in due {
            if !handle.is_canceled() {
                callback();
                ran += 1;
            }
        }
        ran
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let handle = FrameHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        locked(&self.queued).push((handle.clone(), callback));
        handle
    }
}

/// Forwards to another scheduler, counting requests
pub struct CountingScheduler {
    inner: Arc<dyn FrameScheduler>,
    requests: AtomicUsize,
}

impl CountingScheduler {
    pub fn new(inner: impl FrameScheduler + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl FrameScheduler for CountingScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.request_frame(callback)
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
