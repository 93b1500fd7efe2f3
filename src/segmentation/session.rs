use super::types::{ModelLoader, SegmentationModel};
use crate::render::{to_mask, Canvas, MaskStyle};
use crate::webcam::VideoSurface;
use anyhow::{ensure, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A loaded model, shared by every in-flight estimate
pub type ModelHandle = Arc<Mutex<Box<dyn SegmentationModel>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Idle,
    Loading,
    Loaded,
    /// Load failed and no earlier model is available
    Failed(String),
}

/// What to do when a frame arrives while an earlier estimate is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Queue one estimate behind the running one; further frames are
    /// dropped until it starts. The queued estimate reads the video only
    /// once the model is free, so the newest frame is drawn last.
    #[default]
    LastWriteWins,
    /// Drop the new frame
    SkipWhileBusy,
}

impl OverlapPolicy {
    /// Estimates allowed to exist at once, running or waiting
    fn capacity(self) -> usize {
        match self {
            OverlapPolicy::LastWriteWins => 2,
            OverlapPolicy::SkipWhileBusy => 1,
        }
    }
}

#[derive(Default)]
struct FrameStats {
    frames: AtomicU64,
    segment_micros: AtomicU64,
    composite_micros: AtomicU64,
}

impl FrameStats {
    fn record(&self, segment: Duration, composite: Duration) {
        self.segment_micros
            .fetch_add(segment.as_micros() as u64, Ordering::Relaxed);
        self.composite_micros
            .fetch_add(composite.as_micros() as u64, Ordering::Relaxed);
        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;

        // Log stats every 30 frames
        if frames % 30 == 0 {
            let avg_segment_ms = self.segment_micros.load(Ordering::Relaxed) as f64 / 1000.0 / frames as f64;
            let avg_composite_ms = self.composite_micros.load(Ordering::Relaxed) as f64 / 1000.0 / frames as f64;
            tracing::info!(
                "Frame {}: segment={:.1}ms, composite={:.1}ms",
                frames,
                avg_segment_ms,
                avg_composite_ms
            );
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    /// Take a slot unless `capacity` estimates already exist
    fn try_enter(counter: &Arc<AtomicUsize>, capacity: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < capacity).then_some(n + 1))
            .ok()?;
        Some(Self(Arc::clone(counter)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the segmentation model's lifecycle for one widget
///
/// The model slot is empty until a load completes. Estimating against an
/// empty slot does nothing, whether the load is still running or failed.
pub struct ModelSession {
    loader: Arc<dyn ModelLoader>,
    model: Arc<Mutex<Option<ModelHandle>>>,
    status: Arc<watch::Sender<ModelStatus>>,
    style: MaskStyle,
    overlap: OverlapPolicy,
    in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    load_requests: AtomicUsize,
    stats: Arc<FrameStats>,
}

impl ModelSession {
    pub fn new(loader: Arc<dyn ModelLoader>, overlap: OverlapPolicy) -> Self {
        let (status, _) = watch::channel(ModelStatus::Idle);
        Self {
            loader,
            model: Arc::new(Mutex::new(None)),
            status: Arc::new(status),
            style: MaskStyle::PERSON_CUTOUT,
            overlap,
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            load_requests: AtomicUsize::new(0),
            stats: Arc::new(FrameStats::default()),
        }
    }

    /// Start loading the model in the background.
    ///
    /// Not deduplicated: calling this twice runs two loads and the one that
    /// finishes last is kept. Failures are logged and reflected in
    /// [`ModelStatus`], never returned.
    pub fn load_model(&self) -> JoinHandle<()> {
        let request = self.load_requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_if_modified(|status| {
            if *status == ModelStatus::Loaded {
                return false;
            }
            *status = ModelStatus::Loading;
            true
        });

        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.model);
        let status = Arc::clone(&self.status);

        tokio::task::spawn_blocking(move || {
            let _span = tracing::info_span!("load_model", request).entered();
            let started = Instant::now();

            match loader.load() {
                Ok(model) => {
                    let (width, height) = model.input_size();
                    let handle: ModelHandle = Arc::new(Mutex::new(model));
                    let replaced = slot
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .replace(handle)
                        .is_some();
                    if replaced {
                        tracing::debug!("Replaced previously loaded model");
                    }
                    status.send_replace(ModelStatus::Loaded);
                    tracing::info!("Model loaded in {:.1?} ({}x{} input)", started.elapsed(), width, height);
                }
                Err(e) => {
                    tracing::warn!("Model load failed: {:#}", e);
                    let loaded = slot.lock().unwrap_or_else(PoisonError::into_inner).is_some();
                    if !loaded {
                        status.send_replace(ModelStatus::Failed(format!("{e:#}")));
                    }
                }
            }
        })
    }

    /// Segment the video's current frame and draw the mask onto `canvas`.
    ///
    /// Returns `None` without touching anything when no model is loaded,
    /// when the session is closed, or when the [`OverlapPolicy`] has no room
    /// for another estimate. Otherwise the work runs in the background; its
    /// error, if any, is logged and carried by the returned handle, which
    /// callers are free to drop.
    pub fn estimate(&self, video: &VideoSurface, canvas: &Canvas) -> Option<JoinHandle<Result<()>>> {
        if self.is_closed() {
            return None;
        }
        let model = self.current_model()?;

        let Some(guard) = InFlight::try_enter(&self.in_flight, self.overlap.capacity()) else {
            tracing::trace!("Estimate backlog full, dropping frame");
            return None;
        };
        let video = video.clone();
        let canvas = canvas.clone();
        let style = self.style;
        let stats = Arc::clone(&self.stats);
        let closed = Arc::clone(&self.closed);

        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let result = segment_and_draw(&model, &video, &canvas, &style, &stats, &closed);
            if let Err(e) = &result {
                tracing::warn!("Estimate failed: {:#}", e);
            }
            result
        }))
    }

    /// Stop accepting estimates. Estimates already queued finish without
    /// drawing; one past its final check may still draw.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn current_model(&self) -> Option<ModelHandle> {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current_model().is_some()
    }

    pub fn status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelStatus> {
        self.status.subscribe()
    }

    /// Number of `load_model` calls so far
    pub fn load_requests(&self) -> usize {
        self.load_requests.load(Ordering::SeqCst)
    }

    /// Estimates running or waiting for the model
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn style(&self) -> &MaskStyle {
        &self.style
    }
}

fn segment_and_draw(
    model: &ModelHandle,
    video: &VideoSurface,
    canvas: &Canvas,
    style: &MaskStyle,
    stats: &FrameStats,
    closed: &AtomicBool,
) -> Result<()> {
    // Held through compositing so draws land in the order they took the model
    let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
    if closed.load(Ordering::SeqCst) {
        return Ok(());
    }

    let Some(frame) = video.current_frame() else {
        tracing::trace!("No video frame yet");
        return Ok(());
    };

    let segment_start = Instant::now();
    let segmentation = model.segment(&frame).context("Failed to segment frame")?;
    let segment_time = segment_start.elapsed();

    ensure!(
        segmentation.dimensions() == frame.dimensions(),
        "segmentation is {:?} but frame is {:?}",
        segmentation.dimensions(),
        frame.dimensions()
    );

    if closed.load(Ordering::SeqCst) {
        return Ok(());
    }

    let composite_start = Instant::now();
    let mask = to_mask(&segmentation, style.foreground, style.background);
    canvas.draw_mask(&frame, &mask, style.opacity, style.mask_blur, style.flip_horizontal)?;
    stats.record(segment_time, composite_start.elapsed());

    Ok(())
}
