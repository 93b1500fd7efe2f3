use super::compositor;
use crate::output::OutputSink;
use anyhow::Result;
use image::{RgbImage, RgbaImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

struct CanvasInner {
    pixels: Mutex<RgbaImage>,
    presenter: Option<Mutex<Box<dyn OutputSink>>>,
    generation: AtomicU64,
}

/// Shared drawing surface
///
/// Clones refer to the same pixels. Concurrent draws are not ordered:
/// whichever finishes last is what the canvas shows.
#[derive(Clone)]
pub struct Canvas {
    inner: Arc<CanvasInner>,
}

impl Canvas {
    /// An offscreen canvas with no presenter
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Every completed draw is also written to `presenter`
    pub fn with_presenter(presenter: Box<dyn OutputSink>) -> Self {
        let (width, height) = presenter.resolution();
        tracing::debug!("Canvas presenting at {}x{}", width, height);
        Self::build(Some(Mutex::new(presenter)))
    }

    fn build(presenter: Option<Mutex<Box<dyn OutputSink>>>) -> Self {
        Self {
            inner: Arc::new(CanvasInner {
                pixels: Mutex::new(RgbaImage::new(0, 0)),
                presenter,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Composite `mask` over `frame` and replace the canvas contents.
    ///
    /// The canvas takes the frame's size.
    pub fn draw_mask(
        &self,
        frame: &RgbImage,
        mask: &RgbaImage,
        opacity: f32,
        mask_blur: u32,
        flip_horizontal: bool,
    ) -> Result<()> {
        let composite = compositor::draw_mask(frame, mask, opacity, mask_blur, flip_horizontal)?;
        self.present(composite)
    }

    /// Store `image`, then hand it to the presenter. A presenter failure is
    /// logged; the canvas keeps the new pixels either way.
    fn present(&self, image: RgbaImage) -> Result<()> {
        let mut pixels = self.inner.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        *pixels = image;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        // Presented under the pixel lock so the sink sees draws in canvas order
        if let Some(presenter) = &self.inner.presenter {
            if let Err(e) = presenter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_frame(&pixels)
            {
                tracing::warn!("Failed to present canvas: {:#}", e);
            }
        }
        Ok(())
    }

    /// Copy of the current pixels
    pub fn snapshot(&self) -> RgbaImage {
        self.inner
            .pixels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.inner
            .pixels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dimensions()
    }

    /// Number of completed draws so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use image::{Rgb, Rgba};

    struct Recorder(Arc<Mutex<Vec<(u32, u32)>>>);

    impl OutputSink for Recorder {
        fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
            self.0.lock().unwrap().push(frame.dimensions());
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }
    }

    struct BrokenSink;

    impl OutputSink for BrokenSink {
        fn write_frame(&mut self, _frame: &RgbaImage) -> Result<()> {
            bail!("device gone")
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }
    }

    #[test]
    fn starts_empty() {
        let canvas = Canvas::new();
        assert_eq!(canvas.dimensions(), (0, 0));
        assert_eq!(canvas.generation(), 0);
    }

    #[test]
    fn draw_resizes_to_frame_and_counts() {
        let canvas = Canvas::new();
        let frame = RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]));
        let mask = RgbaImage::new(4, 3);

        canvas.draw_mask(&frame, &mask, 0.7, 0, false).unwrap();

        assert_eq!(canvas.dimensions(), (4, 3));
        assert_eq!(canvas.generation(), 1);
        assert_eq!(canvas.snapshot().get_pixel(2, 2), &Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn clones_share_pixels_and_presenter_sees_draws() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let canvas = Canvas::with_presenter(Box::new(Recorder(Arc::clone(&seen))));
        let other = canvas.clone();

        other
            .draw_mask(&RgbImage::new(2, 2), &RgbaImage::new(2, 2), 0.7, 0, false)
            .unwrap();

        assert_eq!(canvas.generation(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(2, 2)]);
    }

    #[test]
    fn presenter_failure_still_updates_the_canvas() {
        let canvas = Canvas::with_presenter(Box::new(BrokenSink));
        let frame = RgbImage::from_pixel(3, 2, Rgb([9, 9, 9]));

        canvas.draw_mask(&frame, &RgbaImage::new(3, 2), 0.7, 0, false).unwrap();
        canvas.draw_mask(&frame, &RgbaImage::new(3, 2), 0.7, 0, false).unwrap();

        assert_eq!(canvas.generation(), 2);
        assert_eq!(canvas.dimensions(), (3, 2));
        assert_eq!(canvas.snapshot().get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
    }
}
