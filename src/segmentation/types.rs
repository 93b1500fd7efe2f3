use anyhow::{ensure, Result};
use image::RgbImage;

/// BodyPix's default `segmentationThreshold`
pub const DEFAULT_PERSON_THRESHOLD: f32 = 0.7;

/// Per-pixel person/background classification of one frame
///
/// `data` is row-major with one byte per pixel: 1 = person, 0 = background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SegmentationMap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == (width as usize) * (height as usize),
            "segmentation data has {} entries, expected {}x{}",
            data.len(),
            width,
            height
        );
        Ok(Self {
            width,
            height,
            data: data.into_iter().map(|v| u8::from(v != 0)).collect(),
        })
    }

    /// Classify a row-major probability map: `p >= threshold` is person.
    pub fn from_probabilities(probabilities: &[f32], width: u32, height: u32, threshold: f32) -> Result<Self> {
        let data = probabilities
            .iter()
            .map(|&p| u8::from(p >= threshold))
            .collect();
        Self::new(width, height, data)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_person(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize] == 1
    }

    pub fn person_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v == 1).count()
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (ONNX, mocks in tests, etc.)
pub trait SegmentationModel: Send {
    /// Classify every pixel of `frame`
    ///
    /// The returned map has the same dimensions as the frame.
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMap>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Produces a ready-to-run model. Loading may be slow (file IO, graph
/// optimization) and is run off the async runtime.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn SegmentationModel>>;
}
