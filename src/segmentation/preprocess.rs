use super::types::SegmentationMap;
use anyhow::{ensure, Result};
use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::Array4;
use std::borrow::Cow;

/// How pixel values are scaled before inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// `[0, 255]` -> `[0, 1]`
    #[default]
    UnitRange,
    /// `[0, 255]` -> `[-1, 1]` (MobileNet-style backbones)
    Symmetric,
}

impl Normalization {
    fn apply(self, value: u8) -> f32 {
        match self {
            Normalization::UnitRange => value as f32 / 255.0,
            Normalization::Symmetric => value as f32 / 127.5 - 1.0,
        }
    }
}

/// Converts frames to model tensors and model output back to frame-sized maps
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, normalization: Normalization) -> Self {
        Self {
            target_width,
            target_height,
            normalization,
        }
    }

    /// Resize to the model input and lay out as `[1, 3, height, width]`
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized: Cow<'_, RgbImage> = if image.dimensions() != (self.target_width, self.target_height) {
            Cow::Owned(imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            ))
        } else {
            Cow::Borrowed(image)
        };

        let shape = (1, 3, self.target_height as usize, self.target_width as usize);
        Array4::from_shape_fn(shape, |(_, c, y, x)| {
            let pixel = resized.get_pixel(x as u32, y as u32);
            self.normalization.apply(pixel[c])
        })
    }

    /// Scale a person-probability map to the frame size and threshold it
    pub fn postprocess(
        probabilities: &[f32],
        map_width: u32,
        map_height: u32,
        frame_width: u32,
        frame_height: u32,
        threshold: f32,
    ) -> Result<SegmentationMap> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            probabilities.len() == (map_width as usize) * (map_height as usize),
            "model produced {} values for a {}x{} map",
            probabilities.len(),
            map_width,
            map_height
        );

        if (map_width, map_height) == (frame_width, frame_height) {
            return SegmentationMap::from_probabilities(probabilities, frame_width, frame_height, threshold);
        }

        let map: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(map_width, map_height, probabilities.to_vec())
                .ok_or_else(|| anyhow::anyhow!("probability buffer does not fit {map_width}x{map_height}"))?;

        // Bilinear, like BodyPix's own upscaling of the model output
        let scaled = imageops::resize(&map, frame_width, frame_height, imageops::FilterType::Triangle);

        SegmentationMap::from_probabilities(scaled.as_raw(), frame_width, frame_height, threshold)
    }
}
