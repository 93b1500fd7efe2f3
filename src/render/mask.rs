use crate::segmentation::SegmentationMap;
use image::{Rgba, RgbaImage};

/// How a segmentation map is turned into an overlay and blended
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskStyle {
    pub foreground: Rgba<u8>,
    pub background: Rgba<u8>,
    /// Overlay opacity in `[0, 1]`
    pub opacity: f32,
    /// Gaussian blur radius applied to the overlay, 0 disables it
    pub mask_blur: u32,
    pub flip_horizontal: bool,
}

impl MaskStyle {
    /// Person shows through untouched, everything else is greyed out.
    pub const PERSON_CUTOUT: Self = Self {
        foreground: Rgba([0, 0, 0, 0]),
        background: Rgba([127, 127, 127, 255]),
        opacity: 0.7,
        mask_blur: 0,
        flip_horizontal: false,
    };
}

impl Default for MaskStyle {
    fn default() -> Self {
        Self::PERSON_CUTOUT
    }
}

/// Paint person pixels with `foreground` and the rest with `background`
pub fn to_mask(segmentation: &SegmentationMap, foreground: Rgba<u8>, background: Rgba<u8>) -> RgbaImage {
    let (width, height) = segmentation.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        if segmentation.is_person(x, y) {
            foreground
        } else {
            background
        }
    })
}
