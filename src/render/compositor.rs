use anyhow::{ensure, Result};
use image::{imageops, Rgba, RgbImage, RgbaImage};
use std::borrow::Cow;

/// Draw `frame` and then `mask` over it, the way a 2D canvas would with
/// `globalAlpha = opacity` and source-over blending.
///
/// The result always has the frame's size and is fully opaque.
pub fn draw_mask(
    frame: &RgbImage,
    mask: &RgbaImage,
    opacity: f32,
    mask_blur: u32,
    flip_horizontal: bool,
) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("draw_mask").entered();

    ensure!(
        frame.dimensions() == mask.dimensions(),
        "mask is {:?} but frame is {:?}",
        mask.dimensions(),
        frame.dimensions()
    );
    let opacity = opacity.clamp(0.0, 1.0);

    let mut mask: Cow<'_, RgbaImage> = Cow::Borrowed(mask);
    if mask_blur > 0 {
        mask = Cow::Owned(imageops::blur(mask.as_ref(), mask_blur as f32));
    }

    let mut frame: Cow<'_, RgbImage> = Cow::Borrowed(frame);
    if flip_horizontal {
        frame = Cow::Owned(imageops::flip_horizontal(frame.as_ref()));
        mask = Cow::Owned(imageops::flip_horizontal(mask.as_ref()));
    }

    let (width, height) = frame.dimensions();
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let under = frame.get_pixel(x, y);
        let over = mask.get_pixel(x, y);
        let alpha = opacity * over[3] as f32 / 255.0;

        let blend = |c: usize| (under[c] as f32 * (1.0 - alpha) + over[c] as f32 * alpha).round() as u8;
        Rgba([blend(0), blend(1), blend(2), 255])
    }))
}
