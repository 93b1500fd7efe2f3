use super::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage};
use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Presents the canvas on a v4l2loopback device as YUYV
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let format = Output::set_format(&device, &requested).context("Failed to set YUYV output format")?;
        tracing::debug!("Loopback format: {}", format);

        // Frames are written straight to the device node
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            file,
            width,
            height,
            scratch: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Pack pixel pairs as Y0 U Y1 V, averaging chroma across the pair.
/// Alpha is ignored; the canvas is opaque.
fn pack_yuyv(image: &RgbaImage, out: &mut Vec<u8>) {
    out.clear();
    for row in image.rows() {
        let pixels: Vec<&Rgba<u8>> = row.collect();
        for pair in pixels.chunks(2) {
            let first = pair[0];
            let second = pair.get(1).copied().unwrap_or(first);

            let (y0, u0, v0) = rgb_to_yuv(first);
            let (y1, u1, v1) = rgb_to_yuv(second);

            out.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }
}

/// BT.601 RGB -> YUV
fn rgb_to_yuv(pixel: &Rgba<u8>) -> (u8, u8, u8) {
    let [r, g, b, _] = pixel.0.map(f32::from);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = (-0.147 * r - 0.289 * g + 0.436 * b + 128.0).clamp(0.0, 255.0) as u8;
    let v = (0.615 * r - 0.515 * g - 0.100 * b + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let frame: Cow<'_, RgbaImage> = if frame.dimensions() != (self.width, self.height) {
            Cow::Owned(imageops::resize(
                frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            ))
        } else {
            Cow::Borrowed(frame)
        };

        pack_yuyv(&frame, &mut self.scratch);

        self.file
            .write_all(&self.scratch)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
