use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

use crate::media::InlineImage;

pub const CAPTURE_JPEG_QUALITY: u8 = 90;

/// A playable surface whose current picture can be read back.
pub trait VideoSurface {
    fn is_paused(&self) -> bool;

    /// Pixels currently shown, or `None` when the surface has no rendering
    /// context to read from.
    fn rendered_frame(&self) -> Option<&DynamicImage>;
}

/// Surface backed by a single decoded still, used wherever a real player is
/// not available.
#[derive(Debug, Clone)]
pub struct StillFrameSurface {
    frame: Option<DynamicImage>,
    paused: bool,
}

impl StillFrameSurface {
    pub fn new(frame: DynamicImage) -> Self {
        Self {
            frame: Some(frame),
            paused: true,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let frame =
            image::open(path).with_context(|| format!("failed decoding {}", path.display()))?;
        Ok(Self::new(frame))
    }

    pub fn without_context() -> Self {
        Self {
            frame: None,
            paused: true,
        }
    }

    pub fn play(&mut self) {
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }
}

impl VideoSurface for StillFrameSurface {
    fn is_paused(&self) -> bool {
        self.paused
    }

    fn rendered_frame(&self) -> Option<&DynamicImage> {
        self.frame.as_ref()
    }
}

/// JPEG of exactly what the surface shows, at its native size. A playing
/// surface or one without a rendering context yields `Ok(None)`.
pub fn capture_frame(surface: &dyn VideoSurface) -> Result<Option<InlineImage>> {
    if !surface.is_paused() {
        return Ok(None);
    }
    let Some(frame) = surface.rendered_frame() else {
        return Ok(None);
    };
    let bytes = encode_jpeg(frame, CAPTURE_JPEG_QUALITY)?;
    Ok(Some(InlineImage::new(bytes, "image/jpeg")))
}

pub fn encode_jpeg(frame: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let flattened = flatten_onto_white(frame);
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(flattened))
        .context("failed encoding frame as JPEG")?;
    Ok(bytes)
}

// JPEG has no alpha channel.
fn flatten_onto_white(frame: &DynamicImage) -> RgbImage {
    let rgba = frame.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}
