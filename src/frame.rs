//! Raw and encoded frame handling.
//!
//! Frames move through the engine in two shapes:
//! - `RawFrame`: tightly packed RGB24 pixels straight from a capture
//!   backend. Transient; not retained after encoding.
//! - encoded JPEG bytes: produced once per pull-loop iteration and handed
//!   to the message sink (and, in camera mode, the recorder).
//!
//! The recorder works the other way around: it decodes an emitted JPEG back
//! to pixels before writing it to the clip, so the writer always receives
//! the exact frame the dispatcher saw.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

use crate::error::EngineError;

const JPEG_QUALITY: u8 = 90;

/// Tightly packed RGB24 frame.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// Per-engine encode settings, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct EncodeSettings {
    /// Resize every frame to `width` x `height` before encoding.
    pub resize: bool,
    pub width: u32,
    pub height: u32,
}

/// Encode a raw frame to JPEG, resizing first when configured.
pub fn encode_jpeg(frame: &RawFrame, settings: &EncodeSettings) -> Result<Vec<u8>, EngineError> {
    let image = rgb_image(frame)?;
    let image = if settings.resize {
        image::imageops::resize(&image, settings.width, settings.height, FilterType::Triangle)
    } else {
        image
    };

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut buf), JPEG_QUALITY)
        .encode_image(&image)
        .map_err(|err| EngineError::FrameCodec(format!("jpeg encode: {err}")))?;
    Ok(buf)
}

/// Decode an emitted JPEG back to RGB24 pixels (recorder path).
pub fn decode_jpeg(bytes: &[u8]) -> Result<RawFrame, EngineError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|err| EngineError::FrameCodec(format!("jpeg decode: {err}")))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok(RawFrame::new(image.into_raw(), width, height))
}

/// Resize a raw frame to the given dimensions.
pub fn resize_rgb(frame: &RawFrame, width: u32, height: u32) -> Result<RawFrame, EngineError> {
    if frame.width == width && frame.height == height {
        return Ok(frame.clone());
    }
    let image = rgb_image(frame)?;
    let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
    Ok(RawFrame::new(resized.into_raw(), width, height))
}

fn rgb_image(frame: &RawFrame) -> Result<RgbImage, EngineError> {
    RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        EngineError::FrameCodec(format!(
            "pixel buffer of {} bytes does not match {}x{} RGB24",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
