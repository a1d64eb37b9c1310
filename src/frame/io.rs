use std::path::Path;

use image::{DynamicImage, ImageBuffer};

use super::pixel_buffer::{PixelBuffer, Samples};
use crate::error::FrameError;

/// Decode an image file into a frame, keeping 16-bit depth when present.
pub fn load_frame(path: &Path) -> Result<PixelBuffer, FrameError> {
    let img = image::open(path)?;
    from_dynamic(img)
}

pub fn from_dynamic(img: DynamicImage) -> Result<PixelBuffer, FrameError> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    match img {
        DynamicImage::ImageLuma8(buf) => PixelBuffer::new(w, h, 1, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => PixelBuffer::new(w, h, 3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => PixelBuffer::new(w, h, 4, buf.into_raw()),
        DynamicImage::ImageLuma16(buf) => PixelBuffer::from_u16(w, h, 1, buf.into_raw()),
        DynamicImage::ImageRgb16(buf) => PixelBuffer::from_u16(w, h, 3, buf.into_raw()),
        DynamicImage::ImageRgba16(buf) => PixelBuffer::from_u16(w, h, 4, buf.into_raw()),
        other => PixelBuffer::new(w, h, 4, other.to_rgba8().into_raw()),
    }
}

pub fn to_dynamic(frame: &PixelBuffer) -> Result<DynamicImage, FrameError> {
    let (w, h) = (frame.width() as u32, frame.height() as u32);
    let mismatch = || FrameError::LengthMismatch {
        expected: frame.width() * frame.height() * frame.channels(),
        actual: frame.samples().len(),
    };
    let img = match (frame.samples(), frame.channels()) {
        (Samples::U8(data), 1) => DynamicImage::ImageLuma8(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
        (Samples::U8(data), 3) => DynamicImage::ImageRgb8(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
        (Samples::U8(data), _) => DynamicImage::ImageRgba8(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
        (Samples::U16(data), 1) => DynamicImage::ImageLuma16(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
        (Samples::U16(data), 3) => DynamicImage::ImageRgb16(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
        (Samples::U16(data), _) => DynamicImage::ImageRgba16(ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(mismatch)?),
    };
    Ok(img)
}

/// Encode a frame; the format follows the file extension.
pub fn save_frame(frame: &PixelBuffer, path: &Path) -> Result<(), FrameError> {
    to_dynamic(frame)?.save(path)?;
    Ok(())
}
