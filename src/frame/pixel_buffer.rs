use serde::Serialize;

use super::plane::Plane;
use crate::error::FrameError;

/// Storage type of one sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SampleFormat {
    U8,
    U16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::U16 => 2,
        }
    }

    pub fn max_value(self) -> f32 {
        match self {
            SampleFormat::U8 => u8::MAX as f32,
            SampleFormat::U16 => u16::MAX as f32,
        }
    }
}

/// Row-major interleaved samples.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::U8(_) => SampleFormat::U8,
            Samples::U16(_) => SampleFormat::U16,
        }
    }

    #[inline]
    fn get(&self, i: usize) -> f32 {
        match self {
            Samples::U8(v) => v[i] as f32,
            Samples::U16(v) => v[i] as f32,
        }
    }
}

/// An image with fixed dimensions and 1, 3 or 4 interleaved channels.
///
/// Buffers are never modified after construction; synthesis always
/// produces a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    channels: usize,
    samples: Samples,
}

impl PixelBuffer {
    /// Wrap 8-bit samples.
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::from_samples(width, height, channels, Samples::U8(data))
    }

    /// Wrap 16-bit samples.
    pub fn from_u16(width: usize, height: usize, channels: usize, data: Vec<u16>) -> Result<Self, FrameError> {
        Self::from_samples(width, height, channels, Samples::U16(data))
    }

    pub fn from_samples(width: usize, height: usize, channels: usize, samples: Samples) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions(width, height));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = width * height * channels;
        if samples.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            samples,
        })
    }

    /// A buffer with every 8-bit sample set to `value`.
    pub fn filled(width: usize, height: usize, channels: usize, value: u8) -> Result<Self, FrameError> {
        Self::new(width, height, channels, vec![value; width * height * channels])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.samples.format()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.samples {
            Samples::U8(v) => Some(v),
            Samples::U16(_) => None,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * self.format().bytes_per_sample()
    }

    pub fn same_dimensions(&self, other: &PixelBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Raw sample value at `(x, y)` in channel `c`.
    pub fn sample(&self, x: usize, y: usize, c: usize) -> f32 {
        self.samples.get((y * self.width + x) * self.channels + c)
    }

    /// Extract one channel, normalized to [0, 1].
    pub fn channel_plane(&self, c: usize) -> Plane {
        let scale = 1.0 / self.format().max_value();
        let data = (0..self.width * self.height)
            .map(|i| self.samples.get(i * self.channels + c) * scale)
            .collect();
        Plane::from_vec(self.width, self.height, data)
    }

    /// Luma on the 8-bit scale (BT.601 weights, channel order R, G, B).
    pub fn luma_plane(&self) -> Plane {
        let to_8bit = u8::MAX as f32 / self.format().max_value();
        let data = (0..self.width * self.height)
            .map(|i| {
                let base = i * self.channels;
                let value = if self.channels == 1 {
                    self.samples.get(base)
                } else {
                    0.299 * self.samples.get(base)
                        + 0.587 * self.samples.get(base + 1)
                        + 0.114 * self.samples.get(base + 2)
                };
                value * to_8bit
            })
            .collect();
        Plane::from_vec(self.width, self.height, data)
    }

    /// Merge normalized planes back into a buffer, rescaling to `format`.
    pub fn from_planes(planes: &[Plane], format: SampleFormat) -> Result<Self, FrameError> {
        let first = planes.first().ok_or(FrameError::UnsupportedChannels(0))?;
        let (width, height, channels) = (first.width(), first.height(), planes.len());
        if let Some(odd) = planes
            .iter()
            .find(|p| p.width() != width || p.height() != height)
        {
            return Err(FrameError::LengthMismatch {
                expected: width * height,
                actual: odd.width() * odd.height(),
            });
        }

        let max = format.max_value();
        let quantize = |v: f32| (v * max).round().clamp(0.0, max);
        let pixel_count = width * height;
        let samples = match format {
            SampleFormat::U8 => {
                let mut out = Vec::with_capacity(pixel_count * channels);
                for i in 0..pixel_count {
                    out.extend(planes.iter().map(|p| quantize(p.data()[i]) as u8));
                }
                Samples::U8(out)
            }
            SampleFormat::U16 => {
                let mut out = Vec::with_capacity(pixel_count * channels);
                for i in 0..pixel_count {
                    out.extend(planes.iter().map(|p| quantize(p.data()[i]) as u16));
                }
                Samples::U16(out)
            }
        };
        Self::from_samples(width, height, channels, samples)
    }
}
