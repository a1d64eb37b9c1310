use rayon::prelude::*;

use super::pixel_buffer::PixelBuffer;
use crate::error::FrameError;

/// Per-pixel displacement in pixel units. `(dx, dy)` at `(x, y)` of the
/// source frame points at the matching position in the target frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowField {
    width: usize,
    height: usize,
    dx: Vec<f32>,
    dy: Vec<f32>,
}

impl FlowField {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            dx: vec![0.0; width * height],
            dy: vec![0.0; width * height],
        }
    }

    /// A field with the same displacement everywhere.
    pub fn uniform(width: usize, height: usize, dx: f32, dy: f32) -> Self {
        Self {
            width,
            height,
            dx: vec![dx; width * height],
            dy: vec![dy; width * height],
        }
    }

    pub fn from_components(width: usize, height: usize, dx: Vec<f32>, dy: Vec<f32>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions(width, height));
        }
        for component in [&dx, &dy] {
            if component.len() != width * height {
                return Err(FrameError::LengthMismatch {
                    expected: width * height,
                    actual: component.len(),
                });
            }
        }
        Ok(Self { width, height, dx, dy })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dx(&self) -> &[f32] {
        &self.dx
    }

    pub fn dy(&self) -> &[f32] {
        &self.dy
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> (f32, f32) {
        let i = y * self.width + x;
        (self.dx[i], self.dy[i])
    }

    pub fn matches(&self, frame: &PixelBuffer) -> bool {
        self.width == frame.width() && self.height == frame.height()
    }

    /// No NaN or infinite displacement anywhere.
    pub fn is_finite(&self) -> bool {
        self.dx.iter().chain(&self.dy).all(|v| v.is_finite())
    }

    pub(crate) fn components_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.dx, &mut self.dy)
    }

    /// Mean displacement over the half-open rectangle `[x0, x1) x [y0, y1)`.
    pub fn region_mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> (f32, f32) {
        let (x1, y1) = (x1.min(self.width), y1.min(self.height));
        let mut sum = (0.0f64, 0.0f64);
        let mut count = 0usize;
        for y in y0..y1 {
            for x in x0..x1 {
                let (dx, dy) = self.at(x, y);
                sum.0 += dx as f64;
                sum.1 += dy as f64;
                count += 1;
            }
        }
        if count == 0 {
            return (0.0, 0.0);
        }
        ((sum.0 / count as f64) as f32, (sum.1 / count as f64) as f32)
    }

    /// Bilinear resize; displacements are rescaled with the grid.
    pub fn resized(&self, width: usize, height: usize) -> FlowField {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        let sample = |values: &[f32], x: f32, y: f32| -> f32 {
            let x = x.clamp(0.0, (self.width - 1) as f32);
            let y = y.clamp(0.0, (self.height - 1) as f32);
            let (x0, y0) = (x.floor() as usize, y.floor() as usize);
            let x1 = (x0 + 1).min(self.width - 1);
            let y1 = (y0 + 1).min(self.height - 1);
            let (fx, fy) = (x - x0 as f32, y - y0 as f32);
            let row = |yy: usize| values[yy * self.width + x0] * (1.0 - fx) + values[yy * self.width + x1] * fx;
            row(y0) * (1.0 - fy) + row(y1) * fy
        };

        let mut dx = vec![0.0f32; width * height];
        let mut dy = vec![0.0f32; width * height];
        dx.par_chunks_mut(width)
            .zip(dy.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| {
                let src_y = (y as f32 + 0.5) * sy - 0.5;
                for x in 0..width {
                    let src_x = (x as f32 + 0.5) * sx - 0.5;
                    row_x[x] = sample(&self.dx, src_x, src_y) / sx;
                    row_y[x] = sample(&self.dy, src_x, src_y) / sy;
                }
            });
        FlowField { width, height, dx, dy }
    }

    /// Render the field as RGB: hue follows direction, brightness follows
    /// magnitude normalized to the largest displacement.
    pub fn visualize(&self) -> Result<PixelBuffer, FrameError> {
        let magnitudes: Vec<f32> = self
            .dx
            .iter()
            .zip(&self.dy)
            .map(|(dx, dy)| dx.hypot(*dy))
            .collect();
        let peak = magnitudes.iter().cloned().fold(0.0f32, f32::max);

        let mut rgb = Vec::with_capacity(self.width * self.height * 3);
        for (i, magnitude) in magnitudes.iter().enumerate() {
            let angle = self.dy[i].atan2(self.dx[i]).to_degrees().rem_euclid(360.0);
            let value = if peak > 0.0 { magnitude / peak } else { 0.0 };
            rgb.extend_from_slice(&hsv_to_rgb(angle, 1.0, value));
        }
        PixelBuffer::new(self.width, self.height, 3, rgb)
    }
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [u8; 3] {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}
