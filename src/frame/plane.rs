use rayon::prelude::*;

/// Single-channel float image used as the working format of every kernel.
///
/// Pixel centers sit on integer coordinates. Reads outside the grid clamp
/// to the nearest edge pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub(crate) fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self::from_vec(width, height, vec![0.0; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear read at a fractional position, clamped at the borders.
    #[inline]
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        // NaN coordinates fall back to the origin rather than poisoning the sum
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, max_x) };
        let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, max_y) };

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Resize with half-pixel-center bilinear mapping.
    pub fn resize_bilinear(&self, width: usize, height: usize) -> Plane {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        let mut data = vec![0.0f32; width * height];
        data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            let src_y = (y as f32 + 0.5) * sy - 0.5;
            for (x, out) in row.iter_mut().enumerate() {
                let src_x = (x as f32 + 0.5) * sx - 0.5;
                *out = self.sample_bilinear(src_x, src_y);
            }
        });
        Plane::from_vec(width, height, data)
    }

    /// Separable convolution with a symmetric kernel given as its center tap
    /// followed by one side (`taps[0]` is the center).
    pub(crate) fn convolve_symmetric(&self, taps: &[f32]) -> Plane {
        let radius = taps.len() - 1;
        let (width, height) = (self.width, self.height);

        let mut vertical = vec![0.0f32; width * height];
        vertical.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let mut acc = self.get(x, y) * taps[0];
                for k in 1..=radius {
                    let above = self.get(x, y.saturating_sub(k));
                    let below = self.get(x, (y + k).min(height - 1));
                    acc += (above + below) * taps[k];
                }
                *out = acc;
            }
        });

        let mut data = vec![0.0f32; width * height];
        data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            let src = &vertical[y * width..(y + 1) * width];
            for (x, out) in row.iter_mut().enumerate() {
                let mut acc = src[x] * taps[0];
                for k in 1..=radius {
                    let left = src[x.saturating_sub(k)];
                    let right = src[(x + k).min(width - 1)];
                    acc += (left + right) * taps[k];
                }
                *out = acc;
            }
        });
        Plane::from_vec(width, height, data)
    }

    /// Gaussian smoothing with an odd kernel size. A non-positive sigma is
    /// derived from the kernel size.
    pub fn gaussian_blur(&self, ksize: usize, sigma: f64) -> Plane {
        let radius = ksize / 2;
        let sigma = if sigma > 0.0 {
            sigma
        } else {
            0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
        };
        self.convolve_symmetric(&gaussian_taps(radius, sigma))
    }

    /// Halve the plane with a 5-tap binomial filter, keeping even pixels.
    pub fn pyr_down(&self) -> Plane {
        let smoothed = self.convolve_symmetric(&[6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0]);
        let width = (self.width + 1) / 2;
        let height = (self.height + 1) / 2;
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(smoothed.get(x * 2, y * 2));
            }
        }
        Plane::from_vec(width, height, data)
    }
}

/// Normalized half Gaussian kernel: center tap first, then one side.
pub(crate) fn gaussian_taps(radius: usize, sigma: f64) -> Vec<f32> {
    if radius == 0 || sigma <= 0.0 {
        return vec![1.0];
    }
    let raw: Vec<f64> = (0..=radius)
        .map(|x| (-((x * x) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum = raw[0] + 2.0 * raw[1..].iter().sum::<f64>();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}
