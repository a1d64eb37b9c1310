//! Motion-compensated frame blending.
//!
//! Each flow is first splatted to the intermediate time so that the
//! displacement is known at every output pixel rather than at the source
//! pixels. The accumulated splat weight tells which output pixels the
//! motion actually reaches from each end; pixels reached from one end only
//! take that end's sample, and pixels reached from neither fall back to a
//! plain cross-fade.

use rayon::prelude::*;
use tracing::trace;

use super::{admitted_session, check_pair};
use crate::device::capability::{CapabilityRequirement, KernelFamily};
use crate::device::DeviceRegistry;
use crate::error::MotionError;
use crate::frame::{FlowField, PixelBuffer, Plane};

/// Splat weight below which a pixel counts as not reached.
const COVERAGE_EPSILON: f32 = 1e-3;

/// Flow carried to time `t`, with the weight that landed on each pixel.
struct SplatField {
    dx: Vec<f32>,
    dy: Vec<f32>,
    weight: Vec<f32>,
}

impl SplatField {
    fn empty(len: usize) -> Self {
        Self {
            dx: vec![0.0; len],
            dy: vec![0.0; len],
            weight: vec![0.0; len],
        }
    }

    fn merge(mut self, other: SplatField) -> Self {
        for i in 0..self.weight.len() {
            self.dx[i] += other.dx[i];
            self.dy[i] += other.dy[i];
            self.weight[i] += other.weight[i];
        }
        self
    }

    #[inline]
    fn covered(&self, i: usize) -> bool {
        self.weight[i] > COVERAGE_EPSILON
    }
}

/// Move every vector of `flow` by `scale` times itself and spread it over
/// the four pixels around where it lands.
fn splat(flow: &FlowField, scale: f32) -> SplatField {
    let (width, height) = (flow.width(), flow.height());
    let bands = rayon::current_num_threads().clamp(1, height);
    let rows_per_band = (height + bands - 1) / bands;

    let mut field = (0..bands)
        .into_par_iter()
        .map(|band| {
            let mut acc = SplatField::empty(width * height);
            let y_end = ((band + 1) * rows_per_band).min(height);
            for y in band * rows_per_band..y_end {
                for x in 0..width {
                    let (fx, fy) = flow.at(x, y);
                    let tx = x as f32 + fx * scale;
                    let ty = y as f32 + fy * scale;
                    if !tx.is_finite() || !ty.is_finite() {
                        continue;
                    }
                    let (x0, y0) = (tx.floor(), ty.floor());
                    let (ax, ay) = (tx - x0, ty - y0);
                    let corners = [
                        (x0, y0, (1.0 - ax) * (1.0 - ay)),
                        (x0 + 1.0, y0, ax * (1.0 - ay)),
                        (x0, y0 + 1.0, (1.0 - ax) * ay),
                        (x0 + 1.0, y0 + 1.0, ax * ay),
                    ];
                    for (cx, cy, w) in corners {
                        if w <= 0.0 || cx < 0.0 || cy < 0.0 || cx >= width as f32 || cy >= height as f32 {
                            continue;
                        }
                        let i = cy as usize * width + cx as usize;
                        acc.dx[i] += fx * w;
                        acc.dy[i] += fy * w;
                        acc.weight[i] += w;
                    }
                }
            }
            acc
        })
        .reduce(|| SplatField::empty(width * height), SplatField::merge);

    field
        .dx
        .par_iter_mut()
        .zip(field.dy.par_iter_mut())
        .zip(field.weight.par_iter())
        .for_each(|((dx, dy), &w)| {
            if w > COVERAGE_EPSILON {
                *dx /= w;
                *dy /= w;
            } else {
                *dx = 0.0;
                *dy = 0.0;
            }
        });
    field
}

/// Where to read each source for one output pixel, and how much of each.
#[derive(Clone, Copy)]
struct Tap {
    ax: f32,
    ay: f32,
    bx: f32,
    by: f32,
    wa: f32,
    wb: f32,
}

fn plan_taps(forward: &SplatField, backward: &SplatField, width: usize, height: usize, t: f32) -> Vec<Tap> {
    (0..width * height)
        .into_par_iter()
        .map(|i| {
            let (x, y) = ((i % width) as f32, (i / width) as f32);
            let from_a = (x - t * forward.dx[i], y - t * forward.dy[i]);
            let from_b = (x - (1.0 - t) * backward.dx[i], y - (1.0 - t) * backward.dy[i]);
            let (a, b, wa, wb) = match (forward.covered(i), backward.covered(i)) {
                (true, true) => (from_a, from_b, 1.0 - t, t),
                (true, false) => (from_a, from_b, 1.0, 0.0),
                (false, true) => (from_a, from_b, 0.0, 1.0),
                (false, false) => ((x, y), (x, y), 1.0 - t, t),
            };
            Tap {
                ax: a.0,
                ay: a.1,
                bx: b.0,
                by: b.1,
                wa,
                wb,
            }
        })
        .collect()
}

fn blend_channel(a: &Plane, b: &Plane, taps: &[Tap]) -> Plane {
    let data = taps
        .iter()
        .map(|tap| {
            let mut v = 0.0;
            if tap.wa > 0.0 {
                v += tap.wa * a.sample_bilinear(tap.ax, tap.ay);
            }
            if tap.wb > 0.0 {
                v += tap.wb * b.sample_bilinear(tap.bx, tap.by);
            }
            v
        })
        .collect();
    Plane::from_vec(a.width(), a.height(), data)
}

/// Produces intermediate frames from a frame pair and its flows.
///
/// Blending always runs on the bound session's host pool, also when an
/// OpenCL device is bound; only flow estimation uses the device.
#[derive(Debug, Clone)]
pub struct FrameSynthesizer {
    requirement: CapabilityRequirement,
}

impl Default for FrameSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynthesizer {
    pub const KERNEL_FAMILIES: [KernelFamily; 2] = [KernelFamily::FlowAccumulation, KernelFamily::GaussianBlur];

    pub fn new() -> Self {
        Self {
            requirement: CapabilityRequirement::for_families(&Self::KERNEL_FAMILIES),
        }
    }

    pub fn requirement(&self) -> &CapabilityRequirement {
        &self.requirement
    }

    /// The frame at time `t` between `a` (t = 0) and `b` (t = 1).
    ///
    /// `t` may be 0 or 1, which reproduce `a` and `b`. The result has the
    /// layout and sample format of `a`.
    pub fn synthesize(
        &self,
        registry: &DeviceRegistry,
        a: &PixelBuffer,
        b: &PixelBuffer,
        forward: &FlowField,
        backward: &FlowField,
        t: f32,
    ) -> Result<PixelBuffer, MotionError> {
        if !(0.0..=1.0).contains(&t) {
            return Err(MotionError::InvalidTimeStep(t));
        }
        check_pair(a, b)?;
        for flow in [forward, backward] {
            if !flow.matches(a) {
                return Err(MotionError::DimensionMismatch {
                    first_width: a.width(),
                    first_height: a.height(),
                    second_width: flow.width(),
                    second_height: flow.height(),
                });
            }
        }
        let session = admitted_session(registry, &self.requirement)?;

        let frame = session.executor().host().run("blend", || {
            let (fwd, bwd) = rayon::join(|| splat(forward, t), || splat(backward, 1.0 - t));
            let taps = plan_taps(&fwd, &bwd, a.width(), a.height(), t);
            let planes: Vec<Plane> = (0..a.channels())
                .into_par_iter()
                .map(|c| blend_channel(&a.channel_plane(c), &b.channel_plane(c), &taps))
                .collect();
            PixelBuffer::from_planes(&planes, a.format())
        })??;
        trace!("Synthesized t={:.4} on {}", t, session.descriptor().device_name);
        Ok(frame)
    }
}
