//! Dense two-frame flow after Farneback's polynomial expansion method.
//!
//! Each level fits a quadratic polynomial to the neighbourhood of every
//! pixel of both frames, then repeatedly solves for the displacement that
//! best maps one fit onto the other, averaging the per-pixel normal
//! equations over a window. Levels run coarse to fine, each starting from
//! the upsampled result of the one below.

use rayon::prelude::*;

use crate::config::{FlowFlags, FlowParams};
use crate::frame::plane::gaussian_taps;
use crate::frame::{FlowField, Plane};

/// Smallest side a pyramid level may have.
const MIN_LEVEL_SIZE: f64 = 32.0;

/// Rows and columns this close to the edge get attenuated matrices.
const BORDER: usize = 5;
const BORDER_WEIGHTS: [f32; BORDER] = [0.14, 0.14, 0.4472, 0.4472, 0.4472];

/// Applicability kernel and inverse moment terms for one neighbourhood size.
struct PolyBasis {
    n: usize,
    g: Vec<f32>,
    xg: Vec<f32>,
    xxg: Vec<f32>,
    ig11: f32,
    ig03: f32,
    ig33: f32,
    ig55: f32,
}

impl PolyBasis {
    fn new(n: usize, sigma: f64) -> Self {
        let sigma = if sigma < f32::EPSILON as f64 { n as f64 * 0.3 } else { sigma };
        let raw: Vec<f64> = (0..=n)
            .map(|k| (-((k * k) as f64) / (2.0 * sigma * sigma)).exp())
            .collect();
        let sum = raw[0] + 2.0 * raw[1..].iter().sum::<f64>();
        let g: Vec<f64> = raw.iter().map(|v| v / sum).collect();

        // Second and fourth moments of the 1-D kernel; the 6x6 normal matrix
        // of the quadratic basis is built from these alone.
        let m2: f64 = 2.0 * (1..=n).map(|k| (k * k) as f64 * g[k]).sum::<f64>();
        let m4: f64 = 2.0 * (1..=n).map(|k| (k * k * k * k) as f64 * g[k]).sum::<f64>();
        let det = m4 - m2 * m2;

        Self {
            n,
            xg: (0..=n).map(|k| (k as f64 * g[k]) as f32).collect(),
            xxg: (0..=n).map(|k| ((k * k) as f64 * g[k]) as f32).collect(),
            g: g.iter().map(|&v| v as f32).collect(),
            ig11: (1.0 / m2) as f32,
            ig03: (-m2 / det) as f32,
            ig33: (1.0 / det) as f32,
            ig55: (1.0 / (m2 * m2)) as f32,
        }
    }
}

/// Per-pixel quadratic coefficients, five per pixel in the order
/// `ry, rx, ryy, rxx, rxy`.
fn poly_expand(src: &Plane, basis: &PolyBasis) -> Vec<f32> {
    let (width, height) = (src.width(), src.height());
    let n = basis.n;
    let (g, xg, xxg) = (&basis.g, &basis.xg, &basis.xxg);
    let mut out = vec![0.0f32; width * height * 5];

    out.par_chunks_mut(width * 5).enumerate().for_each(|(y, drow)| {
        // Vertical pass, padded by `n` replicated columns on each side
        let mut row = vec![[0.0f32; 3]; width + 2 * n];
        for x in 0..width {
            let mut t = [src.get(x, y) * g[0], 0.0, 0.0];
            for k in 1..=n {
                let above = src.get(x, y.saturating_sub(k));
                let below = src.get(x, (y + k).min(height - 1));
                let p = above + below;
                t[0] += g[k] * p;
                t[1] += xg[k] * (below - above);
                t[2] += xxg[k] * p;
            }
            row[x + n] = t;
        }
        for k in 0..n {
            row[k] = row[n];
            row[width + n + k] = row[width + n - 1];
        }

        for x in 0..width {
            let c = x + n;
            let mut b1 = row[c][0] * g[0];
            let mut b2 = 0.0;
            let mut b3 = row[c][1] * g[0];
            let mut b4 = 0.0;
            let mut b5 = row[c][2] * g[0];
            let mut b6 = 0.0;
            for k in 1..=n {
                let (l, r) = (row[c - k], row[c + k]);
                let tg = r[0] + l[0];
                b1 += tg * g[k];
                b4 += tg * xxg[k];
                b2 += (r[0] - l[0]) * xg[k];
                b3 += (r[1] + l[1]) * g[k];
                b6 += (r[1] - l[1]) * xg[k];
                b5 += (r[2] + l[2]) * g[k];
            }
            let d = &mut drow[x * 5..x * 5 + 5];
            d[0] = b3 * basis.ig11;
            d[1] = b2 * basis.ig11;
            d[2] = b1 * basis.ig03 + b5 * basis.ig33;
            d[3] = b1 * basis.ig03 + b4 * basis.ig33;
            d[4] = b6 * basis.ig55;
        }
    });
    out
}

fn border_weight(i: usize, len: usize) -> f32 {
    let mut w = 1.0;
    if i < BORDER {
        w *= BORDER_WEIGHTS[i];
    }
    if i + BORDER >= len {
        w *= BORDER_WEIGHTS[len - i - 1];
    }
    w
}

/// Normal-equation terms `[g11, g12, g22, h1, h2]` for every pixel given
/// the current flow, one plane per term.
fn update_matrices(r0: &[f32], r1: &[f32], width: usize, height: usize, dx: &[f32], dy: &[f32]) -> Vec<Plane> {
    let mut m = vec![0.0f32; width * height * 5];

    m.par_chunks_mut(width * 5).enumerate().for_each(|(y, mrow)| {
        let wy = border_weight(y, height);
        for x in 0..width {
            let i = y * width + x;
            let (fdx, fdy) = (dx[i], dy[i]);
            let fx = x as f32 + fdx;
            let fy = y as f32 + fdy;
            let (x1, y1) = (fx.floor(), fy.floor());
            let p0 = &r0[i * 5..i * 5 + 5];

            let (mut r2, mut r3, r4, r5, r6);
            // Compared in f32 so NaN and huge displacements land in the fallback
            if fx >= 0.0 && fy >= 0.0 && fx <= (width - 1) as f32 && fy <= (height - 1) as f32 {
                let (ax, ay) = (fx - x1, fy - y1);
                let (x1, y1) = (x1 as usize, y1 as usize);
                let (x2, y2) = ((x1 + 1).min(width - 1), (y1 + 1).min(height - 1));
                let a00 = (1.0 - ax) * (1.0 - ay);
                let a01 = ax * (1.0 - ay);
                let a10 = (1.0 - ax) * ay;
                let a11 = ax * ay;
                let at = |yy: usize, xx: usize, c: usize| r1[(yy * width + xx) * 5 + c];
                let interp =
                    |c: usize| a00 * at(y1, x1, c) + a01 * at(y1, x2, c) + a10 * at(y2, x1, c) + a11 * at(y2, x2, c);
                r2 = interp(0);
                r3 = interp(1);
                r4 = (p0[2] + interp(2)) * 0.5;
                r5 = (p0[3] + interp(3)) * 0.5;
                r6 = (p0[4] + interp(4)) * 0.25;
            } else {
                r2 = 0.0;
                r3 = 0.0;
                r4 = p0[2];
                r5 = p0[3];
                r6 = p0[4] * 0.5;
            }

            r2 = (p0[0] - r2) * 0.5;
            r3 = (p0[1] - r3) * 0.5;
            r2 += r4 * fdy + r6 * fdx;
            r3 += r6 * fdy + r5 * fdx;

            let scale = wy * border_weight(x, width);
            let (r2, r3, r4, r5, r6) = (r2 * scale, r3 * scale, r4 * scale, r5 * scale, r6 * scale);

            let out = &mut mrow[x * 5..x * 5 + 5];
            out[0] = r4 * r4 + r6 * r6;
            out[1] = (r4 + r5) * r6;
            out[2] = r5 * r5 + r6 * r6;
            out[3] = r4 * r2 + r6 * r3;
            out[4] = r6 * r2 + r5 * r3;
        }
    });

    (0..5)
        .map(|c| {
            let data = m.iter().skip(c).step_by(5).copied().collect();
            Plane::from_vec(width, height, data)
        })
        .collect()
}

/// Solve the window-averaged 2x2 systems for the new displacement.
fn solve_flow(m: &[Plane], dx: &mut [f32], dy: &mut [f32]) {
    let (g11, g12, g22, h1, h2) = (m[0].data(), m[1].data(), m[2].data(), m[3].data(), m[4].data());
    dx.par_iter_mut()
        .zip(dy.par_iter_mut())
        .enumerate()
        .for_each(|(i, (fx, fy))| {
            let idet = 1.0 / (g11[i] * g22[i] - g12[i] * g12[i] + 1e-3);
            *fx = (g11[i] * h2[i] - g12[i] * h1[i]) * idet;
            *fy = (g22[i] * h1[i] - g12[i] * h2[i]) * idet;
        });
}

/// Half kernel used to average the matrices over the window.
fn window_taps(params: &FlowParams) -> Vec<f32> {
    let radius = params.window_size / 2;
    if params.flags.contains(FlowFlags::GAUSSIAN_WINDOW) {
        gaussian_taps(radius, radius as f64 * 0.3)
    } else {
        vec![1.0 / (2 * radius + 1) as f32; radius + 1]
    }
}

/// Number of levels above the base that stay at least `MIN_LEVEL_SIZE`.
fn pyramid_depth(width: usize, height: usize, params: &FlowParams) -> usize {
    let mut scale = 1.0;
    let mut depth = 0;
    while depth < params.levels {
        scale *= params.pyramid_scale;
        if (width as f64) * scale < MIN_LEVEL_SIZE || (height as f64) * scale < MIN_LEVEL_SIZE {
            break;
        }
        depth += 1;
    }
    depth
}

fn fast_pyramid(base: &Plane, depth: usize) -> Vec<Plane> {
    let mut levels = vec![base.clone()];
    for k in 1..=depth {
        let next = levels[k - 1].pyr_down();
        levels.push(next);
    }
    levels
}

/// Flow from `prev` to `next`: `prev(p) ≈ next(p + flow(p))`.
///
/// Inputs are luma planes on the 8-bit scale. `seed` is used as the
/// starting estimate when `USE_INITIAL_FLOW` is set.
pub(crate) fn calc_flow(prev: &Plane, next: &Plane, params: &FlowParams, seed: Option<&FlowField>) -> FlowField {
    let (width, height) = (prev.width(), prev.height());
    let depth = pyramid_depth(width, height, params);
    let basis = PolyBasis::new(params.poly_expansion_neighborhood, params.poly_expansion_sigma);
    let taps = window_taps(params);
    let seed = seed.filter(|_| params.flags.contains(FlowFlags::USE_INITIAL_FLOW));

    let pyramids = params
        .use_fast_pyramids
        .then(|| (fast_pyramid(prev, depth), fast_pyramid(next, depth)));

    let mut coarser: Option<FlowField> = None;
    for k in (0..=depth).rev() {
        let scale = params.pyramid_scale.powi(k as i32);
        let (i0, i1) = match &pyramids {
            Some((p0, p1)) => (p0[k].clone(), p1[k].clone()),
            None => {
                let sigma = (1.0 / scale - 1.0) * 0.5;
                let ksize = (((sigma * 5.0).round() as usize) | 1).max(3);
                let w = ((width as f64 * scale).round() as usize).max(1);
                let h = ((height as f64 * scale).round() as usize).max(1);
                (
                    prev.gaussian_blur(ksize, sigma).resize_bilinear(w, h),
                    next.gaussian_blur(ksize, sigma).resize_bilinear(w, h),
                )
            }
        };
        let (w, h) = (i0.width(), i0.height());

        let mut flow = match (&coarser, seed) {
            (Some(coarse), _) => coarse.resized(w, h),
            (None, Some(seed)) => seed.resized(w, h),
            (None, None) => FlowField::zeros(w, h),
        };

        let r0 = poly_expand(&i0, &basis);
        let r1 = poly_expand(&i1, &basis);
        let (dx, dy) = flow.components_mut();
        let mut m = update_matrices(&r0, &r1, w, h, dx, dy);
        for iteration in 0..params.iterations {
            let averaged: Vec<Plane> = m.iter().map(|p| p.convolve_symmetric(&taps)).collect();
            solve_flow(&averaged, dx, dy);
            if iteration + 1 < params.iterations {
                m = update_matrices(&r0, &r1, w, h, dx, dy);
            }
        }
        coarser = Some(flow);
    }

    coarser.unwrap_or_else(|| FlowField::zeros(width, height))
}
