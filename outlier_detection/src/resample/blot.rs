//! Inverse resampling: sample a grid image at each exposure pixel.

use glam::DVec2;
use rayon::prelude::*;

use super::Interp;
use super::kernels::lanczos;
use crate::common::Buffer2;
use crate::exposure::ExposureMeta;
use crate::wcs::{OutputGrid, PixelMap};

/// Reproject `reference` (on `grid`) onto the pixels of an exposure with
/// metadata `target` and shape `(width, height)`.
///
/// A blotted pixel is `NaN` when its centre maps outside the grid or when
/// every sample with non-zero interpolation weight is `NaN`. Finite samples
/// are renormalised so a `NaN` neighbour never leaks into a finite result.
pub fn blot(
    reference: &Buffer2<f32>,
    grid: &OutputGrid,
    target: &ExposureMeta,
    shape: (usize, usize),
    interp: Interp,
) -> Result<Buffer2<f32>, String> {
    assert_eq!(
        reference.shape(),
        grid.shape(),
        "reference image must match the output grid"
    );
    let wcs = target
        .wcs
        .as_deref()
        .ok_or_else(|| "exposure has no WCS".to_string())?;
    wcs.validate()?;

    let map = PixelMap::new(wcs, grid.wcs.as_ref());
    let (width, height) = shape;
    let mut out = Buffer2::new_filled(width, height, f32::NAN);
    if width == 0 {
        return Ok(out);
    }

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let center = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                if let Some(p) = map.apply(center) {
                    *value = sample(reference, p, interp);
                }
            }
        });

    Ok(out)
}

/// Sample `image` at grid coordinate `p` (corner convention).
fn sample(image: &Buffer2<f32>, p: DVec2, interp: Interp) -> f32 {
    if image.is_empty() {
        return f32::NAN;
    }
    let (w, h) = (image.width() as f64, image.height() as f64);
    if !(p.x >= 0.0 && p.y >= 0.0 && p.x <= w && p.y <= h) {
        return f32::NAN;
    }
    // Continuous index where pixel centres sit on integers.
    let u = p.x - 0.5;
    let v = p.y - 0.5;

    match interp {
        Interp::Nearest => {
            let ix = (p.x.floor() as usize).min(image.width() - 1);
            let iy = (p.y.floor() as usize).min(image.height() - 1);
            let value = image[(ix, iy)];
            if value.is_finite() { value } else { f32::NAN }
        }
        Interp::Linear => {
            let x0 = u.floor();
            let y0 = v.floor();
            let fx = u - x0;
            let fy = v - y0;
            let taps = [
                (x0, y0, (1.0 - fx) * (1.0 - fy)),
                (x0 + 1.0, y0, fx * (1.0 - fy)),
                (x0, y0 + 1.0, (1.0 - fx) * fy),
                (x0 + 1.0, y0 + 1.0, fx * fy),
            ];
            let taps = taps
                .into_iter()
                .map(|(x, y, k)| (clamp_index(x, w), clamp_index(y, h), k));
            weighted(image, taps)
        }
        Interp::Lanczos3 => lanczos_sample(image, u, v, 3),
        Interp::Lanczos5 => lanczos_sample(image, u, v, 5),
    }
}

fn lanczos_sample(image: &Buffer2<f32>, u: f64, v: f64, order: isize) -> f32 {
    let (w, h) = (image.width() as isize, image.height() as isize);
    let x0 = u.floor() as isize;
    let y0 = v.floor() as isize;
    let a = order as f64;
    let taps = (y0 - order + 1..=y0 + order).flat_map(move |yi| {
        (x0 - order + 1..=x0 + order).filter_map(move |xi| {
            if xi < 0 || yi < 0 || xi >= w || yi >= h {
                return None;
            }
            let k = lanczos(u - xi as f64, a) * lanczos(v - yi as f64, a);
            Some((xi as usize, yi as usize, k))
        })
    });
    weighted(image, taps)
}

/// Weighted mean of finite samples with non-zero weight; `NaN` if none.
fn weighted(image: &Buffer2<f32>, taps: impl Iterator<Item = (usize, usize, f64)>) -> f32 {
    let mut sum = 0.0f64;
    let mut norm = 0.0f64;
    for (x, y, k) in taps {
        if k == 0.0 {
            continue;
        }
        let value = image[(x, y)];
        if value.is_finite() {
            sum += value as f64 * k;
            norm += k;
        }
    }
    if norm.abs() < 1e-12 {
        f32::NAN
    } else {
        (sum / norm) as f32
    }
}

#[inline]
fn clamp_index(i: f64, len: f64) -> usize {
    i.clamp(0.0, len - 1.0) as usize
}
