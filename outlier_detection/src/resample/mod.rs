//! Drizzle resampling of exposure groups onto the shared output grid.
//!
//! Each good input pixel is shrunk by `pixfrac`, mapped through
//! exposure-pixel -> world -> grid-pixel, and its value is distributed over
//! the output pixels it lands on. The accumulator keeps `sum(value * w)` and
//! `sum(w)` per output pixel; [`MosaicAccumulator::finalize`] divides them
//! and writes `fillval` where nothing landed.
//!
//! The inverse operation, [`blot`], samples a grid image back onto an
//! exposure's native pixels.

mod blot;
mod kernels;

use std::ops::Deref;

use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::common::Buffer2;
use crate::config::OutlierConfig;
use crate::dq::DqBits;
use crate::error::Error;
use crate::exposure::{Exposure, GroupId};
use crate::wcs::{OutputGrid, PixelMap};

pub use blot::blot;

use kernels::{boxer, lanczos, quad_area, square_overlap};

/// FWHM to Gaussian sigma: FWHM = 2 * sqrt(2 ln 2) * sigma.
const FWHM_TO_SIGMA: f64 = 2.354_820_045;

/// Drizzle kernel for distributing an input pixel over output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Kernel {
    /// Exact overlap of the mapped quadrilateral with each output pixel.
    #[default]
    Square,
    /// Axis-aligned square drop of side `pixfrac * local scale`.
    Turbo,
    /// Whole value into the output pixel containing the mapped centre.
    Point,
    /// Normalised Gaussian with FWHM equal to the drop size.
    Gaussian,
    /// Separable Lanczos-3. Meant for `pixfrac = 1`.
    Lanczos3,
}

/// Per-pixel weight scheme for drizzling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WeightType {
    /// Inverse variance, `1 / err^2`.
    #[default]
    Ivm,
    /// Exposure time.
    Exptime,
}

/// Interpolation used when blotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Interp {
    Nearest,
    #[default]
    Linear,
    Lanczos3,
    Lanczos5,
}

/// Drizzle parameters for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrizzleParams {
    pub kernel: Kernel,
    pub pixfrac: f32,
    pub weight_type: WeightType,
    pub good_bits: DqBits,
    pub fillval: f32,
}

impl DrizzleParams {
    pub fn from_config(config: &OutlierConfig) -> Self {
        Self {
            kernel: config.kernel,
            pixfrac: config.pixfrac,
            weight_type: config.weight_type,
            good_bits: config.good_bits,
            fillval: config.fillval.value(),
        }
    }
}

impl Default for DrizzleParams {
    fn default() -> Self {
        Self {
            kernel: Kernel::Square,
            pixfrac: 1.0,
            weight_type: WeightType::Ivm,
            good_bits: DqBits::ALL,
            fillval: f32::NAN,
        }
    }
}

/// A group resampled onto the output grid.
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub data: Buffer2<f32>,
    pub weight: Buffer2<f32>,
}

impl Mosaic {
    /// Number of output pixels that received a positive weight.
    pub fn covered_pixels(&self) -> usize {
        self.weight.pixels().iter().filter(|&&w| w > 0.0).count()
    }
}

/// Per-pixel drizzle weight for an exposure.
///
/// Zero wherever the DQ fails `good_bits`, the science value is not finite,
/// or (for `ivm`) the uncertainty is not finite and positive.
pub fn build_weight(
    exposure: &Exposure,
    weight_type: WeightType,
    good_bits: DqBits,
) -> Buffer2<f32> {
    let exptime = exposure.meta.exposure_time;
    let data = exposure.data.pixels();
    let err = exposure.err.pixels();
    let dq = exposure.dq.pixels();

    let pixels = (0..data.len())
        .map(|i| {
            if !good_bits.is_good(dq[i]) || !data[i].is_finite() {
                return 0.0;
            }
            match weight_type {
                WeightType::Ivm => {
                    let e = err[i];
                    if e.is_finite() && e > 0.0 {
                        1.0 / (e * e)
                    } else {
                        0.0
                    }
                }
                WeightType::Exptime => {
                    if exptime.is_finite() && exptime > 0.0 {
                        exptime
                    } else {
                        0.0
                    }
                }
            }
        })
        .collect();
    Buffer2::new(exposure.width(), exposure.height(), pixels)
}

/// An exposure on its own pixels, as a median input when resampling is off.
///
/// Any unsubtracted background is removed so the result is comparable with
/// drizzled mosaics.
pub fn native_mosaic(exposure: &Exposure, weight_type: WeightType, good_bits: DqBits) -> Mosaic {
    let bg = exposure.meta.unsubtracted_background().unwrap_or(0.0);
    Mosaic {
        data: exposure.data.map(|&v| v - bg),
        weight: build_weight(exposure, weight_type, good_bits),
    }
}

/// Accumulates drizzled exposures onto one output grid.
#[derive(Debug)]
pub struct MosaicAccumulator<'g> {
    grid: &'g OutputGrid,
    params: DrizzleParams,
    data: Buffer2<f32>,
    weight: Buffer2<f32>,
}

impl<'g> MosaicAccumulator<'g> {
    pub fn new(grid: &'g OutputGrid, params: DrizzleParams) -> Self {
        Self {
            grid,
            params,
            data: Buffer2::new_default(grid.width, grid.height),
            weight: Buffer2::new_default(grid.width, grid.height),
        }
    }

    /// Drizzle one exposure in.
    ///
    /// Returns the number of input pixels that contributed, or the reason the
    /// exposure's geometry is unusable. Nothing is accumulated on error.
    pub fn add_exposure(&mut self, exposure: &Exposure) -> Result<usize, String> {
        let wcs = exposure
            .meta
            .wcs
            .as_deref()
            .ok_or_else(|| "exposure has no WCS".to_string())?;
        wcs.validate()?;
        let grid = self.grid;
        grid.wcs.validate().map_err(|e| format!("output grid: {e}"))?;

        let map = PixelMap::new(wcs, grid.wcs.as_ref());
        let weights = build_weight(exposure, self.params.weight_type, self.params.good_bits);
        let background = exposure.meta.unsubtracted_background().unwrap_or(0.0);

        if self.params.kernel == Kernel::Lanczos3
            && (self.params.pixfrac - 1.0).abs() > f32::EPSILON
        {
            tracing::warn!(
                pixfrac = self.params.pixfrac,
                "lanczos3 kernel should only be used with pixfrac=1.0"
            );
        }

        let mut contributed = 0;
        for iy in 0..exposure.height() {
            for ix in 0..exposure.width() {
                let w = weights[(ix, iy)];
                if w <= 0.0 {
                    continue;
                }
                let value = exposure.data[(ix, iy)] - background;
                let landed = match self.params.kernel {
                    Kernel::Square => self.drop_square(&map, ix, iy, value, w),
                    Kernel::Turbo => self.drop_turbo(&map, ix, iy, value, w),
                    Kernel::Point => self.drop_point(&map, ix, iy, value, w),
                    Kernel::Gaussian => self.drop_gaussian(&map, ix, iy, value, w),
                    Kernel::Lanczos3 => self.drop_radial(&map, ix, iy, value, w, 3, |dx, dy| {
                        lanczos(dx, 3.0) * lanczos(dy, 3.0)
                    }),
                };
                if landed {
                    contributed += 1;
                }
            }
        }
        Ok(contributed)
    }

    /// Exact quadrilateral clipping of the shrunken input pixel.
    fn drop_square(
        &mut self,
        map: &PixelMap<'_>,
        ix: usize,
        iy: usize,
        value: f32,
        w: f32,
    ) -> bool {
        let dh = 0.5 * self.params.pixfrac as f64;
        let cx = ix as f64 + 0.5;
        let cy = iy as f64 + 0.5;
        let corners = [
            DVec2::new(cx - dh, cy - dh),
            DVec2::new(cx + dh, cy - dh),
            DVec2::new(cx + dh, cy + dh),
            DVec2::new(cx - dh, cy + dh),
        ];

        let mut xout = [0.0f64; 4];
        let mut yout = [0.0f64; 4];
        for (k, corner) in corners.iter().enumerate() {
            let Some(t) = map.apply(*corner) else {
                return false;
            };
            xout[k] = t.x;
            yout[k] = t.y;
        }

        let area = quad_area(&xout, &yout).abs();
        if area < 1e-30 {
            return false;
        }

        let (ox_min, ox_max) = self.span(&xout, self.grid.width);
        let (oy_min, oy_max) = self.span(&yout, self.grid.height);

        let mut landed = false;
        for oy in oy_min..oy_max {
            for ox in ox_min..ox_max {
                let overlap = boxer(ox as f64, oy as f64, &xout, &yout);
                if overlap > 0.0 {
                    self.accumulate(ox, oy, value, (w as f64 * overlap / area) as f32);
                    landed = true;
                }
            }
        }
        landed
    }

    /// Axis-aligned drop centred on the mapped pixel centre.
    fn drop_turbo(
        &mut self,
        map: &PixelMap<'_>,
        ix: usize,
        iy: usize,
        value: f32,
        w: f32,
    ) -> bool {
        let Some((center, drop_size)) = self.center_and_drop(map, ix, iy) else {
            return false;
        };
        let half = drop_size * 0.5;
        let inv_area = 1.0 / (drop_size * drop_size);
        let (x0, y0) = (center.x - half, center.y - half);
        let (x1, y1) = (center.x + half, center.y + half);

        let (ox_min, ox_max) = self.span(&[x0, x1], self.grid.width);
        let (oy_min, oy_max) = self.span(&[y0, y1], self.grid.height);

        let mut landed = false;
        for oy in oy_min..oy_max {
            for ox in ox_min..ox_max {
                let (fx, fy) = (ox as f64, oy as f64);
                let overlap = square_overlap(x0, y0, x1, y1, fx, fy, fx + 1.0, fy + 1.0);
                if overlap > 0.0 {
                    self.accumulate(ox, oy, value, (w as f64 * overlap * inv_area) as f32);
                    landed = true;
                }
            }
        }
        landed
    }

    fn drop_point(
        &mut self,
        map: &PixelMap<'_>,
        ix: usize,
        iy: usize,
        value: f32,
        w: f32,
    ) -> bool {
        let Some(t) = map.apply(DVec2::new(ix as f64 + 0.5, iy as f64 + 0.5)) else {
            return false;
        };
        let (ox, oy) = (t.x.floor(), t.y.floor());
        if ox < 0.0 || oy < 0.0 || ox >= self.grid.width as f64 || oy >= self.grid.height as f64 {
            return false;
        }
        self.accumulate(ox as usize, oy as usize, value, w);
        true
    }

    fn drop_gaussian(
        &mut self,
        map: &PixelMap<'_>,
        ix: usize,
        iy: usize,
        value: f32,
        w: f32,
    ) -> bool {
        let Some((_, drop_size)) = self.center_and_drop(map, ix, iy) else {
            return false;
        };
        let sigma = drop_size / FWHM_TO_SIGMA;
        let radius = (3.0 * sigma).ceil().max(1.0) as isize;
        let inv_2sigma_sq = 1.0 / (2.0 * sigma * sigma);
        self.drop_radial(map, ix, iy, value, w, radius, |dx, dy| {
            (-(dx * dx + dy * dy) * inv_2sigma_sq).exp()
        })
    }

    /// Radial kernel with two-pass normalisation over the in-grid support.
    #[allow(clippy::too_many_arguments)]
    fn drop_radial(
        &mut self,
        map: &PixelMap<'_>,
        ix: usize,
        iy: usize,
        value: f32,
        w: f32,
        radius: isize,
        kernel_fn: impl Fn(f64, f64) -> f64,
    ) -> bool {
        let Some(center) = map.apply(DVec2::new(ix as f64 + 0.5, iy as f64 + 0.5)) else {
            return false;
        };
        let width = self.grid.width as isize;
        let height = self.grid.height as isize;
        let ox_int = center.x.floor() as isize;
        let oy_int = center.y.floor() as isize;

        let support = move || {
            (-radius..=radius).flat_map(move |dy| {
                (-radius..=radius).filter_map(move |dx| {
                    let (ox, oy) = (ox_int + dx, oy_int + dy);
                    (ox >= 0 && ox < width && oy >= 0 && oy < height).then_some((ox, oy))
                })
            })
        };
        let kernel_at = |ox: isize, oy: isize| {
            kernel_fn(ox as f64 + 0.5 - center.x, oy as f64 + 0.5 - center.y)
        };

        let total: f64 = support().map(|(ox, oy)| kernel_at(ox, oy)).sum();
        if total.abs() < 1e-10 {
            return false;
        }

        let scale = w as f64 / total;
        for (ox, oy) in support() {
            let k = kernel_at(ox, oy);
            if k != 0.0 {
                self.accumulate(ox as usize, oy as usize, value, (k * scale) as f32);
            }
        }
        true
    }

    /// Mapped pixel centre and drop side in output pixels.
    fn center_and_drop(&self, map: &PixelMap<'_>, ix: usize, iy: usize) -> Option<(DVec2, f64)> {
        let center = map.apply(DVec2::new(ix as f64 + 0.5, iy as f64 + 0.5))?;
        let jaco = map.local_jacobian(ix, iy);
        if jaco < 1e-30 {
            return None;
        }
        Some((center, self.params.pixfrac as f64 * jaco.sqrt()))
    }

    /// Output index range `[min, max)` touched by coordinates `v`, clamped to `0..len`.
    fn span(&self, v: &[f64], len: usize) -> (usize, usize) {
        let lo = v.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lo = lo.floor().clamp(0.0, len as f64) as usize;
        let hi = hi.ceil().clamp(0.0, len as f64) as usize;
        (lo, hi.max(lo))
    }

    #[inline]
    fn accumulate(&mut self, ox: usize, oy: usize, value: f32, w: f32) {
        *self.data.get_mut(ox, oy) += value * w;
        *self.weight.get_mut(ox, oy) += w;
    }

    /// Normalise accumulated values by weight; uncovered pixels get `fillval`.
    pub fn finalize(self) -> Mosaic {
        let width = self.grid.width;
        let fillval = self.params.fillval;
        let weight = self.weight;
        let mut data = self.data;

        if width > 0 {
            data.pixels_mut()
                .par_chunks_mut(width)
                .zip(weight.pixels().par_chunks(width))
                .for_each(|(row, wrow)| {
                    for (d, &w) in row.iter_mut().zip(wrow) {
                        *d = if w > 0.0 { *d / w } else { fillval };
                    }
                });
        }

        Mosaic { data, weight }
    }
}

/// Drizzle one group of exposures onto `grid`.
///
/// `members` pairs each exposure with its collection index for error
/// reporting. Fails with [`Error::EmptyGroup`] for an empty group and
/// [`Error::Geometry`] for the first exposure with an unusable WCS.
pub fn resample<'a>(
    group: &GroupId,
    members: impl IntoIterator<Item = (usize, &'a Exposure)>,
    grid: &OutputGrid,
    params: DrizzleParams,
) -> Result<Mosaic, Error> {
    resample_streamed(group, members.into_iter().map(Ok), grid, params)
}

/// [`resample`] over lazily loaded members.
///
/// Each member is pulled, drizzled and dropped before the next one is
/// pulled, so at most one exposure is alive at a time. A load error stops
/// the group and is returned as is.
pub fn resample_streamed<E>(
    group: &GroupId,
    members: impl IntoIterator<Item = Result<(usize, E), Error>>,
    grid: &OutputGrid,
    params: DrizzleParams,
) -> Result<Mosaic, Error>
where
    E: Deref<Target = Exposure>,
{
    let mut accumulator = MosaicAccumulator::new(grid, params);
    let mut count = 0;
    for member in members {
        let (index, exposure) = member?;
        count += 1;
        let contributed = accumulator
            .add_exposure(&exposure)
            .map_err(|reason| Error::Geometry {
                group: group.to_string(),
                exposure: index,
                reason,
            })?;
        drop(exposure);
        tracing::debug!(group = %group, exposure = index, contributed, "Drizzled exposure");
    }
    if count == 0 {
        return Err(Error::EmptyGroup {
            group: group.to_string(),
        });
    }
    Ok(accumulator.finalize())
}
