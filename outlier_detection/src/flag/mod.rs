//! Outlier statistics: derivative image, noise model, two-level masks and
//! the DQ merge.
//!
//! A pixel is compared against the blotted median `b` (plus the effective
//! background). The primary test
//! `|data - b| > scale.primary * deriv + snr.primary * noise` seeds the
//! mask; the secondary, looser test only survives inside the 8-connected
//! neighbourhood of a primary flag. `NaN` in either image never flags.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::common::{BitMask2, Buffer2};
use crate::config::{OutlierConfig, Pair};
use crate::dq::DqBits;
use crate::exposure::Exposure;

/// Source of the per-pixel noise estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NoiseModel {
    /// `sqrt(read_noise^2 + max(model, 0) / exposure_time)`.
    #[default]
    Detector,
    /// The exposure's own uncertainty plane.
    Uncertainty,
}

/// Thresholds for [`flag_outliers`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagParams {
    pub snr: Pair,
    pub scale: Pair,
    /// Background added to the model when the exposure records no unsubtracted level.
    pub backg: f32,
    pub noise_model: NoiseModel,
    /// `false` compares against the native-pixel median: one level, no derivative term.
    pub resample_data: bool,
}

impl Default for FlagParams {
    fn default() -> Self {
        Self::from_config(&OutlierConfig::default())
    }
}

impl FlagParams {
    pub fn from_config(config: &OutlierConfig) -> Self {
        Self {
            snr: config.snr,
            scale: config.scale,
            backg: config.backg,
            noise_model: config.noise_model,
            resample_data: config.resample_data,
        }
    }
}

/// Largest absolute difference between each pixel and its existing
/// orthogonal neighbours.
///
/// `NaN` neighbours are ignored; a `NaN` pixel yields `NaN`; a finite pixel
/// with no finite neighbour yields `0`.
pub fn abs_deriv(image: &Buffer2<f32>) -> Buffer2<f32> {
    let (width, height) = image.shape();
    let mut out = Buffer2::new_default(width, height);
    if width == 0 {
        return out;
    }
    let src = image.pixels();
    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, o) in row.iter_mut().enumerate() {
                let v = src[y * width + x];
                if v.is_nan() {
                    *o = f32::NAN;
                    continue;
                }
                let mut max = 0.0f32;
                let mut visit = |n: f32| {
                    if !n.is_nan() {
                        max = max.max((v - n).abs());
                    }
                };
                if x > 0 {
                    visit(src[y * width + x - 1]);
                }
                if x + 1 < width {
                    visit(src[y * width + x + 1]);
                }
                if y > 0 {
                    visit(src[(y - 1) * width + x]);
                }
                if y + 1 < height {
                    visit(src[(y + 1) * width + x]);
                }
                *o = max;
            }
        });
    out
}

/// Background actually present in the exposure's science plane.
pub fn effective_background(exposure: &Exposure, backg: f32) -> f32 {
    exposure.meta.unsubtracted_background().unwrap_or(backg)
}

/// Per-pixel noise for `exposure`, given the background-inclusive model.
pub fn noise_image(
    exposure: &Exposure,
    model: &Buffer2<f32>,
    noise_model: NoiseModel,
) -> Buffer2<f32> {
    match noise_model {
        NoiseModel::Uncertainty => exposure
            .err
            .map(|&e| if e.is_nan() { 0.0 } else { e.abs() }),
        NoiseModel::Detector => {
            let read_var = exposure.meta.read_noise * exposure.meta.read_noise;
            let exptime = exposure.meta.exposure_time;
            model.map(|&m| {
                let poisson = if exptime > 0.0 && m.is_finite() {
                    m.max(0.0) / exptime
                } else {
                    0.0
                };
                (read_var + poisson).sqrt()
            })
        }
    }
}

/// Flag outliers in `exposure` against `reference`.
///
/// `reference` is the blotted median on the exposure's pixels (or the
/// native-pixel median when `params.resample_data` is `false`); it must
/// match the exposure's shape.
pub fn flag_outliers(
    exposure: &Exposure,
    reference: &Buffer2<f32>,
    params: &FlagParams,
) -> BitMask2 {
    assert!(
        exposure.data.same_shape(reference),
        "reference must match the exposure shape"
    );
    let (width, height) = exposure.shape();
    if width == 0 || height == 0 {
        return BitMask2::new_default(width, height);
    }

    let bg = effective_background(exposure, params.backg);
    let model = reference.map(|&b| b + bg);
    let noise = noise_image(exposure, &model, params.noise_model);
    let data = exposure.data.pixels();

    if !params.resample_data {
        let snr = params.snr.primary;
        let flags = threshold_rows(width, height, |i| {
            let (d, m) = (data[i], model[i]);
            d.is_finite() && m.is_finite() && (d - m).abs() > snr * noise[i]
        });
        return BitMask2::from_fn(width, height, |i| flags[i]);
    }

    let deriv = abs_deriv(reference);
    let test = |i: usize, scale: f32, snr: f32| {
        let (d, m) = (data[i], model[i]);
        d.is_finite() && m.is_finite() && (d - m).abs() > scale * deriv[i] + snr * noise[i]
    };
    let primary = threshold_rows(width, height, |i| {
        test(i, params.scale.primary, params.snr.primary)
    });
    let secondary = threshold_rows(width, height, |i| {
        test(i, params.scale.secondary, params.snr.secondary)
    });

    let mut mask = BitMask2::from_fn(width, height, |i| primary[i]).dilate_3x3();
    mask.and_assign(&BitMask2::from_fn(width, height, |i| secondary[i]));
    mask
}

/// Evaluate `test` for every pixel index, row-parallel.
fn threshold_rows(width: usize, height: usize, test: impl Fn(usize) -> bool + Sync) -> Vec<bool> {
    let mut out = vec![false; width * height];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, o) in row.iter_mut().enumerate() {
            *o = test(y * width + x);
        }
    });
    out
}

/// Result of OR-ing an outlier mask into a DQ plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeStats {
    /// Pixels that did not already carry every flag bit.
    pub newly_flagged: usize,
    /// Pixels set in the mask.
    pub masked: usize,
    /// `newly_flagged` as a percentage of all pixels.
    pub percent: f64,
}

/// `dq |= flag_bits` wherever `mask` is set. Existing bits are never cleared.
pub fn merge_outliers(dq: &mut Buffer2<u32>, mask: &BitMask2, flag_bits: DqBits) -> MergeStats {
    assert_eq!(
        (mask.width(), mask.height()),
        dq.shape(),
        "mask must match the DQ shape"
    );
    let bits = flag_bits.bits();
    let pixels = dq.pixels_mut();
    let mut newly_flagged = 0;
    let mut masked = 0;
    for idx in mask.iter_ones() {
        masked += 1;
        if pixels[idx] & bits != bits {
            newly_flagged += 1;
        }
        pixels[idx] |= bits;
    }
    let percent = if pixels.is_empty() {
        0.0
    } else {
        100.0 * newly_flagged as f64 / pixels.len() as f64
    };
    MergeStats {
        newly_flagged,
        masked,
        percent,
    }
}

#[cfg(test)]
mod tests;
