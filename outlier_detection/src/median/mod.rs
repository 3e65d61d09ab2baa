//! Weight-thresholded, NaN-aware median of group mosaics.
//!
//! Each mosaic is first masked: pixels whose weight falls below
//! `maskpt * reference_weight` (or is not positive, or whose data is not
//! finite) become `NaN`. The median image is then the per-pixel median of
//! the finite candidates, `NaN` where there are none.
//!
//! The same row kernel serves the in-memory stack and the section files of
//! [`SectionSpool`], so both paths produce bit-identical output.

mod sections;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::Buffer2;
use crate::math::{nan_median, percentile_linear, sigma_clipped_mean};
use crate::resample::Mosaic;

pub use sections::{SectionSpool, section_rows_for_budget};

fn default_sigma() -> f32 {
    3.0
}

fn default_max_iters() -> usize {
    5
}

/// Statistic over a mosaic's positive weights that `maskpt` scales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightReference {
    /// Mean after iterative median-centred sigma clipping.
    ClippedMean {
        #[serde(default = "default_sigma")]
        sigma: f32,
        #[serde(default = "default_max_iters")]
        max_iters: usize,
    },
    /// Linear-interpolated percentile in `[0, 100]`.
    Percentile { p: f32 },
}

impl Default for WeightReference {
    fn default() -> Self {
        Self::ClippedMean {
            sigma: default_sigma(),
            max_iters: default_max_iters(),
        }
    }
}

impl WeightReference {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::ClippedMean { sigma, .. } if !(sigma.is_finite() && sigma > 0.0) => Err(
                format!("weight_reference sigma must be > 0, got {sigma}"),
            ),
            Self::Percentile { p } if !(0.0..=100.0).contains(&p) => Err(format!(
                "weight_reference percentile must be in [0, 100], got {p}"
            )),
            _ => Ok(()),
        }
    }

    /// Reference statistic of the positive, finite weights; `None` if there are none.
    pub fn evaluate(&self, weight: &Buffer2<f32>) -> Option<f32> {
        let mut values: Vec<f32> = weight
            .pixels()
            .iter()
            .copied()
            .filter(|w| w.is_finite() && *w > 0.0)
            .collect();
        match *self {
            Self::ClippedMean { sigma, max_iters } => {
                sigma_clipped_mean(&mut values, sigma, max_iters)
            }
            Self::Percentile { p } => percentile_linear(&mut values, p),
        }
    }
}

/// Weight a mosaic pixel needs to become a median candidate.
///
/// Zero when the mosaic has no positive weight at all (nothing passes the
/// `weight > 0` test in that case anyway).
pub fn weight_threshold(weight: &Buffer2<f32>, maskpt: f32, reference: WeightReference) -> f32 {
    reference
        .evaluate(weight)
        .map_or(0.0, |stat| maskpt * stat)
}

/// Mosaic data with non-candidates replaced by `NaN`.
///
/// A pixel is a candidate when `weight >= threshold`, `weight > 0`, and its
/// data is finite.
pub fn mask_mosaic(mosaic: &Mosaic, threshold: f32) -> Buffer2<f32> {
    let width = mosaic.data.width();
    let mut out = Buffer2::new_filled(width, mosaic.data.height(), f32::NAN);
    if width == 0 {
        return out;
    }
    out.pixels_mut()
        .par_chunks_mut(width)
        .zip(mosaic.data.pixels().par_chunks(width))
        .zip(mosaic.weight.pixels().par_chunks(width))
        .for_each(|((row, data), weight)| {
            for ((o, &d), &w) in row.iter_mut().zip(data).zip(weight) {
                if w >= threshold && w > 0.0 && d.is_finite() {
                    *o = d;
                }
            }
        });
    out
}

/// Per-pixel NaN-aware median across `stack`, written row by row into `out`.
///
/// Every slice in `stack` and `out` covers the same rows of width `width`.
pub(crate) fn median_rows(stack: &[&[f32]], width: usize, out: &mut [f32]) {
    debug_assert!(stack.iter().all(|s| s.len() == out.len()));
    if width == 0 {
        return;
    }
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, row_out)| {
            // One buffer per row, reused for every pixel.
            let mut values = vec![0.0f32; stack.len()];
            let row_offset = row * width;
            for (x, o) in row_out.iter_mut().enumerate() {
                for (v, plane) in values.iter_mut().zip(stack) {
                    *v = plane[row_offset + x];
                }
                *o = nan_median(&mut values);
            }
        });
}

/// Median of already-masked mosaic planes.
pub fn median_of_masked(planes: &[Buffer2<f32>]) -> Buffer2<f32> {
    let Some(first) = planes.first() else {
        return Buffer2::new(0, 0, Vec::new());
    };
    let (width, height) = first.shape();
    assert!(
        planes.iter().all(|p| p.shape() == (width, height)),
        "all mosaics must share the output grid"
    );
    let stack: Vec<&[f32]> = planes.iter().map(|p| p.pixels()).collect();
    let mut out = Buffer2::new_filled(width, height, f32::NAN);
    median_rows(&stack, width, out.pixels_mut());
    out
}

/// Weight-threshold each mosaic and take the per-pixel median.
pub fn compute_median(mosaics: &[Mosaic], maskpt: f32, reference: WeightReference) -> Buffer2<f32> {
    let masked: Vec<Buffer2<f32>> = mosaics
        .iter()
        .enumerate()
        .map(|(i, mosaic)| {
            let threshold = weight_threshold(&mosaic.weight, maskpt, reference);
            tracing::debug!(mosaic = i, threshold, "Weight threshold");
            mask_mosaic(mosaic, threshold)
        })
        .collect();
    median_of_masked(&masked)
}

#[cfg(test)]
mod tests;
