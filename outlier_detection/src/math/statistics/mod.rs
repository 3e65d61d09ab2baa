//! Statistical functions: median, sigma-clipped mean, percentile.
//!
//! All orderings use `f32::total_cmp`, so callers must filter NaN out
//! before handing values in (or use [`nan_median`]).

/// Calculate the median of f32 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect). Even length
/// averages the two central values.
#[inline]
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        let right = *right_median;
        let left = left_part
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        (left + right) * 0.5
    }
}

/// Median of the finite values, `NaN` when there are none.
///
/// Compacts finite values to the front of `data` and reorders them.
pub fn nan_median(data: &mut [f32]) -> f32 {
    let mut n = 0;
    for i in 0..data.len() {
        if data[i].is_finite() {
            data[n] = data[i];
            n += 1;
        }
    }
    if n == 0 {
        return f32::NAN;
    }
    median_f32_mut(&mut data[..n])
}

/// Mean of values after iterative median-centred sigma clipping.
///
/// Each iteration computes the median and population standard deviation of
/// the surviving values and keeps those with `|x - median| <= sigma * std`.
/// Stops after `max_iters` iterations or when nothing is clipped. Returns
/// `None` for empty input. Reorders `values`.
pub fn sigma_clipped_mean(values: &mut [f32], sigma: f32, max_iters: usize) -> Option<f32> {
    let mut len = values.len();
    if len == 0 {
        return None;
    }

    let mut scratch = Vec::with_capacity(len);
    for _ in 0..max_iters {
        scratch.clear();
        scratch.extend_from_slice(&values[..len]);
        let center = median_f32_mut(&mut scratch) as f64;
        let (_, std) = mean_std(&values[..len]);
        let bound = sigma as f64 * std;

        let mut write = 0;
        for i in 0..len {
            if (values[i] as f64 - center).abs() <= bound {
                values[write] = values[i];
                write += 1;
            }
        }
        // Keep the previous survivors if clipping would empty the set.
        if write == len || write == 0 {
            break;
        }
        len = write;
    }

    Some(mean_std(&values[..len]).0 as f32)
}

/// Linear-interpolated percentile, `p` in `[0, 100]`. Reorders `values`.
pub fn percentile_linear(values: &mut [f32], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f32::total_cmp);
    let rank = (p.clamp(0.0, 100.0) as f64 / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some((values[lo] as f64 + (values[hi] as f64 - values[lo] as f64) * frac) as f32)
}

fn mean_std(values: &[f32]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests;
