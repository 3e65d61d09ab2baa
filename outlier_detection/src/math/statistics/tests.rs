//! Tests for statistical functions.

use super::*;

// ---------------------------------------------------------------------------
// Median tests
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd() {
    let mut values = [1.0f32, 3.0, 2.0, 5.0, 4.0];
    assert!((median_f32_mut(&mut values) - 3.0).abs() < f32::EPSILON);
}

#[test]
fn test_median_even() {
    let mut values = [1.0f32, 2.0, 3.0, 4.0];
    assert!((median_f32_mut(&mut values) - 2.5).abs() < f32::EPSILON);
}

#[test]
fn test_median_two_elements() {
    let mut values = [1.0f32, 5.0];
    assert!((median_f32_mut(&mut values) - 3.0).abs() < f32::EPSILON);
}

#[test]
fn test_median_negative() {
    let mut values = [-5.0f32, -3.0, -1.0, 2.0, 4.0];
    assert!((median_f32_mut(&mut values) - (-1.0)).abs() < f32::EPSILON);
}

#[test]
fn test_nan_median_skips_nan() {
    let mut values = [f32::NAN, 1.0, 3.0, f32::NAN, 2.0];
    assert_eq!(nan_median(&mut values), 2.0);
}

#[test]
fn test_nan_median_all_nan_is_nan() {
    let mut values = [f32::NAN, f32::NAN];
    assert!(nan_median(&mut values).is_nan());
    let mut empty: [f32; 0] = [];
    assert!(nan_median(&mut empty).is_nan());
}

#[test]
fn test_nan_median_even_after_filtering() {
    let mut values = [4.0f32, f32::NAN, 1.0, f32::INFINITY, 3.0, 2.0];
    assert_eq!(nan_median(&mut values), 2.5);
}

// ---------------------------------------------------------------------------
// Sigma-clipped mean tests
// ---------------------------------------------------------------------------

#[test]
fn test_sigma_clipped_mean_empty() {
    let mut values: [f32; 0] = [];
    assert_eq!(sigma_clipped_mean(&mut values, 3.0, 5), None);
}

#[test]
fn test_sigma_clipped_mean_uniform() {
    let mut values = [2.5f32; 16];
    assert_eq!(sigma_clipped_mean(&mut values, 3.0, 5), Some(2.5));
}

#[test]
fn test_sigma_clipped_mean_rejects_outlier() {
    let mut values: Vec<f32> = (0..100).map(|i| 10.0 + (i % 5) as f32 * 0.1).collect();
    values.push(1000.0);
    let mean = sigma_clipped_mean(&mut values, 3.0, 5).unwrap();
    assert!((mean - 10.2).abs() < 1e-3, "mean = {mean}");
}

#[test]
fn test_sigma_clipped_mean_zero_iters_is_plain_mean() {
    let mut values = [1.0f32, 2.0, 3.0, 100.0];
    assert_eq!(sigma_clipped_mean(&mut values, 3.0, 0), Some(26.5));
}

// ---------------------------------------------------------------------------
// Percentile tests
// ---------------------------------------------------------------------------

#[test]
fn test_percentile_interpolates() {
    let mut values = [4.0f32, 1.0, 3.0, 2.0, 5.0];
    assert_eq!(percentile_linear(&mut values, 50.0), Some(3.0));
    assert_eq!(percentile_linear(&mut values, 0.0), Some(1.0));
    assert_eq!(percentile_linear(&mut values, 100.0), Some(5.0));
    assert_eq!(percentile_linear(&mut values, 25.0), Some(2.0));
    assert_eq!(percentile_linear(&mut values, 12.5), Some(1.5));
}

#[test]
fn test_percentile_empty() {
    let mut values: [f32; 0] = [];
    assert_eq!(percentile_linear(&mut values, 50.0), None);
}
