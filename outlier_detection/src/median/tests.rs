use super::*;
use crate::pipeline::CancelToken;
use crate::progress::ProgressCallback;

fn mosaic(width: usize, height: usize, data: Vec<f32>, weight: Vec<f32>) -> Mosaic {
    Mosaic {
        data: Buffer2::new(width, height, data),
        weight: Buffer2::new(width, height, weight),
    }
}

#[test]
fn test_threshold_is_inclusive() {
    let m = mosaic(3, 1, vec![1.0, 2.0, 3.0], vec![0.7, 0.69, 1.0]);
    let masked = mask_mosaic(&m, 0.7);
    assert_eq!(masked[0], 1.0);
    assert!(masked[1].is_nan());
    assert_eq!(masked[2], 3.0);
}

#[test]
fn test_zero_weight_never_candidate() {
    let m = mosaic(2, 1, vec![5.0, 6.0], vec![0.0, 1.0]);
    // A zero threshold must still reject zero weight.
    let masked = mask_mosaic(&m, 0.0);
    assert!(masked[0].is_nan());
    assert_eq!(masked[1], 6.0);
}

#[test]
fn test_non_finite_data_is_not_candidate() {
    let m = mosaic(2, 1, vec![f32::NAN, f32::INFINITY], vec![1.0, 1.0]);
    let masked = mask_mosaic(&m, 0.5);
    assert!(masked[0].is_nan());
    assert!(masked[1].is_nan());
}

#[test]
fn test_weight_threshold_clipped_mean() {
    let weight = Buffer2::new(4, 1, vec![2.0, 2.0, 2.0, 0.0]);
    let thr = weight_threshold(&weight, 0.5, WeightReference::default());
    assert!((thr - 1.0).abs() < 1e-6);
}

#[test]
fn test_weight_threshold_percentile() {
    let weight = Buffer2::new(5, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let reference = WeightReference::Percentile { p: 50.0 };
    let thr = weight_threshold(&weight, 0.5, reference);
    assert!((thr - 1.5).abs() < 1e-6);
}

#[test]
fn test_weight_threshold_without_weights_is_zero() {
    let weight = Buffer2::new(2, 1, vec![0.0, f32::NAN]);
    assert_eq!(weight_threshold(&weight, 0.7, WeightReference::default()), 0.0);
}

#[test]
fn test_weight_reference_validation() {
    assert!(WeightReference::default().validate().is_ok());
    assert!(WeightReference::Percentile { p: 101.0 }.validate().is_err());
    assert!(
        WeightReference::ClippedMean {
            sigma: 0.0,
            max_iters: 5
        }
        .validate()
        .is_err()
    );
}

#[test]
fn test_weight_reference_yaml() {
    let r: WeightReference = serde_yml::from_str("kind: percentile\np: 40").unwrap();
    assert_eq!(r, WeightReference::Percentile { p: 40.0 });
    let r: WeightReference = serde_yml::from_str("kind: clipped_mean").unwrap();
    assert_eq!(r, WeightReference::default());
}

#[test]
fn test_median_even_count_is_mean_of_middle() {
    let planes = vec![
        Buffer2::new(1, 1, vec![1.0]),
        Buffer2::new(1, 1, vec![4.0]),
        Buffer2::new(1, 1, vec![2.0]),
        Buffer2::new(1, 1, vec![10.0]),
    ];
    let median = median_of_masked(&planes);
    assert_eq!(median[0], 3.0);
}

#[test]
fn test_median_skips_nan_and_all_nan_is_nan() {
    let planes = vec![
        Buffer2::new(2, 1, vec![1.0, f32::NAN]),
        Buffer2::new(2, 1, vec![f32::NAN, f32::NAN]),
        Buffer2::new(2, 1, vec![5.0, f32::NAN]),
    ];
    let median = median_of_masked(&planes);
    assert_eq!(median[0], 3.0);
    assert!(median[1].is_nan());
}

#[test]
fn test_compute_median_rejects_low_weight() {
    let a = mosaic(1, 1, vec![10.0], vec![1.0]);
    let b = mosaic(1, 1, vec![20.0], vec![1.0]);
    // Single-pixel mosaic: threshold equals 0.7, candidate kept.
    let median = compute_median(&[a, b], 0.7, WeightReference::default());
    assert_eq!(median[0], 15.0);
}

#[test]
fn test_section_rows_for_budget() {
    assert_eq!(section_rows_for_budget(100, 50, 4, 100 * 4 * 4 * 10), 10);
    assert_eq!(section_rows_for_budget(100, 50, 4, 1), 1);
    assert_eq!(section_rows_for_budget(100, 50, 4, usize::MAX), 50);
}

fn random_planes(width: usize, height: usize, n: usize) -> Vec<Buffer2<f32>> {
    use rand::{Rng, SeedableRng, rngs::StdRng};
    let mut rng = StdRng::seed_from_u64(11);
    (0..n)
        .map(|_| {
            let pixels = (0..width * height)
                .map(|_| {
                    if rng.random::<f32>() < 0.2 {
                        f32::NAN
                    } else {
                        rng.random_range(0.0..100.0)
                    }
                })
                .collect();
            Buffer2::new(width, height, pixels)
        })
        .collect()
}

#[test]
fn test_section_spool_matches_in_memory() {
    let (width, height) = (13, 11);
    let planes = random_planes(width, height, 5);
    let expected = median_of_masked(&planes);

    for rows in [1, 3, 4, 11, 20] {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SectionSpool::new(dir.path(), width, height, rows.min(height));
        for p in &planes {
            spool.append(p).unwrap();
        }
        assert_eq!(spool.groups(), 5);
        let median = spool
            .finish(&CancelToken::new(), &ProgressCallback::none())
            .unwrap();
        for (a, b) in median.pixels().iter().zip(expected.pixels()) {
            assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
        }
        // Section files are consumed.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

#[test]
fn test_section_spool_detects_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let planes = random_planes(4, 4, 2);
    let mut spool = SectionSpool::new(dir.path(), 4, 4, 2);
    for p in &planes {
        spool.append(p).unwrap();
    }
    let victim = dir.path().join("section_00001.bin");
    let file = std::fs::OpenOptions::new().write(true).open(&victim).unwrap();
    file.set_len(12).unwrap();
    drop(file);

    let err = spool
        .finish(&CancelToken::new(), &ProgressCallback::none())
        .unwrap_err();
    match err {
        crate::error::Error::IncompleteSection {
            expected, actual, ..
        } => {
            assert_eq!(expected, 2 * 2 * 4 * 4);
            assert_eq!(actual, 12);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_section_spool_honours_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let planes = random_planes(4, 4, 2);
    let mut spool = SectionSpool::new(dir.path(), 4, 4, 2);
    for p in &planes {
        spool.append(p).unwrap();
    }
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        spool.finish(&cancel, &ProgressCallback::none()),
        Err(crate::error::Error::Cancelled)
    ));
}
