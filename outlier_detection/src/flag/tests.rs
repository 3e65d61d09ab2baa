use super::*;
use crate::dq;
use crate::exposure::Background;
use crate::testing::simple_exposure;

fn params() -> FlagParams {
    FlagParams {
        snr: Pair::new(5.0, 4.0),
        scale: Pair::new(1.2, 0.7),
        backg: 0.0,
        noise_model: NoiseModel::Detector,
        resample_data: true,
    }
}

#[test]
fn test_deriv_on_step() {
    // 3x3 with a single bright centre.
    let mut image = Buffer2::new_filled(3, 3, 1.0f32);
    image[(1, 1)] = 5.0;
    let deriv = abs_deriv(&image);
    assert_eq!(deriv[(1, 1)], 4.0);
    assert_eq!(deriv[(0, 1)], 4.0);
    assert_eq!(deriv[(1, 0)], 4.0);
    // Corners only touch edge pixels.
    assert_eq!(deriv[(0, 0)], 0.0);
    assert_eq!(deriv[(2, 2)], 0.0);
}

#[test]
fn test_deriv_ignores_nan_neighbours() {
    let image = Buffer2::new(3, 1, vec![1.0, f32::NAN, 3.0]);
    let deriv = abs_deriv(&image);
    assert_eq!(deriv[0], 0.0);
    assert!(deriv[1].is_nan());
    assert_eq!(deriv[2], 0.0);
}

#[test]
fn test_detector_noise_guards_exposure_time() {
    let mut exposure = simple_exposure("a", "g", 2, 1, 0.0);
    exposure.meta.read_noise = 3.0;
    exposure.meta.exposure_time = 0.0;
    let model = Buffer2::new(2, 1, vec![100.0, -5.0]);
    let noise = noise_image(&exposure, &model, NoiseModel::Detector);
    assert_eq!(noise.pixels(), &[3.0, 3.0]);

    exposure.meta.exposure_time = 4.0;
    exposure.meta.read_noise = 0.0;
    let noise = noise_image(&exposure, &model, NoiseModel::Detector);
    assert_eq!(noise.pixels(), &[5.0, 0.0]);
}

#[test]
fn test_uncertainty_noise_replaces_nan() {
    let mut exposure = simple_exposure("a", "g", 2, 1, 0.0);
    exposure.err = Buffer2::new(2, 1, vec![f32::NAN, 2.0]);
    let model = Buffer2::new_default(2, 1);
    let noise = noise_image(&exposure, &model, NoiseModel::Uncertainty);
    assert_eq!(noise.pixels(), &[0.0, 2.0]);
}

#[test]
fn test_primary_threshold_is_strict() {
    // Flat blot, zero derivative; noise = read_noise = 1.
    let mut exposure = simple_exposure("a", "g", 5, 5, 10.0);
    exposure.meta.read_noise = 1.0;
    exposure.meta.exposure_time = 0.0;
    let blot = Buffer2::new_filled(5, 5, 10.0);

    exposure.data[(2, 2)] = 15.0;
    let mask = flag_outliers(&exposure, &blot, &params());
    assert_eq!(mask.count_ones(), 0);

    exposure.data[(2, 2)] = 15.5;
    let mask = flag_outliers(&exposure, &blot, &params());
    assert_eq!(mask.count_ones(), 1);
    assert!(mask.get_xy(2, 2));
}

#[test]
fn test_secondary_only_near_primary() {
    let mut exposure = simple_exposure("a", "g", 7, 5, 10.0);
    exposure.meta.read_noise = 1.0;
    exposure.meta.exposure_time = 0.0;
    let blot = Buffer2::new_filled(7, 5, 10.0);

    exposure.data[(2, 2)] = 20.0; // primary
    exposure.data[(3, 2)] = 14.5; // secondary, adjacent
    exposure.data[(5, 2)] = 14.5; // secondary, isolated

    let mask = flag_outliers(&exposure, &blot, &params());
    assert!(mask.get_xy(2, 2));
    assert!(mask.get_xy(3, 2));
    assert!(!mask.get_xy(5, 2));
    assert_eq!(mask.count_ones(), 2);
}

#[test]
fn test_derivative_term_raises_threshold() {
    let mut exposure = simple_exposure("a", "g", 3, 1, 0.0);
    exposure.meta.read_noise = 1.0;
    exposure.meta.exposure_time = 0.0;
    // Steep blot gradient: deriv = 10 everywhere.
    let blot = Buffer2::new(3, 1, vec![0.0, 10.0, 20.0]);
    exposure.data = Buffer2::new(3, 1, vec![0.0, 26.0, 20.0]);
    // 16 > 1.2 * 10 + 5 * 1 = 17 is false.
    assert_eq!(flag_outliers(&exposure, &blot, &params()).count_ones(), 0);
    exposure.data[1] = 27.5;
    assert_eq!(flag_outliers(&exposure, &blot, &params()).count_ones(), 1);
}

#[test]
fn test_nan_never_flags() {
    let mut exposure = simple_exposure("a", "g", 3, 1, 1000.0);
    exposure.data[0] = f32::NAN;
    let blot = Buffer2::new(3, 1, vec![0.0, f32::NAN, 0.0]);
    let mask = flag_outliers(&exposure, &blot, &params());
    assert!(!mask.get(0));
    assert!(!mask.get(1));
    assert!(mask.get(2));
}

#[test]
fn test_unsubtracted_background_is_added_to_model() {
    let mut exposure = simple_exposure("a", "g", 3, 3, 50.0);
    exposure.meta.read_noise = 1.0;
    exposure.meta.exposure_time = 0.0;
    let blot = Buffer2::new_filled(3, 3, 10.0);
    assert_eq!(flag_outliers(&exposure, &blot, &params()).count_ones(), 9);

    exposure.meta.background = Some(Background {
        level: 40.0,
        subtracted: false,
    });
    assert_eq!(flag_outliers(&exposure, &blot, &params()).count_ones(), 0);

    // A subtracted background falls back to the configured backg.
    exposure.meta.background = Some(Background {
        level: 40.0,
        subtracted: true,
    });
    let p = FlagParams {
        backg: 40.0,
        ..params()
    };
    assert_eq!(flag_outliers(&exposure, &blot, &p).count_ones(), 0);
}

#[test]
fn test_non_resampled_mode_uses_single_level() {
    let mut exposure = simple_exposure("a", "g", 5, 1, 10.0);
    exposure.meta.read_noise = 1.0;
    exposure.meta.exposure_time = 0.0;
    let median = Buffer2::new(5, 1, vec![10.0, 10.0, 10.0, 10.0, 100.0]);
    exposure.data[1] = 15.5; // above snr.primary
    exposure.data[2] = 14.5; // secondary-only, no halo in this mode
    let p = FlagParams {
        resample_data: false,
        ..params()
    };
    let mask = flag_outliers(&exposure, &median, &p);
    assert!(mask.get(1));
    assert!(!mask.get(2));
    // The steep median step carries no derivative allowance.
    assert!(mask.get(4));
    assert_eq!(mask.count_ones(), 2);
}

#[test]
fn test_merge_preserves_existing_bits() {
    let mut dq_plane = Buffer2::new(3, 1, vec![dq::SATURATED, dq::OUTLIER, 0]);
    let mask = BitMask2::from_fn(3, 1, |i| i < 2);
    let stats = merge_outliers(&mut dq_plane, &mask, DqBits(dq::OUTLIER));
    assert_eq!(dq_plane.pixels(), &[dq::SATURATED | dq::OUTLIER, dq::OUTLIER, 0]);
    assert_eq!(stats.masked, 2);
    assert_eq!(stats.newly_flagged, 1);
    assert!((stats.percent - 100.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_merge_with_do_not_use() {
    let mut dq_plane = Buffer2::new_default(2, 1);
    let mask = BitMask2::from_fn(2, 1, |i| i == 1);
    merge_outliers(
        &mut dq_plane,
        &mask,
        DqBits(dq::OUTLIER | dq::DO_NOT_USE),
    );
    assert_eq!(dq_plane.pixels(), &[0, dq::OUTLIER | dq::DO_NOT_USE]);
}

#[test]
fn test_noise_model_display() {
    assert_eq!(NoiseModel::Detector.to_string(), "detector");
    assert_eq!(NoiseModel::Uncertainty.to_string(), "uncertainty");
}
