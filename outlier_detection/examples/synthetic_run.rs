//! Run outlier detection over a small synthetic dither pattern.
//!
//! ```text
//! cargo run --example synthetic_run -- [config.yaml]
//! ```

use std::sync::Arc;

use glam::DVec2;
use outlier_detection::logging::setup_logging;
use outlier_detection::{
    AffineWcs, Buffer2, Exposure, ExposureLibrary, ExposureMeta, OutlierConfig, OutlierDetection,
    ProgressCallback,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WIDTH: usize = 256;
const HEIGHT: usize = 256;
const OFFSETS: [(f64, f64); 4] = [(0.0, 0.0), (2.5, 0.0), (0.0, 2.5), (2.5, 2.5)];
const HITS_PER_EXPOSURE: usize = 40;

fn synthetic_exposures() -> Vec<Exposure> {
    let mut rng = StdRng::seed_from_u64(1);
    OFFSETS
        .iter()
        .enumerate()
        .map(|(g, &(dx, dy))| {
            let mut data = Buffer2::new_default(WIDTH, HEIGHT);
            for y in 0..HEIGHT {
                for x in 0..WIDTH {
                    data[(x, y)] = 10.0 + rng.random_range(-0.2..0.2);
                }
            }
            for _ in 0..HITS_PER_EXPOSURE {
                let x = rng.random_range(4..WIDTH - 4);
                let y = rng.random_range(4..HEIGHT - 4);
                data[(x, y)] += rng.random_range(50.0..500.0);
            }
            let meta = ExposureMeta::new(format!("exposure_{g}"), format!("visit_{g}"))
                .with_wcs(Arc::new(AffineWcs::translation(DVec2::new(dx, dy))))
                .with_exposure_time(300.0)
                .with_read_noise(0.1);
            Exposure::new(
                meta,
                data,
                Buffer2::new_filled(WIDTH, HEIGHT, 0.2),
                Buffer2::new_default(WIDTH, HEIGHT),
            )
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    setup_logging("info", "logs")?;

    let config = match std::env::args().nth(1) {
        Some(path) => OutlierConfig::from_file(path)?,
        None => OutlierConfig::default(),
    };

    let mut library = ExposureLibrary::for_config(synthetic_exposures(), &config)?;
    let detector = OutlierDetection::new(config)?.with_progress(ProgressCallback::new(|p| {
        tracing::debug!(stage = %p.stage, current = p.current, total = p.total, "Progress");
    }));
    let report = detector.run(&mut library)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
