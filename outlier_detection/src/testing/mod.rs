//! Testing utilities for outlier detection.

#![allow(dead_code)]

use std::sync::Arc;

use glam::DVec2;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::common::Buffer2;
use crate::exposure::{Exposure, ExposureMeta};
use crate::wcs::AffineWcs;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Constant-valued exposure on an identity WCS with unit uncertainty and clean DQ.
pub fn simple_exposure(
    name: &str,
    group: &str,
    width: usize,
    height: usize,
    value: f32,
) -> Exposure {
    shifted_exposure(name, group, width, height, DVec2::ZERO, value)
}

/// Constant-valued exposure whose pixel `p` sits at world `p + offset`.
pub fn shifted_exposure(
    name: &str,
    group: &str,
    width: usize,
    height: usize,
    offset: DVec2,
    value: f32,
) -> Exposure {
    let meta =
        ExposureMeta::new(name, group).with_wcs(Arc::new(AffineWcs::translation(offset)));
    Exposure::new(
        meta,
        Buffer2::new_filled(width, height, value),
        Buffer2::new_filled(width, height, 1.0),
        Buffer2::new_default(width, height),
    )
}

/// A cosmic-ray hit injected into a synthetic exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectedHit {
    pub exposure: usize,
    pub x: usize,
    pub y: usize,
}

/// Dithered exposures of a smooth sky with seeded noise and cosmic-ray hits.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub width: usize,
    pub height: usize,
    /// Integer world offsets, one group per entry.
    pub offsets: Vec<(i32, i32)>,
    pub exposures_per_group: usize,
    pub sky: f32,
    pub noise: f32,
    pub hits_per_exposure: usize,
    pub hit_amplitude: f32,
    pub seed: u64,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            width: 32,
            height: 24,
            offsets: vec![(0, 0), (1, 0), (0, 1), (1, 1), (2, 1)],
            exposures_per_group: 1,
            sky: 100.0,
            noise: 0.5,
            hits_per_exposure: 3,
            hit_amplitude: 500.0,
            seed: 7,
        }
    }
}

impl SyntheticScene {
    /// World-space sky model: a gentle gradient.
    pub fn sky_at(&self, world: DVec2) -> f32 {
        self.sky + 0.05 * world.x as f32 + 0.03 * world.y as f32
    }

    pub fn build(&self) -> (Vec<Exposure>, Vec<InjectedHit>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut exposures = Vec::new();
        let mut hits = Vec::new();

        for (g, &(dx, dy)) in self.offsets.iter().enumerate() {
            for e in 0..self.exposures_per_group {
                let index = exposures.len();
                let offset = DVec2::new(dx as f64, dy as f64);
                let mut data = Buffer2::new_default(self.width, self.height);
                for y in 0..self.height {
                    for x in 0..self.width {
                        let world = DVec2::new(x as f64 + 0.5, y as f64 + 0.5) + offset;
                        let jitter = (rng.random::<f32>() - 0.5) * 2.0 * self.noise;
                        data[(x, y)] = self.sky_at(world) + jitter;
                    }
                }

                // Hits stay two pixels from the edge so every one is seen by other groups.
                for _ in 0..self.hits_per_exposure {
                    let x = rng.random_range(3..self.width - 3);
                    let y = rng.random_range(3..self.height - 3);
                    data[(x, y)] += self.hit_amplitude;
                    hits.push(InjectedHit { exposure: index, x, y });
                }

                let meta = ExposureMeta::new(format!("g{g}_e{e}"), format!("group_{g}"))
                    .with_wcs(Arc::new(AffineWcs::translation(offset)))
                    .with_exposure_time(100.0)
                    .with_read_noise(0.5);
                let err = Buffer2::new_filled(self.width, self.height, 1.0);
                let dq = Buffer2::new_default(self.width, self.height);
                exposures.push(Exposure::new(meta, data, err, dq));
            }
        }

        (exposures, hits)
    }
}
