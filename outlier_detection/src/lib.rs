//! Outlier detection for dithered exposure sets.
//!
//! Each group of exposures is drizzled onto a shared output grid, the group
//! mosaics are median-combined, the median is blotted back onto every
//! exposure, and pixels that disagree with it beyond the noise are OR-ed
//! into the exposure's DQ plane.
//!
//! Intermediates either stay in memory or stream through a run-scoped
//! temporary directory; both modes produce identical flags.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use outlier_detection::{ExposureLibrary, OutlierConfig, OutlierDetection};
//!
//! let config = OutlierConfig::from_file("outlier.yaml")?;
//! let mut library = ExposureLibrary::for_config(exposures, &config)?;
//! let report = OutlierDetection::new(config)?.run(&mut library)?;
//! println!("{} pixels flagged", report.total_flagged());
//! ```

pub mod coadd;
pub mod common;
pub mod config;
pub mod dq;
mod error;
pub mod exposure;
pub mod flag;
pub mod library;
pub mod logging;
pub(crate) mod math;
pub mod median;
pub mod pipeline;
pub mod progress;
pub mod resample;
pub mod wcs;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Data model
// ============================================================================

pub use common::{BitMask2, Buffer2};
pub use dq::DqBits;
pub use exposure::{Background, Exposure, ExposureMeta, GroupId};
pub use library::ExposureLibrary;
pub use wcs::{AffineWcs, Footprint, GridOptions, OutputGrid, PixelMap, WorldTransform};

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{FillValue, OutlierConfig, Pair};
pub use error::{Error, Result};

// ============================================================================
// Stages
// ============================================================================

pub use flag::{FlagParams, MergeStats, NoiseModel, flag_outliers, merge_outliers};
pub use median::{WeightReference, compute_median};
pub use resample::{
    DrizzleParams, Interp, Kernel, Mosaic, WeightType, blot, resample, resample_streamed,
};

// ============================================================================
// Controller
// ============================================================================

pub use pipeline::{
    CancelToken, ExecutionMode, ExposureOutcome, ExposureReport, GroupOutcome, GroupReport,
    OutlierDetection, OutlierReport,
};
pub use progress::{PipelineProgress, PipelineStage, ProgressCallback};
