//! Numeric helpers for the combine and threshold stages.

pub mod statistics;

pub use statistics::{nan_median, percentile_linear, sigma_clipped_mean};
