//! Outcome of one outlier detection run.

use std::path::PathBuf;

use serde::Serialize;
use strum_macros::Display;

use crate::exposure::GroupId;

/// Where intermediates live during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Mosaics and masks stay resident.
    #[strum(serialize = "in-memory")]
    InMemory,
    /// Masked mosaics are spooled as row sections, masks as packed words.
    #[strum(serialize = "on-disk")]
    OnDisk,
}

impl ExecutionMode {
    pub fn from_in_memory(in_memory: bool) -> Self {
        if in_memory { Self::InMemory } else { Self::OnDisk }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// Contributed to the median.
    Combined { covered_pixels: usize },
    /// Resampled, but no input pixel survived `good_bits`; filled with `fillval`.
    NoCoverage,
    /// Left out of the median because of a geometry error.
    Excluded { exposure: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub group: GroupId,
    pub members: Vec<usize>,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
    /// Saved coadd, if intermediates were kept.
    pub coadd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExposureOutcome {
    Flagged {
        newly_flagged: usize,
        percent: f64,
    },
    /// No usable WCS to blot onto; DQ untouched.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureReport {
    pub index: usize,
    pub name: String,
    pub group: GroupId,
    #[serde(flatten)]
    pub outcome: ExposureOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierReport {
    pub mode: ExecutionMode,
    /// Output grid shape, or the native shape when resampling is off.
    pub grid_shape: (usize, usize),
    /// Rows per median section, on-disk runs only.
    pub section_rows: Option<usize>,
    pub groups: Vec<GroupReport>,
    pub exposures: Vec<ExposureReport>,
    /// Saved median image, when intermediate products are kept.
    pub median: Option<PathBuf>,
}

impl OutlierReport {
    /// Pixels newly flagged across all exposures.
    pub fn total_flagged(&self) -> usize {
        self.exposures
            .iter()
            .map(|e| match e.outcome {
                ExposureOutcome::Flagged { newly_flagged, .. } => newly_flagged,
                ExposureOutcome::Skipped { .. } => 0,
            })
            .sum()
    }

    pub fn excluded_groups(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups
            .iter()
            .filter(|g| matches!(g.outcome, GroupOutcome::Excluded { .. }))
    }

    pub fn skipped_exposures(&self) -> impl Iterator<Item = &ExposureReport> {
        self.exposures
            .iter()
            .filter(|e| matches!(e.outcome, ExposureOutcome::Skipped { .. }))
    }
}
