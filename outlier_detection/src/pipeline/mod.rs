//! Memory-bounded execution controller.
//!
//! A run goes through four barriers:
//!
//! 1. **Resampling**: each group is drizzled onto the output grid, one group
//!    at a time, weight-thresholded, and handed to the median stack (kept
//!    resident, or appended to row-section files in on-disk mode).
//! 2. **Median**: per-pixel NaN-aware median of the stack.
//! 3. **Flagging**: the median is blotted onto each exposure and compared;
//!    masks are stored, nothing is written to DQ yet.
//! 4. **Merging**: masks are OR-ed into DQ, the only phase that mutates the
//!    collection.
//!
//! All temporary files live in one run directory removed when the run ends,
//! whichever way it ends. Cancellation is checked between units of work, so
//! a cancelled run leaves the collection as it found it.

mod cancel;
mod masks;
mod report;

use std::borrow::Cow;

use tempfile::TempDir;

use crate::coadd::{write_coadd, write_median};
use crate::common::Buffer2;
use crate::config::OutlierConfig;
use crate::error::Error;
use crate::exposure::GroupId;
use crate::flag::{FlagParams, flag_outliers, merge_outliers};
use crate::library::{ExposureLibrary, create_temp_dir};
use crate::median::{
    SectionSpool, mask_mosaic, median_of_masked, section_rows_for_budget, weight_threshold,
};
use crate::progress::{PipelineStage, ProgressCallback, report_progress};
use crate::resample::{DrizzleParams, Mosaic, blot, native_mosaic, resample_streamed};
use crate::wcs::{Footprint, OutputGrid};

pub use cancel::CancelToken;
pub use report::{
    ExecutionMode, ExposureOutcome, ExposureReport, GroupOutcome, GroupReport, OutlierReport,
};

use masks::MaskStore;

/// Median inputs collected during the resampling stage.
enum MedianStack {
    InMemory(Vec<Buffer2<f32>>),
    OnDisk(SectionSpool),
}

impl MedianStack {
    fn push(&mut self, masked: Buffer2<f32>) -> Result<(), Error> {
        match self {
            Self::InMemory(planes) => {
                planes.push(masked);
                Ok(())
            }
            Self::OnDisk(spool) => spool.append(&masked),
        }
    }

    fn finish(
        self,
        cancel: &CancelToken,
        progress: &ProgressCallback,
    ) -> Result<Buffer2<f32>, Error> {
        match self {
            Self::InMemory(planes) => {
                cancel.check()?;
                let median = median_of_masked(&planes);
                report_progress(progress, 1, 1, PipelineStage::Median);
                Ok(median)
            }
            Self::OnDisk(spool) => spool.finish(cancel, progress),
        }
    }
}

/// Outlier detection over an [`ExposureLibrary`].
///
/// # Examples
///
/// ```ignore
/// let config = OutlierConfig::from_file("outlier.yaml")?;
/// let mut library = ExposureLibrary::for_config(exposures, &config)?;
/// let report = OutlierDetection::new(config)?.run(&mut library)?;
/// println!("flagged {} pixels", report.total_flagged());
/// ```
#[derive(Debug, Clone)]
pub struct OutlierDetection {
    config: OutlierConfig,
    grid: Option<OutputGrid>,
    progress: ProgressCallback,
    cancel: CancelToken,
}

impl OutlierDetection {
    /// Fails with [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: OutlierConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            grid: None,
            progress: ProgressCallback::none(),
            cancel: CancelToken::new(),
        })
    }

    /// Resample onto `grid` instead of one derived from the exposure footprints.
    pub fn with_grid(mut self, grid: OutputGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Token that cancels this detector's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run detection and merge outlier flags into the DQ of every exposure.
    pub fn run(&self, library: &mut ExposureLibrary) -> Result<OutlierReport, Error> {
        if library.is_empty() {
            return Err(Error::NoExposures);
        }
        check_units(library)?;

        let config = &self.config;
        let mode = ExecutionMode::from_in_memory(config.in_memory);
        let run_dir = match mode {
            ExecutionMode::InMemory => None,
            ExecutionMode::OnDisk => {
                Some(create_temp_dir(config.temp_dir.as_deref(), "outlier-run-")?)
            }
        };
        if mode == ExecutionMode::OnDisk && !library.is_spooled() {
            tracing::debug!("On-disk run over a resident exposure collection");
        }

        tracing::info!(
            mode = %mode,
            exposures = library.len(),
            kernel = %config.kernel,
            weight_type = %config.weight_type,
            interp = %config.interp,
            noise_model = %config.noise_model,
            resample_data = config.resample_data,
            "Starting outlier detection"
        );

        let groups = library.group_indices();
        let (median, grid, group_reports, section_rows) = if config.resample_data {
            let grid = match &self.grid {
                Some(grid) => grid.clone(),
                None => derive_grid(library, config)?,
            };
            let (median, groups, rows) =
                self.resampled_median(library, &groups, &grid, run_dir.as_ref())?;
            (median, Some(grid), groups, rows)
        } else {
            let (median, groups, rows) = self.native_median(library, &groups, run_dir.as_ref())?;
            (median, None, groups, rows)
        };

        let median_path = match &config.save_intermediate {
            Some(dir) => Some(write_median(dir, &median)?),
            None => None,
        };

        let (masks, mut exposure_reports) =
            self.flag_all(library, &median, grid.as_ref(), run_dir.as_ref())?;

        // Commit phase: the only writes to the collection.
        self.cancel.check()?;
        let total = masks.len();
        let mut merged = 0;
        masks.for_each(|index, mask| {
            let stats = library.update_dq(index, |dq| merge_outliers(dq, mask, config.flag_bits))?;
            tracing::info!(
                exposure = index,
                flagged = stats.newly_flagged,
                percent = stats.percent,
                "Merged outlier flags"
            );
            if let Some(report) = exposure_reports.iter_mut().find(|r| r.index == index) {
                report.outcome = ExposureOutcome::Flagged {
                    newly_flagged: stats.newly_flagged,
                    percent: stats.percent,
                };
            }
            merged += 1;
            report_progress(&self.progress, merged, total, PipelineStage::Merging);
            Ok(())
        })?;

        let report = OutlierReport {
            mode,
            grid_shape: median.shape(),
            section_rows,
            groups: group_reports,
            exposures: exposure_reports,
            median: median_path,
        };
        tracing::info!(
            flagged = report.total_flagged(),
            excluded_groups = report.excluded_groups().count(),
            skipped_exposures = report.skipped_exposures().count(),
            "Outlier detection complete"
        );
        drop(run_dir);
        Ok(report)
    }

    fn median_stack(
        &self,
        run_dir: Option<&TempDir>,
        shape: (usize, usize),
        inputs: usize,
    ) -> (MedianStack, Option<usize>) {
        match run_dir {
            None => (MedianStack::InMemory(Vec::with_capacity(inputs)), None),
            Some(dir) => {
                let (width, height) = shape;
                let rows = self
                    .config
                    .section_rows
                    .unwrap_or_else(|| {
                        section_rows_for_budget(
                            width,
                            height,
                            inputs,
                            self.config.median_buffer_bytes,
                        )
                    })
                    .clamp(1, height.max(1));
                tracing::debug!(section_rows = rows, "Median sections");
                (
                    MedianStack::OnDisk(SectionSpool::new(dir.path(), width, height, rows)),
                    Some(rows),
                )
            }
        }
    }

    fn mask_for_median(&self, mosaic: &Mosaic) -> Buffer2<f32> {
        let threshold = weight_threshold(
            &mosaic.weight,
            self.config.maskpt,
            self.config.weight_reference,
        );
        mask_mosaic(mosaic, threshold)
    }

    fn resampled_median(
        &self,
        library: &ExposureLibrary,
        groups: &[(GroupId, Vec<usize>)],
        grid: &OutputGrid,
        run_dir: Option<&TempDir>,
    ) -> Result<(Buffer2<f32>, Vec<GroupReport>, Option<usize>), Error> {
        let config = &self.config;
        let params = DrizzleParams::from_config(config);
        let (mut stack, section_rows) = self.median_stack(run_dir, grid.shape(), groups.len());
        let mut reports = Vec::with_capacity(groups.len());
        let mut usable = 0;

        for (step, (group, members)) in groups.iter().enumerate() {
            self.cancel.check()?;
            let loaded = members
                .iter()
                .map(|&index| library.get(index).map(|exposure| (index, exposure)));
            let resampled = resample_streamed(group, loaded, grid, params);

            let (outcome, coadd) = match resampled {
                Ok(mosaic) => {
                    let covered_pixels = mosaic.covered_pixels();
                    let coadd = match &config.save_intermediate {
                        Some(dir) => {
                            Some(write_coadd(dir, group, &config.resample_suffix, &mosaic)?)
                        }
                        None => None,
                    };
                    stack.push(self.mask_for_median(&mosaic))?;
                    usable += 1;
                    let outcome = if covered_pixels == 0 {
                        tracing::warn!(group = %group, "Group has no valid pixels after good_bits");
                        GroupOutcome::NoCoverage
                    } else {
                        tracing::info!(
                            group = %group,
                            members = members.len(),
                            covered_pixels,
                            "Resampled group"
                        );
                        GroupOutcome::Combined { covered_pixels }
                    };
                    (outcome, coadd)
                }
                Err(Error::Geometry {
                    exposure, reason, ..
                }) => {
                    tracing::warn!(
                        group = %group,
                        exposure,
                        reason = %reason,
                        "Excluding group from median"
                    );
                    (GroupOutcome::Excluded { exposure, reason }, None)
                }
                Err(e) => return Err(e),
            };
            reports.push(GroupReport {
                group: group.clone(),
                members: members.clone(),
                outcome,
                coadd,
            });
            report_progress(&self.progress, step + 1, groups.len(), PipelineStage::Resampling);
        }

        if usable == 0 {
            return Err(Error::NoUsableGroups);
        }
        let median = stack.finish(&self.cancel, &self.progress)?;
        Ok((median, reports, section_rows))
    }

    /// Median of the exposures on their own pixels, one median input per exposure.
    fn native_median(
        &self,
        library: &ExposureLibrary,
        groups: &[(GroupId, Vec<usize>)],
        run_dir: Option<&TempDir>,
    ) -> Result<(Buffer2<f32>, Vec<GroupReport>, Option<usize>), Error> {
        let config = &self.config;
        let shape = library.shape(0);
        for index in 1..library.len() {
            let actual = library.shape(index);
            if actual != shape {
                return Err(Error::ShapeMismatch {
                    exposure: index,
                    expected: shape,
                    actual,
                });
            }
        }

        let (mut stack, section_rows) = self.median_stack(run_dir, shape, library.len());
        let mut reports = Vec::with_capacity(groups.len());
        for (step, (group, members)) in groups.iter().enumerate() {
            let mut covered_pixels = 0;
            for &index in members {
                self.cancel.check()?;
                let exposure = library.get(index)?;
                let mosaic = native_mosaic(&exposure, config.weight_type, config.good_bits);
                covered_pixels += mosaic.covered_pixels();
                stack.push(self.mask_for_median(&mosaic))?;
            }
            let outcome = if covered_pixels == 0 {
                tracing::warn!(group = %group, "Group has no valid pixels after good_bits");
                GroupOutcome::NoCoverage
            } else {
                GroupOutcome::Combined { covered_pixels }
            };
            reports.push(GroupReport {
                group: group.clone(),
                members: members.clone(),
                outcome,
                coadd: None,
            });
            report_progress(&self.progress, step + 1, groups.len(), PipelineStage::Resampling);
        }

        let median = stack.finish(&self.cancel, &self.progress)?;
        Ok((median, reports, section_rows))
    }

    /// Compute every exposure's outlier mask without touching DQ.
    fn flag_all(
        &self,
        library: &ExposureLibrary,
        median: &Buffer2<f32>,
        grid: Option<&OutputGrid>,
        run_dir: Option<&TempDir>,
    ) -> Result<(MaskStore, Vec<ExposureReport>), Error> {
        let params = FlagParams::from_config(&self.config);
        let mut store = match run_dir {
            Some(dir) => MaskStore::on_disk(dir.path()),
            None => MaskStore::in_memory(),
        };
        let mut reports = Vec::with_capacity(library.len());
        let total = library.len();

        for index in 0..total {
            self.cancel.check()?;
            let meta = library.meta(index);
            let skipped = |reason: String| ExposureReport {
                index,
                name: meta.name.clone(),
                group: meta.group.clone(),
                outcome: ExposureOutcome::Skipped { reason },
            };

            let exposure = library.get(index)?;
            let reference = match grid {
                Some(grid) => {
                    match blot(median, grid, &exposure.meta, exposure.shape(), self.config.interp) {
                        Ok(blotted) => Cow::Owned(blotted),
                        Err(reason) => {
                            tracing::warn!(
                                group = %meta.group,
                                exposure = index,
                                reason = %reason,
                                "Skipping exposure without usable WCS"
                            );
                            reports.push(skipped(reason));
                            report_progress(
                                &self.progress,
                                index + 1,
                                total,
                                PipelineStage::Flagging,
                            );
                            continue;
                        }
                    }
                }
                None => Cow::Borrowed(median),
            };

            let mask = flag_outliers(&exposure, &reference, &params);
            tracing::debug!(
                group = %meta.group,
                exposure = index,
                flagged = mask.count_ones(),
                "Computed outlier mask"
            );
            store.push(index, mask)?;
            // Filled in with merge statistics during the commit phase.
            reports.push(ExposureReport {
                index,
                name: meta.name.clone(),
                group: meta.group.clone(),
                outcome: ExposureOutcome::Flagged {
                    newly_flagged: 0,
                    percent: 0.0,
                },
            });
            report_progress(&self.progress, index + 1, total, PipelineStage::Flagging);
        }
        Ok((store, reports))
    }
}

/// Every exposure must carry the first exposure's pixel-value unit.
fn check_units(library: &ExposureLibrary) -> Result<(), Error> {
    let expected = &library.meta(0).unit;
    for index in 1..library.len() {
        let actual = &library.meta(index).unit;
        if actual != expected {
            return Err(Error::UnitMismatch {
                exposure: index,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}

/// Output grid over the footprints of every exposure with a usable WCS.
fn derive_grid(library: &ExposureLibrary, config: &OutlierConfig) -> Result<OutputGrid, Error> {
    let footprints: Vec<Footprint<'_>> = (0..library.len())
        .filter_map(|index| {
            let meta = library.meta(index);
            let wcs = meta.wcs.as_deref()?;
            wcs.validate().ok()?;
            let (width, height) = library.shape(index);
            Some(Footprint { width, height, wcs })
        })
        .collect();
    if footprints.is_empty() {
        return Err(Error::NoUsableGroups);
    }
    let grid = OutputGrid::from_footprints(&footprints, &config.grid_options())
        .map_err(|reason| Error::InvalidConfig(format!("cannot derive output grid: {reason}")))?;
    tracing::info!(width = grid.width, height = grid.height, "Derived output grid");
    Ok(grid)
}
