//! Row-section spooling for the on-disk median.
//!
//! A grid of `height` rows is cut into sections of `section_rows` rows.
//! Every masked group mosaic appends section `k` to file `k`, so after `n`
//! groups file `k` holds `n` consecutive blocks of `rows_k * width` f32
//! values. [`SectionSpool::finish`] checks each file has exactly that size,
//! maps it, takes the per-pixel median, and reassembles the sections in
//! ascending order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::median_rows;
use crate::common::Buffer2;
use crate::error::Error;
use crate::pipeline::CancelToken;
use crate::progress::{PipelineStage, ProgressCallback, report_progress};

/// Rows per section so one section of every group fits in `budget_bytes`.
///
/// Never less than one row, never more than `height`.
pub fn section_rows_for_budget(
    width: usize,
    height: usize,
    groups: usize,
    budget_bytes: usize,
) -> usize {
    let bytes_per_row = width.max(1) * groups.max(1) * size_of::<f32>();
    (budget_bytes / bytes_per_row).clamp(1, height.max(1))
}

/// Section files of masked mosaics awaiting the median pass.
#[derive(Debug)]
pub struct SectionSpool {
    dir: PathBuf,
    width: usize,
    height: usize,
    section_rows: usize,
    groups: usize,
}

impl SectionSpool {
    /// Spool into `dir`, which must exist and outlive the spool.
    pub fn new(dir: &Path, width: usize, height: usize, section_rows: usize) -> Self {
        assert!(section_rows > 0, "section_rows must be at least 1");
        Self {
            dir: dir.to_path_buf(),
            width,
            height,
            section_rows,
            groups: 0,
        }
    }

    pub fn section_count(&self) -> usize {
        self.height.div_ceil(self.section_rows)
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn section_rows(&self) -> usize {
        self.section_rows
    }

    fn section_path(&self, k: usize) -> PathBuf {
        self.dir.join(format!("section_{k:05}.bin"))
    }

    fn section_range(&self, k: usize) -> (usize, usize) {
        let start = k * self.section_rows;
        (start, (start + self.section_rows).min(self.height))
    }

    /// Append every section of one masked mosaic.
    pub fn append(&mut self, masked: &Buffer2<f32>) -> Result<(), Error> {
        assert_eq!(
            masked.shape(),
            (self.width, self.height),
            "masked mosaic must match the output grid"
        );
        for k in 0..self.section_count() {
            let path = self.section_path(k);
            let (start, end) = self.section_range(k);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| Error::CreateSpoolFile {
                    path: path.clone(),
                    source,
                })?;
            file.write_all(bytemuck::cast_slice(masked.rows(start, end)))
                .and_then(|()| file.flush())
                .map_err(|source| Error::WriteSpoolFile {
                    path: path.clone(),
                    source,
                })?;
        }
        self.groups += 1;
        Ok(())
    }

    /// Median every section and reassemble the full image.
    ///
    /// Section files are removed as they are consumed. Cancellation is
    /// checked between sections.
    pub fn finish(
        self,
        cancel: &CancelToken,
        progress: &ProgressCallback,
    ) -> Result<Buffer2<f32>, Error> {
        let mut out = Buffer2::new_filled(self.width, self.height, f32::NAN);
        let sections = self.section_count();
        if self.groups == 0 || self.width == 0 {
            return Ok(out);
        }

        for k in 0..sections {
            cancel.check()?;
            let path = self.section_path(k);
            let (start, end) = self.section_range(k);
            let block = (end - start) * self.width;
            let expected = (block * self.groups * size_of::<f32>()) as u64;

            let file = File::open(&path).map_err(|source| Error::OpenSpoolFile {
                path: path.clone(),
                source,
            })?;
            let actual = file
                .metadata()
                .map_err(|source| Error::OpenSpoolFile {
                    path: path.clone(),
                    source,
                })?
                .len();
            if actual != expected {
                return Err(Error::IncompleteSection {
                    path,
                    expected,
                    actual,
                });
            }

            let mmap = unsafe {
                Mmap::map(&file).map_err(|source| Error::MmapSpoolFile {
                    path: path.clone(),
                    source,
                })?
            };
            let values: &[f32] = bytemuck::cast_slice(&mmap[..]);
            let stack: Vec<&[f32]> = values.chunks_exact(block).collect();
            let out_rows = &mut out.pixels_mut()[start * self.width..end * self.width];
            median_rows(&stack, self.width, out_rows);

            drop(mmap);
            drop(file);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove section file");
            }
            report_progress(progress, k + 1, sections, PipelineStage::Median);
        }

        tracing::info!(
            sections,
            groups = self.groups,
            section_rows = self.section_rows,
            "Computed median from spooled sections"
        );
        Ok(out)
    }
}
