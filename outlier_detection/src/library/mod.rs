//! Exposure collection over a resident or spooled storage strategy.
//!
//! Supports two modes:
//! - Resident: exposures live in a `Vec` for the lifetime of the library.
//! - Spooled: each exposure's planes live in one file inside a library-owned
//!   temporary directory; metadata stays in memory. Reads map the file,
//!   write-backs and DQ merges replace it through a `.tmp` + rename.
//!
//! Both modes present the same ordered, index-addressed view; a write-back
//! is visible to every later read of that index.

mod spool;

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::common::Buffer2;
use crate::config::OutlierConfig;
use crate::error::Error;
use crate::exposure::{Exposure, ExposureMeta, GroupId};

#[derive(Debug)]
struct SpoolEntry {
    meta: ExposureMeta,
    path: PathBuf,
    shape: (usize, usize),
}

#[derive(Debug)]
enum Storage {
    Resident(Vec<Exposure>),
    Spooled {
        entries: Vec<SpoolEntry>,
        dir: TempDir,
    },
}

/// Ordered, mutable collection of exposures.
#[derive(Debug)]
pub struct ExposureLibrary {
    storage: Storage,
}

impl ExposureLibrary {
    pub fn resident(exposures: Vec<Exposure>) -> Self {
        Self {
            storage: Storage::Resident(exposures),
        }
    }

    /// Spool every exposure to its own file under a fresh temporary directory.
    ///
    /// `parent` selects where that directory is created (system temp otherwise).
    pub fn spooled(exposures: Vec<Exposure>, parent: Option<&Path>) -> Result<Self, Error> {
        let dir = create_temp_dir(parent, "exposures-")?;
        let mut entries = Vec::with_capacity(exposures.len());
        for (index, exposure) in exposures.into_iter().enumerate() {
            let path = spool::exposure_filename(dir.path(), index);
            spool::write_planes(&path, &exposure.data, &exposure.err, &exposure.dq)?;
            entries.push(SpoolEntry {
                shape: exposure.shape(),
                meta: exposure.meta,
                path,
            });
        }

        tracing::info!(
            exposures = entries.len(),
            dir = %dir.path().display(),
            "Spooled exposure collection to disk"
        );

        Ok(Self {
            storage: Storage::Spooled { entries, dir },
        })
    }

    /// Resident when `config.in_memory`, spooled under `config.temp_dir` otherwise.
    pub fn for_config(exposures: Vec<Exposure>, config: &OutlierConfig) -> Result<Self, Error> {
        if config.in_memory {
            Ok(Self::resident(exposures))
        } else {
            Self::spooled(exposures, config.temp_dir.as_deref())
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Resident(exposures) => exposures.len(),
            Storage::Spooled { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, Storage::Spooled { .. })
    }

    /// Directory holding spool files, if spooled.
    pub fn spool_dir(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Resident(_) => None,
            Storage::Spooled { dir, .. } => Some(dir.path()),
        }
    }

    pub fn meta(&self, index: usize) -> &ExposureMeta {
        match &self.storage {
            Storage::Resident(exposures) => &exposures[index].meta,
            Storage::Spooled { entries, .. } => &entries[index].meta,
        }
    }

    pub fn shape(&self, index: usize) -> (usize, usize) {
        match &self.storage {
            Storage::Resident(exposures) => exposures[index].shape(),
            Storage::Spooled { entries, .. } => entries[index].shape,
        }
    }

    /// Borrow exposure `index`; spooled storage reads it back from disk.
    pub fn get(&self, index: usize) -> Result<Cow<'_, Exposure>, Error> {
        match &self.storage {
            Storage::Resident(exposures) => Ok(Cow::Borrowed(&exposures[index])),
            Storage::Spooled { entries, .. } => {
                let entry = &entries[index];
                let planes = spool::read_planes(&entry.path)?;
                Ok(Cow::Owned(Exposure::new(
                    entry.meta.clone(),
                    planes.data,
                    planes.err,
                    planes.dq,
                )))
            }
        }
    }

    /// Write `exposure` back at `index`.
    pub fn put(&mut self, index: usize, exposure: Exposure) -> Result<(), Error> {
        match &mut self.storage {
            Storage::Resident(exposures) => {
                exposures[index] = exposure;
                Ok(())
            }
            Storage::Spooled { entries, .. } => {
                let entry = &mut entries[index];
                spool::write_planes(&entry.path, &exposure.data, &exposure.err, &exposure.dq)?;
                entry.shape = exposure.shape();
                entry.meta = exposure.meta;
                Ok(())
            }
        }
    }

    /// Apply `f` to the DQ plane of exposure `index` and persist the result.
    pub fn update_dq<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Buffer2<u32>) -> R,
    ) -> Result<R, Error> {
        match &mut self.storage {
            Storage::Resident(exposures) => Ok(f(&mut exposures[index].dq)),
            Storage::Spooled { entries, .. } => {
                let path = &entries[index].path;
                let mut dq = spool::read_dq(path)?;
                let result = f(&mut dq);
                spool::write_dq(path, &dq)?;
                Ok(result)
            }
        }
    }

    /// Groups in order of first appearance, each with its member indices ascending.
    pub fn group_indices(&self) -> Vec<(GroupId, Vec<usize>)> {
        let mut groups: Vec<(GroupId, Vec<usize>)> = Vec::new();
        for index in 0..self.len() {
            let group = &self.meta(index).group;
            match groups.iter_mut().find(|(id, _)| id == group) {
                Some((_, members)) => members.push(index),
                None => groups.push((group.clone(), vec![index])),
            }
        }
        groups
    }

    /// Consume the library, reading spooled exposures back into memory.
    pub fn into_exposures(self) -> Result<Vec<Exposure>, Error> {
        match self.storage {
            Storage::Resident(exposures) => Ok(exposures),
            Storage::Spooled { entries, dir } => {
                let exposures = entries
                    .into_iter()
                    .map(|entry| {
                        let planes = spool::read_planes(&entry.path)?;
                        Ok(Exposure::new(entry.meta, planes.data, planes.err, planes.dq))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                drop(dir);
                Ok(exposures)
            }
        }
    }
}

/// Create a uniquely named temporary directory, under `parent` when given.
pub(crate) fn create_temp_dir(parent: Option<&Path>, prefix: &str) -> Result<TempDir, Error> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(|source| Error::CreateSpoolDir {
                path: parent.to_path_buf(),
                source,
            })?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    }
    .map_err(|source| Error::CreateSpoolDir {
        path: parent.map_or_else(std::env::temp_dir, Path::to_path_buf),
        source,
    })
}
