//! Outlier masks held until the DQ commit phase.
//!
//! On-disk runs write each mask's packed words to the run directory so
//! memory stays bounded by one mask at a time.

use std::fs::File;
use std::io::Write;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::common::BitMask2;
use crate::error::Error;

#[derive(Debug)]
pub(super) struct SpooledMask {
    index: usize,
    path: PathBuf,
    width: usize,
    height: usize,
}

#[derive(Debug)]
pub(super) enum MaskStore {
    InMemory(Vec<(usize, BitMask2)>),
    OnDisk {
        dir: PathBuf,
        masks: Vec<SpooledMask>,
    },
}

impl MaskStore {
    pub(super) fn in_memory() -> Self {
        Self::InMemory(Vec::new())
    }

    pub(super) fn on_disk(dir: &Path) -> Self {
        Self::OnDisk {
            dir: dir.to_path_buf(),
            masks: Vec::new(),
        }
    }

    pub(super) fn len(&self) -> usize {
        match self {
            Self::InMemory(masks) => masks.len(),
            Self::OnDisk { masks, .. } => masks.len(),
        }
    }

    pub(super) fn push(&mut self, index: usize, mask: BitMask2) -> Result<(), Error> {
        match self {
            Self::InMemory(masks) => masks.push((index, mask)),
            Self::OnDisk { dir, masks } => {
                let path = dir.join(format!("mask_{index:05}.bin"));
                let write_err = |source| Error::WriteSpoolFile {
                    path: path.clone(),
                    source,
                };
                let mut file = File::create(&path).map_err(|source| Error::CreateSpoolFile {
                    path: path.clone(),
                    source,
                })?;
                file.write_all(bytemuck::cast_slice(mask.words()))
                    .map_err(write_err)?;
                file.flush().map_err(write_err)?;
                masks.push(SpooledMask {
                    index,
                    path,
                    width: mask.width(),
                    height: mask.height(),
                });
            }
        }
        Ok(())
    }

    /// Visit every stored mask in insertion order.
    pub(super) fn for_each(
        self,
        mut f: impl FnMut(usize, &BitMask2) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Self::InMemory(masks) => {
                for (index, mask) in &masks {
                    f(*index, mask)?;
                }
            }
            Self::OnDisk { masks, .. } => {
                for entry in &masks {
                    let mask = read_mask(entry)?;
                    f(entry.index, &mask)?;
                }
            }
        }
        Ok(())
    }
}

fn read_mask(entry: &SpooledMask) -> Result<BitMask2, Error> {
    let path = &entry.path;
    let file = File::open(path).map_err(|source| Error::OpenSpoolFile {
        path: path.clone(),
        source,
    })?;
    let mmap = unsafe {
        Mmap::map(&file).map_err(|source| Error::MmapSpoolFile {
            path: path.clone(),
            source,
        })?
    };
    let words = (entry.width * entry.height).div_ceil(64);
    if mmap.len() != words * size_of::<u64>() {
        return Err(Error::CorruptSpoolFile {
            path: path.clone(),
            reason: format!(
                "expected {} bytes of mask words, found {}",
                words * size_of::<u64>(),
                mmap.len()
            ),
        });
    }
    let words: &[u64] = bytemuck::cast_slice(&mmap[..]);
    Ok(BitMask2::from_words(
        entry.width,
        entry.height,
        words.to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mask() -> BitMask2 {
        BitMask2::from_fn(70, 3, |i| i % 7 == 0)
    }

    #[test]
    fn on_disk_masks_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MaskStore::on_disk(dir.path());
        store.push(4, sample_mask()).unwrap();
        store.push(9, BitMask2::new_default(70, 3)).unwrap();
        assert_eq!(store.len(), 2);

        let mut seen = Vec::new();
        store
            .for_each(|index, mask| {
                seen.push((index, mask.count_ones()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(4, sample_mask().count_ones()), (9, 0)]);
    }

    #[test]
    fn truncated_mask_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MaskStore::on_disk(dir.path());
        store.push(0, sample_mask()).unwrap();
        std::fs::write(dir.path().join("mask_00000.bin"), [0u8; 8]).unwrap();
        let result = store.for_each(|_, _| Ok(()));
        assert!(matches!(result, Err(Error::CorruptSpoolFile { .. })));
    }
}
