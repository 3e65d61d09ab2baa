//! Persisted intermediate products: per-group mosaics
//! (`<group>_<suffix>.bin`) and the median image (`median.bin`).
//!
//! ```text
//! [PlaneHeader][plane f32 * n]...
//! ```
//!
//! A coadd holds a data and a weight plane, the median a single plane.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use crate::common::Buffer2;
use crate::error::Error;
use crate::exposure::GroupId;
use crate::resample::Mosaic;

const COADD_MAGIC: u32 = u32::from_le_bytes(*b"OLDC");
const MEDIAN_MAGIC: u32 = u32::from_le_bytes(*b"OLDM");
const VERSION: u32 = 1;

pub const MEDIAN_FILENAME: &str = "median.bin";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PlaneHeader {
    magic: u32,
    version: u32,
    width: u64,
    height: u64,
}

const HEADER_BYTES: usize = size_of::<PlaneHeader>();

/// File name for a group's coadd. Path separators in the group id become `_`.
pub fn coadd_filename(group: &GroupId, suffix: &str) -> String {
    let group: String = group
        .0
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{group}_{suffix}.bin")
}

/// Write `mosaic` into `dir`, creating it if needed. Returns the file path.
pub fn write_coadd(
    dir: &Path,
    group: &GroupId,
    suffix: &str,
    mosaic: &Mosaic,
) -> Result<PathBuf, Error> {
    let path = dir.join(coadd_filename(group, suffix));
    write_planes(
        dir,
        &path,
        COADD_MAGIC,
        mosaic.data.shape(),
        &[mosaic.data.pixels(), mosaic.weight.pixels()],
    )?;
    tracing::debug!(group = %group, path = %path.display(), "Saved coadd");
    Ok(path)
}

/// Write the median image into `dir` as [`MEDIAN_FILENAME`].
pub fn write_median(dir: &Path, median: &Buffer2<f32>) -> Result<PathBuf, Error> {
    let path = dir.join(MEDIAN_FILENAME);
    write_planes(dir, &path, MEDIAN_MAGIC, median.shape(), &[median.pixels()])?;
    tracing::debug!(path = %path.display(), "Saved median");
    Ok(path)
}

pub fn read_coadd(path: &Path) -> Result<Mosaic, Error> {
    let (width, height, mut planes) = read_planes(path, COADD_MAGIC, 2)?;
    let weight = planes.pop().unwrap_or_default();
    let data = planes.pop().unwrap_or_default();
    Ok(Mosaic {
        data: Buffer2::new(width, height, data),
        weight: Buffer2::new(width, height, weight),
    })
}

pub fn read_median(path: &Path) -> Result<Buffer2<f32>, Error> {
    let (width, height, mut planes) = read_planes(path, MEDIAN_MAGIC, 1)?;
    Ok(Buffer2::new(width, height, planes.pop().unwrap_or_default()))
}

fn write_planes(
    dir: &Path,
    path: &Path,
    magic: u32,
    (width, height): (usize, usize),
    planes: &[&[f32]],
) -> Result<(), Error> {
    let write_err = |source| Error::WriteProduct {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut writer = BufWriter::new(File::create(path).map_err(write_err)?);
    let header = PlaneHeader {
        magic,
        version: VERSION,
        width: width as u64,
        height: height as u64,
    };
    writer
        .write_all(bytemuck::bytes_of(&header))
        .map_err(write_err)?;
    for plane in planes {
        writer
            .write_all(bytemuck::cast_slice(plane))
            .map_err(write_err)?;
    }
    writer.flush().map_err(write_err)
}

fn read_planes(
    path: &Path,
    magic: u32,
    count: usize,
) -> Result<(usize, usize, Vec<Vec<f32>>), Error> {
    let read_err = |source| Error::ReadProduct {
        path: path.to_path_buf(),
        source,
    };
    let corrupt = |reason: String| Error::CorruptProduct {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(read_err)?;
    let mmap = unsafe { Mmap::map(&file).map_err(read_err)? };
    if mmap.len() < HEADER_BYTES {
        return Err(corrupt(format!("{} bytes is shorter than the header", mmap.len())));
    }
    let header: PlaneHeader = bytemuck::pod_read_unaligned(&mmap[..HEADER_BYTES]);
    if header.magic != magic || header.version != VERSION {
        return Err(corrupt("bad magic or version".to_string()));
    }
    let (width, height) = (header.width as usize, header.height as usize);
    let n = width * height * size_of::<f32>();
    if mmap.len() != HEADER_BYTES + count * n {
        return Err(corrupt(format!(
            "expected {} bytes for {width}x{height}, found {}",
            HEADER_BYTES + count * n,
            mmap.len()
        )));
    }

    let planes = mmap[HEADER_BYTES..]
        .chunks_exact(n.max(1))
        .take(count)
        .map(|bytes| bytemuck::cast_slice::<u8, f32>(bytes).to_vec())
        .collect();
    Ok((width, height, planes))
}
