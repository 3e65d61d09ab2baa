//! On-disk layout of one spooled exposure.
//!
//! ```text
//! [SpoolHeader][science f32 * n][uncertainty f32 * n][dq u32 * n]
//! ```
//!
//! Planes are raw little-endian row-major pixels; `n = width * height`.
//! Files are written to a `.tmp` sibling and renamed into place so a reader
//! never observes a partially written exposure.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

use crate::common::Buffer2;
use crate::error::Error;

const MAGIC: u32 = u32::from_le_bytes(*b"OLDX");
const VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct SpoolHeader {
    magic: u32,
    version: u32,
    width: u64,
    height: u64,
}

const HEADER_BYTES: usize = size_of::<SpoolHeader>();

/// Pixel planes as read back from a spool file.
pub(crate) struct SpooledPlanes {
    pub data: Buffer2<f32>,
    pub err: Buffer2<f32>,
    pub dq: Buffer2<u32>,
}

fn plane_bytes(width: usize, height: usize) -> usize {
    width * height * size_of::<f32>()
}

fn expected_len(width: usize, height: usize) -> u64 {
    (HEADER_BYTES + 3 * plane_bytes(width, height)) as u64
}

fn dq_offset(width: usize, height: usize) -> u64 {
    (HEADER_BYTES + 2 * plane_bytes(width, height)) as u64
}

pub(crate) fn write_planes(
    path: &Path,
    data: &Buffer2<f32>,
    err: &Buffer2<f32>,
    dq: &Buffer2<u32>,
) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");
    let write_err = |source| Error::WriteSpoolFile {
        path: tmp.clone(),
        source,
    };

    let file = File::create(&tmp).map_err(|source| Error::CreateSpoolFile {
        path: tmp.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let header = SpoolHeader {
        magic: MAGIC,
        version: VERSION,
        width: data.width() as u64,
        height: data.height() as u64,
    };
    writer
        .write_all(bytemuck::bytes_of(&header))
        .map_err(write_err)?;
    writer
        .write_all(bytemuck::cast_slice(data.pixels()))
        .map_err(write_err)?;
    writer
        .write_all(bytemuck::cast_slice(err.pixels()))
        .map_err(write_err)?;
    writer
        .write_all(bytemuck::cast_slice(dq.pixels()))
        .map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|source| Error::WriteSpoolFile {
        path: path.to_path_buf(),
        source,
    })
}

fn map_checked(path: &Path) -> Result<(Mmap, usize, usize), Error> {
    let file = File::open(path).map_err(|source| Error::OpenSpoolFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mmap = unsafe {
        Mmap::map(&file).map_err(|source| Error::MmapSpoolFile {
            path: path.to_path_buf(),
            source,
        })?
    };

    let corrupt = |reason: String| Error::CorruptSpoolFile {
        path: path.to_path_buf(),
        reason,
    };
    if mmap.len() < HEADER_BYTES {
        return Err(corrupt(format!("{} bytes is shorter than the header", mmap.len())));
    }
    let header: SpoolHeader = bytemuck::pod_read_unaligned(&mmap[..HEADER_BYTES]);
    if header.magic != MAGIC || header.version != VERSION {
        return Err(corrupt("bad magic or version".to_string()));
    }
    let (width, height) = (header.width as usize, header.height as usize);
    let expected = expected_len(width, height);
    if mmap.len() as u64 != expected {
        return Err(corrupt(format!(
            "expected {expected} bytes for {width}x{height}, found {}",
            mmap.len()
        )));
    }
    Ok((mmap, width, height))
}

pub(crate) fn read_planes(path: &Path) -> Result<SpooledPlanes, Error> {
    let (mmap, width, height) = map_checked(path)?;
    let n = plane_bytes(width, height);
    let body = &mmap[HEADER_BYTES..];
    let data: &[f32] = bytemuck::cast_slice(&body[..n]);
    let err: &[f32] = bytemuck::cast_slice(&body[n..2 * n]);
    let dq: &[u32] = bytemuck::cast_slice(&body[2 * n..3 * n]);
    Ok(SpooledPlanes {
        data: Buffer2::new(width, height, data.to_vec()),
        err: Buffer2::new(width, height, err.to_vec()),
        dq: Buffer2::new(width, height, dq.to_vec()),
    })
}

pub(crate) fn read_dq(path: &Path) -> Result<Buffer2<u32>, Error> {
    let (mmap, width, height) = map_checked(path)?;
    let start = dq_offset(width, height) as usize;
    let dq: &[u32] = bytemuck::cast_slice(&mmap[start..]);
    Ok(Buffer2::new(width, height, dq.to_vec()))
}

/// Replace the DQ plane.
///
/// The whole file is rewritten through the `.tmp` + rename path, so a failed
/// write leaves the previous planes intact.
pub(crate) fn write_dq(path: &Path, dq: &Buffer2<u32>) -> Result<(), Error> {
    let planes = read_planes(path)?;
    if !planes.dq.same_shape(dq) {
        return Err(Error::CorruptSpoolFile {
            path: path.to_path_buf(),
            reason: format!(
                "DQ plane is {}x{} but the file holds {}x{}",
                dq.width(),
                dq.height(),
                planes.dq.width(),
                planes.dq.height()
            ),
        });
    }
    write_planes(path, &planes.data, &planes.err, dq)
}

pub(crate) fn exposure_filename(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("exposure_{index:05}.bin"))
}
