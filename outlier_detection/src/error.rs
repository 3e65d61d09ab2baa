//! Error types for the outlier detection pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running outlier detection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Exposure {exposure} in group '{group}' has no usable WCS: {reason}")]
    Geometry {
        group: String,
        exposure: usize,
        reason: String,
    },

    #[error("Group '{group}' contains no exposures")]
    EmptyGroup { group: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No exposures provided")]
    NoExposures,

    #[error("Every group was excluded; nothing to build a median from")]
    NoUsableGroups,

    #[error("Shape mismatch for exposure {exposure}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        exposure: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Unit mismatch for exposure {exposure}: expected '{expected}', got '{actual}'")]
    UnitMismatch {
        exposure: usize,
        expected: String,
        actual: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Failed to create spool directory '{path}': {source}")]
    CreateSpoolDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create spool file '{path}': {source}")]
    CreateSpoolFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write spool file '{path}': {source}")]
    WriteSpoolFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open spool file '{path}': {source}")]
    OpenSpoolFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to memory-map spool file '{path}': {source}")]
    MmapSpoolFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Spool file '{path}' is corrupt: {reason}")]
    CorruptSpoolFile { path: PathBuf, reason: String },

    #[error("Section file '{path}' is incomplete: expected {expected} bytes, found {actual}")]
    IncompleteSection {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config '{path}': {reason}")]
    ParseConfig { path: PathBuf, reason: String },

    #[error("Failed to write intermediate product '{path}': {source}")]
    WriteProduct {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read intermediate product '{path}': {source}")]
    ReadProduct {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Intermediate product '{path}' is corrupt: {reason}")]
    CorruptProduct { path: PathBuf, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_error_message() {
        let err = Error::Geometry {
            group: "visit_001".to_string(),
            exposure: 3,
            reason: "singular transform".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("visit_001"));
        assert!(msg.contains('3'));
        assert!(msg.contains("singular transform"));
    }

    #[test]
    fn test_incomplete_section_message() {
        let err = Error::IncompleteSection {
            path: PathBuf::from("/tmp/run/section_0002.bin"),
            expected: 4096,
            actual: 2048,
        };
        let msg = err.to_string();
        assert!(msg.contains("section_0002.bin"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("2048"));
    }

    #[test]
    fn test_spool_error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::WriteSpoolFile {
            path: PathBuf::from("/tmp/run/exposure_0000.bin"),
            source: io::Error::other("disk full"),
        };
        assert!(err.to_string().contains("disk full"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_cancelled_is_debug() {
        assert!(format!("{:?}", Error::Cancelled).contains("Cancelled"));
    }
}
