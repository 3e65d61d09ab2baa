//! Run configuration.
//!
//! An [`OutlierConfig`] is built once (from defaults, code, or a YAML/JSON
//! file), checked with [`OutlierConfig::validate`], and never mutated by the
//! pipeline afterwards.

use std::fmt;
use std::path::{Path, PathBuf};

use glam::DVec2;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dq::{self, DqBits};
use crate::error::Error;
use crate::flag::NoiseModel;
use crate::median::WeightReference;
use crate::resample::{Interp, Kernel, WeightType};
use crate::wcs::GridOptions;

/// Default byte budget for one spooled median section across all groups.
pub const DEFAULT_MEDIAN_BUFFER_BYTES: usize = 100 * 1024 * 1024;

/// Primary/secondary threshold pair.
///
/// Deserializes from a single number (used for both levels), a two-element
/// list, or a whitespace-separated string such as `"5.0 4.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pair {
    pub primary: f32,
    pub secondary: f32,
}

impl Pair {
    pub const fn new(primary: f32, secondary: f32) -> Self {
        Self { primary, secondary }
    }

    pub const fn splat(value: f32) -> Self {
        Self::new(value, value)
    }
}

impl<'de> Deserialize<'de> for Pair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(f32),
            List(Vec<f32>),
            Text(String),
            Fields { primary: f32, secondary: f32 },
        }

        let values = match Raw::deserialize(deserializer)? {
            Raw::One(v) => return Ok(Pair::splat(v)),
            Raw::Fields { primary, secondary } => return Ok(Pair::new(primary, secondary)),
            Raw::List(values) => values,
            Raw::Text(text) => text
                .split_whitespace()
                .map(str::parse::<f32>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(serde::de::Error::custom)?,
        };
        match values.as_slice() {
            [v] => Ok(Pair::splat(*v)),
            [a, b] => Ok(Pair::new(*a, *b)),
            _ => Err(serde::de::Error::custom(format!(
                "expected one or two values, got {}",
                values.len()
            ))),
        }
    }
}

/// Value written to output pixels that received no contribution.
///
/// `"INDEF"` (and `"NaN"`) in config files mean NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillValue(pub f32);

impl Default for FillValue {
    fn default() -> Self {
        Self(f32::NAN)
    }
}

impl FillValue {
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Serialize for FillValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_nan() {
            serializer.serialize_str("INDEF")
        } else {
            serializer.serialize_f32(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for FillValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(FillValue(v)),
            Raw::Text(text) => {
                let t = text.trim();
                if t.eq_ignore_ascii_case("indef") || t.eq_ignore_ascii_case("nan") {
                    Ok(FillValue(f32::NAN))
                } else {
                    t.parse::<f32>()
                        .map(FillValue)
                        .map_err(serde::de::Error::custom)
                }
            }
        }
    }
}

impl fmt::Display for FillValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_nan() {
            write!(f, "INDEF")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn default_good_bits() -> DqBits {
    DqBits(!(dq::DO_NOT_USE | dq::NON_SCIENCE))
}

/// Outlier detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutlierConfig {
    pub weight_type: WeightType,
    pub pixfrac: f32,
    pub kernel: Kernel,
    pub fillval: FillValue,
    pub good_bits: DqBits,
    pub maskpt: f32,
    pub weight_reference: WeightReference,
    pub backg: f32,
    pub scale: Pair,
    pub snr: Pair,
    pub noise_model: NoiseModel,
    pub interp: Interp,
    /// Resample to a shared grid before the median; otherwise stack native pixels.
    pub resample_data: bool,
    pub in_memory: bool,
    /// Rows per median section in on-disk mode. Computed from `median_buffer_bytes` when unset.
    pub section_rows: Option<usize>,
    pub median_buffer_bytes: usize,
    /// Parent directory for run-scoped temporary storage.
    pub temp_dir: Option<PathBuf>,
    pub pixel_scale_ratio: f64,
    /// Explicit `[width, height]` for the output grid.
    pub output_shape: Option<(usize, usize)>,
    /// Absolute output pixel size in world units; overrides `pixel_scale_ratio`.
    pub pixel_scale: Option<f64>,
    /// Output grid rotation in degrees.
    pub rotation: f64,
    /// Output pixel `[x, y]` placed on `crval`.
    pub crpix: Option<(f64, f64)>,
    /// World `[x, y]` of `crpix`; the footprint union's centre when unset.
    pub crval: Option<(f64, f64)>,
    pub flag_bits: DqBits,
    /// Directory for per-group coadds and the median image, if they should be kept.
    pub save_intermediate: Option<PathBuf>,
    pub resample_suffix: String,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            weight_type: WeightType::Ivm,
            pixfrac: 1.0,
            kernel: Kernel::Square,
            fillval: FillValue::default(),
            good_bits: default_good_bits(),
            maskpt: 0.7,
            weight_reference: WeightReference::default(),
            backg: 0.0,
            scale: Pair::new(1.2, 0.7),
            snr: Pair::new(5.0, 4.0),
            noise_model: NoiseModel::Detector,
            interp: Interp::Linear,
            resample_data: true,
            in_memory: true,
            section_rows: None,
            median_buffer_bytes: DEFAULT_MEDIAN_BUFFER_BYTES,
            temp_dir: None,
            pixel_scale_ratio: 1.0,
            output_shape: None,
            pixel_scale: None,
            rotation: 0.0,
            crpix: None,
            crval: None,
            flag_bits: DqBits(dq::OUTLIER),
            save_intermediate: None,
            resample_suffix: "outlier_coadd".to_string(),
        }
    }
}

impl OutlierConfig {
    /// Load from a `.yaml`/`.yml`/`.json` file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| Error::ParseConfig {
            path: path.to_path_buf(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let config: Self = match extension.as_deref() {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&text).map_err(|e| parse_err(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            _ => return Err(parse_err("unsupported file extension".to_string())),
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded outlier detection config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !(self.pixfrac > 0.0 && self.pixfrac <= 1.0) {
            return invalid(format!("pixfrac must be in (0, 1], got {}", self.pixfrac));
        }
        if !(0.0..=1.0).contains(&self.maskpt) {
            return invalid(format!("maskpt must be in [0, 1], got {}", self.maskpt));
        }
        self.weight_reference
            .validate()
            .map_err(Error::InvalidConfig)?;
        if !self.backg.is_finite() {
            return invalid(format!("backg must be finite, got {}", self.backg));
        }
        for (name, pair) in [("scale", self.scale), ("snr", self.snr)] {
            let ok = [pair.primary, pair.secondary]
                .iter()
                .all(|v| v.is_finite() && *v >= 0.0);
            if !ok {
                return invalid(format!(
                    "{name} values must be finite and non-negative, got ({}, {})",
                    pair.primary, pair.secondary
                ));
            }
        }
        if self.snr.primary < self.snr.secondary {
            return invalid(format!(
                "snr primary ({}) must be >= secondary ({})",
                self.snr.primary, self.snr.secondary
            ));
        }
        if self.section_rows == Some(0) {
            return invalid("section_rows must be at least 1".to_string());
        }
        if self.median_buffer_bytes == 0 {
            return invalid("median_buffer_bytes must be > 0".to_string());
        }
        self.grid_options().validate().map_err(Error::InvalidConfig)?;
        if self.flag_bits.bits() == 0 {
            return invalid("flag_bits must set at least one bit".to_string());
        }
        if self.resample_suffix.is_empty() || self.resample_suffix.contains(['/', '\\']) {
            return invalid(format!(
                "resample_suffix must be a non-empty file name fragment, got '{}'",
                self.resample_suffix
            ));
        }
        Ok(())
    }

    /// Placement of a footprint-derived output grid.
    pub fn grid_options(&self) -> GridOptions {
        GridOptions {
            pixel_scale_ratio: self.pixel_scale_ratio,
            pixel_scale: self.pixel_scale,
            rotation: self.rotation,
            shape: self.output_shape,
            crpix: self.crpix.map(DVec2::from),
            crval: self.crval.map(DVec2::from),
        }
    }
}
