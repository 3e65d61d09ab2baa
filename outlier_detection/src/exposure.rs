//! Exposure data model.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::common::Buffer2;
use crate::wcs::WorldTransform;

/// Identity of an exposure group (one dither position / visit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Sky background record attached by an upstream step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Background {
    pub level: f32,
    pub subtracted: bool,
}

/// Everything about an exposure except its pixel planes.
#[derive(Debug, Clone)]
pub struct ExposureMeta {
    pub name: String,
    pub group: GroupId,
    /// Effective exposure time in seconds.
    pub exposure_time: f32,
    /// Detector read noise in the unit of the science plane.
    pub read_noise: f32,
    /// Pixel-value unit of the science plane, e.g. `"DN/s"`.
    pub unit: String,
    pub background: Option<Background>,
    pub wcs: Option<Arc<dyn WorldTransform>>,
}

impl ExposureMeta {
    pub fn new(name: impl Into<String>, group: impl Into<GroupId>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            exposure_time: 1.0,
            read_noise: 0.0,
            unit: "DN/s".to_string(),
            background: None,
            wcs: None,
        }
    }

    pub fn with_wcs(mut self, wcs: Arc<dyn WorldTransform>) -> Self {
        self.wcs = Some(wcs);
        self
    }

    pub fn with_exposure_time(mut self, exposure_time: f32) -> Self {
        self.exposure_time = exposure_time;
        self
    }

    pub fn with_read_noise(mut self, read_noise: f32) -> Self {
        self.read_noise = read_noise;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = Some(background);
        self
    }

    /// Background level still present in the science plane.
    pub fn unsubtracted_background(&self) -> Option<f32> {
        self.background
            .filter(|b| !b.subtracted && b.level.is_finite())
            .map(|b| b.level)
    }
}

/// One detector readout: science, uncertainty and DQ planes plus metadata.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub meta: ExposureMeta,
    pub data: Buffer2<f32>,
    pub err: Buffer2<f32>,
    pub dq: Buffer2<u32>,
}

impl Exposure {
    /// Panics if the three planes do not share a shape.
    pub fn new(
        meta: ExposureMeta,
        data: Buffer2<f32>,
        err: Buffer2<f32>,
        dq: Buffer2<u32>,
    ) -> Self {
        assert!(
            data.same_shape(&err) && data.same_shape(&dq),
            "science, uncertainty and DQ planes must share a shape"
        );
        Self { meta, data, err, dq }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.height()
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubtracted_background_only_when_present_and_not_subtracted() {
        let meta = ExposureMeta::new("a", "g");
        assert_eq!(meta.unsubtracted_background(), None);

        let meta = meta.with_background(Background {
            level: 3.0,
            subtracted: true,
        });
        assert_eq!(meta.unsubtracted_background(), None);

        let meta = meta.with_background(Background {
            level: 3.0,
            subtracted: false,
        });
        assert_eq!(meta.unsubtracted_background(), Some(3.0));
    }

    #[test]
    #[should_panic(expected = "must share a shape")]
    fn new_rejects_mismatched_planes() {
        Exposure::new(
            ExposureMeta::new("a", "g"),
            Buffer2::new_default(4, 4),
            Buffer2::new_default(4, 3),
            Buffer2::new_default(4, 4),
        );
    }
}
