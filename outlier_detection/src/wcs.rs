//! Pixel <-> world mapping seam and the shared output grid.
//!
//! Pixel coordinates use the corner convention: pixel `(i, j)` covers
//! `[i, i+1] x [j, j+1]` and its centre sits at `(i + 0.5, j + 0.5)`.
//! World coordinates are an opaque 2-D plane; projection mathematics live
//! outside this crate behind [`WorldTransform`].

use std::fmt;
use std::sync::Arc;

use glam::{DAffine2, DVec2};

/// Smallest |determinant| accepted for an invertible affine WCS.
const MIN_ABS_DETERMINANT: f64 = 1e-12;

/// An already-resolved pixel <-> world transform.
pub trait WorldTransform: Send + Sync + fmt::Debug {
    fn pixel_to_world(&self, pixel: DVec2) -> DVec2;

    /// `None` when the world point has no pixel counterpart.
    fn world_to_pixel(&self, world: DVec2) -> Option<DVec2>;

    /// Describe why the transform is unusable, if it is.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Affine WCS backed by a `DAffine2` and its cached inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineWcs {
    forward: DAffine2,
    inverse: DAffine2,
}

impl AffineWcs {
    pub fn new(forward: DAffine2) -> Self {
        Self {
            forward,
            inverse: forward.inverse(),
        }
    }

    pub fn identity() -> Self {
        Self::new(DAffine2::IDENTITY)
    }

    /// Pixel `p` maps to world `p + offset`.
    pub fn translation(offset: DVec2) -> Self {
        Self::new(DAffine2::from_translation(offset))
    }

    /// Uniform pixel scale (world units per pixel), rotation in radians, then offset.
    pub fn from_scale_angle_offset(scale: f64, angle: f64, offset: DVec2) -> Self {
        Self::new(DAffine2::from_scale_angle_translation(
            DVec2::splat(scale),
            angle,
            offset,
        ))
    }

    pub fn forward(&self) -> DAffine2 {
        self.forward
    }

    pub fn determinant(&self) -> f64 {
        self.forward.matrix2.determinant()
    }
}

impl WorldTransform for AffineWcs {
    fn pixel_to_world(&self, pixel: DVec2) -> DVec2 {
        self.forward.transform_point2(pixel)
    }

    fn world_to_pixel(&self, world: DVec2) -> Option<DVec2> {
        let pixel = self.inverse.transform_point2(world);
        pixel.is_finite().then_some(pixel)
    }

    fn validate(&self) -> Result<(), String> {
        let m = self.forward.matrix2;
        let finite = m.x_axis.is_finite()
            && m.y_axis.is_finite()
            && self.forward.translation.is_finite();
        if !finite {
            return Err("affine WCS has non-finite coefficients".to_string());
        }
        let det = self.determinant();
        if det.abs() < MIN_ABS_DETERMINANT {
            return Err(format!("affine WCS is singular (det = {det:e})"));
        }
        Ok(())
    }
}

/// Composition of one pixel frame into another through world coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PixelMap<'a> {
    from: &'a dyn WorldTransform,
    to: &'a dyn WorldTransform,
}

impl<'a> PixelMap<'a> {
    pub fn new(from: &'a dyn WorldTransform, to: &'a dyn WorldTransform) -> Self {
        Self { from, to }
    }

    #[inline]
    pub fn apply(&self, pixel: DVec2) -> Option<DVec2> {
        self.to.world_to_pixel(self.from.pixel_to_world(pixel))
    }

    /// Local area magnification at the centre of pixel `(ix, iy)`, by finite differences.
    ///
    /// Returns 0 when any of the sample points fall off the target frame.
    pub fn local_jacobian(&self, ix: usize, iy: usize) -> f64 {
        let c = DVec2::new(ix as f64 + 0.5, iy as f64 + 0.5);
        let (Some(center), Some(right), Some(down)) = (
            self.apply(c),
            self.apply(c + DVec2::X),
            self.apply(c + DVec2::Y),
        ) else {
            return 0.0;
        };
        let dx = right - center;
        let dy = down - center;
        (dx.x * dy.y - dx.y * dy.x).abs()
    }
}

/// The shared output pixel grid every group is resampled onto.
#[derive(Debug, Clone)]
pub struct OutputGrid {
    pub width: usize,
    pub height: usize,
    pub wcs: Arc<dyn WorldTransform>,
}

/// Pixel extent and WCS of one input, for footprint-derived grids.
#[derive(Debug, Clone, Copy)]
pub struct Footprint<'a> {
    pub width: usize,
    pub height: usize,
    pub wcs: &'a dyn WorldTransform,
}

impl OutputGrid {
    pub fn new(width: usize, height: usize, wcs: Arc<dyn WorldTransform>) -> Self {
        Self { width, height, wcs }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Grid covering the union of input footprints.
    ///
    /// The output pixel size is `options.pixel_scale`, or else the first
    /// input's pixel size (square root of its |det|) times
    /// `pixel_scale_ratio`. Grid pixel `crpix` sits on world point `crval`
    /// (the union's centre by default) and the grid axes are rotated by
    /// `rotation` degrees. Without `crpix` the grid starts at the union's
    /// lower corner, or is centred on the union when `shape` is given.
    pub fn from_footprints(
        footprints: &[Footprint<'_>],
        options: &GridOptions,
    ) -> Result<Self, String> {
        let first = footprints
            .first()
            .ok_or_else(|| "no footprints to derive an output grid from".to_string())?;
        options.validate()?;

        let mut corners = Vec::with_capacity(footprints.len() * 4);
        for fp in footprints {
            fp.wcs.validate()?;
            let (w, h) = (fp.width as f64, fp.height as f64);
            for corner in [
                DVec2::ZERO,
                DVec2::new(w, 0.0),
                DVec2::new(w, h),
                DVec2::new(0.0, h),
            ] {
                corners.push(fp.wcs.pixel_to_world(corner));
            }
        }
        let (min, max) = bounds(corners.iter().copied());

        let scale = match options.pixel_scale {
            Some(scale) => scale,
            None => {
                let c = DVec2::splat(0.5);
                let origin = first.wcs.pixel_to_world(c);
                let dx = first.wcs.pixel_to_world(c + DVec2::X) - origin;
                let dy = first.wcs.pixel_to_world(c + DVec2::Y) - origin;
                (dx.x * dy.y - dx.y * dy.x).abs().sqrt() * options.pixel_scale_ratio
            }
        };
        if !(scale.is_finite() && scale > 0.0) {
            return Err("footprint pixel scale is degenerate".to_string());
        }

        // Scaled, rotated frame centred on crval; grid pixel = frame + crpix.
        let crval = options.crval.unwrap_or((min + max) * 0.5);
        let frame = DAffine2::from_scale_angle_translation(
            DVec2::splat(scale),
            options.rotation.to_radians(),
            crval,
        );
        let to_frame = frame.inverse();
        let (qmin, qmax) = bounds(corners.iter().map(|&w| to_frame.transform_point2(w)));

        let crpix = match (options.crpix, options.shape) {
            (Some(crpix), _) => crpix,
            (None, Some((w, h))) => DVec2::new(w as f64, h as f64) * 0.5 - (qmin + qmax) * 0.5,
            (None, None) => -qmin,
        };
        let (width, height) = match options.shape {
            Some(shape) => shape,
            None => {
                let far = qmax + crpix;
                (
                    (far.x - 1e-9).ceil().max(1.0) as usize,
                    (far.y - 1e-9).ceil().max(1.0) as usize,
                )
            }
        };

        let wcs = AffineWcs::new(frame * DAffine2::from_translation(-crpix));
        Ok(Self::new(width, height, Arc::new(wcs)))
    }
}

fn bounds(points: impl Iterator<Item = DVec2>) -> (DVec2, DVec2) {
    points.fold(
        (DVec2::splat(f64::INFINITY), DVec2::splat(f64::NEG_INFINITY)),
        |(min, max), p| (min.min(p), max.max(p)),
    )
}

/// Placement of a footprint-derived [`OutputGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOptions {
    /// Output pixel size over the first input's. Ignored when `pixel_scale` is set.
    pub pixel_scale_ratio: f64,
    /// Absolute output pixel size in world units.
    pub pixel_scale: Option<f64>,
    /// Degrees, counter-clockwise from the world x axis.
    pub rotation: f64,
    pub shape: Option<(usize, usize)>,
    pub crpix: Option<DVec2>,
    pub crval: Option<DVec2>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            pixel_scale_ratio: 1.0,
            pixel_scale: None,
            rotation: 0.0,
            shape: None,
            crpix: None,
            crval: None,
        }
    }
}

impl GridOptions {
    pub fn validate(&self) -> Result<(), String> {
        let ratio = self.pixel_scale_ratio;
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(format!("pixel_scale_ratio must be > 0, got {ratio}"));
        }
        if let Some(scale) = self.pixel_scale
            && !(scale.is_finite() && scale > 0.0)
        {
            return Err(format!("pixel_scale must be > 0, got {scale}"));
        }
        if !self.rotation.is_finite() {
            return Err(format!("rotation must be finite, got {}", self.rotation));
        }
        if let Some((w, h)) = self.shape
            && (w == 0 || h == 0)
        {
            return Err(format!("output_shape must be non-empty, got [{w}, {h}]"));
        }
        for (name, point) in [("crpix", self.crpix), ("crval", self.crval)] {
            if let Some(p) = point
                && !p.is_finite()
            {
                return Err(format!("{name} must be finite, got {p}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_round_trip() {
        let wcs = AffineWcs::from_scale_angle_offset(0.5, 0.3, DVec2::new(10.0, -4.0));
        let p = DVec2::new(12.25, 7.5);
        let back = wcs.world_to_pixel(wcs.pixel_to_world(p)).unwrap();
        assert!((back - p).length() < 1e-9);
        assert!(wcs.validate().is_ok());
    }

    #[test]
    fn singular_and_non_finite_rejected() {
        let singular = AffineWcs::new(DAffine2::from_cols_array(&[1.0, 2.0, 2.0, 4.0, 0.0, 0.0]));
        assert!(singular.validate().unwrap_err().contains("singular"));

        let nan = AffineWcs::translation(DVec2::new(f64::NAN, 0.0));
        assert!(nan.validate().unwrap_err().contains("non-finite"));
    }

    #[test]
    fn pixel_map_composes_offsets() {
        let a = AffineWcs::translation(DVec2::new(3.0, 1.0));
        let b = AffineWcs::translation(DVec2::new(1.0, 0.0));
        let map = PixelMap::new(&a, &b);
        assert_eq!(map.apply(DVec2::new(0.5, 0.5)), Some(DVec2::new(2.5, 1.5)));
        assert!((map.local_jacobian(4, 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn footprint_grid_covers_union() {
        let a = AffineWcs::identity();
        let b = AffineWcs::translation(DVec2::new(4.0, 2.0));
        let fps = [
            Footprint { width: 10, height: 8, wcs: &a },
            Footprint { width: 10, height: 8, wcs: &b },
        ];
        let grid = OutputGrid::from_footprints(&fps, &GridOptions::default()).unwrap();
        assert_eq!(grid.shape(), (14, 10));
        assert_eq!(grid.wcs.pixel_to_world(DVec2::ZERO), DVec2::ZERO);

        let options = GridOptions {
            pixel_scale_ratio: 2.0,
            ..GridOptions::default()
        };
        let half = OutputGrid::from_footprints(&fps, &options).unwrap();
        assert_eq!(half.shape(), (7, 5));
    }

    #[test]
    fn footprint_grid_with_explicit_shape_is_centred() {
        let a = AffineWcs::identity();
        let fps = [Footprint { width: 10, height: 10, wcs: &a }];
        let options = GridOptions {
            shape: Some((4, 4)),
            ..GridOptions::default()
        };
        let grid = OutputGrid::from_footprints(&fps, &options).unwrap();
        assert_eq!(grid.shape(), (4, 4));
        assert_eq!(grid.wcs.pixel_to_world(DVec2::ZERO), DVec2::new(3.0, 3.0));
    }

    #[test]
    fn absolute_pixel_scale_overrides_ratio() {
        let a = AffineWcs::identity();
        let fps = [Footprint { width: 10, height: 10, wcs: &a }];
        let options = GridOptions {
            pixel_scale_ratio: 4.0,
            pixel_scale: Some(0.5),
            ..GridOptions::default()
        };
        let grid = OutputGrid::from_footprints(&fps, &options).unwrap();
        assert_eq!(grid.shape(), (20, 20));
        let step = grid.wcs.pixel_to_world(DVec2::X) - grid.wcs.pixel_to_world(DVec2::ZERO);
        assert!((step - DVec2::new(0.5, 0.0)).length() < 1e-12);
    }

    #[test]
    fn rotated_grid_turns_pixel_axes() {
        let a = AffineWcs::identity();
        let fps = [Footprint { width: 10, height: 10, wcs: &a }];
        let options = GridOptions {
            rotation: 90.0,
            ..GridOptions::default()
        };
        let grid = OutputGrid::from_footprints(&fps, &options).unwrap();
        assert_eq!(grid.shape(), (10, 10));
        let step = grid.wcs.pixel_to_world(DVec2::X) - grid.wcs.pixel_to_world(DVec2::ZERO);
        assert!((step - DVec2::Y).length() < 1e-9);
        // The rotated grid still covers the footprint centre.
        let centre = grid.wcs.world_to_pixel(DVec2::splat(5.0)).unwrap();
        assert!((centre - DVec2::splat(5.0)).length() < 1e-9);
    }

    #[test]
    fn crpix_lands_on_crval() {
        let a = AffineWcs::identity();
        let fps = [Footprint { width: 10, height: 10, wcs: &a }];
        let options = GridOptions {
            crpix: Some(DVec2::new(2.0, 3.0)),
            crval: Some(DVec2::new(5.0, 5.0)),
            ..GridOptions::default()
        };
        let grid = OutputGrid::from_footprints(&fps, &options).unwrap();
        assert_eq!(grid.wcs.pixel_to_world(DVec2::new(2.0, 3.0)), DVec2::new(5.0, 5.0));
        assert_eq!(grid.shape(), (7, 8));
    }

    #[test]
    fn footprint_grid_rejects_bad_inputs() {
        assert!(OutputGrid::from_footprints(&[], &GridOptions::default()).is_err());
        let a = AffineWcs::identity();
        let fps = [Footprint { width: 2, height: 2, wcs: &a }];
        let bad = [
            GridOptions {
                pixel_scale_ratio: 0.0,
                ..GridOptions::default()
            },
            GridOptions {
                pixel_scale: Some(-1.0),
                ..GridOptions::default()
            },
            GridOptions {
                rotation: f64::NAN,
                ..GridOptions::default()
            },
            GridOptions {
                crval: Some(DVec2::new(f64::INFINITY, 0.0)),
                ..GridOptions::default()
            },
        ];
        for options in bad {
            assert!(OutputGrid::from_footprints(&fps, &options).is_err(), "{options:?}");
        }
    }
}
