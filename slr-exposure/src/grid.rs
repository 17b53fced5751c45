//! Raster grids aligned to an affine geotransform.
//!
//! Cells are stored row-major with row 0 at the top (north-up, negative
//! pixel height), the same layout GDAL and ESRI ASCII grids use.

use serde::{Deserialize, Serialize};
use slr_tables::error::{Error, Result};
use std::fmt;

/// Fallback metric CRS when neither the DEM nor the AOI is projected.
pub const DEFAULT_METRIC_EPSG: u32 = 3857;

/// Geographic EPSG codes recognised as degree-based.
const GEOGRAPHIC_EPSG: [u32; 10] = [4326, 4269, 4258, 4283, 4167, 4617, 4674, 4612, 6668, 4979];

/// Nodata written into reprojected elevation grids that had none.
pub const DEFAULT_ELEVATION_NODATA: f32 = -9999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrsUnits {
    Degrees,
    Metres,
}

/// A coordinate reference system identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    pub fn epsg(code: u32) -> Crs {
        Crs { epsg: code }
    }

    /// Parse `EPSG:3857`, `epsg:4326` or a bare code. Returns `None` for
    /// anything that does not name a positive EPSG code.
    pub fn parse(s: &str) -> Option<Crs> {
        let s = s.trim();
        let code = match s.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some(_) => return None,
            None => s,
        };
        code.trim().parse::<u32>().ok().filter(|c| *c > 0).map(Crs::epsg)
    }

    pub fn default_metric() -> Crs {
        Crs::epsg(DEFAULT_METRIC_EPSG)
    }

    pub fn code(&self) -> u32 {
        self.epsg
    }

    pub fn units(&self) -> CrsUnits {
        if GEOGRAPHIC_EPSG.contains(&self.epsg) {
            CrsUnits::Degrees
        } else {
            CrsUnits::Metres
        }
    }

    pub fn is_metric(&self) -> bool {
        self.units() == CrsUnits::Metres
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Axis-aligned bounding box in CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn centre(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// True when the boxes share any area. Touching edges do not count.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x < other.max_x && other.min_x < self.max_x && self.min_y < other.max_y && other.min_y < self.max_y
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Extent) -> Extent {
        Extent::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

/// Affine transform of a north-up raster: `x = origin_x + col * pixel_width`,
/// `y = origin_y + row * pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform from the top-left corner and a square or
    /// rectangular cell size given as positive numbers.
    pub fn north_up(min_x: f64, max_y: f64, cell_x: f64, cell_y: f64) -> Self {
        Self {
            origin_x: min_x,
            origin_y: max_y,
            pixel_width: cell_x.abs(),
            pixel_height: -cell_y.abs(),
        }
    }
}

/// Shape, placement and CRS of a raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGeometry {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
}

impl RasterGeometry {
    pub fn new(width: usize, height: usize, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self {
            width,
            height,
            transform,
            crs,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute cell size `(dx, dy)` in CRS units.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.transform.pixel_width.abs(), self.transform.pixel_height.abs())
    }

    /// `|dx| * |dy|`, square metres when the CRS is metric.
    pub fn pixel_area(&self) -> f64 {
        let (dx, dy) = self.pixel_size();
        dx * dy
    }

    pub fn extent(&self) -> Extent {
        let t = &self.transform;
        let x0 = t.origin_x;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y0 = t.origin_y;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        Extent::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Centre of cell `(row, col)` in CRS coordinates.
    #[inline]
    pub fn cell_centre(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t.origin_x + (col as f64 + 0.5) * t.pixel_width,
            t.origin_y + (row as f64 + 0.5) * t.pixel_height,
        )
    }

    /// Fractional `(row, col)` of a coordinate; may lie outside the grid.
    #[inline]
    pub fn fractional_cell(&self, x: f64, y: f64) -> (f64, f64) {
        let t = &self.transform;
        ((y - t.origin_y) / t.pixel_height, (x - t.origin_x) / t.pixel_width)
    }

    /// Cell containing `(x, y)`, if any.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (r, c) = self.fractional_cell(x, y);
        if !(r.is_finite() && c.is_finite()) || r < 0.0 || c < 0.0 {
            return None;
        }
        let (row, col) = (r.floor() as usize, c.floor() as usize);
        (row < self.height && col < self.width).then_some((row, col))
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.len() {
            return Err(Error::MalformedInput(format!(
                "{} has {} cells, expected {} ({} x {})",
                what,
                len,
                self.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Elevation surface in metres, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationGrid {
    pub geometry: RasterGeometry,
    pub data: Vec<f32>,
    pub nodata: Option<f32>,
}

impl ElevationGrid {
    pub fn new(geometry: RasterGeometry, data: Vec<f32>, nodata: Option<f32>) -> Result<Self> {
        geometry.check_len("elevation grid", data.len())?;
        Ok(Self { geometry, data, nodata })
    }

    /// Grid filled with one value.
    pub fn filled(geometry: RasterGeometry, fill: f32) -> Self {
        let data = vec![fill; geometry.len()];
        Self {
            geometry,
            data,
            nodata: None,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.geometry.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        let width = self.geometry.width;
        self.data[row * width + col] = val;
    }

    /// NaN and the declared nodata value are both treated as missing.
    #[inline]
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.map(|nd| value == nd).unwrap_or(false)
    }

    pub fn valid_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !self.is_nodata(*v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Cell value for a dry cell.
pub const MASK_DRY: u8 = 0;
/// Cell value for a flooded cell.
pub const MASK_FLOODED: u8 = 1;
/// Cell value where the elevation was missing.
pub const MASK_NODATA: u8 = 255;

/// Binary inundation raster aligned to the grid it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InundationMask {
    pub geometry: RasterGeometry,
    pub data: Vec<u8>,
}

impl InundationMask {
    pub fn new(geometry: RasterGeometry, data: Vec<u8>) -> Result<Self> {
        geometry.check_len("inundation mask", data.len())?;
        Ok(Self { geometry, data })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.geometry.width + col]
    }

    pub fn flooded_cells(&self) -> usize {
        self.data.iter().filter(|v| **v == MASK_FLOODED).count()
    }

    /// Cells holding 0 or 1.
    pub fn valid_cells(&self) -> usize {
        self.data.iter().filter(|v| **v != MASK_NODATA).count()
    }

    /// Flooded area in CRS units squared.
    pub fn flooded_area(&self) -> f64 {
        self.flooded_cells() as f64 * self.geometry.pixel_area()
    }

    /// True when every flooded cell here is also flooded in `other`.
    pub fn is_subset_of(&self, other: &InundationMask) -> bool {
        self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| *a != MASK_FLOODED || *b == MASK_FLOODED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RasterGeometry {
        RasterGeometry::new(4, 3, GeoTransform::north_up(100.0, 230.0, 10.0, 10.0), Some(Crs::WEB_MERCATOR))
    }

    #[test]
    fn test_crs_parse() {
        assert_eq!(Crs::parse("EPSG:3857"), Some(Crs::WEB_MERCATOR));
        assert_eq!(Crs::parse(" epsg:4326 "), Some(Crs::WGS84));
        assert_eq!(Crs::parse("32633"), Some(Crs::epsg(32633)));
        assert_eq!(Crs::parse("ESRI:102100"), None);
        assert_eq!(Crs::parse(""), None);
        assert!(!Crs::WGS84.is_metric());
        assert!(Crs::epsg(32633).is_metric());
        assert_eq!(Crs::default_metric().to_string(), "EPSG:3857");
    }

    #[test]
    fn test_extent_and_cells() {
        let g = geometry();
        assert_eq!(g.extent(), Extent::new(100.0, 200.0, 140.0, 230.0));
        assert_eq!(g.pixel_area(), 100.0);
        assert_eq!(g.cell_centre(0, 0), (105.0, 225.0));
        assert_eq!(g.cell_at(105.0, 225.0), Some((0, 0)));
        assert_eq!(g.cell_at(139.9, 200.1), Some((2, 3)));
        assert_eq!(g.cell_at(140.1, 225.0), None);
        assert_eq!(g.cell_at(99.0, 225.0), None);
    }

    #[test]
    fn test_extent_intersects() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Extent::new(5.0, 5.0, 15.0, 15.0)));
        assert!(!a.intersects(&Extent::new(10.0, 0.0, 20.0, 10.0)));
        assert!(!a.intersects(&Extent::new(50.0, 50.0, 60.0, 60.0)));
    }

    #[test]
    fn test_grid_len_checked() {
        assert!(ElevationGrid::new(geometry(), vec![0.0; 11], None).is_err());
        let mut grid = ElevationGrid::new(geometry(), vec![0.0; 12], Some(-9999.0)).unwrap();
        grid.set(1, 2, 3.5);
        assert_eq!(grid.get(1, 2), 3.5);
        assert!(grid.is_nodata(-9999.0));
        assert!(grid.is_nodata(f32::NAN));
        assert_eq!(grid.valid_range(), Some((0.0, 3.5)));
    }

    #[test]
    fn test_mask_subset() {
        let a = InundationMask::new(geometry(), vec![1, 0, 0, 255, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let b = InundationMask::new(geometry(), vec![1, 1, 0, 255, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert_eq!(b.flooded_cells(), 2);
        assert_eq!(b.valid_cells(), 11);
        assert_eq!(b.flooded_area(), 200.0);
    }
}
