//! Built-in reprojector between WGS84 lon/lat (EPSG:4326) and spherical
//! Web Mercator (EPSG:3857). Other CRS pairs need an external reprojector.

use geo::MapCoords;
use log::debug;
use slr_tables::error::{Error, Result};

use crate::{
    grid::{Crs, ElevationGrid, Extent, GeoTransform, RasterGeometry, DEFAULT_ELEVATION_NODATA},
    source::{AoiFeature, AoiLayer, Reprojector, VectorSource},
};

/// WGS84 semi-major axis used as the Web Mercator sphere radius.
pub const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Latitude at which Web Mercator becomes square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = WEB_MERCATOR_RADIUS_M * lon.to_radians();
    let y = WEB_MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WEB_MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / WEB_MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

fn identity(x: f64, y: f64) -> (f64, f64) {
    (x, y)
}

type PointFn = fn(f64, f64) -> (f64, f64);

#[derive(Debug, Default, Clone, Copy)]
pub struct WebMercator;

impl WebMercator {
    /// Forward and inverse functions for `from -> to`.
    fn transforms(&self, from: Crs, to: Crs) -> Result<(PointFn, PointFn)> {
        match (from.code(), to.code()) {
            (a, b) if a == b => Ok((identity as PointFn, identity as PointFn)),
            (4326, 3857) => Ok((lon_lat_to_mercator as PointFn, mercator_to_lon_lat as PointFn)),
            (3857, 4326) => Ok((mercator_to_lon_lat as PointFn, lon_lat_to_mercator as PointFn)),
            _ => Err(Error::MalformedInput(format!(
                "no built-in transform from {} to {}",
                from, to
            ))),
        }
    }
}

impl Reprojector for WebMercator {
    fn reproject_grid(&self, grid: &ElevationGrid, target: Crs) -> Result<ElevationGrid> {
        let source_crs = grid
            .geometry
            .crs
            .ok_or_else(|| Error::MalformedInput("elevation grid has no CRS to reproject from".to_string()))?;
        let (forward, inverse) = self.transforms(source_crs, target)?;
        if source_crs == target {
            return Ok(grid.clone());
        }

        // Each axis maps independently in both directions, so corners bound the result.
        let src = grid.geometry.extent();
        let (x0, y0) = forward(src.min_x, src.min_y);
        let (x1, y1) = forward(src.max_x, src.max_y);
        let dst = Extent::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1));

        let cells = grid.geometry.len().max(1) as f64;
        let cell = (dst.width() * dst.height() / cells).sqrt();
        if !(cell.is_finite() && cell > 0.0) {
            return Err(Error::MalformedInput(format!(
                "cannot reproject a degenerate grid extent {:?}",
                src
            )));
        }
        let width = ((dst.width() / cell).round() as usize).max(1);
        let height = ((dst.height() / cell).round() as usize).max(1);
        let geometry = RasterGeometry::new(
            width,
            height,
            GeoTransform::north_up(dst.min_x, dst.max_y, dst.width() / width as f64, dst.height() / height as f64),
            Some(target),
        );

        let nodata = grid.nodata.unwrap_or(DEFAULT_ELEVATION_NODATA);
        let mut data = Vec::with_capacity(geometry.len());
        for row in 0..height {
            for col in 0..width {
                let (x, y) = geometry.cell_centre(row, col);
                let (sx, sy) = inverse(x, y);
                let value = grid
                    .geometry
                    .cell_at(sx, sy)
                    .map(|(r, c)| grid.get(r, c))
                    .filter(|v| !grid.is_nodata(*v))
                    .unwrap_or(nodata);
                data.push(value);
            }
        }
        debug!(
            "Reprojected grid {} -> {}: {}x{} -> {}x{} cells of {:.3}",
            source_crs, target, grid.geometry.width, grid.geometry.height, width, height, cell
        );
        ElevationGrid::new(geometry, data, Some(nodata))
    }

    fn reproject_layer(&self, layer: &dyn VectorSource, target: Crs) -> Result<AoiLayer> {
        let source_crs = layer.crs().ok_or_else(|| {
            Error::MalformedInput(format!("AOI layer '{}' has no CRS to reproject from", layer.name()))
        })?;
        let (forward, _) = self.transforms(source_crs, target)?;
        let features = layer
            .features()
            .iter()
            .map(|f| AoiFeature {
                fid: f.fid,
                geometry: f.geometry.map_coords(|c| {
                    let (x, y) = forward(c.x, c.y);
                    geo::Coord { x, y }
                }),
                attributes: f.attributes.clone(),
            })
            .collect();
        Ok(AoiLayer::new(layer.name(), Some(target), features))
    }

    fn reproject_point(&self, point: (f64, f64), from: Crs, to: Crs) -> Result<(f64, f64)> {
        let (forward, _) = self.transforms(from, to)?;
        Ok(forward(point.0, point.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AoiFeature;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    #[test]
    fn test_mercator_known_points() {
        let (x, y) = lon_lat_to_mercator(0.0, 0.0);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);

        let (x, _) = lon_lat_to_mercator(180.0, 0.0);
        assert_relative_eq!(x, 20_037_508.342_789_244, epsilon = 1e-6);

        let (lon, lat) = mercator_to_lon_lat(lon_lat_to_mercator(4.3, 52.1).0, lon_lat_to_mercator(4.3, 52.1).1);
        assert_relative_eq!(lon, 4.3, epsilon = 1e-9);
        assert_relative_eq!(lat, 52.1, epsilon = 1e-9);
    }

    #[test]
    fn test_unsupported_pair_rejected() {
        let err = WebMercator
            .reproject_point((0.0, 0.0), Crs::WGS84, Crs::epsg(32631))
            .unwrap_err();
        assert_eq!(err.kind(), slr_tables::ErrorKind::MalformedInput);
    }

    #[test]
    fn test_grid_reprojection_keeps_values() {
        // 2x2 degree-grid near the equator; each quadrant has its own value
        let geometry = RasterGeometry::new(2, 2, GeoTransform::north_up(0.0, 0.02, 0.01, 0.01), Some(Crs::WGS84));
        let grid = ElevationGrid::new(geometry, vec![1.0, 2.0, 3.0, -9999.0], Some(-9999.0)).unwrap();
        let out = WebMercator.reproject_grid(&grid, Crs::WEB_MERCATOR).unwrap();

        assert_eq!(out.geometry.crs, Some(Crs::WEB_MERCATOR));
        assert_eq!(out.geometry.width, 2);
        assert_eq!(out.geometry.height, 2);
        assert_eq!(out.data, vec![1.0, 2.0, 3.0, -9999.0]);
        let (dx, dy) = out.geometry.pixel_size();
        assert_relative_eq!(dx, 1113.19, epsilon = 0.01);
        assert_relative_eq!(dy, dx, epsilon = 1.0);
    }

    #[test]
    fn test_layer_reprojection() {
        let square = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]]);
        let layer = AoiLayer::new("aoi", Some(Crs::WGS84), vec![AoiFeature::new(1, square)]);
        let out = WebMercator.reproject_layer(&layer, Crs::WEB_MERCATOR).unwrap();
        let extent = out.extent().unwrap();
        assert_relative_eq!(extent.max_x, 111_319.490_793_273_6, epsilon = 1e-3);
        assert!(extent.max_y > 110_000.0 && extent.max_y < 112_000.0);
        assert_eq!(out.crs, Some(Crs::WEB_MERCATOR));
    }
}
