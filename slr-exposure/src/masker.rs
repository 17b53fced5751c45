//! Thresholding an elevation surface into a binary inundation mask.
//!
//! A DEM must be in a metric CRS before it is thresholded, because the mask's
//! cell size becomes the basis for every area downstream. Geographic or
//! CRS-less grids are resampled once by [`InundationMasker::prepare`] and the
//! prepared grid is reused for every scenario.

use log::info;
use slr_tables::error::Result;
use std::borrow::Cow;

use crate::{
    grid::{Crs, ElevationGrid, InundationMask, MASK_DRY, MASK_FLOODED, MASK_NODATA},
    source::{ElevationSource, Reprojector},
    warning::{Warning, Warnings},
};

/// Metric CRS a DEM must be moved into, or `None` when it already is metric.
///
/// The AOI's CRS is used when it is metric, else EPSG:3857.
pub fn metric_target(dem_crs: Option<Crs>, aoi_crs: Option<Crs>) -> Option<Crs> {
    match dem_crs {
        Some(crs) if crs.is_metric() => None,
        _ => Some(aoi_crs.filter(Crs::is_metric).unwrap_or_else(Crs::default_metric)),
    }
}

/// Cell is flooded when `elevation <= threshold_m`; nodata stays nodata.
///
/// The comparison runs in the grid's `f32` precision so a cell stored at the
/// level's decimal value compares equal to it.
pub fn threshold(grid: &ElevationGrid, threshold_m: f64) -> InundationMask {
    let level = threshold_m as f32;
    let data = grid
        .data
        .iter()
        .map(|v| {
            if grid.is_nodata(*v) {
                MASK_NODATA
            } else if *v <= level {
                MASK_FLOODED
            } else {
                MASK_DRY
            }
        })
        .collect();
    InundationMask {
        geometry: grid.geometry.clone(),
        data,
    }
}

pub struct InundationMasker<'r> {
    reprojector: &'r dyn Reprojector,
}

impl<'r> InundationMasker<'r> {
    pub fn new(reprojector: &'r dyn Reprojector) -> Self {
        Self { reprojector }
    }

    /// Load the DEM and move it into a metric CRS if needed.
    pub fn prepare<'g>(
        &self,
        dem: &'g dyn ElevationSource,
        aoi_crs: Option<Crs>,
        warnings: &mut Warnings,
    ) -> Result<Cow<'g, ElevationGrid>> {
        let grid = dem.grid()?;
        match metric_target(grid.geometry.crs, aoi_crs) {
            None => Ok(grid),
            Some(target) => {
                let reprojected = self.reprojector.reproject_grid(&grid, target)?;
                warnings.push(Warning::Reprojected {
                    from: grid.geometry.crs,
                    to: target,
                });
                info!(
                    "DEM {} prepared in {}: {}x{} cells, pixel {:?}",
                    dem.source_id(),
                    target,
                    reprojected.geometry.width,
                    reprojected.geometry.height,
                    reprojected.geometry.pixel_size()
                );
                Ok(Cow::Owned(reprojected))
            }
        }
    }

    /// Prepare the DEM and threshold it in one step.
    pub fn mask(
        &self,
        dem: &dyn ElevationSource,
        aoi_crs: Option<Crs>,
        threshold_m: f64,
        warnings: &mut Warnings,
    ) -> Result<InundationMask> {
        let grid = self.prepare(dem, aoi_crs, warnings)?;
        Ok(threshold(&grid, threshold_m))
    }
}
