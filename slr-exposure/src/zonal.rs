//! Reduction of a mask by polygon zones.
//!
//! [`RasterizedZones`] stamps feature indices onto the mask's grid (a cell
//! belongs to a polygon when its centre falls inside it; later features
//! overwrite earlier ones where polygons overlap) and then sums the mask per
//! index in a single pass over the grid.

use geo::{Contains, Point};
use log::debug;
use serde::{Deserialize, Serialize};
use slr_tables::error::Result;

use crate::{
    grid::{InundationMask, RasterGeometry, MASK_NODATA},
    source::AoiFeature,
};

const NO_ZONE: u32 = u32::MAX;

/// Count and sum of valid mask cells inside one zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneStats {
    pub count: u64,
    pub sum: f64,
}

impl ZoneStats {
    /// Fraction of flooded cells; `None` when no cell was sampled.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// "Reduce a raster by polygon zones": one [`ZoneStats`] per feature, in order.
pub trait ZonalStatistics {
    fn zonal_stats(&self, mask: &InundationMask, features: &[AoiFeature]) -> Result<Vec<ZoneStats>>;
}

/// Cell-centre rasterization followed by grouped count and sum.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterizedZones;

/// Row and column ranges of cells whose footprint meets the feature's box.
fn cell_window(geometry: &RasterGeometry, feature: &AoiFeature) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let extent = feature.extent()?;
    let (ra, ca) = geometry.fractional_cell(extent.min_x, extent.max_y);
    let (rb, cb) = geometry.fractional_cell(extent.max_x, extent.min_y);
    let clamp = |v: f64, hi: usize| -> usize { v.max(0.0).min(hi as f64) as usize };
    let rows = clamp(ra.min(rb).floor(), geometry.height)..clamp(ra.max(rb).ceil(), geometry.height);
    let cols = clamp(ca.min(cb).floor(), geometry.width)..clamp(ca.max(cb).ceil(), geometry.width);
    (!rows.is_empty() && !cols.is_empty()).then_some((rows, cols))
}

impl RasterizedZones {
    /// Zone index per cell, `u32::MAX` where no polygon covers the centre.
    pub fn rasterize(geometry: &RasterGeometry, features: &[AoiFeature]) -> Vec<u32> {
        let mut zones = vec![NO_ZONE; geometry.len()];
        for (zone, feature) in features.iter().enumerate() {
            let Some((rows, cols)) = cell_window(geometry, feature) else {
                continue;
            };
            for row in rows {
                for col in cols.clone() {
                    let (x, y) = geometry.cell_centre(row, col);
                    if feature.geometry.contains(&Point::new(x, y)) {
                        zones[row * geometry.width + col] = zone as u32;
                    }
                }
            }
        }
        zones
    }
}

impl ZonalStatistics for RasterizedZones {
    fn zonal_stats(&self, mask: &InundationMask, features: &[AoiFeature]) -> Result<Vec<ZoneStats>> {
        let zones = RasterizedZones::rasterize(&mask.geometry, features);
        let mut stats = vec![ZoneStats::default(); features.len()];
        for (zone, value) in zones.iter().zip(&mask.data) {
            if *zone == NO_ZONE || *value == MASK_NODATA {
                continue;
            }
            let s = &mut stats[*zone as usize];
            s.count += 1;
            s.sum += f64::from(*value);
        }
        debug!(
            "Zonal statistics over {} features: {} cells assigned",
            features.len(),
            zones.iter().filter(|z| **z != NO_ZONE).count()
        );
        Ok(stats)
    }
}
