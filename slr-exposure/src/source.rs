//! Collaborator seams: elevation and AOI inputs, and coordinate transforms.
//!
//! File formats live outside this crate. Anything that can hand over an
//! [`ElevationGrid`] or a set of polygons implements these traits.

use geo::{Area, BoundingRect, MultiPolygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use slr_tables::error::Result;
use std::borrow::Cow;

use crate::grid::{Crs, ElevationGrid, Extent, RasterGeometry};

/// A DEM supplied by a raster collaborator.
pub trait ElevationSource {
    /// Path or handle, used in logs and the run summary.
    fn source_id(&self) -> String;

    fn geometry(&self) -> &RasterGeometry;

    fn grid(&self) -> Result<Cow<'_, ElevationGrid>>;

    fn pixel_size(&self) -> (f64, f64) {
        self.geometry().pixel_size()
    }

    fn crs(&self) -> Option<Crs> {
        self.geometry().crs
    }

    fn extent(&self) -> Extent {
        self.geometry().extent()
    }
}

impl ElevationSource for ElevationGrid {
    fn source_id(&self) -> String {
        "memory".to_string()
    }

    fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    fn grid(&self) -> Result<Cow<'_, ElevationGrid>> {
        Ok(Cow::Borrowed(self))
    }
}

/// One AOI polygon with its source attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiFeature {
    /// Feature id, unique within its layer.
    pub fid: u64,
    pub geometry: MultiPolygon<f64>,
    pub attributes: Map<String, Value>,
}

impl AoiFeature {
    pub fn new(fid: u64, geometry: MultiPolygon<f64>) -> Self {
        Self {
            fid,
            geometry,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Planar area in CRS units squared.
    pub fn planar_area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn extent(&self) -> Option<Extent> {
        self.geometry
            .bounding_rect()
            .map(|r| Extent::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    /// Attribute rendered as text; missing and null become "".
    pub fn attribute_text(&self, name: &str) -> String {
        match self.attributes.get(name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Attribute as a number when it is numeric or numeric text.
    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        match self.attributes.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// A polygon layer supplied by a vector collaborator.
pub trait VectorSource {
    fn name(&self) -> &str;

    fn crs(&self) -> Option<Crs>;

    fn features(&self) -> &[AoiFeature];

    fn feature_count(&self) -> usize {
        self.features().len()
    }

    /// Union of feature extents; `None` for an empty layer.
    fn extent(&self) -> Option<Extent> {
        self.features()
            .iter()
            .filter_map(AoiFeature::extent)
            .reduce(|a, b| a.union(&b))
    }
}

/// In-memory AOI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiLayer {
    pub name: String,
    pub crs: Option<Crs>,
    pub features: Vec<AoiFeature>,
}

impl AoiLayer {
    pub fn new(name: &str, crs: Option<Crs>, features: Vec<AoiFeature>) -> Self {
        Self {
            name: name.to_string(),
            crs,
            features,
        }
    }
}

impl VectorSource for AoiLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn crs(&self) -> Option<Crs> {
        self.crs
    }

    fn features(&self) -> &[AoiFeature] {
        &self.features
    }
}

/// Coordinate transform collaborator.
pub trait Reprojector {
    /// Resample a grid into `target` with nearest-neighbour lookup.
    fn reproject_grid(&self, grid: &ElevationGrid, target: Crs) -> Result<ElevationGrid>;

    fn reproject_layer(&self, layer: &dyn VectorSource, target: Crs) -> Result<AoiLayer>;

    fn reproject_point(&self, point: (f64, f64), from: Crs, to: Crs) -> Result<(f64, f64)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};
    use serde_json::json;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    #[test]
    fn test_feature_area_and_attributes() {
        let f = AoiFeature::new(7, square(0.0, 0.0, 100.0))
            .with_attribute("zone", json!("R1"))
            .with_attribute("code", json!(12))
            .with_attribute("pop", json!("350.5"))
            .with_attribute("note", Value::Null);
        assert_eq!(f.planar_area(), 10_000.0);
        assert_eq!(f.attribute_text("zone"), "R1");
        assert_eq!(f.attribute_text("code"), "12");
        assert_eq!(f.attribute_text("note"), "");
        assert_eq!(f.attribute_text("missing"), "");
        assert_eq!(f.attribute_f64("pop"), Some(350.5));
        assert_eq!(f.attribute_f64("zone"), None);
    }

    #[test]
    fn test_layer_extent() {
        let layer = AoiLayer::new(
            "aoi",
            Some(Crs::WEB_MERCATOR),
            vec![AoiFeature::new(0, square(0.0, 0.0, 10.0)), AoiFeature::new(1, square(50.0, 20.0, 5.0))],
        );
        assert_eq!(layer.feature_count(), 2);
        assert_eq!(layer.extent(), Some(Extent::new(0.0, 0.0, 55.0, 25.0)));
        assert_eq!(AoiLayer::new("empty", None, vec![]).extent(), None);
    }
}
