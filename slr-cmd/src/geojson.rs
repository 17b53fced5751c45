//! GeoJSON polygon layers as AOI input.
//!
//! Features with a null or non-polygon geometry are kept with an empty
//! geometry so the aggregator reports them as degenerate.

use anyhow::{anyhow, bail, Context};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use slr_exposure::{AoiFeature, AoiLayer, Crs};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    crs: Option<NamedCrs>,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct NamedCrs {
    properties: NamedCrsProperties,
}

#[derive(Debug, Deserialize)]
struct NamedCrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// CRS from a legacy `crs.properties.name`, e.g. `urn:ogc:def:crs:EPSG::3857`.
fn crs_from_name(name: &str) -> Option<Crs> {
    if name.ends_with("CRS84") {
        return Some(Crs::WGS84);
    }
    name.rsplit(':').find(|s| !s.is_empty()).and_then(Crs::parse)
}

fn ring(value: &Value) -> anyhow::Result<LineString<f64>> {
    let points = value.as_array().ok_or_else(|| anyhow!("ring is not an array"))?;
    points
        .iter()
        .map(|p| match p.as_array().map(|xy| (xy.first(), xy.get(1))) {
            Some((Some(x), Some(y))) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => bail!("non-numeric position {}", p),
            },
            _ => bail!("invalid position {}", p),
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon(value: &Value) -> anyhow::Result<Polygon<f64>> {
    let rings = value.as_array().ok_or_else(|| anyhow!("polygon is not an array of rings"))?;
    let mut rings = rings.iter().map(ring);
    let exterior = rings.next().transpose()?.unwrap_or_else(|| LineString::new(vec![]));
    let interiors = rings.collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn multipolygon(geometry: &Value) -> anyhow::Result<Option<MultiPolygon<f64>>> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    match (kind, geometry.get("coordinates")) {
        ("Polygon", Some(coordinates)) => Ok(Some(MultiPolygon(vec![polygon(coordinates)?]))),
        ("MultiPolygon", Some(coordinates)) => {
            let parts = coordinates
                .as_array()
                .ok_or_else(|| anyhow!("MultiPolygon coordinates are not an array"))?;
            Ok(Some(MultiPolygon(parts.iter().map(polygon).collect::<anyhow::Result<_>>()?)))
        }
        ("Polygon" | "MultiPolygon", None) => bail!("{} without coordinates", kind),
        _ => Ok(None),
    }
}

/// Parse a GeoJSON `FeatureCollection`. Without a `crs` member the layer is
/// lon/lat (EPSG:4326); `crs_override` wins over both.
pub fn parse_geojson(name: &str, text: &str, crs_override: Option<Crs>) -> anyhow::Result<AoiLayer> {
    let collection: FeatureCollection = serde_json::from_str(text).context("invalid GeoJSON")?;
    if collection.kind != "FeatureCollection" {
        bail!("expected a FeatureCollection, found '{}'", collection.kind);
    }
    let crs = match (crs_override, &collection.crs) {
        (Some(crs), _) => crs,
        (None, Some(named)) => crs_from_name(&named.properties.name)
            .ok_or_else(|| anyhow!("unsupported crs name '{}'", named.properties.name))?,
        (None, None) => Crs::WGS84,
    };

    let mut features = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.into_iter().enumerate() {
        let fid = feature.id.as_ref().and_then(Value::as_u64).unwrap_or(index as u64);
        let geometry = match &feature.geometry {
            Some(g) if !g.is_null() => {
                multipolygon(g).with_context(|| format!("feature {} has an invalid geometry", fid))?
            }
            _ => None,
        };
        let geometry = geometry.unwrap_or_else(|| {
            warn!("Feature {} has no polygon geometry; it will be skipped", fid);
            MultiPolygon(vec![])
        });
        let mut aoi = AoiFeature::new(fid, geometry);
        aoi.attributes = feature.properties.unwrap_or_default();
        features.push(aoi);
    }
    info!("Loaded AOI '{}': {} features, CRS {}", name, features.len(), crs);
    Ok(AoiLayer::new(name, Some(crs), features))
}

pub fn read_geojson(path: &Path, crs_override: Option<Crs>) -> anyhow::Result<AoiLayer> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading AOI {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "aoi".to_string());
    parse_geojson(&name, &text, crs_override).with_context(|| format!("parsing AOI {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slr_exposure::VectorSource;

    const LAYER: &str = r#"{
      "type": "FeatureCollection",
      "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
      "features": [
        { "type": "Feature", "id": 10,
          "properties": { "zone": "R", "pop": 120 },
          "geometry": { "type": "Polygon", "coordinates": [[[0,0],[100,0],[100,100],[0,100],[0,0]]] } },
        { "type": "Feature",
          "properties": { "zone": null },
          "geometry": { "type": "MultiPolygon", "coordinates": [
            [[[200,0],[210,0],[210,10],[200,10],[200,0]]],
            [[[300,0],[310,0],[310,10],[300,10],[300,0]]]
          ] } },
        { "type": "Feature", "properties": {}, "geometry": null },
        { "type": "Feature", "properties": {}, "geometry": { "type": "Point", "coordinates": [1, 2] } }
      ]
    }"#;

    #[test]
    fn test_parse_layer() {
        let layer = parse_geojson("plots", LAYER, None).unwrap();
        assert_eq!(layer.crs(), Some(Crs::WEB_MERCATOR));
        assert_eq!(layer.feature_count(), 4);
        let f = &layer.features()[0];
        assert_eq!(f.fid, 10);
        assert_eq!(f.planar_area(), 10_000.0);
        assert_eq!(f.attribute_text("zone"), "R");
        let f = &layer.features()[1];
        assert_eq!(f.fid, 1);
        assert_eq!(f.planar_area(), 200.0);
        assert_eq!(f.attribute_text("zone"), "");
        assert!(layer.features()[2].geometry.0.is_empty());
        assert!(layer.features()[3].geometry.0.is_empty());
    }

    #[test]
    fn test_default_and_override_crs() {
        let plain = r#"{"type":"FeatureCollection","features":[]}"#;
        assert_eq!(parse_geojson("a", plain, None).unwrap().crs(), Some(Crs::WGS84));
        assert_eq!(
            parse_geojson("a", plain, Some(Crs::WEB_MERCATOR)).unwrap().crs(),
            Some(Crs::WEB_MERCATOR)
        );
        assert_eq!(crs_from_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(Crs::WGS84));
        assert_eq!(crs_from_name("EPSG:32633"), Some(Crs::epsg(32633)));
    }

    #[test]
    fn test_rejects_non_collections() {
        assert!(parse_geojson("a", r#"{"type":"Feature"}"#, None).is_err());
        let bad = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[["x",0]]]}}]}"#;
        assert!(parse_geojson("a", bad, None).is_err());
    }
}
