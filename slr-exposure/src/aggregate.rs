//! Per-polygon flood exposure from an inundation mask.
//!
//! Zonal statistics give each polygon a sampled cell count and the mean of
//! the binary mask over those cells, i.e. its flooded fraction. Areas follow
//! from the mask's cell size:
//!
//! ```text
//! sampled_area  = count * pixel_area
//! effective     = min(sampled_area, polygon_area)
//! flood_m2      = mean * effective
//! flood_pct     = min(100, 100 * flood_m2 / polygon_area)
//! coverage_pct  = 100 * sampled_area / polygon_area
//! ```
//!
//! A polygon with no sampled cells falls back to its planar area with zero
//! flooding. Degenerate polygons are zeroed and counted as skipped.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use slr_tables::error::{Error, Result};

use crate::{
    cancel::{CancelCheck, RunOutcome},
    classify::{InundationClass, DEFAULT_PARTIAL_THRESHOLD_PCT},
    grid::InundationMask,
    population::{PopulationImpact, PopulationOptions, PopulationPlan},
    report::{ExposureSummary, ReportAccumulator},
    source::{AoiFeature, VectorSource},
    warning::{Warning, Warnings},
    zonal::{ZonalStatistics, ZoneStats},
};

/// Features between two polls of the cancellation check.
pub const CANCEL_POLL_INTERVAL: usize = 500;

/// Features between two progress log lines.
pub const PROGRESS_LOG_INTERVAL: usize = 1000;

/// Coverage below this percentage raises a partial-coverage warning.
pub const PARTIAL_COVERAGE_WARN_PCT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Sampled,
    /// No cell sampled; planar area used with zero flooding.
    Unsampled,
    /// No usable area; all figures zero.
    Degenerate,
}

/// Exposure figures for one AOI feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureExposure {
    pub fid: u64,
    pub attributes: Map<String, Value>,
    pub status: FeatureStatus,
    pub count: u64,
    pub flooded_fraction: f64,
    pub sampled_area_m2: f64,
    pub polygon_area_m2: f64,
    pub flood_m2: f64,
    pub flood_pct: f64,
    pub coverage_pct: f64,
    pub class: InundationClass,
    pub population: Option<PopulationImpact>,
}

impl FeatureExposure {
    fn zeroed(feature: &AoiFeature) -> Self {
        Self {
            fid: feature.fid,
            attributes: feature.attributes.clone(),
            status: FeatureStatus::Degenerate,
            count: 0,
            flooded_fraction: 0.0,
            sampled_area_m2: 0.0,
            polygon_area_m2: 0.0,
            flood_m2: 0.0,
            flood_pct: 0.0,
            coverage_pct: 0.0,
            class: InundationClass::NonInundated,
            population: None,
        }
    }

    fn from_stats(feature: &AoiFeature, stats: ZoneStats, pixel_area_m2: f64, polygon_area_m2: f64) -> Self {
        let (status, mean, sampled) = match stats.mean() {
            Some(mean) => (FeatureStatus::Sampled, mean, stats.count as f64 * pixel_area_m2),
            None => (FeatureStatus::Unsampled, 0.0, polygon_area_m2),
        };
        let effective = if polygon_area_m2 > 0.0 {
            sampled.min(polygon_area_m2)
        } else {
            sampled
        };
        let flood_m2 = mean * effective;
        let (flood_pct, coverage_pct) = if polygon_area_m2 > 0.0 {
            ((100.0 * flood_m2 / polygon_area_m2).min(100.0), 100.0 * sampled / polygon_area_m2)
        } else {
            (0.0, 0.0)
        };
        Self {
            fid: feature.fid,
            attributes: feature.attributes.clone(),
            status,
            count: stats.count,
            flooded_fraction: mean,
            sampled_area_m2: sampled,
            polygon_area_m2,
            flood_m2,
            flood_pct,
            coverage_pct,
            class: InundationClass::NonInundated,
            population: None,
        }
    }

    pub fn total_area_m2(&self) -> f64 {
        self.polygon_area_m2
    }

    pub fn dry_m2(&self) -> f64 {
        (self.polygon_area_m2 - self.flood_m2).max(0.0)
    }

    pub fn dry_pct(&self) -> f64 {
        if self.polygon_area_m2 > 0.0 {
            100.0 * self.dry_m2() / self.polygon_area_m2
        } else {
            0.0
        }
    }

    /// Flooded share of the polygon in `[0, 1]`.
    pub fn inund_ratio(&self) -> f64 {
        self.flood_pct / 100.0
    }

    /// Computed fields in output order, named the way reports and
    /// downstream tables expect them.
    pub fn output_fields(&self) -> Vec<(&'static str, Value)> {
        let mut fields = vec![
            ("flooded", json!(self.flooded_fraction)),
            ("flood_m2", json!(self.flood_m2)),
            ("flood_pct", json!(self.flood_pct)),
            ("coverage_pct", json!(self.coverage_pct)),
            ("total_area_m2", json!(self.total_area_m2())),
            ("inund_area_m2", json!(self.flood_m2)),
            ("dry_area_m2", json!(self.dry_m2())),
            ("inund_pct", json!(self.flood_pct)),
            ("dry_pct", json!(self.dry_pct())),
            ("inund_ratio", json!(self.inund_ratio())),
            ("inund_class", json!(self.class.label())),
            ("class_code", json!(self.class.code())),
        ];
        if let Some(p) = &self.population {
            fields.extend([
                ("pop_total", json!(p.pop_total)),
                ("pop_affected", json!(p.pop_affected)),
                ("pop_safe", json!(p.pop_safe)),
                ("pop_affected_pct", json!(p.pop_affected_pct)),
                ("pop_density", json!(p.pop_density)),
            ]);
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationOptions {
    pub classify_threshold_pct: f64,
    pub population: Option<PopulationOptions>,
    pub poll_interval: usize,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            classify_threshold_pct: DEFAULT_PARTIAL_THRESHOLD_PCT,
            population: None,
            poll_interval: CANCEL_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub features: Vec<FeatureExposure>,
    pub summary: ExposureSummary,
    pub warnings: Warnings,
}

pub struct ExposureAggregator<'z> {
    zonal: &'z dyn ZonalStatistics,
    options: AggregationOptions,
}

impl<'z> ExposureAggregator<'z> {
    pub fn new(zonal: &'z dyn ZonalStatistics, options: AggregationOptions) -> Self {
        Self { zonal, options }
    }

    pub fn options(&self) -> &AggregationOptions {
        &self.options
    }

    fn empty(&self, warnings: Warnings) -> Aggregation {
        Aggregation {
            features: Vec::new(),
            summary: ReportAccumulator::new(&self.options).finalize(false),
            warnings,
        }
    }

    /// Aggregate `mask` over every feature of `aoi`.
    ///
    /// The AOI must already be in the mask's CRS. An empty layer yields an
    /// empty result with a warning; a layer that does not overlap the mask
    /// is a `GeometryMismatch` error.
    pub fn aggregate(
        &self,
        mask: &InundationMask,
        aoi: &dyn VectorSource,
        cancel: &dyn CancelCheck,
    ) -> Result<RunOutcome<Aggregation>> {
        let mut warnings = Warnings::new();
        let features = aoi.features();
        let total = features.len();
        if total == 0 {
            warnings.push(Warning::EmptyAoi);
            return Ok(RunOutcome::Completed(self.empty(warnings)));
        }

        if let (Some(aoi_crs), Some(mask_crs)) = (aoi.crs(), mask.geometry.crs) {
            if aoi_crs != mask_crs {
                return Err(Error::GeometryMismatch(format!(
                    "AOI '{}' is in {} but the mask is in {}",
                    aoi.name(),
                    aoi_crs,
                    mask_crs
                )));
            }
        }
        let raster_extent = mask.geometry.extent();
        match aoi.extent() {
            Some(aoi_extent) if aoi_extent.intersects(&raster_extent) => {}
            aoi_extent => {
                return Err(Error::GeometryMismatch(format!(
                    "AOI '{}' extent {:?} does not intersect raster extent {:?}",
                    aoi.name(),
                    aoi_extent,
                    raster_extent
                )))
            }
        }

        let mut accumulator = ReportAccumulator::new(&self.options);
        let mut results = Vec::with_capacity(total);
        if cancel.is_canceled() {
            return Ok(self.canceled(results, &accumulator, warnings, total));
        }

        let stats = self.zonal.zonal_stats(mask, features)?;
        if stats.len() != total {
            return Err(Error::MalformedInput(format!(
                "zonal statistics returned {} rows for {} features",
                stats.len(),
                total
            )));
        }
        let plan = match &self.options.population {
            Some(p) => Some(PopulationPlan::prepare(&p.source, features, &mut warnings)?),
            None => None,
        };
        let pixel_area = mask.geometry.pixel_area();
        let poll = self.options.poll_interval.max(1);

        for (i, (feature, zone)) in features.iter().zip(stats).enumerate() {
            if i > 0 && i % poll == 0 && cancel.is_canceled() {
                return Ok(self.canceled(results, &accumulator, warnings, total));
            }
            if i > 0 && i % PROGRESS_LOG_INTERVAL == 0 {
                info!("Aggregated {}/{} features", i, total);
            }

            let polygon_area = feature.planar_area();
            if feature.geometry.0.is_empty() || !polygon_area.is_finite() || polygon_area <= 0.0 {
                warnings.push(Warning::DegeneratePolygon { fid: feature.fid });
                let zeroed = FeatureExposure::zeroed(feature);
                accumulator.add(&zeroed);
                results.push(zeroed);
                continue;
            }

            let mut exposure = FeatureExposure::from_stats(feature, zone, pixel_area, polygon_area);
            match exposure.status {
                FeatureStatus::Unsampled => warnings.push(Warning::UnsampledFeature { fid: feature.fid }),
                FeatureStatus::Sampled if exposure.coverage_pct < PARTIAL_COVERAGE_WARN_PCT => {
                    warnings.push(Warning::PartialCoverage {
                        fid: feature.fid,
                        coverage_pct: exposure.coverage_pct,
                    })
                }
                _ => {}
            }
            exposure.class = InundationClass::from_pct(exposure.flood_pct, self.options.classify_threshold_pct);
            if let (Some(plan), Some(options)) = (&plan, &self.options.population) {
                exposure.population = Some(PopulationImpact::compute(
                    plan.total(i),
                    exposure.flood_pct,
                    polygon_area,
                    options.mode,
                ));
            }
            debug!(
                "Feature {}: {} cells, flooded {:.3}, {:.1} m2 ({:.2}%)",
                exposure.fid, exposure.count, exposure.flooded_fraction, exposure.flood_m2, exposure.flood_pct
            );
            accumulator.add(&exposure);
            results.push(exposure);
        }

        let summary = accumulator.finalize(false);
        info!(
            "Aggregated {} features: {:.1} of {:.1} m2 flooded ({:.2}%), {} skipped",
            summary.feature_count, summary.flood_area_m2, summary.total_area_m2, summary.flood_pct, summary.skipped_features
        );
        Ok(RunOutcome::Completed(Aggregation {
            features: results,
            summary,
            warnings,
        }))
    }

    fn canceled(
        &self,
        features: Vec<FeatureExposure>,
        accumulator: &ReportAccumulator,
        warnings: Warnings,
        total: usize,
    ) -> RunOutcome<Aggregation> {
        let processed = features.len();
        info!("Aggregation canceled after {}/{} features", processed, total);
        RunOutcome::Canceled {
            partial: Aggregation {
                features,
                summary: accumulator.finalize(true),
                warnings,
            },
            processed,
            total,
            unit: "features",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancel::NeverCancel,
        grid::{Crs, GeoTransform, RasterGeometry},
        population::{DistributionMode, PopulationSource},
        source::AoiLayer,
        zonal::RasterizedZones,
    };
    use geo::{polygon, MultiPolygon};
    use serde_json::json;
    use std::cell::Cell;

    fn rect(fid: u64, x0: f64, y0: f64, x1: f64, y1: f64) -> AoiFeature {
        AoiFeature::new(
            fid,
            MultiPolygon(vec![polygon![
                (x: x0, y: y0),
                (x: x1, y: y0),
                (x: x1, y: y1),
                (x: x0, y: y1),
                (x: x0, y: y0),
            ]]),
        )
    }

    /// 10x10 cells of 10 m over (0,0)-(100,100); columns 0-3 flooded.
    fn mask() -> InundationMask {
        let geometry = RasterGeometry::new(10, 10, GeoTransform::north_up(0.0, 100.0, 10.0, 10.0), Some(Crs::WEB_MERCATOR));
        let data = (0..100).map(|i| if i % 10 < 4 { 1 } else { 0 }).collect();
        InundationMask::new(geometry, data).unwrap()
    }

    fn layer(features: Vec<AoiFeature>) -> AoiLayer {
        AoiLayer::new("aoi", Some(Crs::WEB_MERCATOR), features)
    }

    fn run(features: Vec<AoiFeature>, options: AggregationOptions) -> Aggregation {
        ExposureAggregator::new(&RasterizedZones, options)
            .aggregate(&mask(), &layer(features), &NeverCancel)
            .unwrap()
            .ensure_completed()
            .unwrap()
    }

    #[test]
    fn test_forty_percent_flooded() {
        let agg = run(vec![rect(1, 0.0, 0.0, 100.0, 100.0)], AggregationOptions::default());
        let f = &agg.features[0];
        assert_eq!(f.count, 100);
        assert!((f.flood_m2 - 4000.0).abs() < 1e-6);
        assert!((f.flood_pct - 40.0).abs() < 1e-9);
        assert!((f.dry_m2() - 6000.0).abs() < 1e-6);
        assert!((f.coverage_pct - 100.0).abs() < 1e-9);
        assert_eq!(f.class, InundationClass::PartiallyInundated);
        assert!(agg.warnings.is_empty());
    }

    #[test]
    fn test_sampled_area_is_capped() {
        // Cell centres at 5, 15 and 25 fall inside 4..26, so 9 cells (900 m2)
        // are sampled for a 484 m2 polygon
        let agg = run(vec![rect(1, 4.0, 74.0, 26.0, 96.0)], AggregationOptions::default());
        let f = &agg.features[0];
        assert_eq!(f.count, 9);
        assert!(f.sampled_area_m2 > f.polygon_area_m2);
        assert!(f.flood_m2 <= f.polygon_area_m2 + 1e-9);
        assert!(f.flood_pct <= 100.0);
        assert!((f.flood_pct - 100.0).abs() < 1e-9);
        assert_eq!(f.class, InundationClass::FullyInundated);
    }

    #[test]
    fn test_unsampled_feature_falls_back_to_planar_area() {
        let agg = run(vec![rect(1, 1.0, 1.0, 3.0, 3.0)], AggregationOptions::default());
        let f = &agg.features[0];
        assert_eq!(f.status, FeatureStatus::Unsampled);
        assert_eq!(f.sampled_area_m2, 4.0);
        assert_eq!(f.flood_pct, 0.0);
        assert!(!f.flood_pct.is_nan());
        assert_eq!(agg.summary.feature_count, 1);
    }

    #[test]
    fn test_degenerate_polygon_is_skipped() {
        let agg = run(
            vec![rect(1, 0.0, 0.0, 50.0, 50.0), rect(2, 10.0, 10.0, 10.0, 10.0)],
            AggregationOptions::default(),
        );
        assert_eq!(agg.features.len(), 2);
        assert_eq!(agg.features[1].status, FeatureStatus::Degenerate);
        assert_eq!(agg.summary.feature_count, 1);
        assert_eq!(agg.summary.skipped_features, 1);
        assert!(matches!(agg.warnings.iter().next(), Some(Warning::DegeneratePolygon { fid: 2 })));
    }

    #[test]
    fn test_empty_layer() {
        let agg = run(vec![], AggregationOptions::default());
        assert!(agg.features.is_empty());
        assert_eq!(agg.summary.feature_count, 0);
        assert_eq!(agg.summary.flood_pct, 0.0);
        assert!(matches!(agg.warnings.iter().next(), Some(Warning::EmptyAoi)));
    }

    #[test]
    fn test_disjoint_layer_is_geometry_mismatch() {
        let err = ExposureAggregator::new(&RasterizedZones, AggregationOptions::default())
            .aggregate(&mask(), &layer(vec![rect(1, 500.0, 500.0, 600.0, 600.0)]), &NeverCancel)
            .unwrap_err();
        assert_eq!(err.kind(), slr_tables::ErrorKind::GeometryMismatch);
    }

    #[test]
    fn test_crs_mismatch() {
        let wgs = AoiLayer::new("aoi", Some(Crs::WGS84), vec![rect(1, 0.0, 0.0, 10.0, 10.0)]);
        let err = ExposureAggregator::new(&RasterizedZones, AggregationOptions::default())
            .aggregate(&mask(), &wgs, &NeverCancel)
            .unwrap_err();
        assert_eq!(err.kind(), slr_tables::ErrorKind::GeometryMismatch);
    }

    #[test]
    fn test_population_fields() {
        let options = AggregationOptions {
            population: Some(PopulationOptions {
                source: PopulationSource::Field { name: "pop".into() },
                mode: DistributionMode::Proportional,
            }),
            ..AggregationOptions::default()
        };
        let agg = run(
            vec![rect(1, 0.0, 0.0, 100.0, 100.0).with_attribute("pop", json!(250))],
            options,
        );
        let p = agg.features[0].population.unwrap();
        assert!((p.pop_affected - 100.0).abs() < 1e-9);
        assert!((p.pop_safe - 150.0).abs() < 1e-9);
        let names: Vec<&str> = agg.features[0].output_fields().iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"pop_affected"));
        assert!(names.contains(&"inund_pct"));
        assert!(names.contains(&"flood_m2"));
    }

    #[test]
    fn test_cancel_between_batches() {
        let features: Vec<AoiFeature> = (0..10).map(|i| rect(i, 0.0, 0.0, 50.0, 50.0)).collect();
        let polls = Cell::new(0);
        let cancel = || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        };
        let options = AggregationOptions {
            poll_interval: 4,
            ..AggregationOptions::default()
        };
        let outcome = ExposureAggregator::new(&RasterizedZones, options)
            .aggregate(&mask(), &layer(features), &cancel)
            .unwrap();
        assert!(outcome.is_canceled());
        // Polls happen before the zonal pass and at features 4 and 8
        assert_eq!(outcome.value().features.len(), 8);
        assert_eq!(outcome.value().summary.feature_count, 8);
        assert!(outcome.value().summary.canceled);
        assert!(outcome.ensure_completed().is_err());
    }
}
