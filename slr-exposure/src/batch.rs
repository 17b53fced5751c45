//! Masks for every threshold scenario, aggregation for the primary one.

use log::info;
use serde::Serialize;
use slr_tables::error::{Error, ErrorKind, Result};
use std::collections::BTreeMap;

use crate::{
    aggregate::{Aggregation, AggregationOptions, ExposureAggregator},
    cancel::{CancelCheck, RunOutcome},
    compositor::ThresholdScenario,
    grid::{Crs, InundationMask},
    masker::{self, InundationMasker},
    source::{AoiLayer, ElevationSource, Reprojector, VectorSource},
    warning::{Warning, Warnings},
    zonal::ZonalStatistics,
};

/// Destination for computed masks.
pub trait MaskSink {
    /// Store `mask` under `output_id` and return where it went.
    fn write_mask(&mut self, output_id: &str, mask: &InundationMask) -> Result<String>;
}

/// Keeps every mask in memory, keyed by output id.
#[derive(Debug, Default)]
pub struct MemoryMaskSink {
    pub masks: BTreeMap<String, InundationMask>,
}

impl MaskSink for MemoryMaskSink {
    fn write_mask(&mut self, output_id: &str, mask: &InundationMask) -> Result<String> {
        self.masks.insert(output_id.to_string(), mask.clone());
        Ok(format!("memory://{}", output_id))
    }
}

/// Audit record for one scenario; aggregation only on the primary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub label: String,
    pub threshold_m: f64,
    pub return_period: Option<u32>,
    pub primary: bool,
    pub output_id: String,
    pub location: String,
    pub flooded_cells: usize,
    pub flooded_area_m2: f64,
    pub aggregation: Option<Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// CRS the masks were computed in.
    pub mask_crs: Option<Crs>,
    pub pixel_size: (f64, f64),
    pub scenarios: Vec<ScenarioResult>,
    pub warnings: Warnings,
}

impl BatchResult {
    pub fn primary(&self) -> Option<&ScenarioResult> {
        self.scenarios.iter().find(|s| s.primary)
    }
}

pub struct ScenarioBatchRunner<'a> {
    reprojector: &'a dyn Reprojector,
    zonal: &'a dyn ZonalStatistics,
    options: AggregationOptions,
}

impl<'a> ScenarioBatchRunner<'a> {
    pub fn new(reprojector: &'a dyn Reprojector, zonal: &'a dyn ZonalStatistics, options: AggregationOptions) -> Self {
        Self {
            reprojector,
            zonal,
            options,
        }
    }

    /// Threshold the DEM once per scenario, in order, and aggregate the
    /// primary scenario's mask over `aoi`.
    ///
    /// Cancellation is checked before each scenario. An AOI that does not
    /// overlap the DEM is reported as a warning and leaves the primary
    /// without aggregation.
    pub fn run(
        &self,
        dem: &dyn ElevationSource,
        scenarios: &[ThresholdScenario],
        aoi: Option<&dyn VectorSource>,
        output_id: &dyn Fn(&ThresholdScenario) -> String,
        sink: &mut dyn MaskSink,
        cancel: &dyn CancelCheck,
    ) -> Result<RunOutcome<BatchResult>> {
        if scenarios.iter().filter(|s| s.primary).count() != 1 {
            return Err(Error::MalformedInput(format!(
                "exactly one scenario must be primary, got {} of {}",
                scenarios.iter().filter(|s| s.primary).count(),
                scenarios.len()
            )));
        }
        let mut warnings = Warnings::new();
        let grid = InundationMasker::new(self.reprojector).prepare(dem, aoi.and_then(|a| a.crs()), &mut warnings)?;
        let mask_crs = grid.geometry.crs;

        let reprojected: Option<AoiLayer> = match (aoi, mask_crs) {
            (Some(layer), Some(target)) => match layer.crs() {
                Some(crs) if crs != target => Some(self.reprojector.reproject_layer(layer, target)?),
                _ => None,
            },
            _ => None,
        };
        let aoi: Option<&dyn VectorSource> = match &reprojected {
            Some(layer) => Some(layer),
            None => aoi,
        };

        let mut result = BatchResult {
            mask_crs,
            pixel_size: grid.geometry.pixel_size(),
            scenarios: Vec::with_capacity(scenarios.len()),
            warnings: Warnings::new(),
        };
        let total = scenarios.len();
        for scenario in scenarios {
            if cancel.is_canceled() {
                let processed = result.scenarios.len();
                info!("Batch canceled after {}/{} scenarios", processed, total);
                result.warnings = warnings;
                return Ok(RunOutcome::Canceled {
                    partial: result,
                    processed,
                    total,
                    unit: "scenarios",
                });
            }

            let mask = masker::threshold(&grid, scenario.threshold_m);
            let id = output_id(scenario);
            let location = sink.write_mask(&id, &mask)?;
            info!(
                "Scenario '{}': threshold {:.3} m -> {} ({} flooded cells){}",
                scenario.label,
                scenario.threshold_m,
                location,
                mask.flooded_cells(),
                if scenario.primary { " [primary]" } else { "" }
            );

            let mut aggregation = None;
            let mut canceled = None;
            if scenario.primary {
                if let Some(layer) = aoi {
                    let aggregator = ExposureAggregator::new(self.zonal, self.options.clone());
                    match aggregator.aggregate(&mask, layer, cancel) {
                        Ok(RunOutcome::Completed(a)) => aggregation = Some(a),
                        Ok(RunOutcome::Canceled {
                            partial,
                            processed,
                            total,
                            unit,
                        }) => {
                            aggregation = Some(partial);
                            canceled = Some((processed, total, unit));
                        }
                        Err(e) if e.kind() == ErrorKind::GeometryMismatch => {
                            warnings.push(Warning::DisjointExtents { detail: e.to_string() });
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            if let Some(a) = &mut aggregation {
                let own = std::mem::take(&mut a.warnings);
                warnings.extend(own);
            }

            result.scenarios.push(ScenarioResult {
                label: scenario.label.clone(),
                threshold_m: scenario.threshold_m,
                return_period: scenario.return_period,
                primary: scenario.primary,
                output_id: id,
                location,
                flooded_cells: mask.flooded_cells(),
                flooded_area_m2: mask.flooded_area(),
                aggregation,
            });

            if let Some((processed, total, unit)) = canceled {
                result.warnings = warnings;
                return Ok(RunOutcome::Canceled {
                    partial: result,
                    processed,
                    total,
                    unit,
                });
            }
        }

        result.warnings = warnings;
        Ok(RunOutcome::Completed(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancel::NeverCancel,
        compositor::scenario_label,
        grid::{ElevationGrid, GeoTransform, RasterGeometry},
        mercator::WebMercator,
        source::AoiFeature,
        zonal::RasterizedZones,
    };
    use geo::{polygon, MultiPolygon};
    use std::cell::Cell;

    fn dem() -> ElevationGrid {
        let geometry = RasterGeometry::new(4, 1, GeoTransform::north_up(0.0, 10.0, 10.0, 10.0), Some(Crs::WEB_MERCATOR));
        ElevationGrid::new(geometry, vec![0.5, 1.5, 2.5, 3.5], None).unwrap()
    }

    fn scenario(rp: Option<u32>, threshold_m: f64, primary: bool) -> ThresholdScenario {
        ThresholdScenario {
            label: scenario_label(rp),
            threshold_m,
            return_period: rp,
            return_level_m: None,
            primary,
        }
    }

    fn aoi(x0: f64) -> AoiLayer {
        let square = MultiPolygon(vec![polygon![
            (x: x0, y: 0.0),
            (x: x0 + 40.0, y: 0.0),
            (x: x0 + 40.0, y: 10.0),
            (x: x0, y: 10.0),
            (x: x0, y: 0.0),
        ]]);
        AoiLayer::new("aoi", Some(Crs::WEB_MERCATOR), vec![AoiFeature::new(1, square)])
    }

    fn id(s: &ThresholdScenario) -> String {
        format!("Flood_{}", s.return_period.map(|p| p.to_string()).unwrap_or_else(|| "SLRonly".into()))
    }

    #[test]
    fn test_only_primary_is_aggregated() {
        let runner = ScenarioBatchRunner::new(&WebMercator, &RasterizedZones, AggregationOptions::default());
        let scenarios = vec![scenario(None, 1.0, false), scenario(Some(100), 3.0, true)];
        let layer = aoi(0.0);
        let mut sink = MemoryMaskSink::default();
        let result = runner
            .run(&dem(), &scenarios, Some(&layer), &id, &mut sink, &NeverCancel)
            .unwrap()
            .ensure_completed()
            .unwrap();

        assert_eq!(result.scenarios.len(), 2);
        assert!(result.scenarios[0].aggregation.is_none());
        assert_eq!(result.scenarios[0].flooded_cells, 1);
        assert_eq!(result.scenarios[0].output_id, "Flood_SLRonly");
        let primary = result.primary().unwrap();
        assert_eq!(primary.location, "memory://Flood_100");
        let agg = primary.aggregation.as_ref().unwrap();
        assert!((agg.features[0].flood_pct - 75.0).abs() < 1e-9);
        assert_eq!(sink.masks.len(), 2);
    }

    #[test]
    fn test_disjoint_aoi_becomes_warning() {
        let runner = ScenarioBatchRunner::new(&WebMercator, &RasterizedZones, AggregationOptions::default());
        let scenarios = vec![scenario(None, 1.0, true)];
        let layer = aoi(1000.0);
        let result = runner
            .run(&dem(), &scenarios, Some(&layer), &id, &mut MemoryMaskSink::default(), &NeverCancel)
            .unwrap()
            .ensure_completed()
            .unwrap();
        assert!(result.scenarios[0].aggregation.is_none());
        assert!(matches!(result.warnings.iter().next(), Some(Warning::DisjointExtents { .. })));
    }

    #[test]
    fn test_cancel_between_scenarios() {
        let runner = ScenarioBatchRunner::new(&WebMercator, &RasterizedZones, AggregationOptions::default());
        let scenarios = vec![
            scenario(None, 1.0, false),
            scenario(Some(1), 2.0, false),
            scenario(Some(100), 3.0, true),
        ];
        let polls = Cell::new(0);
        let cancel = || {
            polls.set(polls.get() + 1);
            polls.get() > 1
        };
        let mut sink = MemoryMaskSink::default();
        let outcome = runner
            .run(&dem(), &scenarios, None, &id, &mut sink, &cancel)
            .unwrap();
        assert!(outcome.is_canceled());
        assert_eq!(outcome.value().scenarios.len(), 1);
        assert_eq!(sink.masks.len(), 1);
    }

    #[test]
    fn test_no_aoi_masks_only() {
        let runner = ScenarioBatchRunner::new(&WebMercator, &RasterizedZones, AggregationOptions::default());
        let scenarios = vec![scenario(None, 2.0, true)];
        let result = runner
            .run(&dem(), &scenarios, None, &id, &mut MemoryMaskSink::default(), &NeverCancel)
            .unwrap()
            .ensure_completed()
            .unwrap();
        assert!(result.scenarios[0].aggregation.is_none());
        assert_eq!(result.scenarios[0].flooded_area_m2, 200.0);
    }
}
