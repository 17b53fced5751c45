//! End-to-end flood run: resolve levels, compute masks, aggregate the
//! primary scenario and summarise.
//!
//! A run moves through
//! `Configured -> LevelResolved -> MasksComputed -> [Aggregated] -> Reported`.
//! `Aggregated` is skipped when no AOI is given or when the AOI does not
//! overlap the masks. `Canceled` and `Failed`
//! are terminal and reachable from every other state.

use log::{error, info};
use serde::{Deserialize, Serialize};
use slr_tables::{
    codec::RETURN_PERIODS,
    error::{Error, Result},
    nearest::DEFAULT_MAX_STATION_DISTANCE_KM,
    Ar6Table, CodecTable, Quantile, ScenarioCode, ScenarioKey, StationMatch,
};
use slr_utils::geodesy::is_valid_lon_lat;
use std::fmt;

use crate::{
    aggregate::AggregationOptions,
    batch::{BatchResult, MaskSink, ScenarioBatchRunner},
    cancel::{CancelCheck, RunOutcome},
    compositor::{
        scenario_label, Composition, LevelCompositor, ThresholdScenario, DEFAULT_PRIMARY_RETURN_PERIOD,
        DEFAULT_REQUESTED_RETURN_PERIODS,
    },
    grid::Crs,
    source::{ElevationSource, Reprojector, VectorSource},
    warning::{Warning, Warnings},
    zonal::ZonalStatistics,
};

/// How the CODEC station is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StationMode {
    /// No station: only "SLR only" is computed.
    None,
    /// Station given by id.
    Manual { station_id: String },
    /// Station nearest to the AOI (or DEM) centre.
    #[default]
    Auto,
}

impl fmt::Display for StationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationMode::None => f.write_str("None"),
            StationMode::Manual { .. } => f.write_str("Manual"),
            StationMode::Auto => f.write_str("Auto (nearest)"),
        }
    }
}

fn default_primary() -> Option<u32> {
    DEFAULT_PRIMARY_RETURN_PERIOD
}

fn default_requested() -> Vec<Option<u32>> {
    DEFAULT_REQUESTED_RETURN_PERIODS.to_vec()
}

fn default_max_km() -> f64 {
    DEFAULT_MAX_STATION_DISTANCE_KM
}

/// Parameters of one flood run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRequest {
    pub scenario: ScenarioCode,
    pub year: u16,
    pub quantile: Quantile,
    #[serde(default)]
    pub vertical_offset_m: f64,
    #[serde(default)]
    pub station: StationMode,
    #[serde(default = "default_primary")]
    pub primary_return_period: Option<u32>,
    /// `None` entries request "SLR only".
    #[serde(default = "default_requested")]
    pub return_periods: Vec<Option<u32>>,
    #[serde(default = "default_max_km")]
    pub max_station_distance_km: f64,
    #[serde(default)]
    pub aggregation: AggregationOptions,
}

impl FloodRequest {
    pub fn new(scenario: ScenarioCode, year: u16, quantile: Quantile) -> Self {
        Self {
            scenario,
            year,
            quantile,
            vertical_offset_m: 0.0,
            station: StationMode::default(),
            primary_return_period: default_primary(),
            return_periods: default_requested(),
            max_station_distance_km: default_max_km(),
            aggregation: AggregationOptions::default(),
        }
    }

    pub fn key(&self) -> ScenarioKey {
        ScenarioKey::new(self.scenario, self.year, self.quantile)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.vertical_offset_m.is_finite() {
            return Err(Error::MalformedInput(format!(
                "vertical offset must be finite, got {}",
                self.vertical_offset_m
            )));
        }
        if !(self.max_station_distance_km.is_finite() && self.max_station_distance_km > 0.0) {
            return Err(Error::MalformedInput(format!(
                "maximum station distance must be positive, got {}",
                self.max_station_distance_km
            )));
        }
        let t = self.aggregation.classify_threshold_pct;
        if !(0.0..=100.0).contains(&t) {
            return Err(Error::MalformedInput(format!(
                "classification threshold must be within 0-100 %, got {}",
                t
            )));
        }
        for rp in self.return_periods.iter().chain(std::iter::once(&self.primary_return_period)).flatten() {
            if !RETURN_PERIODS.contains(rp) {
                return Err(Error::MalformedInput(format!(
                    "unsupported return period {} (expected one of {:?})",
                    rp, RETURN_PERIODS
                )));
            }
        }
        Ok(())
    }

    fn name_suffix(&self, return_period: Option<u32>) -> String {
        let rp = match return_period {
            Some(rp) => format!("RP{}", rp),
            None => "SLRonly".to_string(),
        };
        format!("{}_{}_{}_{}", self.scenario.short(), self.year, self.quantile.label(), rp)
    }

    /// Mask name, e.g. `Flood_245_2100_p50_RP100`.
    pub fn flood_output_id(&self, return_period: Option<u32>) -> String {
        format!("Flood_{}", self.name_suffix(return_period))
    }

    /// Per-feature table name, e.g. `AOI_Stats_245_2100_p50_SLRonly`.
    pub fn aoi_output_id(&self, return_period: Option<u32>) -> String {
        format!("AOI_Stats_{}", self.name_suffix(return_period))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Configured,
    LevelResolved,
    MasksComputed,
    Aggregated,
    Reported,
    Canceled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Reported | RunState::Canceled | RunState::Failed)
    }
}

/// Records the states a run passes through and rejects skipped steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTracker {
    expects_aggregation: bool,
    history: Vec<RunState>,
}

impl RunTracker {
    pub fn new(has_aoi: bool) -> Self {
        Self {
            expects_aggregation: has_aoi,
            history: vec![RunState::Configured],
        }
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Configured)
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        use RunState::*;
        let current = self.state();
        let allowed = match (current, next) {
            (c, _) if c.is_terminal() => false,
            (_, Canceled | Failed) => true,
            (Configured, LevelResolved) => true,
            (LevelResolved, MasksComputed) => true,
            (MasksComputed, Aggregated) => self.expects_aggregation,
            (MasksComputed, Reported) => !self.expects_aggregation,
            (Aggregated, Reported) => true,
            _ => false,
        };
        if !allowed {
            return Err(Error::MalformedInput(format!(
                "invalid run transition {:?} -> {:?}",
                current, next
            )));
        }
        self.history.push(next);
        Ok(())
    }

    /// Let a run with an AOI report without aggregating. Only valid once the
    /// masks are computed.
    pub fn skip_aggregation(&mut self) -> Result<()> {
        if self.state() != RunState::MasksComputed {
            return Err(Error::MalformedInput(format!(
                "cannot skip aggregation in state {:?}",
                self.state()
            )));
        }
        self.expects_aggregation = false;
        Ok(())
    }
}

/// Lon/lat used for the nearest-station search: the AOI extent centre when
/// an AOI is given, else the DEM extent centre.
pub fn target_point(
    dem: &dyn ElevationSource,
    aoi: Option<&dyn VectorSource>,
    reprojector: &dyn Reprojector,
) -> Result<(f64, f64)> {
    let from_aoi = aoi.and_then(|layer| layer.extent().map(|e| (e.centre(), layer.crs())));
    let (centre, crs) = match from_aoi {
        Some(found) => found,
        None => (dem.extent().centre(), dem.crs()),
    };
    let (lon, lat) = match crs {
        Some(crs) if crs == Crs::WGS84 => centre,
        Some(crs) => reprojector.reproject_point(centre, crs, Crs::WGS84)?,
        None => {
            return Err(Error::MalformedInput(
                "cannot locate the target point: input has no CRS".to_string(),
            ))
        }
    };
    if !is_valid_lon_lat(lon, lat) {
        return Err(Error::MalformedInput(format!(
            "target point ({}, {}) is not a valid lon/lat",
            lon, lat
        )));
    }
    Ok((lon, lat))
}

/// Inputs echoed in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInputs {
    pub ar6_source: String,
    pub codec_source: Option<String>,
    pub dem_source: String,
    pub dem_crs: Option<Crs>,
    /// `name - N features, CRS ...` or `None`.
    pub aoi: Option<String>,
}

/// Everything a finished (or canceled) run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloodRun {
    pub request: FloodRequest,
    pub inputs: RunInputs,
    pub target: Option<(f64, f64)>,
    pub station: Option<StationMatch>,
    pub composition: Composition,
    pub batch: BatchResult,
    pub warnings: Warnings,
    pub tracker: RunTracker,
}

impl FloodRun {
    pub fn state(&self) -> RunState {
        self.tracker.state()
    }

    pub fn primary(&self) -> Option<&ThresholdScenario> {
        self.composition.primary()
    }

    /// Plain-text summary of inputs, levels, outputs and scenarios.
    pub fn summary_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FloodRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.request;
        let c = &self.composition;
        let primary = c.primary();
        let primary_out = self.batch.primary();
        writeln!(f, "===== RUN SUMMARY =====")?;
        writeln!(f, "Inputs:")?;
        writeln!(
            f,
            "  AR6 CSV: {}; Scenario={}, Year={}, Percentile={}",
            self.inputs.ar6_source,
            r.scenario.label(),
            r.year,
            r.quantile.label()
        )?;
        writeln!(f, "  Vertical offset: {:.3} m", c.offset_m)?;
        writeln!(
            f,
            "  DEM: {}; CRS: {}",
            self.inputs.dem_source,
            self.inputs.dem_crs.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
        )?;
        writeln!(
            f,
            "  CODEC CSV: {}; Station mode: {}",
            self.inputs.codec_source.as_deref().unwrap_or("-"),
            r.station
        )?;
        match &self.station {
            Some(st) => {
                writeln!(f, "  Station ID: {}", st.station_id)?;
                writeln!(
                    f,
                    "  Station coords: ({:.5}, {:.5})  distance: {}",
                    st.lon,
                    st.lat,
                    st.distance_km.map(|d| format!("{:.1} km", d)).unwrap_or_else(|| "n/a".into())
                )?;
            }
            None => {
                writeln!(f, "  Station ID: -")?;
            }
        }
        let rp_level = primary.and_then(|p| p.return_level_m).unwrap_or(0.0);
        let rp_label = primary
            .and_then(|p| p.return_period)
            .map(|rp| format!("{}-yr", rp))
            .unwrap_or_else(|| "none".into());
        writeln!(f, "\nLevels (metres):")?;
        writeln!(f, "  AR6 SLR:      {:.3}", c.ar6_m)?;
        writeln!(f, "  Offset:       {:.3}", c.offset_m)?;
        writeln!(f, "  Base SLR:     {:.3}", c.base_m())?;
        writeln!(f, "  RP ({:>6}): {:.3}", rp_label, rp_level)?;
        writeln!(
            f,
            "  TOTAL thresh: {:.3}",
            primary.map(|p| p.threshold_m).unwrap_or_else(|| c.base_m())
        )?;
        writeln!(f, "\nOutputs:")?;
        if let Some(p) = primary_out {
            writeln!(f, "  Primary raster: {}  ->  {}", p.label, p.location)?;
        }
        let (px, py) = self.batch.pixel_size;
        writeln!(
            f,
            "  Raster CRS: {}; pixel {:.2} x {:.2} m (area {:.2} m²)",
            self.batch.mask_crs.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into()),
            px,
            py,
            px * py
        )?;
        writeln!(f, "  AOI: {}", self.inputs.aoi.as_deref().unwrap_or("None"))?;
        writeln!(f, "\nScenarios & thresholds:")?;
        for sc in &self.batch.scenarios {
            writeln!(f, "  - {:>14}: threshold {:.3} m  ->  {}", sc.label, sc.threshold_m, sc.location)?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "\nWarnings:")?;
            for w in &self.warnings {
                writeln!(f, "  - {}", w)?;
            }
        }
        if self.state() == RunState::Canceled {
            writeln!(f, "\nRun CANCELED; totals cover processed items only.")?;
        }
        Ok(())
    }
}

/// Tables and collaborators shared by every run.
pub struct FloodPipeline<'a> {
    ar6: &'a Ar6Table,
    codec: Option<&'a CodecTable>,
    reprojector: &'a dyn Reprojector,
    zonal: &'a dyn ZonalStatistics,
}

impl<'a> FloodPipeline<'a> {
    pub fn new(
        ar6: &'a Ar6Table,
        codec: Option<&'a CodecTable>,
        reprojector: &'a dyn Reprojector,
        zonal: &'a dyn ZonalStatistics,
    ) -> Self {
        Self {
            ar6,
            codec,
            reprojector,
            zonal,
        }
    }

    /// Run every step. Errors leave the run `Failed`; the caller gets the
    /// error with its context.
    pub fn run(
        &self,
        request: &FloodRequest,
        dem: &dyn ElevationSource,
        aoi: Option<&dyn VectorSource>,
        sink: &mut dyn MaskSink,
        cancel: &dyn CancelCheck,
    ) -> Result<RunOutcome<FloodRun>> {
        let mut tracker = RunTracker::new(aoi.is_some());
        match self.run_steps(request, dem, aoi, sink, cancel, &mut tracker) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Flood run failed in state {:?}: {}", tracker.state(), e);
                let _ = tracker.advance(RunState::Failed);
                Err(e)
            }
        }
    }

    fn resolve_station(
        &self,
        request: &FloodRequest,
        dem: &dyn ElevationSource,
        aoi: Option<&dyn VectorSource>,
        warnings: &mut Warnings,
    ) -> Result<(Option<(f64, f64)>, Option<StationMatch>)> {
        let codec = match (&request.station, self.codec) {
            (StationMode::None, _) => return Ok((None, None)),
            (_, Some(codec)) => codec,
            (mode, None) => {
                return Err(Error::MalformedInput(format!(
                    "station mode '{}' needs a CODEC table",
                    mode
                )))
            }
        };
        let target = match (&request.station, target_point(dem, aoi, self.reprojector)) {
            (_, Ok(t)) => Some(t),
            (StationMode::Manual { .. }, Err(_)) => None,
            (_, Err(e)) => return Err(e),
        };
        let station = match &request.station {
            StationMode::Manual { station_id } => codec.lookup(target, None, Some(station_id.as_str()))?,
            _ => codec.lookup(target, None, None)?,
        };
        if let Some(distance_km) = station.distance_km.filter(|d| *d > request.max_station_distance_km) {
            warnings.push(Warning::StationTooFar {
                station_id: station.station_id.clone(),
                distance_km,
                max_km: request.max_station_distance_km,
            });
        }
        info!(
            "CODEC station ({}): {} with return levels {:?}",
            request.station, station.station_id, station.return_levels
        );
        Ok((target, Some(station)))
    }

    fn run_steps(
        &self,
        request: &FloodRequest,
        dem: &dyn ElevationSource,
        aoi: Option<&dyn VectorSource>,
        sink: &mut dyn MaskSink,
        cancel: &dyn CancelCheck,
        tracker: &mut RunTracker,
    ) -> Result<RunOutcome<FloodRun>> {
        request.validate()?;
        let mut warnings = Warnings::new();

        let key = request.key();
        let ar6_m = self.ar6.lookup(&key)?;
        info!(
            "AR6 total SLR {} = {:.3} m; offset {:.3} m -> base {:.3} m",
            key,
            ar6_m,
            request.vertical_offset_m,
            ar6_m + request.vertical_offset_m
        );

        let (target, station) = self.resolve_station(request, dem, aoi, &mut warnings)?;
        let (requested, primary) = match station {
            Some(_) => (request.return_periods.clone(), request.primary_return_period),
            None => (vec![None], None),
        };
        let composition = LevelCompositor::new(station.as_ref()).compose(
            ar6_m,
            request.vertical_offset_m,
            &requested,
            primary,
        )?;
        warnings.extend(composition.warnings.clone());
        tracker.advance(RunState::LevelResolved)?;

        let inputs = RunInputs {
            ar6_source: self.ar6.source().to_string(),
            codec_source: self.codec.map(|c| c.source().to_string()),
            dem_source: dem.source_id(),
            dem_crs: dem.crs(),
            aoi: aoi.map(|a| {
                format!(
                    "{} - {} features, CRS {}",
                    a.name(),
                    a.feature_count(),
                    a.crs().map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                )
            }),
        };

        let runner = ScenarioBatchRunner::new(self.reprojector, self.zonal, request.aggregation.clone());
        let output_id = |s: &ThresholdScenario| request.flood_output_id(s.return_period);
        let outcome = runner.run(dem, &composition.scenarios, aoi, &output_id, sink, cancel)?;

        let canceled = outcome.is_canceled();
        let (batch, processed, total, unit) = match outcome {
            RunOutcome::Completed(b) => (b, 0, 0, ""),
            RunOutcome::Canceled {
                partial,
                processed,
                total,
                unit,
            } => (partial, processed, total, unit),
        };
        warnings.extend(batch.warnings.clone());

        if canceled {
            tracker.advance(RunState::Canceled)?;
        } else {
            tracker.advance(RunState::MasksComputed)?;
            if batch.primary().map_or(false, |p| p.aggregation.is_some()) {
                tracker.advance(RunState::Aggregated)?;
            } else if aoi.is_some() {
                tracker.skip_aggregation()?;
            }
            tracker.advance(RunState::Reported)?;
        }

        let run = FloodRun {
            request: request.clone(),
            inputs,
            target,
            station,
            composition,
            batch,
            warnings,
            tracker: tracker.clone(),
        };
        info!(
            "Flood run {} with {} scenario(s); primary '{}'",
            if canceled { "canceled" } else { "completed" },
            run.batch.scenarios.len(),
            run.primary().map(|p| p.label.clone()).unwrap_or_else(|| scenario_label(None))
        );
        if canceled {
            Ok(RunOutcome::Canceled {
                partial: run,
                processed,
                total,
                unit,
            })
        } else {
            Ok(RunOutcome::Completed(run))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_names() {
        let req = FloodRequest::new(ScenarioCode::Ssp245, 2100, Quantile::P50);
        assert_eq!(req.flood_output_id(Some(100)), "Flood_245_2100_p50_RP100");
        assert_eq!(req.aoi_output_id(None), "AOI_Stats_245_2100_p50_SLRonly");
        let req = FloodRequest::new(ScenarioCode::Ssp585, 2050, Quantile::P5);
        assert_eq!(req.flood_output_id(Some(1)), "Flood_585_2050_p05_RP1");
    }

    #[test]
    fn test_request_defaults_from_json() {
        let req: FloodRequest =
            serde_json::from_str(r#"{"scenario":"ssp245","year":2100,"quantile":"P50"}"#).unwrap();
        assert_eq!(req.primary_return_period, Some(100));
        assert_eq!(req.return_periods, vec![None, Some(1), Some(100)]);
        assert_eq!(req.station, StationMode::Auto);
        assert_eq!(req.max_station_distance_km, 500.0);
        assert_eq!(req.aggregation.classify_threshold_pct, 10.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let mut req = FloodRequest::new(ScenarioCode::Ssp245, 2100, Quantile::P50);
        req.return_periods = vec![Some(25)];
        assert!(req.validate().is_err());
        let mut req = FloodRequest::new(ScenarioCode::Ssp245, 2100, Quantile::P50);
        req.vertical_offset_m = f64::INFINITY;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_state_machine_without_aoi() {
        let mut t = RunTracker::new(false);
        assert!(t.advance(RunState::MasksComputed).is_err());
        t.advance(RunState::LevelResolved).unwrap();
        t.advance(RunState::MasksComputed).unwrap();
        assert!(t.advance(RunState::Aggregated).is_err());
        t.advance(RunState::Reported).unwrap();
        assert!(t.advance(RunState::Canceled).is_err());
        assert_eq!(
            t.history(),
            &[RunState::Configured, RunState::LevelResolved, RunState::MasksComputed, RunState::Reported]
        );
    }

    #[test]
    fn test_state_machine_with_aoi_requires_aggregation() {
        let mut t = RunTracker::new(true);
        t.advance(RunState::LevelResolved).unwrap();
        t.advance(RunState::MasksComputed).unwrap();
        assert!(t.advance(RunState::Reported).is_err());
        t.advance(RunState::Aggregated).unwrap();
        t.advance(RunState::Reported).unwrap();
    }

    #[test]
    fn test_skipped_aggregation_reports_from_masks() {
        let mut t = RunTracker::new(true);
        t.advance(RunState::LevelResolved).unwrap();
        assert!(t.skip_aggregation().is_err());
        t.advance(RunState::MasksComputed).unwrap();
        t.skip_aggregation().unwrap();
        assert!(t.advance(RunState::Aggregated).is_err());
        t.advance(RunState::Reported).unwrap();
        assert_eq!(
            t.history(),
            &[RunState::Configured, RunState::LevelResolved, RunState::MasksComputed, RunState::Reported]
        );
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        let mut t = RunTracker::new(true);
        t.advance(RunState::LevelResolved).unwrap();
        t.advance(RunState::Canceled).unwrap();
        assert_eq!(t.state(), RunState::Canceled);
        assert!(t.advance(RunState::Failed).is_err());
    }
}
