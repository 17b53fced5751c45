//! Composition of water levels into the threshold scenarios a run masks.
//!
//! Every scenario starts from the AR6 sea-level rise plus a vertical offset;
//! return-period scenarios add the station's present-day return level.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use slr_tables::{
    error::{Error, Result},
    StationMatch,
};

use crate::warning::{Warning, Warnings};

/// Return period used for the primary output when none is configured.
pub const DEFAULT_PRIMARY_RETURN_PERIOD: Option<u32> = Some(100);

/// Scenarios computed when the caller does not choose: SLR only, 1-yr, 100-yr.
pub const DEFAULT_REQUESTED_RETURN_PERIODS: [Option<u32>; 3] = [None, Some(1), Some(100)];

pub const SLR_ONLY_LABEL: &str = "SLR only";

/// `"SLR only"` or `"SLR + {rp}-yr"`.
pub fn scenario_label(return_period: Option<u32>) -> String {
    match return_period {
        None => SLR_ONLY_LABEL.to_string(),
        Some(rp) => format!("SLR + {}-yr", rp),
    }
}

/// One water level to test the DEM against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdScenario {
    pub label: String,
    pub threshold_m: f64,
    pub return_period: Option<u32>,
    /// Station return level added on top of the base level.
    pub return_level_m: Option<f64>,
    pub primary: bool,
}

/// Ordered scenarios for one run, exactly one flagged primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub ar6_m: f64,
    pub offset_m: f64,
    pub scenarios: Vec<ThresholdScenario>,
    /// The configured primary return period was unavailable.
    pub primary_substituted: bool,
    pub warnings: Warnings,
}

impl Composition {
    /// AR6 level plus vertical offset.
    pub fn base_m(&self) -> f64 {
        self.ar6_m + self.offset_m
    }

    pub fn primary(&self) -> Option<&ThresholdScenario> {
        self.scenarios.iter().find(|s| s.primary)
    }
}

pub struct LevelCompositor<'a> {
    station: Option<&'a StationMatch>,
}

impl<'a> LevelCompositor<'a> {
    /// `station` is `None` when the run uses no CODEC station; only
    /// "SLR only" can then be composed.
    pub fn new(station: Option<&'a StationMatch>) -> Self {
        Self { station }
    }

    fn return_level(&self, period: u32) -> Option<f64> {
        self.station.and_then(|s| s.return_level(period))
    }

    fn station_id(&self) -> String {
        self.station
            .map(|s| s.station_id.clone())
            .unwrap_or_else(|| "<none>".to_string())
    }

    /// Build the scenario list for `requested` return periods.
    ///
    /// The primary period is appended when not requested. A missing return
    /// level skips that scenario with a warning; a missing primary makes
    /// "SLR only" the primary instead.
    pub fn compose(
        &self,
        ar6_m: f64,
        offset_m: f64,
        requested: &[Option<u32>],
        primary: Option<u32>,
    ) -> Result<Composition> {
        for (name, value) in [("AR6 sea level", ar6_m), ("vertical offset", offset_m)] {
            if !value.is_finite() {
                return Err(Error::MalformedInput(format!("{} is not a finite number: {}", name, value)));
            }
        }
        let base = ar6_m + offset_m;

        let mut periods: Vec<Option<u32>> = Vec::with_capacity(requested.len() + 1);
        for rp in requested.iter().chain(std::iter::once(&primary)) {
            if !periods.contains(rp) {
                periods.push(*rp);
            }
        }

        let mut warnings = Warnings::new();
        let mut scenarios: Vec<ThresholdScenario> = Vec::new();
        let mut primary_substituted = false;
        for rp in periods {
            let is_primary = rp == primary;
            let (threshold_m, return_level_m) = match rp {
                None => (base, None),
                Some(period) => match self.return_level(period) {
                    Some(level) => {
                        if level <= 0.0 {
                            warnings.push(Warning::NonPositiveReturnLevel {
                                station_id: self.station_id(),
                                period,
                                level_m: level,
                            });
                        }
                        (base + level, Some(level))
                    }
                    None if is_primary => {
                        warnings.push(Warning::PrimaryFallback {
                            station_id: self.station_id(),
                            period,
                        });
                        primary_substituted = true;
                        continue;
                    }
                    None => {
                        warnings.push(Warning::MissingReturnPeriod {
                            station_id: self.station_id(),
                            period,
                        });
                        continue;
                    }
                },
            };
            scenarios.push(ThresholdScenario {
                label: scenario_label(rp),
                threshold_m,
                return_period: rp,
                return_level_m,
                primary: is_primary,
            });
        }

        if primary_substituted {
            match scenarios.iter_mut().find(|s| s.return_period.is_none()) {
                Some(slr_only) => slr_only.primary = true,
                None => scenarios.insert(
                    0,
                    ThresholdScenario {
                        label: scenario_label(None),
                        threshold_m: base,
                        return_period: None,
                        return_level_m: None,
                        primary: true,
                    },
                ),
            }
        }

        for s in &scenarios {
            debug!("Scenario '{}': threshold {:.3} m (primary: {})", s.label, s.threshold_m, s.primary);
        }
        info!(
            "Composed {} scenario(s) from AR6 {:.3} m + offset {:.3} m",
            scenarios.len(),
            ar6_m,
            offset_m
        );
        Ok(Composition {
            ar6_m,
            offset_m,
            scenarios,
            primary_substituted,
            warnings,
        })
    }
}
