//! Structured warnings attached to results instead of being raised.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grid::Crs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A requested return period is absent for the station; scenario skipped.
    MissingReturnPeriod { station_id: String, period: u32 },
    /// The primary return period is absent; "SLR only" became primary.
    PrimaryFallback { station_id: String, period: u32 },
    /// Return level at or below zero, likely a datum or unit mismatch.
    NonPositiveReturnLevel { station_id: String, period: u32, level_m: f64 },
    StationTooFar { station_id: String, distance_km: f64, max_km: f64 },
    /// The DEM was resampled into a metric CRS before thresholding.
    Reprojected { from: Option<Crs>, to: Crs },
    EmptyAoi,
    /// AOI and raster do not overlap; aggregation skipped.
    DisjointExtents { detail: String },
    /// Polygon with no area or no rings; zeroed.
    DegeneratePolygon { fid: u64 },
    /// No raster cell was sampled; planar area used with zero flooding.
    UnsampledFeature { fid: u64 },
    /// The raster covers well under the polygon's area.
    PartialCoverage { fid: u64, coverage_pct: f64 },
    /// Manual population filter matched no polygons.
    EmptyPopulationFilter { field: String },
    /// Eligible polygons have zero total area; population split equally.
    EqualPopulationSplit { features: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingReturnPeriod { station_id, period } => {
                write!(f, "station {} has no {}-yr return level; scenario skipped", station_id, period)
            }
            Warning::PrimaryFallback { station_id, period } => write!(
                f,
                "station {} has no {}-yr return level for the primary scenario; using SLR only as primary",
                station_id, period
            ),
            Warning::NonPositiveReturnLevel {
                station_id,
                period,
                level_m,
            } => write!(
                f,
                "station {} {}-yr return level is {:.3} m (<= 0); check datum and units",
                station_id, period, level_m
            ),
            Warning::StationTooFar {
                station_id,
                distance_km,
                max_km,
            } => write!(
                f,
                "station {} is {:.1} km from the target (limit {:.0} km)",
                station_id, distance_km, max_km
            ),
            Warning::Reprojected { from, to } => match from {
                Some(from) => write!(f, "DEM reprojected from {} to {} (nearest neighbour)", from, to),
                None => write!(f, "DEM without a valid CRS reprojected to {}", to),
            },
            Warning::EmptyAoi => write!(f, "AOI layer has no features; aggregation skipped"),
            Warning::DisjointExtents { detail } => write!(f, "AOI does not overlap the DEM: {}", detail),
            Warning::DegeneratePolygon { fid } => write!(f, "feature {} has a degenerate geometry; zeroed", fid),
            Warning::UnsampledFeature { fid } => {
                write!(f, "feature {} covers no raster cells; planar area used, not flooded", fid)
            }
            Warning::PartialCoverage { fid, coverage_pct } => {
                write!(f, "feature {} is only {:.1}% covered by the raster", fid, coverage_pct)
            }
            Warning::EmptyPopulationFilter { field } => {
                write!(f, "population filter on '{}' matched no features", field)
            }
            Warning::EqualPopulationSplit { features } => write!(
                f,
                "eligible features have zero area; population split equally over {}",
                features
            ),
        }
    }
}

/// Warnings collected during a run, logged as they are recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        warn!("{}", warning);
        self.0.push(warning);
    }

    pub fn extend(&mut self, other: Warnings) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_where(&self, pred: impl Fn(&Warning) -> bool) -> usize {
        self.0.iter().filter(|w| pred(w)).count()
    }
}

impl<'a> IntoIterator for &'a Warnings {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
