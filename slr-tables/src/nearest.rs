//! Station selection over a [`CodecTable`]: nearest by great-circle distance,
//! or an explicit station id.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use slr_utils::geodesy::{haversine_km, is_valid_lon_lat};
use std::collections::BTreeMap;

use crate::{
    codec::{CodecTable, Station},
    error::{Error, Result},
};

/// Distance beyond which a resolved station is reported as suspiciously far.
pub const DEFAULT_MAX_STATION_DISTANCE_KM: f64 = 500.0;

/// The station chosen for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMatch {
    pub station_id: String,
    pub lon: f64,
    pub lat: f64,
    /// Distance from the target point; `None` when no target was given.
    pub distance_km: Option<f64>,
    pub return_levels: BTreeMap<u32, f64>,
}

impl StationMatch {
    fn from_station(station: &Station, distance_km: Option<f64>) -> StationMatch {
        StationMatch {
            station_id: station.id.clone(),
            lon: station.lon,
            lat: station.lat,
            distance_km,
            return_levels: station.return_levels.clone(),
        }
    }

    pub fn return_level(&self, period: u32) -> Option<f64> {
        self.return_levels.get(&period).copied()
    }

    /// True when the distance is known and larger than `max_km`.
    pub fn is_farther_than(&self, max_km: f64) -> bool {
        self.distance_km.map(|d| d > max_km).unwrap_or(false)
    }
}

pub struct NearestStationResolver<'a> {
    table: &'a CodecTable,
}

impl<'a> NearestStationResolver<'a> {
    pub fn new(table: &'a CodecTable) -> Self {
        Self { table }
    }

    /// Nearest station with usable coordinates. Ties keep the earlier row.
    pub fn nearest(&self, lon: f64, lat: f64) -> Result<StationMatch> {
        if !is_valid_lon_lat(lon, lat) {
            return Err(Error::MalformedInput(format!(
                "target point ({}, {}) is not a valid longitude/latitude",
                lon, lat
            )));
        }
        let mut best: Option<(&Station, f64)> = None;
        for station in self.table.stations().iter().filter(|s| s.has_coordinates()) {
            let d = haversine_km(lon, lat, station.lon, station.lat);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((station, d)),
            }
        }
        let (station, distance) = best.ok_or_else(|| {
            Error::NotFound(format!(
                "no station with valid coordinates in {}",
                self.table.source()
            ))
        })?;
        info!(
            "Nearest CODEC station to ({:.4}, {:.4}): {} at {:.1} km",
            lon, lat, station.id, distance
        );
        Ok(StationMatch::from_station(station, Some(distance)))
    }

    /// Station whose id equals `id` after trimming (case-sensitive).
    /// When `target` is given the distance to it is filled in.
    pub fn by_id(&self, id: &str, target: Option<(f64, f64)>) -> Result<StationMatch> {
        let wanted = id.trim();
        let station = self
            .table
            .stations()
            .iter()
            .find(|s| s.id.trim() == wanted)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "station_id='{}' in {}",
                    wanted,
                    self.table.source()
                ))
            })?;
        let distance = target
            .filter(|(lon, lat)| is_valid_lon_lat(*lon, *lat) && station.has_coordinates())
            .map(|(lon, lat)| haversine_km(lon, lat, station.lon, station.lat));
        debug!("Selected CODEC station {} (distance {:?} km)", station.id, distance);
        Ok(StationMatch::from_station(station, distance))
    }
}

impl CodecTable {
    /// Resolve a station by id when given, else the nearest to `target`.
    ///
    /// With `return_period` set the returned levels are narrowed to that
    /// period, and a station lacking it is `NotFound`.
    pub fn lookup(
        &self,
        target: Option<(f64, f64)>,
        return_period: Option<u32>,
        station_id: Option<&str>,
    ) -> Result<StationMatch> {
        let resolver = NearestStationResolver::new(self);
        let mut matched = match (station_id.map(str::trim).filter(|s| !s.is_empty()), target) {
            (Some(id), target) => resolver.by_id(id, target)?,
            (None, Some((lon, lat))) => resolver.nearest(lon, lat)?,
            (None, None) => {
                return Err(Error::MalformedInput(
                    "CODEC lookup needs a station id or a target point".to_string(),
                ))
            }
        };
        if let Some(rp) = return_period {
            let level = matched.return_level(rp).ok_or_else(|| {
                Error::NotFound(format!(
                    "station_id='{}' has no {}-yr return level",
                    matched.station_id, rp
                ))
            })?;
            matched.return_levels = BTreeMap::from([(rp, level)]);
        }
        Ok(matched)
    }
}
