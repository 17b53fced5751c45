//! CODEC extreme-sea-level return-level table.
//!
//! Column names vary between CODEC exports, so headers are resolved once into
//! a [`ColumnMap`] by walking [`COLUMN_RULES`] in order. Rows are then read by
//! index and never re-matched.
//!
//! # Example CSV
//! ```text
//! station_id,lon,lat,RL_1,rl10,rl 100 (m),rl1000_m
//! GTSM-0001,4.12,52.01,1.21,1.62,2.05,2.61
//! ```

use csv::ReaderBuilder;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use slr_utils::text::{normalize_header, strip_bom};
use std::{collections::BTreeMap, path::Path, sync::OnceLock};

use crate::{
    error::{Error, Result},
    limits,
};

/// Return periods (years) a CODEC table may carry.
pub const RETURN_PERIODS: [u32; 5] = [1, 10, 50, 100, 1000];

/// Default file name of the CODEC station metadata table.
pub const DEFAULT_CODEC_FILE: &str = "codec_global_station_metadata_present_RLs.csv";

/// Canonical meaning assigned to a CSV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    Longitude,
    Latitude,
    StationId,
    ReturnLevel,
}

/// How a rule recognises a header.
#[derive(Debug, Clone, Copy)]
pub enum HeaderPattern {
    /// Normalized header (lowercase alphanumerics) equals the text.
    Exact(&'static str),
    /// Normalized header contains the text.
    Contains(&'static str),
    /// `rl` followed by 1/10/50/100/1000, separators and suffixes tolerated.
    ReturnLevel,
}

/// Ordered header rules. Earlier rules win; a header is assigned at most once.
pub const COLUMN_RULES: [(HeaderPattern, Canonical); 18] = [
    (HeaderPattern::Exact("lon"), Canonical::Longitude),
    (HeaderPattern::Exact("longitude"), Canonical::Longitude),
    (HeaderPattern::Exact("x"), Canonical::Longitude),
    (HeaderPattern::Exact("londd"), Canonical::Longitude),
    (HeaderPattern::Exact("lat"), Canonical::Latitude),
    (HeaderPattern::Exact("latitude"), Canonical::Latitude),
    (HeaderPattern::Exact("y"), Canonical::Latitude),
    (HeaderPattern::Exact("latdd"), Canonical::Latitude),
    (HeaderPattern::Exact("stationid"), Canonical::StationId),
    (HeaderPattern::Exact("id"), Canonical::StationId),
    (HeaderPattern::Exact("station"), Canonical::StationId),
    (HeaderPattern::Exact("name"), Canonical::StationId),
    (HeaderPattern::Exact("sitename"), Canonical::StationId),
    (HeaderPattern::Exact("siteid"), Canonical::StationId),
    (HeaderPattern::Exact("code"), Canonical::StationId),
    (HeaderPattern::ReturnLevel, Canonical::ReturnLevel),
    (HeaderPattern::Contains("station"), Canonical::StationId),
    (HeaderPattern::Contains("stn"), Canonical::StationId),
];

fn return_level_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^a-z])rl[\s_:\-]*(1000|100|50|10|1)(?:[^0-9]|$)")
            .expect("return level pattern is valid")
    })
}

/// Return period encoded in a header such as `rl100`, `RL_1000` or `rl 100 (m)`.
pub fn return_period_of(header: &str) -> Option<u32> {
    return_level_regex()
        .captures(header)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// Column indices resolved from a CODEC header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub lon: usize,
    pub lat: usize,
    pub id: Option<usize>,
    /// Return period (years) to column index.
    pub return_levels: BTreeMap<u32, usize>,
}

impl ColumnMap {
    /// Resolve headers against [`COLUMN_RULES`]. Longitude and latitude are required.
    pub fn detect(source: &str, headers: &[String]) -> Result<ColumnMap> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut taken = vec![false; headers.len()];
        let mut lon = None;
        let mut lat = None;
        let mut id = None;
        let mut return_levels = BTreeMap::new();

        for (pattern, canonical) in COLUMN_RULES.iter() {
            let slot = match canonical {
                Canonical::Longitude => &mut lon,
                Canonical::Latitude => &mut lat,
                Canonical::StationId => &mut id,
                Canonical::ReturnLevel => {
                    for (idx, header) in headers.iter().enumerate() {
                        if taken[idx] {
                            continue;
                        }
                        if let Some(rp) = return_period_of(header) {
                            if return_levels.contains_key(&rp) {
                                warn!("{}: duplicate {}-yr column '{}' ignored", source, rp, header);
                                continue;
                            }
                            return_levels.insert(rp, idx);
                            taken[idx] = true;
                        }
                    }
                    continue;
                }
            };
            if slot.is_some() {
                continue;
            }
            let hit = normalized.iter().enumerate().position(|(idx, norm)| {
                !taken[idx]
                    && match pattern {
                        HeaderPattern::Exact(text) => norm == text,
                        HeaderPattern::Contains(text) => norm.contains(text),
                        HeaderPattern::ReturnLevel => false,
                    }
            });
            if let Some(idx) = hit {
                *slot = Some(idx);
                taken[idx] = true;
            }
        }

        let (lon, lat) = match (lon, lat) {
            (Some(lon), Some(lat)) => (lon, lat),
            _ => {
                return Err(Error::MalformedInput(format!(
                    "{} has no recognisable longitude/latitude columns (headers: {})",
                    source,
                    headers.join(", ")
                )))
            }
        };
        Ok(ColumnMap {
            lon,
            lat,
            id,
            return_levels,
        })
    }
}

/// A CODEC station with its present-day return levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    /// Longitude in decimal degrees; NaN when the cell did not parse.
    pub lon: f64,
    /// Latitude in decimal degrees; NaN when the cell did not parse.
    pub lat: f64,
    /// Return period (years) to level in metres above mean sea level.
    pub return_levels: BTreeMap<u32, f64>,
}

impl Station {
    pub fn has_coordinates(&self) -> bool {
        slr_utils::geodesy::is_valid_lon_lat(self.lon, self.lat)
    }

    pub fn return_level(&self, period: u32) -> Option<f64> {
        self.return_levels.get(&period).copied()
    }
}

fn parse_cell(cell: Option<&str>) -> Option<f64> {
    cell.map(str::trim)
        .filter(|c| !c.is_empty())
        .and_then(|c| c.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// A loaded CODEC table.
#[derive(Debug, Clone)]
pub struct CodecTable {
    source: String,
    columns: ColumnMap,
    stations: Vec<Station>,
}

impl CodecTable {
    /// Load a CODEC table from disk, enforcing the size guard before reading.
    pub fn from_path(path: &Path) -> Result<CodecTable> {
        let contents = limits::read_table_file(path)?;
        CodecTable::from_csv_str(&path.display().to_string(), &contents)
    }

    /// Parse a CODEC table from a CSV string.
    pub fn from_csv_str(source: &str, csv_object: &str) -> Result<CodecTable> {
        limits::check_table_bytes(source, csv_object.len() as u64)?;
        let mut rdr = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .flexible(true)
            .from_reader(strip_bom(csv_object).as_bytes());

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let columns = ColumnMap::detect(source, &headers)?;

        let mut stations = Vec::new();
        let mut unlocated = 0usize;
        for result in rdr.records() {
            let record = result?;
            limits::check_table_rows(source, stations.len() + 1)?;

            let lon = parse_cell(record.get(columns.lon)).unwrap_or(f64::NAN);
            let lat = parse_cell(record.get(columns.lat)).unwrap_or(f64::NAN);
            let id = columns
                .id
                .and_then(|idx| record.get(idx))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("{:.4},{:.4}", lon, lat));
            let return_levels: BTreeMap<u32, f64> = columns
                .return_levels
                .iter()
                .filter_map(|(rp, idx)| parse_cell(record.get(*idx)).map(|v| (*rp, v)))
                .collect();

            let station = Station {
                id,
                lon,
                lat,
                return_levels,
            };
            if !station.has_coordinates() {
                unlocated += 1;
                debug!("{}: station '{}' has no usable coordinates", source, station.id);
            }
            stations.push(station);
        }

        info!(
            "Loaded CODEC table {}: {} stations ({} without coordinates), return periods {:?}",
            source,
            stations.len(),
            unlocated,
            columns.return_levels.keys().collect::<Vec<_>>()
        );
        Ok(CodecTable {
            source: source.to_string(),
            columns,
            stations,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Return periods with a detected column, ascending.
    pub fn return_periods(&self) -> Vec<u32> {
        self.columns.return_levels.keys().copied().collect()
    }

    /// Unique station ids in table order.
    pub fn station_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for station in &self.stations {
            if !ids.contains(&station.id.as_str()) {
                ids.push(&station.id);
            }
        }
        ids
    }
}
