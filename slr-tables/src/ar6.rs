//! IPCC AR6 sea-level projection table.
//!
//! # CSV Format
//!
//! Headers are matched case-insensitively; year columns are bare four-digit
//! headers holding metres of sea-level rise:
//!
//! ```text
//! process,confidence,scenario,quantile,2020,2050,2100
//! total,medium,ssp245,50,0.08,0.20,0.55
//! ```
//!
//! When a `process` column is present only `total` rows are kept; component
//! contributions (glaciers, AIS, ...) are dropped at load time.

use csv::{ReaderBuilder, StringRecord};
use log::{debug, info};
use slr_utils::text::{has_formula_prefix, strip_bom};
use std::path::Path;

use crate::{
    error::{Error, Result},
    limits,
    scenario::{Quantile, ScenarioCode, ScenarioKey},
};

/// Lowest plausible sea-level value in metres.
pub const MIN_SEA_LEVEL_M: f64 = -5.0;

/// Highest plausible sea-level value in metres.
pub const MAX_SEA_LEVEL_M: f64 = 10.0;

/// Default file name of the AR6 global total projection table.
pub const DEFAULT_AR6_FILE: &str = "slr_ipcc_ar6_sea_level_projection_global_total.csv";

#[derive(Debug, Clone)]
struct Ar6Row {
    line: u64,
    scenario: String,
    quantile: Option<i64>,
    record: StringRecord,
}

/// A loaded AR6 table, filtered to `process=total` rows.
#[derive(Debug, Clone)]
pub struct Ar6Table {
    source: String,
    years: Vec<(u16, usize)>,
    rows: Vec<Ar6Row>,
}

fn parse_quantile(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

impl Ar6Table {
    /// Load an AR6 table from disk, enforcing the size guard before reading.
    pub fn from_path(path: &Path) -> Result<Ar6Table> {
        let contents = limits::read_table_file(path)?;
        Ar6Table::from_csv_str(&path.display().to_string(), &contents)
    }

    /// Parse an AR6 table from a CSV string. `source` names the input in errors.
    pub fn from_csv_str(source: &str, csv_object: &str) -> Result<Ar6Table> {
        limits::check_table_bytes(source, csv_object.len() as u64)?;
        let mut rdr = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .flexible(true)
            .from_reader(strip_bom(csv_object).as_bytes());

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let process_idx = column("process");
        let (scenario_idx, quantile_idx) = match (column("scenario"), column("quantile")) {
            (Some(s), Some(q)) => (s, q),
            (s, q) => {
                let missing: Vec<&str> = [("scenario", s), ("quantile", q)]
                    .iter()
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                return Err(Error::MalformedInput(format!(
                    "{} missing columns: {}",
                    source,
                    missing.join(", ")
                )));
            }
        };

        let years: Vec<(u16, usize)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.len() == 4 && h.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|(idx, h)| h.parse::<u16>().ok().map(|y| (y, idx)))
            .collect();

        let mut rows = Vec::new();
        let mut data_rows = 0usize;
        let mut dropped = 0usize;
        for result in rdr.records() {
            let record = result?;
            data_rows += 1;
            limits::check_table_rows(source, data_rows)?;

            if let Some(idx) = process_idx {
                let process = record.get(idx).unwrap_or("").trim();
                if !process.eq_ignore_ascii_case("total") {
                    dropped += 1;
                    continue;
                }
            }
            rows.push(Ar6Row {
                line: record.position().map(|p| p.line()).unwrap_or(0),
                scenario: record.get(scenario_idx).unwrap_or("").trim().to_lowercase(),
                quantile: parse_quantile(record.get(quantile_idx).unwrap_or("")),
                record,
            });
        }

        info!(
            "Loaded AR6 table {}: {} total rows, {} years, {} non-total rows dropped",
            source,
            rows.len(),
            years.len(),
            dropped
        );
        Ok(Ar6Table {
            source: source.to_string(),
            years,
            rows,
        })
    }

    /// Name of the input this table was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Year columns in header order.
    pub fn years(&self) -> Vec<u16> {
        self.years.iter().map(|(y, _)| *y).collect()
    }

    /// Number of `process=total` rows kept.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Distinct (scenario, quantile) pairs with a recognised code, in table order.
    pub fn scenario_quantiles(&self) -> Vec<(ScenarioCode, Quantile)> {
        let mut pairs = Vec::new();
        for row in &self.rows {
            let scenario = match row.scenario.parse::<ScenarioCode>() {
                Ok(s) if s.code() == row.scenario => s,
                _ => continue,
            };
            if let Some(q) = row.quantile.and_then(Quantile::from_value) {
                if !pairs.contains(&(scenario, q)) {
                    pairs.push((scenario, q));
                }
            }
        }
        pairs
    }

    /// Sea-level value in metres for `key`.
    ///
    /// The first `total` row matching scenario and quantile wins. Errors:
    /// `NotFound` when the year column or the row is absent, `MalformedInput`
    /// for formula or non-numeric cells, `DataRange` outside
    /// [[`MIN_SEA_LEVEL_M`], [`MAX_SEA_LEVEL_M`]].
    pub fn lookup(&self, key: &ScenarioKey) -> Result<f64> {
        let col = self
            .years
            .iter()
            .find(|(y, _)| *y == key.year)
            .map(|(_, idx)| *idx)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{} has no year column '{}' (lookup {})",
                    self.source, key.year, key
                ))
            })?;

        let row = self
            .rows
            .iter()
            .find(|row| {
                row.scenario == key.scenario.code()
                    && row.quantile == Some(i64::from(key.quantile.value()))
            })
            .ok_or_else(|| {
                Error::NotFound(format!("no AR6 row in {} for process=total, {}", self.source, key))
            })?;

        let raw = row.record.get(col).unwrap_or("");
        let context = format!("{} line {}, column '{}' ({})", self.source, row.line, key.year, key);
        if has_formula_prefix(raw) {
            return Err(Error::MalformedInput(format!(
                "{}: value '{}' starts with a formula character",
                context,
                raw.escape_debug()
            )));
        }
        let value = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                Error::MalformedInput(format!("{}: non-numeric sea level '{}'", context, raw.trim()))
            })?;
        if !(MIN_SEA_LEVEL_M..=MAX_SEA_LEVEL_M).contains(&value) {
            return Err(Error::DataRange {
                context,
                value,
                min: MIN_SEA_LEVEL_M,
                max: MAX_SEA_LEVEL_M,
            });
        }
        debug!("AR6 {} = {:.3} m", key, value);
        Ok(value)
    }
}
