use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::Error;

/// Shared Socioeconomic Pathway used by the IPCC AR6 projections.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioCode {
    Ssp119,
    Ssp126,
    Ssp245,
    Ssp370,
    Ssp585,
}

impl ScenarioCode {
    pub const ALL: [ScenarioCode; 5] = [
        ScenarioCode::Ssp119,
        ScenarioCode::Ssp126,
        ScenarioCode::Ssp245,
        ScenarioCode::Ssp370,
        ScenarioCode::Ssp585,
    ];

    /// Code as written in the AR6 `scenario` column, e.g. `ssp245`.
    pub fn code(&self) -> &'static str {
        match self {
            ScenarioCode::Ssp119 => "ssp119",
            ScenarioCode::Ssp126 => "ssp126",
            ScenarioCode::Ssp245 => "ssp245",
            ScenarioCode::Ssp370 => "ssp370",
            ScenarioCode::Ssp585 => "ssp585",
        }
    }

    /// Display label, e.g. `SSP2-4.5`.
    pub fn label(&self) -> &'static str {
        match self {
            ScenarioCode::Ssp119 => "SSP1-1.9",
            ScenarioCode::Ssp126 => "SSP1-2.6",
            ScenarioCode::Ssp245 => "SSP2-4.5",
            ScenarioCode::Ssp370 => "SSP3-7.0",
            ScenarioCode::Ssp585 => "SSP5-8.5",
        }
    }

    /// Digits only, e.g. `245`; used in output names.
    pub fn short(&self) -> &'static str {
        &self.code()[3..]
    }
}

impl fmt::Display for ScenarioCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ScenarioCode {
    type Err = Error;

    /// Accepts `ssp245`, `SSP2-4.5`, `SSP245` or `245`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        ScenarioCode::ALL
            .iter()
            .find(|code| code.short() == digits)
            .copied()
            .ok_or_else(|| Error::MalformedInput(format!("unknown scenario '{}'", s.trim())))
    }
}

/// AR6 distribution quantile (percentile).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quantile {
    P5,
    P17,
    P50,
    P83,
    P95,
}

impl Quantile {
    pub const ALL: [Quantile; 5] = [Quantile::P5, Quantile::P17, Quantile::P50, Quantile::P83, Quantile::P95];

    pub fn value(&self) -> u8 {
        match self {
            Quantile::P5 => 5,
            Quantile::P17 => 17,
            Quantile::P50 => 50,
            Quantile::P83 => 83,
            Quantile::P95 => 95,
        }
    }

    pub fn from_value(v: i64) -> Option<Quantile> {
        Quantile::ALL.iter().find(|q| i64::from(q.value()) == v).copied()
    }

    /// Percentile label with two digits, e.g. `p05`, `p50`.
    pub fn label(&self) -> String {
        format!("p{:02}", self.value())
    }
}

impl fmt::Display for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Quantile {
    type Err = Error;

    /// Accepts `50`, `p50`, `p05` or `p50 (median)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let head = s.split_whitespace().next().unwrap_or("");
        let digits = head.trim_start_matches(['p', 'P']);
        digits
            .parse::<i64>()
            .ok()
            .and_then(Quantile::from_value)
            .ok_or_else(|| Error::MalformedInput(format!("unknown quantile '{}'", s.trim())))
    }
}

/// Identifies one row of the AR6 table: scenario, year column and quantile.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub scenario: ScenarioCode,
    pub year: u16,
    pub quantile: Quantile,
}

impl ScenarioKey {
    pub fn new(scenario: ScenarioCode, year: u16, quantile: Quantile) -> Self {
        Self {
            scenario,
            year,
            quantile,
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scenario={}, quantile={}, year={}",
            self.scenario, self.quantile, self.year
        )
    }
}
