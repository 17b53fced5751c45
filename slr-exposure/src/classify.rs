use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lower bound, in percent flooded, for "Partially Inundated".
pub const DEFAULT_PARTIAL_THRESHOLD_PCT: f64 = 10.0;

/// Percent flooded at which a feature counts as fully inundated. Fixed.
pub const FULL_INUNDATION_PCT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InundationClass {
    NonInundated,
    PartiallyInundated,
    FullyInundated,
}

impl InundationClass {
    pub const ALL: [InundationClass; 3] = [
        InundationClass::NonInundated,
        InundationClass::PartiallyInundated,
        InundationClass::FullyInundated,
    ];

    /// Below `threshold_pct` is non-inundated (checked first), at or above
    /// 90 % fully inundated, partial in between.
    pub fn from_pct(flood_pct: f64, threshold_pct: f64) -> InundationClass {
        if flood_pct < threshold_pct {
            InundationClass::NonInundated
        } else if flood_pct >= FULL_INUNDATION_PCT {
            InundationClass::FullyInundated
        } else {
            InundationClass::PartiallyInundated
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            InundationClass::NonInundated => 0,
            InundationClass::PartiallyInundated => 1,
            InundationClass::FullyInundated => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InundationClass::NonInundated => "Non-Inundated",
            InundationClass::PartiallyInundated => "Partially Inundated",
            InundationClass::FullyInundated => "Fully Inundated",
        }
    }
}

impl fmt::Display for InundationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
