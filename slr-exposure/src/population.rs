//! Population per AOI feature and the share of it exposed to flooding.
//!
//! Population comes either from a numeric attribute or from one manually
//! entered total spread over the features by planar area, optionally only
//! over features whose attribute matches a set of values.

use serde::{Deserialize, Serialize};
use slr_tables::error::{Error, Result};
use std::{collections::BTreeSet, fmt};

use crate::{
    source::AoiFeature,
    warning::{Warning, Warnings},
};

/// How flooding of a feature translates into affected population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// Whole population affected when any of the feature floods.
    Simple,
    /// Population affected in proportion to the flooded percentage.
    Proportional,
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionMode::Simple => f.write_str("Simple (Plot-level)"),
            DistributionMode::Proportional => f.write_str("Proportional by Area"),
        }
    }
}

/// Features whose attribute text is one of `values`. Null reads as "".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFilter {
    pub field: String,
    pub values: BTreeSet<String>,
}

impl FeatureFilter {
    pub fn new<I, S>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, feature: &AoiFeature) -> bool {
        self.values.contains(&feature.attribute_text(&self.field))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PopulationSource {
    /// Numeric attribute per feature; missing or non-numeric reads as 0.
    Field { name: String },
    /// One total distributed by planar area.
    Manual { total: f64, filter: Option<FeatureFilter> },
}

impl fmt::Display for PopulationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopulationSource::Field { name } => write!(f, "field '{}'", name),
            PopulationSource::Manual { total, filter: None } => write!(f, "manual total {:.0}", total),
            PopulationSource::Manual {
                total,
                filter: Some(filter),
            } => write!(
                f,
                "manual total {:.0} over {} in [{}]",
                total,
                filter.field,
                filter.values.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationOptions {
    pub source: PopulationSource,
    pub mode: DistributionMode,
}

/// Population resolved for every feature of a layer, in layer order.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationPlan {
    totals: Vec<f64>,
}

impl PopulationPlan {
    pub fn prepare(source: &PopulationSource, features: &[AoiFeature], warnings: &mut Warnings) -> Result<PopulationPlan> {
        let totals = match source {
            PopulationSource::Field { name } => features
                .iter()
                .map(|f| f.attribute_f64(name).filter(|v| v.is_finite()).unwrap_or(0.0))
                .collect(),
            PopulationSource::Manual { total, filter } => {
                if !total.is_finite() || *total < 0.0 {
                    return Err(Error::MalformedInput(format!(
                        "manual population total must be a non-negative number, got {}",
                        total
                    )));
                }
                let eligible: Vec<bool> = features
                    .iter()
                    .map(|f| filter.as_ref().map(|flt| flt.matches(f)).unwrap_or(true))
                    .collect();
                let n_eligible = eligible.iter().filter(|e| **e).count();
                if let Some(flt) = filter {
                    if n_eligible == 0 && !features.is_empty() {
                        warnings.push(Warning::EmptyPopulationFilter {
                            field: flt.field.clone(),
                        });
                    }
                }
                let areas: Vec<f64> = features
                    .iter()
                    .map(|f| {
                        let a = f.planar_area();
                        if a.is_finite() {
                            a
                        } else {
                            0.0
                        }
                    })
                    .collect();
                let eligible_area: f64 = areas.iter().zip(&eligible).filter(|(_, e)| **e).map(|(a, _)| a).sum();
                if eligible_area <= 0.0 && n_eligible > 0 {
                    warnings.push(Warning::EqualPopulationSplit { features: n_eligible });
                }
                areas
                    .iter()
                    .zip(&eligible)
                    .map(|(area, e)| match (*e, eligible_area > 0.0) {
                        (false, _) => 0.0,
                        (true, true) => total * area / eligible_area,
                        (true, false) => total / n_eligible as f64,
                    })
                    .collect()
            }
        };
        Ok(PopulationPlan { totals })
    }

    /// Population of the feature at `index`; 0 outside the plan.
    pub fn total(&self, index: usize) -> f64 {
        self.totals.get(index).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.totals.iter().sum()
    }
}

/// Population figures for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationImpact {
    pub pop_total: f64,
    pub pop_affected: f64,
    pub pop_safe: f64,
    pub pop_affected_pct: f64,
    /// People per square metre of planar area.
    pub pop_density: f64,
}

impl PopulationImpact {
    pub fn compute(pop_total: f64, flood_pct: f64, polygon_area_m2: f64, mode: DistributionMode) -> Self {
        let pop_affected = match mode {
            DistributionMode::Proportional => pop_total * (flood_pct / 100.0),
            DistributionMode::Simple if flood_pct > 0.0 => pop_total,
            DistributionMode::Simple => 0.0,
        };
        let pop_safe = pop_total - pop_affected;
        Self {
            pop_total,
            pop_affected,
            pop_safe,
            pop_affected_pct: if pop_total > 0.0 {
                pop_affected / pop_total * 100.0
            } else {
                0.0
            },
            pop_density: if polygon_area_m2 > 0.0 {
                pop_total / polygon_area_m2
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};
    use serde_json::{json, Value};

    fn feature(fid: u64, size: f64, zone: Value, pop: Value) -> AoiFeature {
        AoiFeature::new(
            fid,
            MultiPolygon(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: size, y: 0.0),
                (x: size, y: size),
                (x: 0.0, y: size),
                (x: 0.0, y: 0.0),
            ]]),
        )
        .with_attribute("zone", zone)
        .with_attribute("pop", pop)
    }

    fn layer() -> Vec<AoiFeature> {
        vec![
            feature(0, 10.0, json!("R"), json!(120)),
            feature(1, 20.0, json!("C"), json!("80")),
            feature(2, 10.0, json!(1), Value::Null),
            feature(3, 0.0, Value::Null, json!("n/a")),
        ]
    }

    #[test]
    fn test_field_source() {
        let mut w = Warnings::new();
        let plan = PopulationPlan::prepare(&PopulationSource::Field { name: "pop".into() }, &layer(), &mut w).unwrap();
        assert_eq!(
            (0..4).map(|i| plan.total(i)).collect::<Vec<_>>(),
            vec![120.0, 80.0, 0.0, 0.0]
        );
        assert!(w.is_empty());
    }

    #[test]
    fn test_manual_total_by_area() {
        let mut w = Warnings::new();
        let source = PopulationSource::Manual {
            total: 600.0,
            filter: None,
        };
        let plan = PopulationPlan::prepare(&source, &layer(), &mut w).unwrap();
        // Areas 100, 400, 100, 0
        assert!((plan.total(0) - 100.0).abs() < 1e-9);
        assert!((plan.total(1) - 400.0).abs() < 1e-9);
        assert!((plan.total(2) - 100.0).abs() < 1e-9);
        assert_eq!(plan.total(3), 0.0);
        assert!((plan.sum() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_manual_filter_matches_text() {
        let mut w = Warnings::new();
        let source = PopulationSource::Manual {
            total: 1000.0,
            filter: Some(FeatureFilter::new("zone", ["R", "1"])),
        };
        let plan = PopulationPlan::prepare(&source, &layer(), &mut w).unwrap();
        assert!((plan.total(0) - 500.0).abs() < 1e-9);
        assert_eq!(plan.total(1), 0.0);
        assert!((plan.total(2) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_on_null_and_zero_area_splits_equally() {
        let mut w = Warnings::new();
        let source = PopulationSource::Manual {
            total: 50.0,
            filter: Some(FeatureFilter::new("zone", [""])),
        };
        let plan = PopulationPlan::prepare(&source, &layer(), &mut w).unwrap();
        assert_eq!(plan.total(3), 50.0);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_filter_without_matches_warns() {
        let mut w = Warnings::new();
        let source = PopulationSource::Manual {
            total: 50.0,
            filter: Some(FeatureFilter::new("zone", ["X"])),
        };
        let plan = PopulationPlan::prepare(&source, &layer(), &mut w).unwrap();
        assert_eq!(plan.sum(), 0.0);
        assert!(matches!(w.iter().next(), Some(Warning::EmptyPopulationFilter { .. })));
    }

    #[test]
    fn test_negative_manual_total_rejected() {
        let source = PopulationSource::Manual {
            total: -1.0,
            filter: None,
        };
        assert!(PopulationPlan::prepare(&source, &layer(), &mut Warnings::new()).is_err());
    }

    #[test]
    fn test_impact_modes() {
        let p = PopulationImpact::compute(200.0, 40.0, 10_000.0, DistributionMode::Proportional);
        assert!((p.pop_affected - 80.0).abs() < 1e-9);
        assert!((p.pop_safe - 120.0).abs() < 1e-9);
        assert!((p.pop_affected_pct - 40.0).abs() < 1e-9);
        assert!((p.pop_density - 0.02).abs() < 1e-12);

        let s = PopulationImpact::compute(200.0, 0.5, 10_000.0, DistributionMode::Simple);
        assert_eq!(s.pop_affected, 200.0);
        assert_eq!(s.pop_safe, 0.0);
        let s = PopulationImpact::compute(200.0, 0.0, 0.0, DistributionMode::Simple);
        assert_eq!(s.pop_affected, 0.0);
        assert_eq!(s.pop_density, 0.0);
    }

    #[test]
    fn test_conservation() {
        for pct in [0.0, 0.1, 33.3, 99.9, 100.0] {
            for mode in [DistributionMode::Simple, DistributionMode::Proportional] {
                let p = PopulationImpact::compute(1234.5, pct, 50.0, mode);
                assert!((p.pop_affected + p.pop_safe - p.pop_total).abs() < 1e-9);
            }
        }
    }
}
