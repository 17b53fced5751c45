//! Running totals over aggregated features and the text summary report.
//!
//! # Report layout
//!
//! Plain text with comma-separated metric rows so it opens in a spreadsheet:
//!
//! ```text
//! Area Comparison Summary Report
//! ==================================================
//!
//! Total Plots Analyzed,12
//! Total Area (m²),120000.00
//! ...
//! ```

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use slr_tables::error::Result;
use std::io::Write;

use crate::{
    aggregate::{AggregationOptions, FeatureExposure, FeatureStatus},
    classify::InundationClass,
    population::DistributionMode,
};

fn ratio_pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        100.0 * part / whole
    } else {
        0.0
    }
}

fn per(total: f64, n: usize) -> f64 {
    if n > 0 {
        total / n as f64
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ClassTally {
    count: usize,
    total_area: f64,
    flood_area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: InundationClass,
    pub code: u8,
    pub count: usize,
    pub pct_of_total: f64,
    pub total_area_m2: f64,
    pub flood_area_m2: f64,
    /// Flooded area over total area of the class, in percent.
    pub avg_flood_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSummary {
    pub mode: DistributionMode,
    pub source: String,
    pub plots_with_impact: usize,
    pub total: f64,
    pub affected: f64,
    pub safe: f64,
    pub affected_pct: f64,
    pub safe_pct: f64,
    pub avg_per_plot: f64,
    pub avg_affected_per_plot: f64,
    pub avg_safe_per_plot: f64,
}

/// Totals for one aggregation, with percentages filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSummary {
    pub feature_count: usize,
    pub skipped_features: usize,
    pub total_area_m2: f64,
    pub flood_area_m2: f64,
    pub dry_area_m2: f64,
    pub flood_pct: f64,
    pub dry_pct: f64,
    pub avg_flood_area_m2: f64,
    pub avg_dry_area_m2: f64,
    pub classify_threshold_pct: f64,
    pub classes: Vec<ClassSummary>,
    pub population: Option<PopulationSummary>,
    /// Totals cover only the features processed before cancellation.
    pub canceled: bool,
}

/// Running sums updated once per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportAccumulator {
    classify_threshold_pct: f64,
    population: Option<(DistributionMode, String)>,
    feature_count: usize,
    skipped: usize,
    total_area: f64,
    flood_area: f64,
    dry_area: f64,
    pop_total: f64,
    pop_affected: f64,
    pop_safe: f64,
    plots_with_impact: usize,
    classes: [ClassTally; 3],
}

impl ReportAccumulator {
    pub fn new(options: &AggregationOptions) -> Self {
        Self {
            classify_threshold_pct: options.classify_threshold_pct,
            population: options
                .population
                .as_ref()
                .map(|p| (p.mode, p.source.to_string())),
            feature_count: 0,
            skipped: 0,
            total_area: 0.0,
            flood_area: 0.0,
            dry_area: 0.0,
            pop_total: 0.0,
            pop_affected: 0.0,
            pop_safe: 0.0,
            plots_with_impact: 0,
            classes: [ClassTally::default(); 3],
        }
    }

    pub fn add(&mut self, feature: &FeatureExposure) {
        if feature.status == FeatureStatus::Degenerate {
            self.skipped += 1;
            return;
        }
        self.feature_count += 1;
        self.total_area += feature.total_area_m2();
        self.flood_area += feature.flood_m2;
        self.dry_area += feature.dry_m2();

        let tally = &mut self.classes[feature.class.code() as usize];
        tally.count += 1;
        tally.total_area += feature.total_area_m2();
        tally.flood_area += feature.flood_m2;

        if let Some(p) = &feature.population {
            self.pop_total += p.pop_total;
            self.pop_affected += p.pop_affected;
            self.pop_safe += p.pop_safe;
            if p.pop_affected > 0.0 {
                self.plots_with_impact += 1;
            }
        }
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn finalize(&self, canceled: bool) -> ExposureSummary {
        let n = self.feature_count;
        let classes = InundationClass::ALL
            .iter()
            .map(|class| {
                let t = self.classes[class.code() as usize];
                ClassSummary {
                    class: *class,
                    code: class.code(),
                    count: t.count,
                    pct_of_total: ratio_pct(t.count as f64, n as f64),
                    total_area_m2: t.total_area,
                    flood_area_m2: t.flood_area,
                    avg_flood_pct: ratio_pct(t.flood_area, t.total_area),
                }
            })
            .collect();
        let population = self.population.as_ref().map(|(mode, source)| PopulationSummary {
            mode: *mode,
            source: source.clone(),
            plots_with_impact: self.plots_with_impact,
            total: self.pop_total,
            affected: self.pop_affected,
            safe: self.pop_safe,
            affected_pct: ratio_pct(self.pop_affected, self.pop_total),
            safe_pct: ratio_pct(self.pop_safe, self.pop_total),
            avg_per_plot: per(self.pop_total, n),
            avg_affected_per_plot: per(self.pop_affected, n),
            avg_safe_per_plot: per(self.pop_safe, n),
        });
        ExposureSummary {
            feature_count: n,
            skipped_features: self.skipped,
            total_area_m2: self.total_area,
            flood_area_m2: self.flood_area,
            dry_area_m2: self.dry_area,
            flood_pct: ratio_pct(self.flood_area, self.total_area),
            dry_pct: ratio_pct(self.dry_area, self.total_area),
            avg_flood_area_m2: per(self.flood_area, n),
            avg_dry_area_m2: per(self.dry_area, n),
            classify_threshold_pct: self.classify_threshold_pct,
            classes,
            population,
            canceled,
        }
    }
}

/// Write the area, classification and (when present) population sections.
pub fn write_report<W: Write>(out: &mut W, summary: &ExposureSummary, generated: DateTime<Local>) -> Result<()> {
    writeln!(out, "Generated,{}", generated.format("%Y-%m-%d %H:%M:%S"))?;
    if summary.canceled {
        writeln!(out, "Status,CANCELED (partial totals)")?;
    }
    if summary.skipped_features > 0 {
        writeln!(out, "Skipped Features,{}", summary.skipped_features)?;
    }
    writeln!(out)?;

    writeln!(out, "Area Comparison Summary Report")?;
    writeln!(out, "{}\n", "=".repeat(50))?;
    writeln!(out, "Total Plots Analyzed,{}", summary.feature_count)?;
    writeln!(out, "Total Area (m²),{:.2}", summary.total_area_m2)?;
    writeln!(out, "Inundated Area (m²),{:.2}", summary.flood_area_m2)?;
    writeln!(out, "Dry Area (m²),{:.2}", summary.dry_area_m2)?;
    writeln!(out, "Inundation Percentage (%),{:.2}", summary.flood_pct)?;
    writeln!(out, "Dry Percentage (%),{:.2}", summary.dry_pct)?;
    writeln!(out, "\nAverage Inundation per Plot (m²),{:.2}", summary.avg_flood_area_m2)?;
    writeln!(out, "Average Dry Area per Plot (m²),{:.2}", summary.avg_dry_area_m2)?;
    writeln!(out)?;

    writeln!(out, "Feature Classification Comparison Report")?;
    writeln!(out, "{}\n", "=".repeat(60))?;
    writeln!(out, "Threshold Used: {}%", summary.classify_threshold_pct)?;
    writeln!(out, "Total Features: {}\n", summary.feature_count)?;
    writeln!(out, "Classification Summary")?;
    writeln!(out, "{}", "-".repeat(60))?;
    writeln!(out, "Category,Code,Count,% of Total,Total Area (m²),Inundated Area (m²),Avg Inundation %")?;
    for c in &summary.classes {
        writeln!(
            out,
            "{},{},{},{:.1},{:.2},{:.2},{:.1}",
            c.class.label(),
            c.code,
            c.count,
            c.pct_of_total,
            c.total_area_m2,
            c.flood_area_m2,
            c.avg_flood_pct
        )?;
    }
    writeln!(out, "{}", "=".repeat(60))?;
    let classified_pct: f64 = summary.classes.iter().map(|c| c.pct_of_total).sum();
    writeln!(
        out,
        "TOTALS,,{},{:.1},{:.2},{:.2},{:.1}",
        summary.feature_count, classified_pct, summary.total_area_m2, summary.flood_area_m2, summary.flood_pct
    )?;

    if let Some(p) = &summary.population {
        writeln!(out)?;
        writeln!(out, "Population Impact Analysis Report")?;
        writeln!(out, "{}\n", "=".repeat(60))?;
        writeln!(out, "Distribution Method: {}", p.mode)?;
        writeln!(out, "Population Source: {}\n", p.source)?;
        writeln!(out, "Overall Statistics")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Total Plots Analyzed,{}", summary.feature_count)?;
        writeln!(out, "Plots with Population Impact,{}", p.plots_with_impact)?;
        writeln!(out, "Total Population,{:.0}", p.total)?;
        writeln!(out, "Affected Population,{:.0}", p.affected)?;
        writeln!(out, "Safe Population,{:.0}", p.safe)?;
        writeln!(out, "Percentage Affected,{:.2}%", p.affected_pct)?;
        writeln!(out, "Percentage Safe,{:.2}%\n", p.safe_pct)?;
        writeln!(out, "Averages per Plot")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Avg Population per Plot,{:.2}", p.avg_per_plot)?;
        writeln!(out, "Avg Affected per Plot,{:.2}", p.avg_affected_per_plot)?;
        writeln!(out, "Avg Safe per Plot,{:.2}", p.avg_safe_per_plot)?;
    }
    Ok(())
}

/// [`write_report`] into a string, stamped with the current local time.
pub fn render_report(summary: &ExposureSummary) -> Result<String> {
    let mut buf = Vec::new();
    write_report(&mut buf, summary, Local::now())?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{PopulationImpact, PopulationOptions, PopulationSource};
    use chrono::TimeZone;
    use serde_json::Map;

    fn exposure(fid: u64, area: f64, flood: f64, pop: Option<f64>) -> FeatureExposure {
        let flood_pct = ratio_pct(flood, area);
        FeatureExposure {
            fid,
            attributes: Map::new(),
            status: FeatureStatus::Sampled,
            count: 1,
            flooded_fraction: flood / area,
            sampled_area_m2: area,
            polygon_area_m2: area,
            flood_m2: flood,
            flood_pct,
            coverage_pct: 100.0,
            class: InundationClass::from_pct(flood_pct, 10.0),
            population: pop.map(|p| PopulationImpact::compute(p, flood_pct, area, DistributionMode::Proportional)),
        }
    }

    fn options(with_population: bool) -> AggregationOptions {
        AggregationOptions {
            population: with_population.then(|| PopulationOptions {
                source: PopulationSource::Field { name: "pop".into() },
                mode: DistributionMode::Proportional,
            }),
            ..AggregationOptions::default()
        }
    }

    #[test]
    fn test_empty_summary_has_no_nan() {
        let s = ReportAccumulator::new(&options(true)).finalize(false);
        assert_eq!(s.feature_count, 0);
        assert_eq!(s.flood_pct, 0.0);
        assert_eq!(s.avg_dry_area_m2, 0.0);
        assert_eq!(s.population.as_ref().unwrap().affected_pct, 0.0);
        assert!(s.classes.iter().all(|c| c.pct_of_total == 0.0 && c.avg_flood_pct == 0.0));
    }

    #[test]
    fn test_totals_and_classes() {
        let mut acc = ReportAccumulator::new(&options(true));
        acc.add(&exposure(1, 100.0, 0.0, Some(10.0)));
        acc.add(&exposure(2, 100.0, 50.0, Some(20.0)));
        acc.add(&exposure(3, 200.0, 190.0, Some(40.0)));
        let s = acc.finalize(false);

        assert_eq!(s.feature_count, 3);
        assert_eq!(s.total_area_m2, 400.0);
        assert_eq!(s.flood_area_m2, 240.0);
        assert_eq!(s.dry_area_m2, 160.0);
        assert!((s.flood_pct - 60.0).abs() < 1e-9);
        assert!((s.avg_flood_area_m2 - 80.0).abs() < 1e-9);

        let counts: Vec<usize> = s.classes.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert!((s.classes[2].avg_flood_pct - 95.0).abs() < 1e-9);

        let p = s.population.unwrap();
        assert_eq!(p.plots_with_impact, 2);
        assert!((p.total - 70.0).abs() < 1e-9);
        assert!((p.affected - 48.0).abs() < 1e-9);
        assert!((p.affected + p.safe - p.total).abs() < 1e-9);
    }

    #[test]
    fn test_report_sections() {
        let mut acc = ReportAccumulator::new(&options(true));
        acc.add(&exposure(1, 10_000.0, 4_000.0, Some(100.0)));
        let generated = Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut buf = Vec::new();
        write_report(&mut buf, &acc.finalize(false), generated).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("Generated,2026-03-01 12:00:00\n"));
        assert!(text.contains("Area Comparison Summary Report\n"));
        assert!(text.contains("Inundated Area (m²),4000.00\n"));
        assert!(text.contains("Inundation Percentage (%),40.00\n"));
        assert!(text.contains("Feature Classification Comparison Report\n"));
        assert!(text.contains("Partially Inundated,1,1,100.0,10000.00,4000.00,40.0\n"));
        assert!(text.contains("Population Impact Analysis Report\n"));
        assert!(text.contains("Affected Population,40\n"));
        assert!(text.contains("TOTALS,,1,100.0,10000.00,4000.00,40.0\n"));
    }

    #[test]
    fn test_empty_report_totals() {
        let s = ReportAccumulator::new(&options(false)).finalize(false);
        let text = render_report(&s).unwrap();
        assert!(text.contains("TOTALS,,0,0.0,0.00,0.00,0.0\n"));
    }

    #[test]
    fn test_report_without_population() {
        let s = ReportAccumulator::new(&options(false)).finalize(true);
        let text = render_report(&s).unwrap();
        assert!(text.contains("Status,CANCELED"));
        assert!(!text.contains("Population Impact Analysis Report"));
    }
}
