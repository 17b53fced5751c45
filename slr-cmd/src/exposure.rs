//! `exposure`: aggregate an existing mask over AOI polygons.

use anyhow::Context;
use log::info;
use slr_exposure::{
    AggregationOptions, ExposureAggregator, NeverCancel, RasterizedZones, Reprojector, VectorSource, WebMercator,
};
use std::path::Path;

use crate::{
    asc::parse_mask_asc,
    geojson::read_geojson,
    output::{write_feature_csv_file, write_report_file},
    parse_crs,
};

pub const EXPOSURE_CSV: &str = "AOI_Stats.csv";
pub const EXPOSURE_REPORT: &str = "AOI_Stats_report.txt";

pub fn run_exposure(
    mask_path: &Path,
    mask_crs: &str,
    aoi_path: &Path,
    aoi_crs: Option<&str>,
    options: &AggregationOptions,
    out_dir: &Path,
) -> anyhow::Result<()> {
    let mask_crs = parse_crs(mask_crs)?;
    let text = std::fs::read_to_string(mask_path).with_context(|| format!("reading mask {}", mask_path.display()))?;
    let mask = parse_mask_asc(&text, Some(mask_crs)).with_context(|| format!("parsing mask {}", mask_path.display()))?;
    let aoi_crs = aoi_crs.map(parse_crs).transpose()?;
    let mut layer = read_geojson(aoi_path, aoi_crs)?;
    if layer.crs() != Some(mask_crs) {
        info!(
            "Reprojecting AOI '{}' to {} to match the mask",
            layer.name(),
            mask_crs
        );
        layer = WebMercator.reproject_layer(&layer, mask_crs)?;
    }

    let aggregation = ExposureAggregator::new(&RasterizedZones, options.clone())
        .aggregate(&mask, &layer, &NeverCancel)?
        .into_value();

    std::fs::create_dir_all(out_dir).with_context(|| format!("creating output directory {}", out_dir.display()))?;
    write_feature_csv_file(&out_dir.join(EXPOSURE_CSV), &aggregation.features)?;
    write_report_file(&out_dir.join(EXPOSURE_REPORT), &aggregation.summary)?;
    for warning in &aggregation.warnings {
        println!("warning: {}", warning);
    }
    let s = &aggregation.summary;
    println!(
        "{} features: {:.2} m² of {:.2} m² flooded ({:.2} %)",
        s.feature_count, s.flood_area_m2, s.total_area_m2, s.flood_pct
    );
    Ok(())
}
