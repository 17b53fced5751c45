//! `flood`: the full level -> mask -> exposure run with files on disk.

use anyhow::{bail, Context};
use log::info;
use slr_exposure::{
    pipeline::StationMode, AggregationOptions, FloodPipeline, FloodRequest, FloodRun, NeverCancel, RasterizedZones,
    VectorSource, WebMercator,
};
use std::path::{Path, PathBuf};

use crate::{
    asc::{AscDem, AscMaskSink},
    geojson::read_geojson,
    lookup::{load_ar6, load_codec, scenario_key},
    output::{write_feature_csv_file, write_json_file, write_report_file, write_text_file},
    parse_crs, ScenarioArgs, StationModeArg,
};

pub const RUN_SUMMARY_TXT: &str = "run_summary.txt";
pub const RUN_SUMMARY_JSON: &str = "run_summary.json";

pub struct FloodArgs {
    pub scenario: ScenarioArgs,
    pub dem: PathBuf,
    pub dem_crs: String,
    pub aoi: Option<PathBuf>,
    pub aoi_crs: Option<String>,
    pub codec: Option<PathBuf>,
    pub station_mode: StationModeArg,
    pub station_id: Option<String>,
    pub return_periods: Vec<Option<u32>>,
    pub primary: Option<u32>,
    pub max_station_km: f64,
    pub aggregation: AggregationOptions,
    pub out_dir: PathBuf,
}

fn station_mode(args: &FloodArgs) -> anyhow::Result<StationMode> {
    Ok(match (args.station_mode, &args.codec) {
        (StationModeArg::None, _) => StationMode::None,
        (StationModeArg::Manual, None) => bail!("--station-mode manual needs --codec"),
        (StationModeArg::Manual, Some(_)) => match &args.station_id {
            Some(id) => StationMode::Manual { station_id: id.clone() },
            None => bail!("--station-mode manual needs --station-id"),
        },
        (StationModeArg::Auto, None) => {
            info!("No CODEC table given; computing SLR only");
            StationMode::None
        }
        (StationModeArg::Auto, Some(_)) => StationMode::Auto,
    })
}

pub fn build_request(args: &FloodArgs) -> anyhow::Result<FloodRequest> {
    let key = scenario_key(&args.scenario)?;
    let mut request = FloodRequest::new(key.scenario, key.year, key.quantile);
    request.vertical_offset_m = args.scenario.offset;
    request.station = station_mode(args)?;
    request.primary_return_period = args.primary;
    request.return_periods = args.return_periods.clone();
    request.max_station_distance_km = args.max_station_km;
    request.aggregation = args.aggregation.clone();
    request.validate()?;
    Ok(request)
}

/// Run the pipeline and write masks, the primary scenario's feature table and
/// report, and the run summaries into `out_dir`.
pub fn run_flood(args: &FloodArgs) -> anyhow::Result<()> {
    let request = build_request(args)?;
    let ar6 = load_ar6(&args.scenario.ar6)?;
    let codec = match (&request.station, &args.codec) {
        (StationMode::None, _) | (_, None) => None,
        (_, Some(path)) => Some(load_codec(path)?),
    };
    let dem = AscDem::open(&args.dem, Some(parse_crs(&args.dem_crs)?))?;
    let aoi_crs = args.aoi_crs.as_deref().map(parse_crs).transpose()?;
    let aoi = args.aoi.as_deref().map(|p| read_geojson(p, aoi_crs)).transpose()?;
    let mut sink = AscMaskSink::new(&args.out_dir)?;

    let pipeline = FloodPipeline::new(&ar6, codec.as_ref(), &WebMercator, &RasterizedZones);
    let run = pipeline
        .run(
            &request,
            &dem,
            aoi.as_ref().map(|a| a as &dyn VectorSource),
            &mut sink,
            &NeverCancel,
        )
        .context("flood run failed")?
        .into_value();

    write_outputs(&run, &args.out_dir)?;
    print!("{}", run.summary_text());
    Ok(())
}

pub fn write_outputs(run: &FloodRun, out_dir: &Path) -> anyhow::Result<()> {
    if let Some(primary) = run.batch.primary() {
        if let Some(aggregation) = &primary.aggregation {
            let stem = run.request.aoi_output_id(primary.return_period);
            let csv_path = out_dir.join(format!("{}.csv", stem));
            write_feature_csv_file(&csv_path, &aggregation.features)?;
            let report_path = out_dir.join(format!("{}_report.txt", stem));
            write_report_file(&report_path, &aggregation.summary)?;
            info!(
                "Wrote {} feature rows to {} and report to {}",
                aggregation.features.len(),
                csv_path.display(),
                report_path.display()
            );
        }
    }
    write_text_file(&out_dir.join(RUN_SUMMARY_TXT), &run.summary_text())?;
    write_json_file(&out_dir.join(RUN_SUMMARY_JSON), run)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregationArgs, PopModeArg};
    use std::fs;

    const AR6: &str = "\
process,confidence,scenario,quantile,2050,2100
total,medium,ssp245,50,0.20,0.55
";

    const CODEC: &str = "\
station_id,lon,lat,rl1,rl100
NEAR,0.0,0.0,0.8,1.5
";

    /// 10 x 10 cells of 10 m: four rows at 0.5 m, the rest at 2.0 m.
    fn dem_text() -> String {
        let mut s = String::from("ncols 10\nnrows 10\nxllcorner 0\nyllcorner 0\ncellsize 10\nNODATA_value -9999\n");
        for row in 0..10 {
            let v = if row < 4 { "0.5" } else { "2.0" };
            s.push_str(&vec![v; 10].join(" "));
            s.push('\n');
        }
        s
    }

    const AOI: &str = r#"{"type":"FeatureCollection",
      "crs":{"type":"name","properties":{"name":"EPSG:3857"}},
      "features":[{"type":"Feature","id":1,"properties":{"name":"=plot"},
        "geometry":{"type":"Polygon","coordinates":[[[0,0],[100,0],[100,100],[0,100],[0,0]]]}}]}"#;

    fn args(dir: &Path, codec: Option<PathBuf>, mode: StationModeArg, primary: Option<u32>) -> FloodArgs {
        FloodArgs {
            scenario: ScenarioArgs {
                ar6: dir.join("ar6.csv"),
                scenario: "SSP2-4.5".into(),
                year: 2100,
                quantile: "p50".into(),
                offset: 0.10,
            },
            dem: dir.join("dem.asc"),
            dem_crs: "EPSG:3857".into(),
            aoi: Some(dir.join("aoi.geojson")),
            aoi_crs: None,
            codec,
            station_mode: mode,
            station_id: None,
            return_periods: vec![None, Some(1), Some(100)],
            primary,
            max_station_km: 500.0,
            aggregation: AggregationArgs {
                classify_threshold: 10.0,
                pop_field: None,
                pop_total: Some(1000.0),
                pop_filter_field: None,
                pop_filter_values: vec![],
                pop_mode: PopModeArg::Proportional,
            }
            .options(),
            out_dir: dir.join("out"),
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ar6.csv"), AR6).unwrap();
        fs::write(dir.path().join("codec.csv"), CODEC).unwrap();
        fs::write(dir.path().join("dem.asc"), dem_text()).unwrap();
        fs::write(dir.path().join("aoi.geojson"), AOI).unwrap();
        dir
    }

    #[test]
    fn test_slr_only_run_writes_outputs() {
        let dir = fixture();
        run_flood(&args(dir.path(), None, StationModeArg::Auto, Some(100))).unwrap();
        let out = dir.path().join("out");

        assert!(out.join("Flood_245_2100_p50_SLRonly.asc").exists());
        assert!(!out.join("Flood_245_2100_p50_RP100.asc").exists());

        let csv_text = fs::read_to_string(out.join("AOI_Stats_245_2100_p50_SLRonly.csv")).unwrap();
        let mut rdr = csv::Reader::from_reader(csv_text.as_bytes());
        let headers = rdr.headers().unwrap().clone();
        let row = rdr.records().next().unwrap().unwrap();
        let field = |name: &str| row.get(headers.iter().position(|h| h == name).unwrap()).unwrap().to_string();
        assert_eq!(field("fid"), "1");
        assert_eq!(field("name"), "'=plot");
        assert!((field("flood_m2").parse::<f64>().unwrap() - 4000.0).abs() < 1e-6);
        assert!((field("pop_affected").parse::<f64>().unwrap() - 400.0).abs() < 1e-6);
        assert_eq!(field("inund_class"), "Partially Inundated");

        let report = fs::read_to_string(out.join("AOI_Stats_245_2100_p50_SLRonly_report.txt")).unwrap();
        assert!(report.contains("Population Impact Analysis Report"));

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(RUN_SUMMARY_JSON)).unwrap()).unwrap();
        assert_eq!(summary["request"]["scenario"], "ssp245");
        assert_eq!(summary["batch"]["scenarios"].as_array().unwrap().len(), 1);
        let text = fs::read_to_string(out.join(RUN_SUMMARY_TXT)).unwrap();
        assert!(text.contains("SLR only"));
    }

    #[test]
    fn test_auto_station_run() {
        let dir = fixture();
        let codec = Some(dir.path().join("codec.csv"));
        run_flood(&args(dir.path(), codec, StationModeArg::Auto, Some(100))).unwrap();
        let out = dir.path().join("out");
        for name in ["SLRonly", "RP1", "RP100"] {
            assert!(out.join(format!("Flood_245_2100_p50_{}.asc", name)).exists());
        }
        let csv_text = fs::read_to_string(out.join("AOI_Stats_245_2100_p50_RP100.csv")).unwrap();
        assert!(csv_text.contains("Fully Inundated"));
    }

    #[test]
    fn test_manual_mode_needs_station_id() {
        let dir = fixture();
        let codec = Some(dir.path().join("codec.csv"));
        assert!(run_flood(&args(dir.path(), codec, StationModeArg::Manual, Some(100))).is_err());
    }
}
