//! Command implementations for the SLR CLI.
//!
//! Provides subcommands for AR6 level lookups, CODEC station lookups, full
//! flood scenario runs and exposure summaries of existing masks.

use clap::{Args, Subcommand, ValueEnum};
use slr_exposure::{
    classify::DEFAULT_PARTIAL_THRESHOLD_PCT, AggregationOptions, DistributionMode, FeatureFilter,
    PopulationOptions, PopulationSource,
};
use slr_tables::nearest::DEFAULT_MAX_STATION_DISTANCE_KM;
use std::{path::PathBuf, str::FromStr};

pub mod asc;
pub mod exposure;
pub mod flood;
pub mod geojson;
pub mod lookup;
pub mod output;

/// A return period on the command line: `slr`/`none` for "SLR only" or a
/// number of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnPeriodArg(pub Option<u32>);

impl FromStr for ReturnPeriodArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("slr") || s.eq_ignore_ascii_case("none") {
            return Ok(ReturnPeriodArg(None));
        }
        s.trim_start_matches(['r', 'R', 'p', 'P'])
            .parse::<u32>()
            .map(|rp| ReturnPeriodArg(Some(rp)))
            .map_err(|_| format!("'{}' is not a return period (use slr, 1, 10, 50, 100 or 1000)", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StationModeArg {
    None,
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PopModeArg {
    Simple,
    Proportional,
}

impl From<PopModeArg> for DistributionMode {
    fn from(mode: PopModeArg) -> Self {
        match mode {
            PopModeArg::Simple => DistributionMode::Simple,
            PopModeArg::Proportional => DistributionMode::Proportional,
        }
    }
}

/// Scenario selection shared by `level` and `flood`.
#[derive(Debug, Clone, Args)]
pub struct ScenarioArgs {
    /// AR6 total sea-level projection CSV
    #[arg(long, default_value = slr_tables::ar6::DEFAULT_AR6_FILE)]
    pub ar6: PathBuf,

    /// SSP scenario, e.g. ssp245 or SSP2-4.5
    #[arg(short = 's', long, default_value = "ssp245")]
    pub scenario: String,

    /// Projection year (an AR6 year column)
    #[arg(short = 'y', long, default_value_t = 2100)]
    pub year: u16,

    /// Quantile, e.g. 50 or p05
    #[arg(short = 'q', long, default_value = "50")]
    pub quantile: String,

    /// Vertical offset added to the AR6 level, in metres
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub offset: f64,
}

/// Classification and population settings shared by `flood` and `exposure`.
#[derive(Debug, Clone, Args)]
pub struct AggregationArgs {
    /// Flooded percentage at which a feature counts as partially inundated
    #[arg(long, default_value_t = DEFAULT_PARTIAL_THRESHOLD_PCT)]
    pub classify_threshold: f64,

    /// Numeric AOI attribute holding population per feature
    #[arg(long, conflicts_with = "pop_total")]
    pub pop_field: Option<String>,

    /// Total population spread over features by area
    #[arg(long)]
    pub pop_total: Option<f64>,

    /// Only spread `--pop-total` over features whose attribute matches
    #[arg(long, requires = "pop_total")]
    pub pop_filter_field: Option<String>,

    /// Accepted values for `--pop-filter-field` (comma separated)
    #[arg(long, value_delimiter = ',', requires = "pop_filter_field")]
    pub pop_filter_values: Vec<String>,

    /// How flooding translates into affected population
    #[arg(long, value_enum, default_value_t = PopModeArg::Proportional)]
    pub pop_mode: PopModeArg,
}

impl AggregationArgs {
    pub fn options(&self) -> AggregationOptions {
        let source = match (&self.pop_field, self.pop_total) {
            (Some(name), _) => Some(PopulationSource::Field { name: name.clone() }),
            (None, Some(total)) => Some(PopulationSource::Manual {
                total,
                filter: self
                    .pop_filter_field
                    .as_deref()
                    .map(|field| FeatureFilter::new(field, self.pop_filter_values.iter().cloned())),
            }),
            (None, None) => None,
        };
        AggregationOptions {
            classify_threshold_pct: self.classify_threshold,
            population: source.map(|source| PopulationOptions {
                source,
                mode: self.pop_mode.into(),
            }),
            ..AggregationOptions::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Look up the AR6 sea-level rise for a scenario, or list what the table holds
    Level {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// List year columns and scenario/quantile pairs instead
        #[arg(long)]
        list: bool,
    },

    /// Find a CODEC station by id or nearest to a lon/lat point
    Station {
        /// CODEC return-level CSV
        #[arg(long, default_value = slr_tables::codec::DEFAULT_CODEC_FILE)]
        codec: PathBuf,

        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,

        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,

        /// Station id (takes precedence over lon/lat)
        #[arg(long)]
        station_id: Option<String>,

        /// Only report this return period
        #[arg(long)]
        return_period: Option<u32>,

        /// List detected return periods and station ids instead
        #[arg(long)]
        list: bool,
    },

    /// Compute flood masks for every scenario and AOI exposure for the primary one
    Flood {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// DEM as an ESRI ASCII grid
        #[arg(long)]
        dem: PathBuf,

        /// CRS of the DEM, e.g. EPSG:3857
        #[arg(long)]
        dem_crs: String,

        /// AOI polygons (GeoJSON FeatureCollection)
        #[arg(long)]
        aoi: Option<PathBuf>,

        /// CRS of the AOI when the file does not name one
        #[arg(long)]
        aoi_crs: Option<String>,

        /// CODEC return-level CSV
        #[arg(long)]
        codec: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = StationModeArg::Auto)]
        station_mode: StationModeArg,

        /// Station id for `--station-mode manual`
        #[arg(long)]
        station_id: Option<String>,

        /// Return periods to compute (comma separated; `slr` for SLR only)
        #[arg(long, value_delimiter = ',', default_value = "slr,1,100")]
        return_periods: Vec<ReturnPeriodArg>,

        /// Return period used for the exposure summary (`slr` for SLR only)
        #[arg(long, default_value = "100")]
        primary: ReturnPeriodArg,

        /// Warn when the chosen station is farther than this, in km
        #[arg(long, default_value_t = DEFAULT_MAX_STATION_DISTANCE_KM)]
        max_station_km: f64,

        #[command(flatten)]
        aggregation: AggregationArgs,

        /// Output directory for masks, tables and reports
        #[arg(short = 'o', long)]
        out_dir: PathBuf,
    },

    /// Summarise an existing flood mask over AOI polygons
    Exposure {
        /// Mask as an ESRI ASCII grid (1 flooded, 0 dry)
        #[arg(long)]
        mask: PathBuf,

        /// CRS of the mask, e.g. EPSG:3857
        #[arg(long)]
        mask_crs: String,

        /// AOI polygons (GeoJSON FeatureCollection)
        #[arg(long)]
        aoi: PathBuf,

        /// CRS of the AOI when the file does not name one
        #[arg(long)]
        aoi_crs: Option<String>,

        #[command(flatten)]
        aggregation: AggregationArgs,

        /// Output directory for the feature table and report
        #[arg(short = 'o', long)]
        out_dir: PathBuf,
    },
}

pub fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Level { scenario, list } => lookup::run_level(&scenario, list),
        Command::Station {
            codec,
            lon,
            lat,
            station_id,
            return_period,
            list,
        } => {
            let target = lon.zip(lat);
            lookup::run_station(&codec, target, station_id.as_deref(), return_period, list)
        }
        Command::Flood {
            scenario,
            dem,
            dem_crs,
            aoi,
            aoi_crs,
            codec,
            station_mode,
            station_id,
            return_periods,
            primary,
            max_station_km,
            aggregation,
            out_dir,
        } => {
            let args = flood::FloodArgs {
                scenario,
                dem,
                dem_crs,
                aoi,
                aoi_crs,
                codec,
                station_mode,
                station_id,
                return_periods: return_periods.into_iter().map(|rp| rp.0).collect(),
                primary: primary.0,
                max_station_km,
                aggregation: aggregation.options(),
                out_dir,
            };
            flood::run_flood(&args)
        }
        Command::Exposure {
            mask,
            mask_crs,
            aoi,
            aoi_crs,
            aggregation,
            out_dir,
        } => exposure::run_exposure(&mask, &mask_crs, &aoi, aoi_crs.as_deref(), &aggregation.options(), &out_dir),
    }
}

/// Parse a `--*-crs` argument.
pub fn parse_crs(s: &str) -> anyhow::Result<slr_exposure::Crs> {
    slr_exposure::Crs::parse(s).ok_or_else(|| anyhow::anyhow!("'{}' is not an EPSG code (e.g. EPSG:3857)", s))
}
