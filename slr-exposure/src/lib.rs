//! Flood exposure for sea-level-rise scenarios.
//!
//! This crate turns resolved water levels into inundation masks over a
//! DEM and summarises how much of each AOI polygon those masks flood.

pub mod aggregate;
pub mod batch;
pub mod cancel;
pub mod classify;
pub mod compositor;
pub mod grid;
pub mod masker;
pub mod mercator;
pub mod pipeline;
pub mod population;
pub mod report;
pub mod source;
pub mod warning;
pub mod zonal;

pub use aggregate::{Aggregation, AggregationOptions, ExposureAggregator, FeatureExposure, FeatureStatus};
pub use batch::{BatchResult, MaskSink, MemoryMaskSink, ScenarioBatchRunner, ScenarioResult};
pub use cancel::{CancelCheck, CancelToken, NeverCancel, RunOutcome};
pub use classify::InundationClass;
pub use compositor::{Composition, LevelCompositor, ThresholdScenario};
pub use grid::{Crs, ElevationGrid, Extent, GeoTransform, InundationMask, RasterGeometry};
pub use masker::InundationMasker;
pub use mercator::WebMercator;
pub use pipeline::{FloodPipeline, FloodRequest, FloodRun, RunState, StationMode};
pub use population::{DistributionMode, FeatureFilter, PopulationOptions, PopulationSource};
pub use report::{render_report, write_report, ExposureSummary, ReportAccumulator};
pub use source::{AoiFeature, AoiLayer, ElevationSource, Reprojector, VectorSource};
pub use warning::{Warning, Warnings};
pub use zonal::{RasterizedZones, ZonalStatistics};
