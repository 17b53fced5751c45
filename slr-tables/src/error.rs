use thiserror::Error;

/// Errors raised while loading tables or running the flood pipeline.
///
/// Every variant carries enough context (file, row, column or lookup key) to
/// diagnose the failure without re-running.
#[derive(Debug, Error)]
pub enum Error {
    /// No row, station or scenario matched the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value parsed but lies outside the physically plausible range.
    #[error("{context}: value {value} outside [{min}, {max}]")]
    DataRange {
        context: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Formula-injection cell, non-numeric cell or missing required column.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Input exceeds a size, row-count or area cap.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// AOI and raster extents do not intersect.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// The caller asked the run to stop.
    #[error("canceled after {processed} of {total} {unit}")]
    Canceled {
        processed: usize,
        total: usize,
        unit: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Broad category of an [`Error`], for callers that branch on the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DataRange,
    MalformedInput,
    ResourceLimit,
    GeometryMismatch,
    Canceled,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::DataRange { .. } => ErrorKind::DataRange,
            Error::MalformedInput(_) | Error::Csv(_) | Error::Json(_) => ErrorKind::MalformedInput,
            Error::ResourceLimit(_) => ErrorKind::ResourceLimit,
            Error::GeometryMismatch(_) => ErrorKind::GeometryMismatch,
            Error::Canceled { .. } => ErrorKind::Canceled,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
