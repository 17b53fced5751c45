//! Sea-level tables: IPCC AR6 projections and CODEC extreme-sea-level
//! return levels, with station selection.

pub mod ar6;
pub mod codec;
pub mod error;
pub mod limits;
pub mod nearest;
pub mod scenario;

pub use ar6::Ar6Table;
pub use codec::{CodecTable, ColumnMap, Station};
pub use error::{Error, ErrorKind, Result};
pub use nearest::{NearestStationResolver, StationMatch};
pub use scenario::{Quantile, ScenarioCode, ScenarioKey};
