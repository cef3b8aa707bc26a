//! Configuration ingestion (A2): typed parsing of the module-configuration
//! map (§6) into a [`PlaceConfig`], plus the rank-to-place mapping it
//! feeds. The configuration-file loader itself is out of scope; this
//! crate starts from an already-parsed `BTreeMap<String, String>`.

mod error;
mod level;
mod place_config;
mod rank;

pub use error::{Error, Result};
pub use level::{Distribution, LevelDistribution};
pub use place_config::{PlaceConfig, Side};
pub use rank::{map_rank, rank_to_places};
