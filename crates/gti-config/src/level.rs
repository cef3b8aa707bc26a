use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Uniform,
    ByBlock,
}

impl Distribution {
    pub(crate) fn parse(key: &str, value: &str) -> Result<Self> {
        match value {
            "uniform" => Ok(Distribution::Uniform),
            "by-block" => Ok(Distribution::ByBlock),
            other => Err(Error::UnknownValue {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// One level's worth of rank-to-place mapping configuration: how many
/// places exist at this level and how ranks from the level below are
/// distributed across them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDistribution {
    pub size: u32,
    pub distribution: Distribution,
    /// Only meaningful for `ByBlock`; absent for `Uniform`.
    pub blocksize: Option<u32>,
}
