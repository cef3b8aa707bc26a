use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::level::{Distribution, LevelDistribution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Bottom,
}

fn get<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::MissingKey(key.to_string()))
}

fn get_u32(map: &BTreeMap<String, String>, key: &str) -> Result<u32> {
    let value = get(map, key)?;
    value.parse::<u32>().map_err(|_| Error::NotAnInteger {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// A single place's static identity and rank-to-place routing, parsed
/// from the module-configuration map (§6). The loader that turns a
/// configuration file into this map is out of scope; `from_map` takes
/// over from there.
#[derive(Debug, Clone)]
pub struct PlaceConfig {
    pub id: u32,
    pub side: Side,
    pub tier_size: u32,
    pub target_tier_size: u32,
    pub comm_id: u32,
    pub is_intra: bool,
    /// `gti_own_level`: this place's depth in the tree, also `levels.len()`.
    pub own_level: u32,
    pub levels: Vec<LevelDistribution>,
}

impl PlaceConfig {
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let id = get_u32(map, "id")?;
        let side = match get(map, "side")? {
            "t" => Side::Top,
            "b" => Side::Bottom,
            other => {
                return Err(Error::UnknownValue {
                    key: "side".to_string(),
                    value: other.to_string(),
                })
            }
        };
        let tier_size = get_u32(map, "tier_size")?;
        let target_tier_size = get_u32(map, "target_tier_size")?;
        let comm_id = get_u32(map, "comm_id")?;
        let is_intra = get_u32(map, "is_intra")? != 0;

        let own_level = get_u32(map, "gti_own_level")?;
        let mut levels = Vec::with_capacity(own_level as usize);
        for level in 0..own_level {
            let size_key = format!("gti_level_{level}_size");
            let dist_key = format!("gti_level_{level}_{}_distribution", level + 1);
            let block_key = format!("gti_level_{level}_{}_blocksize", level + 1);

            let size = get_u32(map, &size_key)?;
            let distribution = Distribution::parse(&dist_key, get(map, &dist_key)?)?;
            let blocksize = match distribution {
                Distribution::ByBlock => Some(get_u32(map, &block_key)?),
                Distribution::Uniform => None,
            };
            levels.push(LevelDistribution {
                size,
                distribution,
                blocksize,
            });
        }

        Ok(PlaceConfig {
            id,
            side,
            tier_size,
            target_tier_size,
            comm_id,
            is_intra,
            own_level,
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_map() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("id".into(), "3".into());
        map.insert("side".into(), "t".into());
        map.insert("tier_size".into(), "8".into());
        map.insert("target_tier_size".into(), "8".into());
        map.insert("comm_id".into(), "42".into());
        map.insert("is_intra".into(), "0".into());
        map.insert("gti_own_level".into(), "1".into());
        map.insert("gti_level_0_size".into(), "4".into());
        map.insert("gti_level_0_1_distribution".into(), "uniform".into());
        map
    }

    #[test]
    fn parses_a_well_formed_map() {
        let config = PlaceConfig::from_map(&base_map()).unwrap();
        assert_eq!(config.id, 3);
        assert_eq!(config.side, Side::Top);
        assert_eq!(config.levels.len(), 1);
        assert_eq!(config.levels[0].size, 4);
        assert_eq!(config.levels[0].distribution, Distribution::Uniform);
        assert!(config.levels[0].blocksize.is_none());
    }

    #[test]
    fn by_block_requires_a_blocksize() {
        let mut map = base_map();
        map.insert("gti_level_0_1_distribution".into(), "by-block".into());
        map.insert("gti_level_0_1_blocksize".into(), "16".into());
        let config = PlaceConfig::from_map(&map).unwrap();
        assert_eq!(config.levels[0].blocksize, Some(16));
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let mut map = base_map();
        map.remove("comm_id");
        let err = PlaceConfig::from_map(&map).unwrap_err();
        assert!(matches!(err, Error::MissingKey(key) if key == "comm_id"));
    }

    #[test]
    fn non_integer_value_is_reported() {
        let mut map = base_map();
        map.insert("tier_size".into(), "not-a-number".into());
        let err = PlaceConfig::from_map(&map).unwrap_err();
        assert!(matches!(err, Error::NotAnInteger { key, .. } if key == "tier_size"));
    }
}
