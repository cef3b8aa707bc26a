//! Rank-to-place mapping (§6): given an application rank and the chain
//! of per-level distributions, deterministically compute the place id
//! at each successive level so both sides of a connection agree on
//! fan-in without coordinating beyond the shared configuration.

use crate::level::{Distribution, LevelDistribution};

/// Maps one rank at a level of `total_ranks` ranks onto a place id in
/// `[0, level.size)`.
///
/// `Uniform` divides `total_ranks` as evenly as possible, handing the
/// remainder to the first few places one extra rank each. `ByBlock`
/// assigns consecutive runs of `blocksize` ranks to the same place,
/// wrapping around `level.size`.
pub fn map_rank(rank: u32, total_ranks: u32, level: &LevelDistribution) -> u32 {
    match level.distribution {
        Distribution::Uniform => {
            let places = level.size.max(1);
            let base = total_ranks / places;
            let remainder = total_ranks % places;
            let boundary = remainder * (base + 1);
            if rank < boundary {
                rank / (base + 1)
            } else {
                remainder + (rank - boundary) / base.max(1)
            }
        }
        Distribution::ByBlock => {
            let blocksize = level.blocksize.unwrap_or(1).max(1);
            (rank / blocksize) % level.size.max(1)
        }
    }
}

/// Walks `rank` down through every configured level, returning the
/// place id it lands on at each one in order.
pub fn rank_to_places(rank: u32, total_ranks: u32, levels: &[LevelDistribution]) -> Vec<u32> {
    let mut current_rank = rank;
    let mut current_total = total_ranks;
    let mut places = Vec::with_capacity(levels.len());
    for level in levels {
        let place = map_rank(current_rank, current_total, level);
        places.push(place);
        current_rank = place;
        current_total = level.size;
    }
    places
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(size: u32) -> LevelDistribution {
        LevelDistribution {
            size,
            distribution: Distribution::Uniform,
            blocksize: None,
        }
    }

    fn by_block(size: u32, blocksize: u32) -> LevelDistribution {
        LevelDistribution {
            size,
            distribution: Distribution::ByBlock,
            blocksize: Some(blocksize),
        }
    }

    #[test]
    fn uniform_distributes_remainder_to_first_places() {
        // 10 ranks over 3 places: 4, 3, 3.
        let level = uniform(3);
        let assigned: Vec<u32> = (0..10).map(|r| map_rank(r, 10, &level)).collect();
        assert_eq!(assigned, vec![0, 0, 0, 0, 1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn uniform_with_no_remainder_splits_evenly() {
        let level = uniform(4);
        let assigned: Vec<u32> = (0..8).map(|r| map_rank(r, 8, &level)).collect();
        assert_eq!(assigned, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn by_block_groups_consecutive_ranks() {
        let level = by_block(2, 3);
        let assigned: Vec<u32> = (0..9).map(|r| map_rank(r, 9, &level)).collect();
        assert_eq!(assigned, vec![0, 0, 0, 1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn chain_of_levels_feeds_each_level_its_predecessors_size() {
        let levels = vec![uniform(4), uniform(2)];
        let places = rank_to_places(5, 8, &levels);
        assert_eq!(places.len(), 2);
        assert!(places[0] < 4);
        assert!(places[1] < 2);
    }
}
