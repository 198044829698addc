use std::ops::Range;

use super::{DistErr, Result};

/// The contiguous slice of `[0..total)` owned by `rank` when `total` elements are split among
/// `world_size` ranks.
///
/// The first `total % world_size` ranks get one element more than the rest, so sizes differ by
/// at most one.
pub fn partition_range(total: usize, rank: usize, world_size: usize) -> Result<Range<usize>> {
    if rank >= world_size {
        return Err(DistErr::InvalidRank { rank, world_size });
    }

    let (base, rem) = (total / world_size, total % world_size);
    let start = |r: usize| r * base + r.min(rem);

    Ok(start(rank)..start(rank + 1))
}

/// The partition table of the whole world, indexed by rank.
pub fn partitions(total: usize, world_size: usize) -> Result<Vec<Range<usize>>> {
    if world_size == 0 {
        return Err(DistErr::InvalidRank { rank: 0, world_size });
    }

    (0..world_size)
        .map(|rank| partition_range(total, rank, world_size))
        .collect()
}
