//! Tile ranger: locate each tile's run in the sorted entry array.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::render::{TileEntry, TileGrid};

/// Half-open `[start, end)` interval of sorted entries belonging to one tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub start: u32,
    pub end: u32,
}

impl TileRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Per-tile ranges by binary search over sorted entries.
///
/// Tiles without entries get an empty range.
pub fn identify_tile_ranges(sorted: &[TileEntry], grid: &TileGrid) -> Vec<TileRange> {
    (0..grid.tile_count() as usize)
        .into_par_iter()
        .map(|tile| {
            let tile = tile as u64;
            let start = sorted.partition_point(|e| e.tile() < tile);
            let end = start + sorted[start..].partition_point(|e| e.tile() <= tile);
            TileRange {
                start: start as u32,
                end: end as u32,
            }
        })
        .collect()
}
