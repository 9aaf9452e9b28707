//! Tile expander: one sortable entry per (splat, touched tile).
//!
//! Key layout (64 bits):
//!
//! ```text
//! | tile id (32) | depth as f32 bits (32) |
//! ```
//!
//! Depth is always > near plane > 0, so the IEEE bit pattern orders the same
//! way as the float value.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, RasterResult};
use crate::render::{GeometryRecord, TileGrid, TileRange};

/// Largest tile id that fits the key's tile field.
pub const MAX_TILE_ID: u64 = u32::MAX as u64;

/// One splat's presence in one tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileEntry {
    pub key: u64,
    pub primitive: u32,
}

impl TileEntry {
    pub fn tile(&self) -> u64 {
        self.key >> 32
    }

    pub fn depth(&self) -> f32 {
        f32::from_bits(self.key as u32)
    }
}

/// Pack a tile id and a positive depth into a sort key.
pub fn pack_key(tile: u64, depth: f32) -> Option<u64> {
    (tile <= MAX_TILE_ID).then(|| (tile << 32) | depth.to_bits() as u64)
}

/// Inclusive prefix sum of per-splat tile counts.
///
/// `offsets[i]` is one past the last entry of splat i; the last element is the
/// total entry count.
pub fn prefix_sum(records: &[GeometryRecord]) -> Vec<u64> {
    records
        .iter()
        .scan(0u64, |acc, r| {
            *acc += r.tiles_touched as u64;
            Some(*acc)
        })
        .collect()
}

/// Binning output saved for the backward pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinningState {
    pub pass_id: u64,

    /// Entries sorted by (key, primitive)
    pub entries: Vec<TileEntry>,

    /// Per-tile `[start, end)` into `entries`
    pub ranges: Vec<TileRange>,

    /// Per-entry reachability flags (only with tile culling)
    pub live: Option<Vec<bool>>,
}

impl BinningState {
    /// Whether entry `idx` takes part in compositing.
    pub fn is_live(&self, idx: usize) -> bool {
        self.live.as_ref().map_or(true, |live| live[idx])
    }
}

/// Emit one unsorted entry per touched tile for every visible splat.
///
/// Each splat writes into its own disjoint slice of the output, located by
/// the prefix sum, so the scatter runs in parallel without synchronization.
pub fn expand_tiles(records: &[GeometryRecord], grid: &TileGrid) -> RasterResult<Vec<TileEntry>> {
    if records.len() as u64 > u32::MAX as u64 {
        return Err(RasterError::RangeOverflow(format!(
            "{} splats do not fit a 32-bit primitive index",
            records.len()
        )));
    }

    let offsets = prefix_sum(records);
    let total = offsets.last().copied().unwrap_or(0);
    if total > u32::MAX as u64 {
        return Err(RasterError::RangeOverflow(format!(
            "{total} tile entries exceed the 32-bit entry count"
        )));
    }

    let mut entries = vec![TileEntry::default(); total as usize];

    // Carve the output into per-splat slices.
    let mut slices: Vec<(usize, &mut [TileEntry])> = Vec::new();
    let mut rest: &mut [TileEntry] = &mut entries;
    let mut start = 0u64;
    for (i, end) in offsets.iter().enumerate() {
        let len = (end - start) as usize;
        start = *end;
        if len == 0 {
            continue;
        }
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        slices.push((i, head));
        rest = tail;
    }

    slices
        .into_par_iter()
        .try_for_each(|(i, out)| write_entries(i as u32, &records[i], grid, out))?;

    Ok(entries)
}

fn write_entries(
    primitive: u32,
    record: &GeometryRecord,
    grid: &TileGrid,
    out: &mut [TileEntry],
) -> RasterResult<()> {
    for (slot, (tx, ty)) in out.iter_mut().zip(record.rect.tiles()) {
        let tile = grid.tile_id(tx, ty);
        let key = pack_key(tile, record.depth).ok_or_else(|| {
            RasterError::RangeOverflow(format!(
                "tile id {tile} of splat {primitive} exceeds the 32-bit key field"
            ))
        })?;
        *slot = TileEntry { key, primitive };
    }
    Ok(())
}
