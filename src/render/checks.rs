//! Debug-mode consistency checks between pipeline stages.
//!
//! Each check returns the first violation it finds as
//! [`RasterError::Consistency`]. They cost a full pass over their inputs and
//! only run when `RasterSettings::debug` is set.

use rayon::prelude::*;

use crate::error::{RasterError, RasterResult};
use crate::render::{prefix_sum, GeometryRecord, RenderedImage, TileEntry, TileGrid, TileRange};

/// Every visible splat owns exactly the tiles of its rect, in order.
pub fn check_tile_coverage(
    records: &[GeometryRecord],
    unsorted: &[TileEntry],
    grid: &TileGrid,
) -> RasterResult<()> {
    let offsets = prefix_sum(records);
    let total = offsets.last().copied().unwrap_or(0) as usize;
    if total != unsorted.len() {
        return Err(RasterError::Consistency(format!(
            "expander wrote {} entries, prefix sum says {total}",
            unsorted.len()
        )));
    }

    let bad = (0..records.len()).into_par_iter().find_first(|&i| {
        let start = if i == 0 { 0 } else { offsets[i - 1] as usize };
        let end = offsets[i] as usize;
        let rec = &records[i];
        if !rec.is_visible() && end > start {
            return true;
        }
        if (end - start) as u64 != rec.rect.area() && rec.is_visible() {
            return true;
        }
        unsorted[start..end]
            .iter()
            .zip(rec.rect.tiles())
            .any(|(e, (tx, ty))| e.primitive as usize != i || e.tile() != grid.tile_id(tx, ty))
    });

    match bad {
        Some(i) => Err(RasterError::Consistency(format!(
            "tile entries of splat {i} do not match its tile rect"
        ))),
        None => Ok(()),
    }
}

/// Entries are strictly increasing in (key, primitive).
pub fn check_sorted(sorted: &[TileEntry]) -> RasterResult<()> {
    let bad = sorted
        .par_windows(2)
        .position_first(|w| (w[0].key, w[0].primitive) >= (w[1].key, w[1].primitive));
    match bad {
        Some(i) => Err(RasterError::Consistency(format!(
            "entries {i} and {} are out of order",
            i + 1
        ))),
        None => Ok(()),
    }
}

/// Ranges partition the sorted entries and each holds only its own tile.
pub fn check_ranges(sorted: &[TileEntry], ranges: &[TileRange]) -> RasterResult<()> {
    let covered: usize = ranges.iter().map(|r| r.len()).sum();
    if covered != sorted.len() {
        return Err(RasterError::Consistency(format!(
            "tile ranges cover {covered} of {} entries",
            sorted.len()
        )));
    }

    let bad = ranges.par_iter().enumerate().find_first(|(tile, r)| {
        r.end as usize > sorted.len()
            || sorted[r.as_range()].iter().any(|e| e.tile() != *tile as u64)
    });
    match bad {
        Some((tile, r)) => Err(RasterError::Consistency(format!(
            "range {:?} of tile {tile} holds foreign entries",
            r
        ))),
        None => Ok(()),
    }
}

/// All output channels are finite and alpha lies in [0, 1].
pub fn check_image(image: &RenderedImage) -> RasterResult<()> {
    let bad = (0..image.pixel_count()).into_par_iter().find_first(|&i| {
        !image.color[i].iter().all(|v| v.is_finite())
            || !image.normal[i].iter().all(|v| v.is_finite())
            || !image.depth[i].is_finite()
            || !(0.0..=1.0).contains(&image.alpha[i])
    });
    match bad {
        Some(i) => Err(RasterError::Consistency(format!(
            "pixel {i} has a non-finite or out-of-range value"
        ))),
        None => Ok(()),
    }
}
