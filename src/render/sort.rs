//! Sorter: order tile entries by (key, primitive).
//!
//! Within a tile this gives front-to-back depth order, with the primitive
//! index breaking exact depth ties so the result is fully deterministic.

use rayon::prelude::*;

use crate::render::TileEntry;

/// Previous permutation, reused when consecutive passes bin identically.
///
/// The layout is the (tile, primitive) pair at each unsorted position. When
/// it matches, only depths can have changed, and the old permutation is
/// usually already sorted or close to it.
#[derive(Clone, Debug, Default)]
pub struct SortCache {
    layout: Vec<(u64, u32)>,
    order: Vec<u32>,
    hits: u64,
    misses: u64,
}

impl SortCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes that reused the previous permutation.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Passes that had to sort from scratch.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.layout.clear();
        self.order.clear();
    }
}

fn sort_key(e: &TileEntry) -> (u64, u32) {
    (e.key, e.primitive)
}

/// Sort entries by (key, primitive), optionally seeded from a cache.
///
/// The output is identical with or without a cache.
pub fn sort_entries(entries: Vec<TileEntry>, cache: Option<&mut SortCache>) -> Vec<TileEntry> {
    let Some(cache) = cache else {
        let mut entries = entries;
        entries.par_sort_unstable_by_key(sort_key);
        return entries;
    };

    let layout: Vec<(u64, u32)> = entries.par_iter().map(|e| (e.tile(), e.primitive)).collect();

    let mut order: Vec<u32>;
    if layout == cache.layout && cache.order.len() == entries.len() {
        cache.hits += 1;
        order = std::mem::take(&mut cache.order);
        // Stable merge sort finishes nearly sorted input in close to linear time.
        order.sort_by_key(|&j| sort_key(&entries[j as usize]));
    } else {
        cache.misses += 1;
        order = (0..entries.len() as u32).collect();
        order.par_sort_unstable_by_key(|&j| sort_key(&entries[j as usize]));
    }

    let sorted: Vec<TileEntry> = order.par_iter().map(|&j| entries[j as usize]).collect();
    tracing::trace!(hits = cache.hits, misses = cache.misses, "sort cache");

    cache.layout = layout;
    cache.order = order;
    sorted
}
