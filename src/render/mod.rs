//! Forward rasterization pipeline (CPU, data-parallel).
//!
//! Stages, each a map or scatter over its own index space:
//! 1. `project`   - per splat: screen-space footprint, culling, tile rect
//! 2. `binning`   - per splat: one (key, index) entry per touched tile
//! 3. `sort`      - tile-major, depth-minor ordering
//! 4. `ranges`    - per tile: [start, end) into the sorted entries
//! 5. `composite` - per pixel: front-to-back alpha compositing
//!
//! No gradients computed here - see `diff` for the backward pass.

pub mod binning;
pub mod checks;
pub mod composite;
pub mod export;
pub mod project;
pub mod ranges;
pub mod rasterizer;
pub mod sort;

pub use binning::{expand_tiles, pack_key, prefix_sum, BinningState, TileEntry, MAX_TILE_ID};
pub use composite::{Contribution, ImageState, RenderedImage};
pub use project::{project_splats, CullReason, GeometryRecord, GeometryState, Visibility};
pub use ranges::{identify_tile_ranges, TileRange};
pub use rasterizer::{ForwardOutput, Rasterizer, SavedBuffers};
pub use sort::{sort_entries, SortCache};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::config::{TILE_HEIGHT, TILE_WIDTH};

/// The grid of fixed-size tiles covering an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileGrid {
    /// Grid covering a `width × height` image (partial tiles at the edges count).
    pub fn for_image(width: u32, height: u32) -> Self {
        Self {
            tiles_x: width.div_ceil(TILE_WIDTH),
            tiles_y: height.div_ceil(TILE_HEIGHT),
        }
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Row-major tile identifier.
    pub fn tile_id(&self, tx: u32, ty: u32) -> u64 {
        ty as u64 * self.tiles_x as u64 + tx as u64
    }

    /// Tile containing pixel (x, y).
    pub fn tile_of_pixel(&self, x: u32, y: u32) -> u64 {
        self.tile_id(x / TILE_WIDTH, y / TILE_HEIGHT)
    }

    /// Tiles overlapped by a square of half-size `radius` around `center`.
    ///
    /// Bounds are clamped to the grid; an empty rect means the footprint is
    /// entirely off screen.
    pub fn rect_for(&self, center: &Vector2<f32>, radius: u32) -> TileRect {
        let r = radius as f32;
        let tw = TILE_WIDTH as f32;
        let th = TILE_HEIGHT as f32;
        // Float-to-int casts truncate toward zero and saturate.
        let clamp_x = |v: f32| (v as i64).clamp(0, self.tiles_x as i64) as u32;
        let clamp_y = |v: f32| (v as i64).clamp(0, self.tiles_y as i64) as u32;

        TileRect {
            min_x: clamp_x((center.x - r) / tw),
            min_y: clamp_y((center.y - r) / th),
            max_x: clamp_x((center.x + r + tw - 1.0) / tw),
            max_y: clamp_y((center.y + r + th - 1.0) / th),
        }
    }

    /// Pixel bounds `[x0, x1) × [y0, y1)` of a tile, clipped to the image.
    pub fn tile_pixel_bounds(&self, tile: u64, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let tx = (tile % self.tiles_x as u64) as u32;
        let ty = (tile / self.tiles_x as u64) as u32;
        let x0 = tx * TILE_WIDTH;
        let y0 = ty * TILE_HEIGHT;
        (
            x0,
            y0,
            (x0 + TILE_WIDTH).min(width),
            (y0 + TILE_HEIGHT).min(height),
        )
    }
}

/// Rectangle of tiles `[min, max)` in tile coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRect {
    /// Number of tiles covered.
    pub fn area(&self) -> u64 {
        let w = self.max_x.saturating_sub(self.min_x) as u64;
        let h = self.max_y.saturating_sub(self.min_y) as u64;
        w * h
    }

    pub fn contains(&self, tx: u32, ty: u32) -> bool {
        tx >= self.min_x && tx < self.max_x && ty >= self.min_y && ty < self.max_y
    }

    /// Covered tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.min_y..self.max_y).flat_map(move |ty| (self.min_x..self.max_x).map(move |tx| (tx, ty)))
    }
}
