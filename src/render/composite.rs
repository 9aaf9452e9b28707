//! Compositor: per-pixel front-to-back alpha blending.
//!
//! For each pixel (pixel centers at integer coordinates) the splats of its
//! tile are visited in depth order:
//!
//! ```text
//! alpha_i = min(0.99, opacity_i · G_i(pixel))     skipped when < 1/255
//! C      += color_i · alpha_i · T
//! T      *= 1 − alpha_i                           stop before T < 1e-4
//! ```
//!
//! Depth and normal are blended with the same weights. The background fills
//! the remaining transmittance.

use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ALPHA_MAX, ALPHA_MIN, TRANSMITTANCE_CUTOFF};
use crate::core::footprint::reach_mahalanobis_sq;
use crate::core::{footprint_value, Camera};
use crate::render::{BinningState, GeometryRecord, TileEntry, TileGrid, TileRange};

/// Per-pixel outputs of one forward pass (row-major).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Vector3<f32>>,
    pub alpha: Vec<f32>,
    pub depth: Vec<f32>,
    pub normal: Vec<Vector3<f32>>,
}

impl RenderedImage {
    /// Image of the given size with only the background visible.
    pub fn background(width: u32, height: u32, background: Vector3<f32>) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![background; n],
            alpha: vec![0.0; n],
            depth: vec![0.0; n],
            normal: vec![Vector3::zeros(); n],
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// Compositor state saved for the backward pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageState {
    pub pass_id: u64,
    pub width: u32,
    pub height: u32,

    /// Transmittance left after the last contributor
    pub final_transmittance: Vec<f32>,

    /// One past the last contributing entry (index into sorted entries)
    pub end_index: Vec<u32>,
}

/// One splat's contribution to one pixel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Position in the sorted entry array
    pub entry: usize,
    pub primitive: usize,
    pub alpha: f32,

    /// Transmittance in front of this splat
    pub transmittance: f32,
}

/// Result of walking one pixel's tile range.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PixelWalk {
    pub transmittance: f32,
    pub end: usize,
}

/// Walk a pixel front-to-back, calling `visit` for every contribution.
pub(crate) fn walk_pixel(
    pixel: Vector2<f32>,
    range: TileRange,
    binning: &BinningState,
    records: &[GeometryRecord],
    mut visit: impl FnMut(&Contribution, &GeometryRecord),
) -> PixelWalk {
    let mut t = 1.0f32;
    let mut end = range.start as usize;

    for idx in range.as_range() {
        if !binning.is_live(idx) {
            continue;
        }
        let primitive = binning.entries[idx].primitive as usize;
        let rec = &records[primitive];

        let d = rec.mean2d - pixel;
        let g = footprint_value(&rec.conic, &d, rec.l1l2_rate, rec.acutance);
        let alpha = (rec.opacity * g).min(ALPHA_MAX);
        // Also rejects NaN.
        if !(alpha >= ALPHA_MIN) {
            continue;
        }
        let next_t = t * (1.0 - alpha);
        if next_t < TRANSMITTANCE_CUTOFF {
            break;
        }

        visit(
            &Contribution {
                entry: idx,
                primitive,
                alpha,
                transmittance: t,
            },
            rec,
        );
        t = next_t;
        end = idx + 1;
    }

    PixelWalk {
        transmittance: t.max(0.0),
        end,
    }
}

/// Whether a splat can reach `alpha >= ALPHA_MIN` at any pixel center in
/// `[x0, x1) × [y0, y1)`.
///
/// Conservative: uses the bounding box of the threshold ellipse.
pub(crate) fn may_reach(rec: &GeometryRecord, bounds: (u32, u32, u32, u32)) -> bool {
    let Some(m) = reach_mahalanobis_sq(rec.opacity, rec.acutance) else {
        return false;
    };
    let (x0, y0, x1, y1) = bounds;
    if x1 <= x0 || y1 <= y0 {
        return false;
    }
    let m = m * 1.001;
    let hx = (m * rec.cov2d.x).sqrt() + 1e-3;
    let hy = (m * rec.cov2d.z).sqrt() + 1e-3;

    rec.mean2d.x + hx >= x0 as f32
        && rec.mean2d.x - hx <= (x1 - 1) as f32
        && rec.mean2d.y + hy >= y0 as f32
        && rec.mean2d.y - hy <= (y1 - 1) as f32
}

/// Per-entry reachability flags for tile culling.
pub fn mark_live_entries(
    sorted: &[TileEntry],
    records: &[GeometryRecord],
    grid: &TileGrid,
    width: u32,
    height: u32,
) -> Vec<bool> {
    sorted
        .par_iter()
        .map(|e| {
            let bounds = grid.tile_pixel_bounds(e.tile(), width, height);
            may_reach(&records[e.primitive as usize], bounds)
        })
        .collect()
}

struct PixelOut {
    color: Vector3<f32>,
    alpha: f32,
    depth: f32,
    normal: Vector3<f32>,
    transmittance: f32,
    end: u32,
}

/// Composite every pixel in parallel.
pub fn composite(
    records: &[GeometryRecord],
    binning: &BinningState,
    grid: &TileGrid,
    camera: &Camera,
    pass_id: u64,
) -> (RenderedImage, ImageState) {
    let width = camera.width;
    let height = camera.height;
    let background = camera.background;

    let pixels: Vec<PixelOut> = (0..camera.pixel_count())
        .into_par_iter()
        .map(|i| {
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            let range = binning.ranges[grid.tile_of_pixel(x, y) as usize];

            let mut color = Vector3::zeros();
            let mut depth = 0.0f32;
            let mut normal = Vector3::zeros();
            let walk = walk_pixel(
                Vector2::new(x as f32, y as f32),
                range,
                binning,
                records,
                |c, rec| {
                    let w = c.alpha * c.transmittance;
                    color += rec.color * w;
                    depth += rec.depth * w;
                    normal += rec.normal * w;
                },
            );

            PixelOut {
                color: color + background * walk.transmittance,
                alpha: (1.0 - walk.transmittance).clamp(0.0, 1.0),
                depth,
                normal,
                transmittance: walk.transmittance,
                end: walk.end as u32,
            }
        })
        .collect();

    let n = pixels.len();
    let mut image = RenderedImage {
        width,
        height,
        color: Vec::with_capacity(n),
        alpha: Vec::with_capacity(n),
        depth: Vec::with_capacity(n),
        normal: Vec::with_capacity(n),
    };
    let mut state = ImageState {
        pass_id,
        width,
        height,
        final_transmittance: Vec::with_capacity(n),
        end_index: Vec::with_capacity(n),
    };
    for p in pixels {
        image.color.push(p.color);
        image.alpha.push(p.alpha);
        image.depth.push(p.depth);
        image.normal.push(p.normal);
        state.final_transmittance.push(p.transmittance);
        state.end_index.push(p.end);
    }

    (image, state)
}
