//! The rasterizer: runs the forward stages in order and hands the saved
//! buffers to the gradient reconstructor.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::RasterSettings;
use crate::core::{Camera, Splat};
use crate::diff::{ImageGrads, SplatGrads};
use crate::error::{RasterError, RasterResult};
use crate::render::checks;
use crate::render::composite::{composite, mark_live_entries, walk_pixel};
use crate::render::{
    expand_tiles, identify_tile_ranges, project_splats, sort_entries, BinningState, Contribution,
    GeometryState, ImageState, RenderedImage, SortCache,
};

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the backward pass needs from one forward call.
///
/// All three parts carry the id of the pass that produced them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedBuffers {
    pub geometry: GeometryState,
    pub binning: BinningState,
    pub image: ImageState,
}

impl SavedBuffers {
    pub fn pass_id(&self) -> u64 {
        self.geometry.pass_id
    }
}

/// Result of a forward call.
#[derive(Clone, Debug)]
pub struct ForwardOutput {
    /// Number of tile entries composited over (R)
    pub num_rendered: usize,

    /// Splats that produced at least one entry
    pub num_visible: usize,

    pub image: RenderedImage,

    /// Per-splat screen radius in pixels (0 when culled)
    pub radii: Vec<u32>,

    /// Per-splat visibility flag
    pub visible: Vec<bool>,

    pub buffers: SavedBuffers,
}

impl ForwardOutput {
    /// Contributions to pixel (x, y) in compositing order.
    ///
    /// Returns an empty list for pixels outside the image.
    pub fn trace_pixel(&self, x: u32, y: u32) -> Vec<Contribution> {
        let state = &self.buffers.image;
        if x >= state.width || y >= state.height {
            return Vec::new();
        }
        let grid = &self.buffers.geometry.grid;
        let binning = &self.buffers.binning;
        let range = binning.ranges[grid.tile_of_pixel(x, y) as usize];

        let mut out = Vec::new();
        walk_pixel(
            Vector2::new(x as f32, y as f32),
            range,
            binning,
            &self.buffers.geometry.records,
            |c, _| out.push(*c),
        );
        out
    }
}

/// Differentiable tile rasterizer.
///
/// Holds the settings and, with `cache_sort`, the sort permutation of the
/// previous pass.
#[derive(Debug, Default)]
pub struct Rasterizer {
    settings: RasterSettings,
    sort_cache: Option<SortCache>,
}

impl Rasterizer {
    pub fn new(settings: RasterSettings) -> Self {
        Self {
            settings,
            sort_cache: None,
        }
    }

    pub fn settings(&self) -> &RasterSettings {
        &self.settings
    }

    /// Sort cache statistics, if caching is enabled and a pass has run.
    pub fn sort_cache(&self) -> Option<&SortCache> {
        self.sort_cache.as_ref()
    }

    pub fn clear_sort_cache(&mut self) {
        self.sort_cache = None;
    }

    /// Render `splats` from `camera`.
    #[tracing::instrument(skip_all, fields(splats = splats.len(), width = camera.width, height = camera.height))]
    pub fn forward(&mut self, splats: &[Splat], camera: &Camera) -> RasterResult<ForwardOutput> {
        self.settings.validate()?;
        validate_camera(camera)?;

        let pass_id = NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed);
        let grid = camera.tile_grid();
        let debug = self.settings.debug;

        // 1) Project.
        let t = Instant::now();
        let records = project_splats(splats, camera, &self.settings, &grid)?;
        let num_visible = records.iter().filter(|r| r.is_visible()).count();
        tracing::debug!(elapsed = ?t.elapsed(), num_visible, "projected");

        // 2) Expand.
        let t = Instant::now();
        let entries = expand_tiles(&records, &grid)?;
        if debug {
            checks::check_tile_coverage(&records, &entries, &grid)?;
        }
        let num_rendered = entries.len();
        tracing::debug!(elapsed = ?t.elapsed(), num_rendered, "expanded");

        // 3) Sort.
        let t = Instant::now();
        let cache = if self.settings.cache_sort {
            Some(self.sort_cache.get_or_insert_with(SortCache::new))
        } else {
            None
        };
        let sorted = sort_entries(entries, cache);
        if debug {
            checks::check_sorted(&sorted)?;
        }
        tracing::debug!(elapsed = ?t.elapsed(), "sorted");

        // 4) Ranges (and optional culling flags).
        let ranges = identify_tile_ranges(&sorted, &grid);
        if debug {
            checks::check_ranges(&sorted, &ranges)?;
        }
        let live = self
            .settings
            .tile_culling
            .then(|| mark_live_entries(&sorted, &records, &grid, camera.width, camera.height));
        if let Some(live) = &live {
            let dead = live.iter().filter(|l| !**l).count();
            tracing::debug!(dead, "tile culling");
        }
        let binning = BinningState {
            pass_id,
            entries: sorted,
            ranges,
            live,
        };

        // 5) Composite.
        let t = Instant::now();
        let (image, image_state) = composite(&records, &binning, &grid, camera, pass_id);
        if debug {
            checks::check_image(&image)?;
        }
        tracing::debug!(elapsed = ?t.elapsed(), "composited");

        let radii = records.iter().map(|r| r.radius).collect();
        let visible = records.iter().map(|r| r.is_visible()).collect();

        Ok(ForwardOutput {
            num_rendered,
            num_visible,
            image,
            radii,
            visible,
            buffers: SavedBuffers {
                geometry: GeometryState {
                    pass_id,
                    grid,
                    sh_degree: self.settings.sh_degree,
                    records,
                },
                binning,
                image: image_state,
            },
        })
    }

    /// Gradients of a scalar loss with respect to every splat parameter,
    /// given its gradients with respect to the rendered image.
    ///
    /// `buffers` and `outputs` must come from the forward call with the same
    /// splats and camera.
    #[tracing::instrument(skip_all, fields(splats = splats.len(), num_rendered = num_rendered))]
    pub fn backward(
        &self,
        splats: &[Splat],
        camera: &Camera,
        num_rendered: usize,
        buffers: &SavedBuffers,
        outputs: &RenderedImage,
        grads: &ImageGrads,
    ) -> RasterResult<SplatGrads> {
        self.settings.validate()?;
        validate_camera(camera)?;
        crate::diff::backward(
            &self.settings,
            splats,
            camera,
            num_rendered,
            buffers,
            outputs,
            grads,
        )
    }
}

fn validate_camera(camera: &Camera) -> RasterResult<()> {
    let fov_ok = |t: f32| t.is_finite() && t > 0.0;
    if !fov_ok(camera.tan_fovx) || !fov_ok(camera.tan_fovy) {
        return Err(RasterError::InvalidInput(format!(
            "field of view tangents must be positive, got ({}, {})",
            camera.tan_fovx, camera.tan_fovy
        )));
    }
    if !camera.view_matrix.iter().all(|v| v.is_finite())
        || !camera.proj_matrix.iter().all(|v| v.is_finite())
    {
        return Err(RasterError::InvalidInput("camera matrices must be finite".into()));
    }
    Ok(())
}
