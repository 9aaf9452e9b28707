//! Rasterizer settings and pipeline constants.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::SH_DEGREE_MAX;
use crate::error::{RasterError, RasterResult};

/// Tile width in pixels.
pub const TILE_WIDTH: u32 = 16;

/// Tile height in pixels.
pub const TILE_HEIGHT: u32 = 16;

/// Primitives closer than this (camera-space z) are culled.
pub const NEAR_PLANE: f32 = 0.2;

/// Low-pass dilation added to the diagonal of every 2D covariance.
pub const COV_DILATION: f32 = 0.3;

/// Contributions below this alpha are skipped.
pub const ALPHA_MIN: f32 = 1.0 / 255.0;

/// Per-contribution alpha is clamped to this value.
pub const ALPHA_MAX: f32 = 0.99;

/// A pixel stops compositing once transmittance would drop below this.
pub const TRANSMITTANCE_CUTOFF: f32 = 1e-4;

/// Frustum guard band for the EWA Jacobian, as a multiple of tan(fov/2).
pub const FRUSTUM_GUARD: f32 = 1.3;

/// Per-call rasterizer settings.
///
/// Camera-dependent values (background, scale modifier) live on
/// [`Camera`](crate::core::Camera).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterSettings {
    /// Highest spherical-harmonics band to evaluate (0..=3).
    pub sh_degree: u32,

    /// Caller guarantees every primitive passes the near-plane test.
    pub prefiltered: bool,

    /// Reuse the previous sort permutation as a hint.
    pub cache_sort: bool,

    /// Drop per-tile entries whose footprint cannot reach the tile.
    pub tile_culling: bool,

    /// Run consistency checks after every stage.
    pub debug: bool,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            sh_degree: SH_DEGREE_MAX,
            prefiltered: false,
            cache_sort: false,
            tile_culling: false,
            debug: false,
        }
    }
}

impl RasterSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> RasterResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RasterError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| {
            RasterError::InvalidInput(format!("cannot parse {}: {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot honor.
    pub fn validate(&self) -> RasterResult<()> {
        if self.sh_degree > SH_DEGREE_MAX {
            return Err(RasterError::InvalidInput(format!(
                "sh_degree {} exceeds maximum {}",
                self.sh_degree, SH_DEGREE_MAX
            )));
        }
        Ok(())
    }
}
