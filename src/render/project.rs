//! Projector: per-splat screen-space footprint and culling.
//!
//! Each splat is projected independently. A splat that cannot contribute is
//! recorded as `Culled(reason)` with zero radius and zero tiles; it never
//! aborts the pass.

use nalgebra::{Matrix2x3, Matrix3, Vector2, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{RasterSettings, COV_DILATION, FRUSTUM_GUARD, NEAR_PLANE};
use crate::core::math::{
    clamp_to_guard_band, ndc_to_pixel, perspective_jacobian, transform_point_homogeneous,
    ClampedPoint,
};
use crate::core::{conic_from_covariance, evaluate_sh, quaternion_raw_to_matrix, Camera, Splat};
use crate::error::{RasterError, RasterResult};
use crate::render::{TileGrid, TileRect};

/// Why a splat produced no tile entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullReason {
    /// Position or projected mean is NaN/inf.
    NonFinite,
    /// Camera-space depth at or in front of the near plane.
    NearPlane,
    /// Zero/negative/non-finite scale, or a singular projected covariance.
    DegenerateCovariance,
    /// Footprint lies entirely outside the tile grid.
    OutOfFrustum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    Culled(CullReason),
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Visibility::Visible)
    }
}

/// Screen-space state of one splat for one pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    /// Projected mean (pixels, pixel centers at integers)
    pub mean2d: Vector2<f32>,

    /// Dilated 2D covariance (xx, xy, yy)
    pub cov2d: Vector3<f32>,

    /// Inverse of `cov2d` (A, B, C)
    pub conic: Vector3<f32>,

    /// 3-sigma bounding radius (pixels)
    pub radius: u32,

    /// Covered tiles `[min, max)`
    pub rect: TileRect,

    /// Camera-space z
    pub depth: f32,

    /// View-dependent color after the SH clamp, or the precomputed color
    pub color: Vector3<f32>,
    pub color_clamped: [bool; 3],

    /// Third rotation axis, flipped to face the camera
    pub normal: Vector3<f32>,

    /// +1 or -1: the flip applied to the rotation axis
    pub normal_sign: f32,

    pub opacity: f32,
    pub l1l2_rate: f32,
    pub acutance: f32,

    /// Tiles in `rect` (= number of tile entries this splat emits)
    pub tiles_touched: u32,

    pub visibility: Visibility,
}

impl GeometryRecord {
    /// Record for a splat that emits nothing.
    pub fn culled(reason: CullReason) -> Self {
        Self {
            mean2d: Vector2::zeros(),
            cov2d: Vector3::zeros(),
            conic: Vector3::zeros(),
            radius: 0,
            rect: TileRect::default(),
            depth: 0.0,
            color: Vector3::zeros(),
            color_clamped: [false; 3],
            normal: Vector3::zeros(),
            normal_sign: 1.0,
            opacity: 0.0,
            l1l2_rate: 0.0,
            acutance: 0.0,
            tiles_touched: 0,
            visibility: Visibility::Culled(reason),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visibility.is_visible()
    }
}

/// Projector output saved for the backward pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeometryState {
    pub pass_id: u64,
    pub grid: TileGrid,
    /// SH degree the colors were evaluated with.
    pub sh_degree: u32,
    pub records: Vec<GeometryRecord>,
}

/// Local affine approximation of the projection at a camera-space point.
///
/// The 2D covariance is `T·Σ·Tᵀ` with `T = J·W`.
#[derive(Clone, Copy, Debug)]
pub struct EwaFrame {
    /// Perspective Jacobian at the guard-band clamped point
    pub jacobian: Matrix2x3<f32>,

    /// World → camera rotation
    pub view_rotation: Matrix3<f32>,

    /// Clamped point the Jacobian was evaluated at
    pub clamped: ClampedPoint,

    pub focal_x: f32,
    pub focal_y: f32,
}

impl EwaFrame {
    pub fn new(camera: &Camera, p_view: &Vector3<f32>) -> Self {
        let clamped = clamp_to_guard_band(
            p_view,
            FRUSTUM_GUARD * camera.tan_fovx,
            FRUSTUM_GUARD * camera.tan_fovy,
        );
        let focal_x = camera.focal_x();
        let focal_y = camera.focal_y();
        Self {
            jacobian: perspective_jacobian(&clamped.t, focal_x, focal_y),
            view_rotation: camera.view_rotation(),
            clamped,
            focal_x,
            focal_y,
        }
    }

    /// Combined transform `J·W`.
    pub fn transform(&self) -> Matrix2x3<f32> {
        self.jacobian * self.view_rotation
    }

    /// Dilated screen-space covariance (xx, xy, yy) of a 3D covariance.
    pub fn project_covariance(&self, cov3d: &Matrix3<f32>) -> Vector3<f32> {
        let t = self.transform();
        let cov = t * cov3d * t.transpose();
        Vector3::new(cov[(0, 0)] + COV_DILATION, cov[(0, 1)], cov[(1, 1)] + COV_DILATION)
    }
}

/// 3-sigma radius of a 2D covariance from its largest eigenvalue.
pub fn covariance_radius(cov2d: &Vector3<f32>) -> u32 {
    let det = cov2d.x * cov2d.z - cov2d.y * cov2d.y;
    let mid = 0.5 * (cov2d.x + cov2d.z);
    let spread = (mid * mid - det).max(0.1).sqrt();
    let lambda_max = (mid + spread).max(mid - spread);
    (3.0 * lambda_max.sqrt()).ceil() as u32
}

/// Pixel coordinates of a world point under the camera's clip projection.
pub fn project_mean(camera: &Camera, position: &Vector3<f32>) -> Vector2<f32> {
    let hom = transform_point_homogeneous(&camera.proj_matrix, position);
    let inv_w = 1.0 / (hom.w + 1e-7);
    Vector2::new(
        ndc_to_pixel(hom.x * inv_w, camera.width),
        ndc_to_pixel(hom.y * inv_w, camera.height),
    )
}

/// Project a single splat.
pub fn project_splat(splat: &Splat, camera: &Camera, sh_degree: u32, grid: &TileGrid) -> GeometryRecord {
    // 1) Position and near plane.
    if !splat.position.iter().all(|v| v.is_finite()) {
        return GeometryRecord::culled(CullReason::NonFinite);
    }
    let p_view = camera.world_to_camera(&splat.position);
    if !p_view.iter().all(|v| v.is_finite()) {
        return GeometryRecord::culled(CullReason::NonFinite);
    }
    if p_view.z <= NEAR_PLANE {
        return GeometryRecord::culled(CullReason::NearPlane);
    }

    // 2) Scale and rotation must describe a proper ellipsoid.
    let q_norm = splat.rotation.norm();
    if splat.has_degenerate_scale()
        || !(camera.scale_modifier > 0.0)
        || !camera.scale_modifier.is_finite()
        || !(q_norm > 0.0)
        || !q_norm.is_finite()
        || !splat.theta.is_finite()
    {
        return GeometryRecord::culled(CullReason::DegenerateCovariance);
    }

    // 3) Σ3D and its EWA projection.
    let cov3d = splat.covariance_matrix(camera.scale_modifier);
    let frame = EwaFrame::new(camera, &p_view);
    let cov2d = frame.project_covariance(&cov3d);
    let Some(conic) = conic_from_covariance(&cov2d) else {
        return GeometryRecord::culled(CullReason::DegenerateCovariance);
    };

    // 4) Extent in pixels and tiles.
    let radius = covariance_radius(&cov2d);
    let mean2d = project_mean(camera, &splat.position);
    if !mean2d.iter().all(|v| v.is_finite()) {
        return GeometryRecord::culled(CullReason::NonFinite);
    }
    let rect = grid.rect_for(&mean2d, radius);
    let tiles = rect.area();
    if tiles == 0 {
        return GeometryRecord::culled(CullReason::OutOfFrustum);
    }

    // 5) Appearance.
    let view_dir = splat.position - camera.campos;
    let (color, color_clamped) = match splat.color {
        Some(rgb) if !rgb.iter().all(|v| v.is_finite()) => {
            return GeometryRecord::culled(CullReason::NonFinite);
        }
        Some(rgb) => (rgb, [false; 3]),
        None => {
            let sh_color = evaluate_sh(&splat.sh, sh_degree, &view_dir);
            (sh_color.rgb, sh_color.clamped)
        }
    };
    let axis: Vector3<f32> = quaternion_raw_to_matrix(&splat.rotation).column(2).into_owned();
    let normal_sign = if axis.dot(&view_dir) > 0.0 { -1.0 } else { 1.0 };

    GeometryRecord {
        mean2d,
        cov2d,
        conic,
        radius,
        rect,
        depth: p_view.z,
        color,
        color_clamped,
        normal: axis * normal_sign,
        normal_sign,
        opacity: splat.opacity,
        l1l2_rate: splat.l1l2_rate,
        acutance: splat.acutance,
        // Saturates; the expander rejects anything above u32 anyway.
        tiles_touched: tiles.min(u32::MAX as u64) as u32,
        visibility: Visibility::Visible,
    }
}

/// Project every splat in parallel.
///
/// With `prefiltered` set, a near-plane violation is a caller bug: it is
/// logged and culled, or returned as a `Consistency` error in debug mode.
#[tracing::instrument(skip_all, fields(splats = splats.len()))]
pub fn project_splats(
    splats: &[Splat],
    camera: &Camera,
    settings: &RasterSettings,
    grid: &TileGrid,
) -> RasterResult<Vec<GeometryRecord>> {
    let records: Vec<GeometryRecord> = splats
        .par_iter()
        .map(|s| project_splat(s, camera, settings.sh_degree, grid))
        .collect();

    let mut near = 0usize;
    let mut degenerate = 0usize;
    let mut non_finite = 0usize;
    for r in &records {
        match r.visibility {
            Visibility::Culled(CullReason::NearPlane) => near += 1,
            Visibility::Culled(CullReason::DegenerateCovariance) => degenerate += 1,
            Visibility::Culled(CullReason::NonFinite) => non_finite += 1,
            _ => {}
        }
    }

    if settings.prefiltered && near > 0 {
        if settings.debug {
            let first = records
                .iter()
                .position(|r| r.visibility == Visibility::Culled(CullReason::NearPlane))
                .unwrap_or(0);
            return Err(RasterError::Consistency(format!(
                "prefiltered input has {near} splats behind the near plane (first: {first})"
            )));
        }
        tracing::warn!(near, "prefiltered input has splats behind the near plane; culled");
    }
    if degenerate > 0 {
        tracing::debug!(degenerate, "culled splats with degenerate covariance");
    }
    if non_finite > 0 {
        tracing::warn!(non_finite, "culled splats with non-finite parameters");
    }

    Ok(records)
}
