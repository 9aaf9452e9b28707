//! Gradient reconstructor: the backward pass of [`Rasterizer::forward`].
//!
//! Two stages:
//! 1. Pixel pass (parallel per pixel): replay each pixel's contributions
//!    back-to-front and scatter screen-space gradients (mean2d, conic,
//!    opacity, footprint shape, color, depth, normal) into per-splat atomic
//!    accumulators.
//! 2. Splat pass (parallel per splat): chain the screen-space gradients back
//!    to the splat parameters. No contention.
//!
//! [`Rasterizer::forward`]: crate::render::Rasterizer::forward

use nalgebra::{Vector2, Vector3, Vector4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{RasterSettings, ALPHA_MAX, ALPHA_MIN};
use crate::core::{Camera, Splat, SH_COEFFS_MAX};
use crate::diff::atomic::AtomicF32;
use crate::diff::blend_grad::{PixelUpstream, ReverseCompositor};
use crate::diff::covariance_grad::{conic_grad_to_covariance, covariance_backward, ewa_backward};
use crate::diff::footprint_grad::footprint_with_grads;
use crate::diff::project_grad::project_mean_grad;
use crate::diff::quaternion_grad::quaternion_raw_to_matrix_grad;
use crate::diff::sh_grad::evaluate_sh_backward;
use crate::error::{RasterError, RasterResult};
use crate::render::project::EwaFrame;
use crate::render::{GeometryRecord, RenderedImage, SavedBuffers};

/// Gradients of a scalar loss w.r.t. the rendered outputs (row-major).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageGrads {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Vector3<f32>>,
    pub alpha: Vec<f32>,
    pub depth: Vec<f32>,
    pub normal: Vec<Vector3<f32>>,
}

impl ImageGrads {
    pub fn zeros(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![Vector3::zeros(); n],
            alpha: vec![0.0; n],
            depth: vec![0.0; n],
            normal: vec![Vector3::zeros(); n],
        }
    }

    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn upstream(&self, i: usize) -> PixelUpstream {
        PixelUpstream {
            color: self.color[i],
            alpha: self.alpha[i],
            depth: self.depth[i],
            normal: self.normal[i],
        }
    }
}

/// Per-splat parameter gradients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplatGrads {
    pub position: Vec<Vector3<f32>>,
    pub sh: Vec<[[f32; 3]; SH_COEFFS_MAX]>,
    /// Precomputed color gradient; zero for splats colored by SH
    pub color: Vec<Vector3<f32>>,
    pub opacity: Vec<f32>,
    pub scale: Vec<Vector3<f32>>,
    pub theta: Vec<f32>,
    pub l1l2_rate: Vec<f32>,
    pub rotation: Vec<Vector4<f32>>,
    pub acutance: Vec<f32>,

    /// Screen-space mean gradient (pixels)
    pub mean2d: Vec<Vector2<f32>>,

    /// Sum over all splats
    pub scale_modifier: f32,
}

impl SplatGrads {
    pub fn zeros(n: usize) -> Self {
        Self {
            position: vec![Vector3::zeros(); n],
            sh: vec![[[0.0; 3]; SH_COEFFS_MAX]; n],
            color: vec![Vector3::zeros(); n],
            opacity: vec![0.0; n],
            scale: vec![Vector3::zeros(); n],
            theta: vec![0.0; n],
            l1l2_rate: vec![0.0; n],
            rotation: vec![Vector4::zeros(); n],
            acutance: vec![0.0; n],
            mean2d: vec![Vector2::zeros(); n],
            scale_modifier: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Largest absolute gradient component of splat `i`.
    pub fn max_abs(&self, i: usize) -> f32 {
        let sh = self.sh[i].iter().flatten().map(|v| v.abs());
        let scalars = [self.opacity[i], self.theta[i], self.l1l2_rate[i], self.acutance[i]];
        self.position[i]
            .iter()
            .chain(self.scale[i].iter())
            .chain(self.color[i].iter())
            .chain(self.rotation[i].iter())
            .chain(self.mean2d[i].iter())
            .chain(scalars.iter())
            .map(|v| v.abs())
            .chain(sh)
            .fold(0.0, f32::max)
    }
}

/// Per-splat screen-space gradient accumulators.
#[derive(Debug, Default)]
struct ScreenAccum {
    mean2d: [AtomicF32; 2],
    conic: [AtomicF32; 3],
    color: [AtomicF32; 3],
    depth: AtomicF32,
    normal: [AtomicF32; 3],
    opacity: AtomicF32,
    l1l2_rate: AtomicF32,
    acutance: AtomicF32,
}

fn add3(acc: &[AtomicF32; 3], v: &Vector3<f32>) {
    acc[0].add(v.x);
    acc[1].add(v.y);
    acc[2].add(v.z);
}

fn load3(acc: &[AtomicF32; 3]) -> Vector3<f32> {
    Vector3::new(acc[0].load(), acc[1].load(), acc[2].load())
}

/// Settled screen-space gradients of one splat.
#[derive(Clone, Copy, Debug)]
struct ScreenGrads {
    mean2d: Vector2<f32>,
    conic: Vector3<f32>,
    color: Vector3<f32>,
    depth: f32,
    normal: Vector3<f32>,
    opacity: f32,
    l1l2_rate: f32,
    acutance: f32,
}

impl ScreenAccum {
    fn settle(&self) -> ScreenGrads {
        ScreenGrads {
            mean2d: Vector2::new(self.mean2d[0].load(), self.mean2d[1].load()),
            conic: load3(&self.conic),
            color: load3(&self.color),
            depth: self.depth.load(),
            normal: load3(&self.normal),
            opacity: self.opacity.load(),
            l1l2_rate: self.l1l2_rate.load(),
            acutance: self.acutance.load(),
        }
    }
}

/// Reject buffers that do not belong to this call.
fn validate_buffers(
    settings: &RasterSettings,
    splats: &[Splat],
    camera: &Camera,
    num_rendered: usize,
    buffers: &SavedBuffers,
    outputs: &RenderedImage,
    grads: &ImageGrads,
) -> RasterResult<()> {
    let fail = |msg: String| Err(RasterError::InvalidBufferState(msg));
    let geometry = &buffers.geometry;
    let binning = &buffers.binning;
    let image = &buffers.image;

    if geometry.pass_id != binning.pass_id || geometry.pass_id != image.pass_id {
        return fail(format!(
            "buffers come from different passes ({}, {}, {})",
            geometry.pass_id, binning.pass_id, image.pass_id
        ));
    }
    if geometry.records.len() != splats.len() {
        return fail(format!(
            "geometry holds {} splats, got {}",
            geometry.records.len(),
            splats.len()
        ));
    }
    if geometry.sh_degree != settings.sh_degree {
        return fail(format!(
            "colors were evaluated at SH degree {}, backward asked for {}",
            geometry.sh_degree, settings.sh_degree
        ));
    }
    if binning.entries.len() != num_rendered {
        return fail(format!(
            "binning holds {} entries, num_rendered is {num_rendered}",
            binning.entries.len()
        ));
    }
    if let Some(live) = &binning.live {
        if live.len() != binning.entries.len() {
            return fail("tile culling flags do not match the entry count".into());
        }
    }
    if geometry.grid != camera.tile_grid() || binning.ranges.len() as u64 != geometry.grid.tile_count() {
        return fail("tile grid does not match the camera".into());
    }
    if (image.width, image.height) != (camera.width, camera.height)
        || image.final_transmittance.len() != camera.pixel_count()
        || image.end_index.len() != camera.pixel_count()
    {
        return fail(format!(
            "image state is {}x{}, camera is {}x{}",
            image.width, image.height, camera.width, camera.height
        ));
    }
    if (outputs.width, outputs.height) != (camera.width, camera.height)
        || outputs.alpha.len() != camera.pixel_count()
    {
        return fail("rendered outputs do not match the camera".into());
    }
    if (grads.width, grads.height) != (camera.width, camera.height)
        || grads.color.len() != grads.pixel_count()
        || grads.alpha.len() != grads.pixel_count()
        || grads.depth.len() != grads.pixel_count()
        || grads.normal.len() != grads.pixel_count()
    {
        return fail(format!(
            "image gradients are {}x{}, outputs are {}x{}",
            grads.width, grads.height, outputs.width, outputs.height
        ));
    }
    if image.end_index.iter().any(|&e| e as usize > num_rendered) {
        return fail("end index past the entry array".into());
    }
    Ok(())
}

/// Compute splat gradients from image gradients.
pub fn backward(
    settings: &RasterSettings,
    splats: &[Splat],
    camera: &Camera,
    num_rendered: usize,
    buffers: &SavedBuffers,
    outputs: &RenderedImage,
    grads: &ImageGrads,
) -> RasterResult<SplatGrads> {
    validate_buffers(settings, splats, camera, num_rendered, buffers, outputs, grads)?;

    let records = &buffers.geometry.records;
    let accum: Vec<ScreenAccum> = (0..splats.len()).map(|_| ScreenAccum::default()).collect();

    let t = std::time::Instant::now();
    pixel_pass(settings, camera, buffers, outputs, grads, &accum)?;
    tracing::debug!(elapsed = ?t.elapsed(), "pixel pass");

    let t = std::time::Instant::now();
    let per_splat: Vec<SplatGradient> = splats
        .par_iter()
        .zip(records.par_iter())
        .zip(accum.par_iter())
        .map(|((splat, rec), acc)| {
            if rec.is_visible() {
                splat_pass(splat, rec, &acc.settle(), camera, settings.sh_degree)
            } else {
                SplatGradient::default()
            }
        })
        .collect();
    tracing::debug!(elapsed = ?t.elapsed(), "splat pass");

    let mut out = SplatGrads::zeros(splats.len());
    for (i, g) in per_splat.into_iter().enumerate() {
        out.position[i] = g.position;
        out.sh[i] = g.sh;
        out.color[i] = g.color;
        out.opacity[i] = g.opacity;
        out.scale[i] = g.scale;
        out.theta[i] = g.theta;
        out.l1l2_rate[i] = g.l1l2_rate;
        out.rotation[i] = g.rotation;
        out.acutance[i] = g.acutance;
        out.mean2d[i] = g.mean2d;
        out.scale_modifier += g.scale_modifier;
    }
    Ok(out)
}

fn pixel_pass(
    settings: &RasterSettings,
    camera: &Camera,
    buffers: &SavedBuffers,
    outputs: &RenderedImage,
    grads: &ImageGrads,
    accum: &[ScreenAccum],
) -> RasterResult<()> {
    let width = camera.width as usize;
    let grid = &buffers.geometry.grid;
    let records = &buffers.geometry.records;
    let binning = &buffers.binning;
    let state = &buffers.image;

    (0..camera.pixel_count()).into_par_iter().try_for_each(|i| {
        let upstream = grads.upstream(i);
        if upstream.is_zero() && !settings.debug {
            return Ok(());
        }
        let x = (i % width) as u32;
        let y = (i / width) as u32;
        let pixel = Vector2::new(x as f32, y as f32);
        let range = binning.ranges[grid.tile_of_pixel(x, y) as usize];
        let end = state.end_index[i] as usize;
        let t_final = state.final_transmittance[i];

        if settings.debug && (outputs.alpha[i] - (1.0 - t_final).clamp(0.0, 1.0)).abs() > 1e-5 {
            return Err(RasterError::InvalidBufferState(format!(
                "pixel {i}: output alpha does not match saved transmittance"
            )));
        }

        let mut rev = ReverseCompositor::new(t_final, camera.background);
        let start = range.start as usize;
        for idx in (start..end.max(start)).rev() {
            if !binning.is_live(idx) {
                continue;
            }
            let primitive = binning.entries[idx].primitive as usize;
            let rec = &records[primitive];

            let fp = footprint_with_grads(&rec.conic, &(rec.mean2d - pixel), rec.l1l2_rate, rec.acutance);
            let raw_alpha = rec.opacity * fp.value;
            let alpha = raw_alpha.min(ALPHA_MAX);
            if !(alpha >= ALPHA_MIN) {
                continue;
            }

            let step = rev.step(alpha, &rec.color, rec.depth, &rec.normal, &upstream);
            let acc = &accum[primitive];
            add3(&acc.color, &step.d_color);
            acc.depth.add(step.d_depth);
            add3(&acc.normal, &step.d_normal);

            // Saturated alpha is constant in every footprint input.
            if raw_alpha < ALPHA_MAX {
                let d_g = step.d_alpha * rec.opacity;
                acc.opacity.add(step.d_alpha * fp.value);
                acc.mean2d[0].add(d_g * fp.d_offset.x);
                acc.mean2d[1].add(d_g * fp.d_offset.y);
                add3(&acc.conic, &(fp.d_conic * d_g));
                acc.l1l2_rate.add(d_g * fp.d_l1l2_rate);
                acc.acutance.add(d_g * fp.d_acutance);
            }
        }

        if settings.debug && (rev.transmittance() - 1.0).abs() > 5e-3 {
            return Err(RasterError::Consistency(format!(
                "pixel {i}: reverse walk reconstructs T = {} instead of 1",
                rev.transmittance()
            )));
        }
        Ok(())
    })
}

#[derive(Clone, Debug, Default)]
struct SplatGradient {
    position: Vector3<f32>,
    sh: [[f32; 3]; SH_COEFFS_MAX],
    color: Vector3<f32>,
    opacity: f32,
    scale: Vector3<f32>,
    theta: f32,
    l1l2_rate: f32,
    rotation: Vector4<f32>,
    acutance: f32,
    mean2d: Vector2<f32>,
    scale_modifier: f32,
}

/// Chain one visible splat's screen-space gradients to its parameters.
fn splat_pass(
    splat: &Splat,
    rec: &GeometryRecord,
    screen: &ScreenGrads,
    camera: &Camera,
    sh_degree: u32,
) -> SplatGradient {
    let p_view = camera.world_to_camera(&splat.position);
    let view_rotation = camera.view_rotation();

    // 1) Projected mean.
    let mut d_position = project_mean_grad(
        &camera.proj_matrix,
        &splat.position,
        camera.width,
        camera.height,
        &screen.mean2d,
    );

    // 2) conic → Σ₂d → (Σ, camera-space mean through J).
    let d_cov2d = conic_grad_to_covariance(&rec.cov2d, &screen.conic);
    let frame = EwaFrame::new(camera, &p_view);
    let cov3d = splat.covariance_matrix(camera.scale_modifier);
    let ewa = ewa_backward(&frame, &cov3d, &d_cov2d);

    // 3) Depth is camera-space z.
    let mut d_view = ewa.d_mean_camera;
    d_view.z += screen.depth;
    d_position += view_rotation.transpose() * d_view;

    // 4) Σ → scale, theta, rotation matrix; the normal also reads R(q).
    let shape = covariance_backward(splat, camera.scale_modifier, &ewa.d_cov3d);
    let mut d_r = shape.d_rotation_matrix;
    let d_axis = screen.normal * rec.normal_sign;
    for row in 0..3 {
        d_r[(row, 2)] += d_axis[row];
    }
    let d_rotation = quaternion_raw_to_matrix_grad(&splat.rotation, &d_r);

    // 5) Color → SH coefficients and view direction, unless precomputed.
    let (d_sh, d_color) = if splat.color.is_some() {
        ([[0.0; 3]; SH_COEFFS_MAX], screen.color)
    } else {
        let sh = evaluate_sh_backward(
            &splat.sh,
            sh_degree,
            &(splat.position - camera.campos),
            &rec.color_clamped,
            &screen.color,
        );
        d_position += sh.d_view;
        (sh.d_sh, Vector3::zeros())
    };

    SplatGradient {
        position: d_position,
        sh: d_sh,
        color: d_color,
        opacity: screen.opacity,
        scale: shape.d_scale,
        theta: shape.d_theta,
        l1l2_rate: screen.l1l2_rate,
        rotation: d_rotation,
        acutance: screen.acutance,
        mean2d: screen.mean2d,
        scale_modifier: shape.d_scale_modifier,
    }
}
