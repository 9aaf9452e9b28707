//! Gradients for spherical harmonics evaluation.
//!
//! Forward op (in `core/sh.rs`):
//! `color_k = max(0, 0.5 + Σ_i basis_i(dir) · sh[i][k])`, dir = v / |v|.
//!
//! Coefficient gradients are linear in the basis. The view-direction gradient
//! goes through the basis partials and then the normalization of `v`.
//! Channels that hit the clamp pass no gradient.

use nalgebra::Vector3;

use crate::core::sh::{coeff_count, SH_C1, SH_C2, SH_C3};
use crate::core::{sh_basis, SH_COEFFS_MAX};

/// Partial derivatives of every basis function w.r.t. (x, y, z) of a unit
/// direction, treating the components as independent.
pub fn sh_basis_grad(direction: &Vector3<f32>) -> [Vector3<f32>; SH_COEFFS_MAX] {
    let (x, y, z) = (direction.x, direction.y, direction.z);
    let (xx, yy, zz) = (x * x, y * y, z * z);

    [
        Vector3::zeros(),
        Vector3::new(0.0, -SH_C1, 0.0),
        Vector3::new(0.0, 0.0, SH_C1),
        Vector3::new(-SH_C1, 0.0, 0.0),
        SH_C2[0] * Vector3::new(y, x, 0.0),
        SH_C2[1] * Vector3::new(0.0, z, y),
        SH_C2[2] * Vector3::new(-2.0 * x, -2.0 * y, 4.0 * z),
        SH_C2[3] * Vector3::new(z, 0.0, x),
        SH_C2[4] * Vector3::new(2.0 * x, -2.0 * y, 0.0),
        SH_C3[0] * Vector3::new(6.0 * x * y, 3.0 * xx - 3.0 * yy, 0.0),
        SH_C3[1] * Vector3::new(y * z, x * z, x * y),
        SH_C3[2] * Vector3::new(-2.0 * x * y, 4.0 * zz - xx - 3.0 * yy, 8.0 * y * z),
        SH_C3[3] * Vector3::new(-6.0 * x * z, -6.0 * y * z, 6.0 * zz - 3.0 * xx - 3.0 * yy),
        SH_C3[4] * Vector3::new(4.0 * zz - 3.0 * xx - yy, -2.0 * x * y, 8.0 * x * z),
        SH_C3[5] * Vector3::new(2.0 * x * z, -2.0 * y * z, xx - yy),
        SH_C3[6] * Vector3::new(3.0 * xx - 3.0 * yy, -6.0 * x * y, 0.0),
    ]
}

/// Gradients of [`evaluate_sh`](crate::core::evaluate_sh).
#[derive(Clone, Debug)]
pub struct ShGrads {
    pub d_sh: [[f32; 3]; SH_COEFFS_MAX],
    /// dL/dv for the unnormalized view vector v = position − campos
    pub d_view: Vector3<f32>,
}

/// Backprop a color gradient through SH evaluation.
pub fn evaluate_sh_backward(
    sh: &[[f32; 3]; SH_COEFFS_MAX],
    degree: u32,
    view: &Vector3<f32>,
    clamped: &[bool; 3],
    d_color: &Vector3<f32>,
) -> ShGrads {
    let g = Vector3::new(
        if clamped[0] { 0.0 } else { d_color.x },
        if clamped[1] { 0.0 } else { d_color.y },
        if clamped[2] { 0.0 } else { d_color.z },
    );

    let len = view.norm();
    let dir = view / len;
    let basis = sh_basis(&dir);
    let basis_grad = sh_basis_grad(&dir);
    let active = coeff_count(degree);

    let mut d_sh = [[0.0f32; 3]; SH_COEFFS_MAX];
    let mut d_dir = Vector3::zeros();
    for i in 0..active {
        d_sh[i] = [basis[i] * g.x, basis[i] * g.y, basis[i] * g.z];
        let weight = sh[i][0] * g.x + sh[i][1] * g.y + sh[i][2] * g.z;
        d_dir += basis_grad[i] * weight;
    }

    // dir = v / |v|
    let d_view = (d_dir - dir * dir.dot(&d_dir)) / len;

    ShGrads { d_sh, d_view }
}
