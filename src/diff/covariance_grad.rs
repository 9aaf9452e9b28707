//! Gradients for covariance reconstruction and projection.
//!
//! The forward chain is:
//!   M   = R(q) · Rz(θ) · diag(s · mod)
//!   Σ   = M Mᵀ
//!   Σ₂d = T Σ Tᵀ + 0.3·I,   T = J(t) · W
//!   Q   = Σ₂d⁻¹            (the conic)
//!
//! where `t` is the camera-space mean (after the guard-band clamp when
//! evaluating J). Each step has its own backward function so they can be
//! checked in isolation.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector3};

use crate::core::math::{quaternion_raw_to_matrix, rotation_z, rotation_z_derivative};
use crate::core::Splat;
use crate::render::project::EwaFrame;

/// Backprop a conic gradient to the 2D covariance (xx, xy, yy).
///
/// `d_conic.y` is the gradient w.r.t. the scalar off-diagonal B. The result is
/// returned as the symmetric matrix gradient, i.e. the scalar xy gradient is
/// split evenly over both off-diagonal entries.
pub fn conic_grad_to_covariance(cov2d: &Vector3<f32>, d_conic: &Vector3<f32>) -> Matrix2<f32> {
    let (a, b, c) = (cov2d.x, cov2d.y, cov2d.z);
    let det = a * c - b * b;
    let det2 = det * det;

    // Q = [c, −b, a] / det
    let d_a = d_conic.x * (-(c * c) / det2) + d_conic.y * (b * c / det2) + d_conic.z * (-(b * b) / det2);
    let d_b = d_conic.x * (2.0 * b * c / det2)
        + d_conic.y * (-1.0 / det - 2.0 * b * b / det2)
        + d_conic.z * (2.0 * a * b / det2);
    let d_c = d_conic.x * (-(b * b) / det2) + d_conic.y * (a * b / det2) + d_conic.z * (-(a * a) / det2);

    Matrix2::new(d_a, 0.5 * d_b, 0.5 * d_b, d_c)
}

/// Gradients of the EWA projection `Σ₂d = T Σ Tᵀ`.
#[derive(Clone, Copy, Debug)]
pub struct EwaGrads {
    /// dL/dΣ (3×3, symmetric)
    pub d_cov3d: Matrix3<f32>,
    /// dL/dt for the camera-space mean, through J
    pub d_mean_camera: Vector3<f32>,
}

/// Backprop dL/dΣ₂d (symmetric) through the EWA projection.
pub fn ewa_backward(frame: &EwaFrame, cov3d: &Matrix3<f32>, d_cov2d: &Matrix2<f32>) -> EwaGrads {
    let t_mat: Matrix2x3<f32> = frame.transform();

    // dL/dΣ = Tᵀ G T,  dL/dT = 2 G T Σ
    let d_cov3d = t_mat.transpose() * d_cov2d * t_mat;
    let d_t: Matrix2x3<f32> = 2.0 * d_cov2d * t_mat * cov3d;
    let d_j: Matrix2x3<f32> = d_t * frame.view_rotation.transpose();

    EwaGrads {
        d_cov3d,
        d_mean_camera: jacobian_grad_to_point(frame, &d_j),
    }
}

/// Backprop dL/dJ to the unclamped camera-space point.
///
/// J = [[fx/z, 0, −fx·x'/z²], [0, fy/z, −fy·y'/z²]] where x' = x unless the
/// guard band clamped it, in which case x' = c·z for a constant c and the
/// dependency on x vanishes.
fn jacobian_grad_to_point(frame: &EwaFrame, d_j: &Matrix2x3<f32>) -> Vector3<f32> {
    let t = frame.clamped.t;
    let (fx, fy) = (frame.focal_x, frame.focal_y);
    let z = t.z;
    let z2 = z * z;
    let z3 = z2 * z;

    let (dx, dj02_dz) = if frame.clamped.clamped_x {
        (0.0, fx * t.x / z3)
    } else {
        (d_j[(0, 2)] * (-fx / z2), 2.0 * fx * t.x / z3)
    };
    let (dy, dj12_dz) = if frame.clamped.clamped_y {
        (0.0, fy * t.y / z3)
    } else {
        (d_j[(1, 2)] * (-fy / z2), 2.0 * fy * t.y / z3)
    };

    let dz = d_j[(0, 0)] * (-fx / z2)
        + d_j[(1, 1)] * (-fy / z2)
        + d_j[(0, 2)] * dj02_dz
        + d_j[(1, 2)] * dj12_dz;

    Vector3::new(dx, dy, dz)
}

/// Gradients of Σ = M Mᵀ w.r.t. the splat's shape parameters.
#[derive(Clone, Copy, Debug)]
pub struct ShapeGrads {
    pub d_scale: Vector3<f32>,
    pub d_theta: f32,
    /// dL/dR(q), to be chained through the quaternion
    pub d_rotation_matrix: Matrix3<f32>,
    pub d_scale_modifier: f32,
}

/// Backprop dL/dΣ (symmetric) to scale, theta, R(q) and the scale modifier.
pub fn covariance_backward(splat: &Splat, scale_modifier: f32, d_cov3d: &Matrix3<f32>) -> ShapeGrads {
    let r = quaternion_raw_to_matrix(&splat.rotation);
    let rz = rotation_z(splat.theta);
    let u = r * rz;
    let s = splat.scale * scale_modifier;
    let m = u * Matrix3::from_diagonal(&s);

    // Σ = M Mᵀ with symmetric G: dL/dM = 2 G M
    let d_m = 2.0 * d_cov3d * m;

    // M = U D
    let ut_dm = u.transpose() * d_m;
    let d_diag = Vector3::new(ut_dm[(0, 0)], ut_dm[(1, 1)], ut_dm[(2, 2)]);
    let d_u = d_m * Matrix3::from_diagonal(&s);

    // U = R Rz(θ)
    let d_r = d_u * rz.transpose();
    let d_rz = r.transpose() * d_u;
    let d_theta = d_rz.component_mul(&rotation_z_derivative(splat.theta)).sum();

    ShapeGrads {
        d_scale: d_diag * scale_modifier,
        d_theta,
        d_rotation_matrix: d_r,
        d_scale_modifier: d_diag.dot(&splat.scale),
    }
}
