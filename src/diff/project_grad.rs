//! Gradients for projecting the splat mean to pixel coordinates.
//!
//! Forward (see `render::project::project_mean`):
//!   h = P · [p, 1]               (clip space)
//!   u = ndc2pix(h.x / (h.w + ε), W)
//!   v = ndc2pix(h.y / (h.w + ε), H)
//! with ndc2pix(n, S) = ((n + 1)·S − 1)/2, so du/dn = S/2.

use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

use crate::core::math::transform_point_homogeneous;

/// Gradient of the projected pixel mean w.r.t. the world-space position.
pub fn project_mean_grad(
    proj_matrix: &Matrix4<f32>,
    position: &Vector3<f32>,
    width: u32,
    height: u32,
    d_mean2d: &Vector2<f32>,
) -> Vector3<f32> {
    let h = transform_point_homogeneous(proj_matrix, position);
    let inv_w = 1.0 / (h.w + 1e-7);

    // Upstream in NDC units.
    let gx = d_mean2d.x * 0.5 * width as f32;
    let gy = d_mean2d.y * 0.5 * height as f32;

    let d_h = Vector4::new(
        gx * inv_w,
        gy * inv_w,
        0.0,
        -(gx * h.x + gy * h.y) * inv_w * inv_w,
    );

    // Only the first three columns of P multiply the position.
    proj_matrix.fixed_view::<4, 3>(0, 0).transpose() * d_h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Camera;
    use crate::render::project::project_mean;
    use approx::assert_relative_eq;

    #[test]
    fn test_project_mean_grad_matches_finite_differences() {
        let cam = Camera::look_at(
            &Vector3::new(0.5, -0.3, -3.0),
            &Vector3::new(0.1, 0.2, 0.4),
            &Vector3::new(0.0, -1.0, 0.0),
            0.6,
            0.45,
            40,
            30,
        );
        let p = Vector3::new(0.3f32, 0.1, 0.6);
        let up = Vector2::new(0.7f32, -0.4);
        let g = project_mean_grad(&cam.proj_matrix, &p, cam.width, cam.height, &up);

        let eps = 1e-3;
        for k in 0..3 {
            let mut a = p;
            a[k] += eps;
            let mut b = p;
            b[k] -= eps;
            let num = (project_mean(&cam, &a).dot(&up) - project_mean(&cam, &b).dot(&up)) / (2.0 * eps);
            assert_relative_eq!(g[k], num, epsilon = 1e-2, max_relative = 1e-2);
        }
    }
}
