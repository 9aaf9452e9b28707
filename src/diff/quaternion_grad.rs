//! Gradients for raw quaternion → rotation matrix.
//!
//! The rotation is parameterized by an unconstrained 4-vector (w, x, y, z)
//! that is normalized on use, so the optimizer never has to keep it unit
//! length. The gradient is taken through the normalization.

use nalgebra::{Matrix3, Vector4};

/// Partial derivatives of R(q) w.r.t. each unit-quaternion component.
///
/// Returned in (w, x, y, z) order.
fn rotation_partials(w: f32, x: f32, y: f32, z: f32) -> [Matrix3<f32>; 4] {
    let (w2, x2, y2, z2) = (2.0 * w, 2.0 * x, 2.0 * y, 2.0 * z);
    [
        Matrix3::new(0.0, -z2, y2, z2, 0.0, -x2, -y2, x2, 0.0),
        Matrix3::new(0.0, y2, z2, y2, -2.0 * x2, -w2, z2, w2, -2.0 * x2),
        Matrix3::new(-2.0 * y2, x2, w2, x2, 0.0, z2, -w2, z2, -2.0 * y2),
        Matrix3::new(-2.0 * z2, -w2, x2, w2, -2.0 * z2, y2, x2, y2, 0.0),
    ]
}

/// Gradient of [`quaternion_raw_to_matrix`](crate::core::quaternion_raw_to_matrix)
/// w.r.t. the raw quaternion, given upstream dL/dR.
pub fn quaternion_raw_to_matrix_grad(q_raw: &Vector4<f32>, d_r: &Matrix3<f32>) -> Vector4<f32> {
    let n = q_raw.norm();
    let q = q_raw / n;

    let partials = rotation_partials(q.x, q.y, q.z, q.w);
    let grad_unit = Vector4::from_fn(|i, _| partials[i].component_mul(d_r).sum());

    // q = q_raw / |q_raw|  ⇒  dL/dq_raw = (I − q qᵀ) dL/dq / |q_raw|
    (grad_unit - q * q.dot(&grad_unit)) / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quaternion_raw_to_matrix;
    use approx::assert_relative_eq;

    #[test]
    fn test_quaternion_grad_matches_finite_differences() {
        let q = Vector4::new(0.8f32, -0.3, 0.5, 0.2) * 1.7;
        let w = Matrix3::new(0.2, -0.4, 0.1, 0.7, 0.3, -0.6, -0.1, 0.5, 0.9);
        let loss = |q: &Vector4<f32>| quaternion_raw_to_matrix(q).component_mul(&w).sum();
        let g = quaternion_raw_to_matrix_grad(&q, &w);

        let eps = 1e-3;
        for k in 0..4 {
            let mut p = q;
            p[k] += eps;
            let mut m = q;
            m[k] -= eps;
            let num = (loss(&p) - loss(&m)) / (2.0 * eps);
            assert_relative_eq!(g[k], num, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_radial_direction_has_no_gradient() {
        let q = Vector4::new(0.6f32, 0.1, -0.7, 0.3);
        let w = Matrix3::new(1.0, 2.0, 3.0, -1.0, 0.5, 0.0, 0.2, -0.3, 0.4);
        let g = quaternion_raw_to_matrix_grad(&q, &w);
        assert_relative_eq!(g.dot(&q), 0.0, epsilon = 1e-5);
    }
}
