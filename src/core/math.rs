//! Mathematical utilities (quaternions, projection helpers).

use nalgebra::{Matrix2x3, Matrix3, Matrix4, Vector3, Vector4};

/// Convert a raw quaternion (w, x, y, z) to a rotation matrix by normalizing it first.
///
/// Formula (from unit quaternion q = w + xi + yj + zk):
/// R = | 1-2(y²+z²)   2(xy-wz)    2(xz+wy)  |
///     | 2(xy+wz)     1-2(x²+z²)  2(yz-wx)  |
///     | 2(xz-wy)     2(yz+wx)    1-2(x²+y²)|
///
/// The components are stored as `Vector4::new(w, x, y, z)`, so `q.x` is w.
pub fn quaternion_raw_to_matrix(q_raw: &Vector4<f32>) -> Matrix3<f32> {
    let q = q_raw / q_raw.norm();

    let w = q.x;
    let x = q.y;
    let y = q.z;
    let z = q.w;

    Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Rotation by `theta` about the local z axis.
pub fn rotation_z(theta: f32) -> Matrix3<f32> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Derivative of [`rotation_z`] with respect to `theta`.
pub fn rotation_z_derivative(theta: f32) -> Matrix3<f32> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
}

/// Apply the affine part of a 4×4 transform to a point (drops the w row).
pub fn transform_point_affine(m: &Matrix4<f32>, p: &Vector3<f32>) -> Vector3<f32> {
    m.fixed_view::<3, 3>(0, 0) * p + m.fixed_view::<3, 1>(0, 3)
}

/// Apply a full 4×4 transform to a point, returning homogeneous coordinates.
pub fn transform_point_homogeneous(m: &Matrix4<f32>, p: &Vector3<f32>) -> Vector4<f32> {
    m * Vector4::new(p.x, p.y, p.z, 1.0)
}

/// Map a normalized device coordinate to a pixel coordinate.
///
/// Pixel centers sit at integer coordinates, so NDC -1 maps to -0.5.
pub fn ndc_to_pixel(v: f32, size: u32) -> f32 {
    ((v + 1.0) * size as f32 - 1.0) * 0.5
}

/// Camera-space point after the EWA guard-band clamp.
///
/// `clamped_x`/`clamped_y` record whether the lateral coordinate was pulled
/// back to the guard band; the clamped coordinate then scales with depth.
#[derive(Clone, Copy, Debug)]
pub struct ClampedPoint {
    pub t: Vector3<f32>,
    pub clamped_x: bool,
    pub clamped_y: bool,
}

/// Clamp the lateral coordinates of a camera-space point to ±`guard · tan_fov · z`.
pub fn clamp_to_guard_band(t: &Vector3<f32>, limit_x: f32, limit_y: f32) -> ClampedPoint {
    let txtz = t.x / t.z;
    let tytz = t.y / t.z;
    let cx = txtz.clamp(-limit_x, limit_x);
    let cy = tytz.clamp(-limit_y, limit_y);
    ClampedPoint {
        t: Vector3::new(cx * t.z, cy * t.z, t.z),
        clamped_x: cx != txtz,
        clamped_y: cy != tytz,
    }
}

/// Compute the Jacobian of perspective projection.
///
/// For a point t = [x, y, z] in camera space, the projected point is
/// [u, v] = [fx*x/z + cx, fy*y/z + cy], and
///
/// J = | fx/z    0      -fx*x/z² |
///     |  0     fy/z    -fy*y/z² |
pub fn perspective_jacobian(point_camera: &Vector3<f32>, fx: f32, fy: f32) -> Matrix2x3<f32> {
    let x = point_camera.x;
    let y = point_camera.y;
    let z_inv = 1.0 / point_camera.z;
    let z_inv_sq = z_inv * z_inv;

    Matrix2x3::new(
        fx * z_inv,
        0.0,
        -fx * x * z_inv_sq,
        0.0,
        fy * z_inv,
        -fy * y * z_inv_sq,
    )
}
