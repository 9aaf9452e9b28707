//! Spherical harmonics evaluation for view-dependent color.
//!
//! Splats store color as real SH coefficients up to degree 3 (16 per channel).
//! Evaluation adds a 0.5 offset and clamps negative channels to zero; the
//! clamp flags are kept so the backward pass can block gradients there.

use nalgebra::Vector3;

/// Highest supported SH degree.
pub const SH_DEGREE_MAX: u32 = 3;

/// Coefficients per channel at [`SH_DEGREE_MAX`].
pub const SH_COEFFS_MAX: usize = 16;

pub const SH_C0: f32 = 0.282_094_79;
pub const SH_C1: f32 = 0.488_602_51;
pub const SH_C2: [f32; 5] = [
    1.092_548_4,
    -1.092_548_4,
    0.315_391_57,
    -1.092_548_4,
    0.546_274_2,
];
pub const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_34,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Number of active coefficients for a degree.
pub fn coeff_count(degree: u32) -> usize {
    ((degree + 1) * (degree + 1)) as usize
}

/// Evaluate the 16 real SH basis functions at a unit direction.
///
/// Ordering: degree 0, then degree 1 (y, z, x), degree 2, degree 3.
pub fn sh_basis(direction: &Vector3<f32>) -> [f32; SH_COEFFS_MAX] {
    let (x, y, z) = (direction.x, direction.y, direction.z);
    let (xx, yy, zz) = (x * x, y * y, z * z);

    [
        SH_C0,
        -SH_C1 * y,
        SH_C1 * z,
        -SH_C1 * x,
        SH_C2[0] * x * y,
        SH_C2[1] * y * z,
        SH_C2[2] * (2.0 * zz - xx - yy),
        SH_C2[3] * x * z,
        SH_C2[4] * (xx - yy),
        SH_C3[0] * y * (3.0 * xx - yy),
        SH_C3[1] * x * y * z,
        SH_C3[2] * y * (4.0 * zz - xx - yy),
        SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy),
        SH_C3[4] * x * (4.0 * zz - xx - yy),
        SH_C3[5] * z * (xx - yy),
        SH_C3[6] * x * (xx - 3.0 * yy),
    ]
}

/// Color after SH evaluation, with per-channel clamp flags.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShColor {
    pub rgb: Vector3<f32>,
    pub clamped: [bool; 3],
}

/// Evaluate view-dependent color from SH coefficients up to `degree`.
///
/// `direction` does not need to be normalized.
pub fn evaluate_sh(
    sh: &[[f32; 3]; SH_COEFFS_MAX],
    degree: u32,
    direction: &Vector3<f32>,
) -> ShColor {
    let dir = direction.normalize();
    let basis = sh_basis(&dir);

    let mut color = Vector3::new(0.5f32, 0.5, 0.5);
    for (b, coeff) in basis.iter().zip(sh.iter()).take(coeff_count(degree)) {
        color.x += b * coeff[0];
        color.y += b * coeff[1];
        color.z += b * coeff[2];
    }

    let clamped = [color.x < 0.0, color.y < 0.0, color.z < 0.0];
    ShColor {
        rgb: color.map(|c| c.max(0.0)),
        clamped,
    }
}

/// DC coefficient that yields `rgb` from every direction.
pub fn rgb_to_sh_dc(rgb: &Vector3<f32>) -> [f32; 3] {
    [
        (rgb.x - 0.5) / SH_C0,
        (rgb.y - 0.5) / SH_C0,
        (rgb.z - 0.5) / SH_C0,
    ]
}
