//! Splat primitive and cloud data structure.
//!
//! A splat is parameterized by:
//! - Position (mean μ)
//! - Per-axis scale (linear extent, must be positive)
//! - In-plane orientation `theta` about the local z axis
//! - Rotation (raw quaternion, normalized on use)
//! - L1/L2 blend rate and acutance, which shape the footprint falloff
//! - Opacity in [0, 1]
//! - Spherical harmonics coefficients (view-dependent color)

use nalgebra::{Matrix3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::core::math::{quaternion_raw_to_matrix, rotation_z};
use crate::core::SH_COEFFS_MAX;

/// A deformable splat primitive.
///
/// Covariance is stored factorized:
/// Σ = M · Mᵀ with M = R(q) · Rz(θ) · diag(scale · scale_modifier)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Splat {
    /// Position (mean μ) in world space
    pub position: Vector3<f32>,

    /// Per-axis extent (standard deviation along each local axis)
    pub scale: Vector3<f32>,

    /// In-plane orientation about the local z axis, in radians
    pub theta: f32,

    /// Raw rotation quaternion stored as (w, x, y, z)
    pub rotation: Vector4<f32>,

    /// Distance-norm blend: 0 = Euclidean footprint, 1 = Manhattan-like footprint
    pub l1l2_rate: f32,

    /// Opacity in [0, 1]
    pub opacity: f32,

    /// Edge sharpness; 0 = Gaussian falloff, larger = harder cutoff
    pub acutance: f32,

    /// Spherical harmonics coefficients, RGB × 16 (index 0 is DC)
    pub sh: [[f32; 3]; SH_COEFFS_MAX],

    /// Precomputed RGB color. When set, SH is not evaluated and the color is
    /// used as-is, without clamping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Vector3<f32>>,
}

impl Splat {
    /// Create an isotropic, unrotated Gaussian-shaped splat with a DC color.
    ///
    /// `rgb` is the color seen from every direction (before the 0.5 offset is
    /// removed), which is convenient for tests and demos.
    pub fn gaussian(position: Vector3<f32>, scale: f32, opacity: f32, rgb: Vector3<f32>) -> Self {
        let mut sh = [[0.0f32; 3]; SH_COEFFS_MAX];
        sh[0] = crate::core::sh::rgb_to_sh_dc(&rgb);
        Self {
            position,
            scale: Vector3::new(scale, scale, scale),
            theta: 0.0,
            rotation: Vector4::new(1.0, 0.0, 0.0, 0.0),
            l1l2_rate: 0.0,
            opacity,
            acutance: 0.0,
            sh,
            color: None,
        }
    }

    /// Combined local frame R(q) · Rz(θ).
    pub fn local_frame(&self) -> Matrix3<f32> {
        quaternion_raw_to_matrix(&self.rotation) * rotation_z(self.theta)
    }

    /// Compute the 3D covariance matrix Σ = M · Mᵀ.
    pub fn covariance_matrix(&self, scale_modifier: f32) -> Matrix3<f32> {
        let s = self.scale * scale_modifier;
        let m = self.local_frame() * Matrix3::from_diagonal(&s);
        m * m.transpose()
    }

    /// True when any scale component would collapse the covariance.
    pub fn has_degenerate_scale(&self) -> bool {
        self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0)
    }
}

/// A collection of splats.
///
/// Array-of-structs layout; each pipeline stage indexes it by primitive id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SplatCloud {
    pub splats: Vec<Splat>,
}

impl SplatCloud {
    /// Create a new empty cloud.
    pub fn new() -> Self {
        Self { splats: Vec::new() }
    }

    /// Create a cloud from a vector of splats.
    pub fn from_splats(splats: Vec<Splat>) -> Self {
        Self { splats }
    }

    /// Number of splats in the cloud.
    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn push(&mut self, splat: Splat) {
        self.splats.push(splat);
    }

    pub fn as_slice(&self) -> &[Splat] {
        &self.splats
    }

    pub fn as_mut_slice(&mut self) -> &mut [Splat] {
        &mut self.splats
    }
}
