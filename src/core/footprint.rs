//! Screen-space footprint of a projected splat.
//!
//! The footprint value at an offset `d = mean − pixel` is built from the conic
//! Q = Σ₂d⁻¹ = [[A, B], [B, C]]:
//!
//! ```text
//! e1 = √A·dx + (B/√A)·dy          (Cholesky whitening, Q = LᵀL)
//! e2 = √(C − B²/A)·dy
//! r  = (1 − η)·‖e‖₂ + η·‖e‖₁      (η = L1/L2 blend rate in [0, 1])
//! G  = exp(−½ · (r²)^κ)           (κ = 1 + acutance)
//! ```
//!
//! With η = 0 and acutance 0 this is exactly the Gaussian exp(−½ dᵀQd).
//! Since ‖e‖₁ ≥ ‖e‖₂ and κ ≥ 1, the footprint never reaches further than the
//! Gaussian with the same conic.

use nalgebra::{Vector2, Vector3};

use crate::config::ALPHA_MIN;

/// Invert a symmetric 2×2 covariance stored as (xx, xy, yy).
///
/// Returns `None` when the matrix is not positive definite.
pub fn conic_from_covariance(cov: &Vector3<f32>) -> Option<Vector3<f32>> {
    let det = cov.x * cov.z - cov.y * cov.y;
    if !det.is_finite() || det <= 0.0 || cov.x <= 0.0 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some(Vector3::new(cov.z * inv_det, -cov.y * inv_det, cov.x * inv_det))
}

/// Falloff exponent for an acutance value.
pub fn acutance_exponent(acutance: f32) -> f32 {
    1.0 + acutance.max(0.0)
}

/// Whitened offset (e1, e2) of `d` under the conic.
pub fn whiten(conic: &Vector3<f32>, d: &Vector2<f32>) -> Vector2<f32> {
    let sa = conic.x.sqrt();
    let h = (conic.z - conic.y * conic.y / conic.x).max(0.0);
    Vector2::new(sa * d.x + conic.y / sa * d.y, h.sqrt() * d.y)
}

/// Evaluate the footprint at offset `d = mean − pixel`.
pub fn footprint_value(conic: &Vector3<f32>, d: &Vector2<f32>, l1l2_rate: f32, acutance: f32) -> f32 {
    let e = whiten(conic, d);
    let r2 = e.norm();
    let r1 = e.x.abs() + e.y.abs();
    let eta = l1l2_rate.clamp(0.0, 1.0);
    let r = (1.0 - eta) * r2 + eta * r1;
    let s = r * r;
    (-0.5 * s.powf(acutance_exponent(acutance))).exp()
}

/// Largest squared Mahalanobis radius (dᵀQd) at which a splat can still
/// produce `alpha >= ALPHA_MIN`.
///
/// Returns `None` when the opacity is too low to ever reach the threshold.
/// At exactly `opacity == ALPHA_MIN` only the mean itself qualifies.
pub fn reach_mahalanobis_sq(opacity: f32, acutance: f32) -> Option<f32> {
    let peak = opacity / ALPHA_MIN;
    if !(peak >= 1.0) {
        return None;
    }
    let limit = 2.0 * peak.ln();
    Some(limit.powf(1.0 / acutance_exponent(acutance)))
}
