//! Gradients for the footprint function.
//!
//! Forward (see `core::footprint`):
//!   e1 = √A·dx + (B/√A)·dy,  e2 = √h·dy,  h = C − B²/A
//!   r  = (1 − η)·‖e‖₂ + η·‖e‖₁
//!   G  = exp(−½ · s^κ),  s = r²,  κ = 1 + max(acutance, 0)
//!
//! Gradients w.r.t. the offset d = mean − pixel (equal to dG/dmean), the
//! conic entries (A, B, C) with B the scalar off-diagonal, the blend rate and
//! the acutance. Clamped inputs (η outside [0, 1], negative acutance,
//! h < 0) get zero gradient. At acutance = 0 the right-hand derivative is
//! returned, so Gaussian-initialized splats can still learn sharpness.

use nalgebra::{Vector2, Vector3};

use crate::core::footprint::{acutance_exponent, whiten};
use crate::core::footprint_value;

#[derive(Clone, Copy, Debug)]
pub struct FootprintGrads {
    pub value: f32,
    pub d_offset: Vector2<f32>,
    pub d_conic: Vector3<f32>,
    pub d_l1l2_rate: f32,
    pub d_acutance: f32,
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Evaluate the footprint and its partial derivatives.
///
/// `value` is bit-identical to [`footprint_value`], so thresholds taken on it
/// agree with the forward pass.
pub fn footprint_with_grads(
    conic: &Vector3<f32>,
    d: &Vector2<f32>,
    l1l2_rate: f32,
    acutance: f32,
) -> FootprintGrads {
    let value = footprint_value(conic, d, l1l2_rate, acutance);

    let (a, b, c) = (conic.x, conic.y, conic.z);
    let sa = a.sqrt();
    let h_raw = c - b * b / a;
    let h = h_raw.max(0.0);
    let sh = h.sqrt();

    let e = whiten(conic, d);
    let r2 = e.norm();
    let r1 = e.x.abs() + e.y.abs();
    let eta = l1l2_rate.clamp(0.0, 1.0);
    let r = (1.0 - eta) * r2 + eta * r1;
    let s = r * r;
    let kappa = acutance_exponent(acutance);

    // dG/ds = −½·κ·s^(κ−1)·G
    let dg_ds = if s > 0.0 {
        -0.5 * kappa * s.powf(kappa - 1.0) * value
    } else if kappa == 1.0 {
        -0.5 * value
    } else {
        0.0
    };
    let dg_dr = dg_ds * 2.0 * r;

    let d_acutance = if acutance >= 0.0 && s > 0.0 {
        -0.5 * s.powf(kappa) * s.ln() * value
    } else {
        0.0
    };
    let d_l1l2_rate = if (0.0..=1.0).contains(&l1l2_rate) {
        dg_dr * (r1 - r2)
    } else {
        0.0
    };

    // dr/de = (1 − η)·e/‖e‖₂ + η·sign(e)
    let (dr_de1, dr_de2) = if r2 > 0.0 {
        (
            (1.0 - eta) * e.x / r2 + eta * sign(e.x),
            (1.0 - eta) * e.y / r2 + eta * sign(e.y),
        )
    } else {
        (0.0, 0.0)
    };
    let dg_de1 = dg_dr * dr_de1;
    let dg_de2 = dg_dr * dr_de2;

    // Offset.
    let d_offset = Vector2::new(dg_de1 * sa, dg_de1 * b / sa + dg_de2 * sh);

    // Conic, through e1 directly and through e2 via h.
    let de1_da = 0.5 * d.x / sa - 0.5 * b * d.y / (a * sa);
    let de1_db = d.y / sa;
    let dg_dh = if h_raw > 0.0 { dg_de2 * d.y * 0.5 / sh } else { 0.0 };
    let d_conic = Vector3::new(
        dg_de1 * de1_da + dg_dh * (b * b) / (a * a),
        dg_de1 * de1_db + dg_dh * (-2.0 * b / a),
        dg_dh,
    );

    FootprintGrads {
        value,
        d_offset,
        d_conic,
        d_l1l2_rate,
        d_acutance,
    }
}
