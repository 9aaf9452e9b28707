//! Scalar color conversions used when previewing rendered buffers.
//!
//! The rasterizer itself never converts colors: SH output is composited as-is.
//! These helpers only matter at the boundary where buffers become 8-bit images.

/// Quantize a value in [0, 1] to u8 without any transfer function.
pub fn unit_f32_to_u8(x: f32) -> u8 {
    if !x.is_finite() {
        return 0;
    }
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert linear f32 (0.0-1.0) to sRGB u8 (0-255).
///
/// Uses the official sRGB inverse transfer function with breakpoint at 0.0031308.
pub fn linear_f32_to_srgb_u8(x: f32) -> u8 {
    if !x.is_finite() {
        return 0;
    }
    let x = x.clamp(0.0, 1.0);
    let cs = if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    };
    (cs * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Map a unit normal component in [-1, 1] to u8.
pub fn signed_unit_to_u8(x: f32) -> u8 {
    unit_f32_to_u8(0.5 * (x + 1.0))
}
