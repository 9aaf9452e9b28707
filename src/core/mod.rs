//! Core data structures and mathematical operations.
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - `Splat`: deformable splat primitive
//! - `Camera`: view/projection matrices and per-pass constants
//! - SH evaluation, footprint function, math helpers
//!
//! All types here are "pure data" - no rendering logic.

mod camera;
pub mod color;
pub mod footprint;
pub mod math;
pub mod sh;
mod splat;

pub use camera::{perspective_matrix, Camera, DEFAULT_ZFAR, DEFAULT_ZNEAR};
pub use footprint::{conic_from_covariance, footprint_value};
pub use math::{perspective_jacobian, quaternion_raw_to_matrix, rotation_z};
pub use sh::{evaluate_sh, sh_basis, ShColor, SH_COEFFS_MAX, SH_DEGREE_MAX};
pub use splat::{Splat, SplatCloud};
