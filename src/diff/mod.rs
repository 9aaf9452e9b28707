//! Differentiable operations (backward passes).
//!
//! Each `*_grad` module is the backward of one forward operation and is
//! checked against finite differences in its own tests. `backward` chains
//! them into the full gradient reconstructor.

pub mod atomic;
pub mod backward;
pub mod blend_grad;
pub mod covariance_grad;
pub mod footprint_grad;
pub mod project_grad;
pub mod quaternion_grad;
pub mod sh_grad;

pub use backward::{backward, ImageGrads, SplatGrads};
pub use blend_grad::{PixelUpstream, ReverseCompositor};
