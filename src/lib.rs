//! # drk-splatting: differentiable tile-based splat rasterizer in Rust
//!
//! Renders a set of anisotropic splats (3D Gaussian-like primitives with an
//! extra in-plane rotation, an L1/L2 footprint blend and an edge-sharpness
//! control) into color, alpha, depth and normal images, and computes exact
//! gradients of a scalar loss with respect to every splat parameter.
//!
//! ## Architecture
//!
//! - `core`: splats, camera, SH, footprint function, math helpers
//! - `render`: forward pipeline (project → expand → sort → ranges → composite)
//! - `diff`: backward passes, one module per forward operation
//! - `config`: settings and pipeline constants
//! - `error`: error type shared by forward and backward
//!
//! Everything runs on the CPU with rayon data parallelism; each pipeline
//! stage is a map or scatter over its own index space.
//!
//! ## Example
//!
//! ```no_run
//! use drk_splatting::{Camera, ImageGrads, RasterSettings, Rasterizer, Splat};
//! use nalgebra::{Matrix4, Vector3};
//!
//! let splats = vec![Splat::gaussian(Vector3::new(0.0, 0.0, 3.0), 0.2, 0.8, Vector3::new(1.0, 0.5, 0.2))];
//! let camera = Camera::new(Matrix4::identity(), 0.5, 0.5, 64, 64);
//!
//! let mut rasterizer = Rasterizer::new(RasterSettings::default());
//! let out = rasterizer.forward(&splats, &camera)?;
//!
//! let mut d_image = ImageGrads::zeros(64, 64);
//! d_image.color.iter_mut().for_each(|g| *g = Vector3::new(1.0, 1.0, 1.0));
//! let grads = rasterizer.backward(&splats, &camera, out.num_rendered, &out.buffers, &out.image, &d_image)?;
//! println!("dL/dposition = {:?}", grads.position[0]);
//! # Ok::<(), drk_splatting::RasterError>(())
//! ```

// Settings and constants
pub mod config;

// Core data structures and math
pub mod core;

// Forward rendering pipeline
pub mod render;

// Differentiable operations (backward passes)
pub mod diff;

pub mod error;

// Re-export commonly used types at crate root for convenience
pub use config::RasterSettings;
pub use core::{Camera, Splat, SplatCloud};
pub use diff::{ImageGrads, SplatGrads};
pub use error::{RasterError, RasterResult};
pub use render::{CullReason, ForwardOutput, Rasterizer, RenderedImage, SavedBuffers, Visibility};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
