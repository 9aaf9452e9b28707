//! Error types for the rasterization pipeline.
//!
//! Per-primitive degeneracies (zero scale, behind the camera, off screen) are
//! not errors: the projector records a [`CullReason`](crate::render::CullReason)
//! and moves on. Only conditions that make the whole call meaningless are
//! surfaced here.

use thiserror::Error;

/// Result type for rasterizer operations.
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors that abort a forward or backward call.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Tile id, primitive index or entry count does not fit the packed key layout.
    #[error("tile key space exceeded: {0}")]
    RangeOverflow(String),

    /// Backward called with buffers that were not produced by the matching forward call.
    #[error("invalid buffer state: {0}")]
    InvalidBufferState(String),

    /// Caller-supplied arrays or settings have inconsistent shapes.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A debug-mode consistency check failed.
    #[error("consistency check failed: {0}")]
    Consistency(String),
}
