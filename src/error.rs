//! Error types used by the crate.

use thiserror::Error;

/// Mercator error type.
#[derive(Debug, Error)]
pub enum MercatorError {
    /// A renderer thread is not running (already canceled or never started).
    #[error("renderer thread is not running")]
    NotRunning,
    /// A lifecycle request was replaced by a newer one before the renderer
    /// thread applied it.
    #[error("lifecycle transition superseded by a newer request")]
    TransitionSuperseded,
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
}

/// Marker returned by a tile read step when the tile's cancel flag was
/// observed. This is an expected unwind signal, not a failure: it is caught at
/// the task boundary and never crosses a thread boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCanceled;

impl std::fmt::Display for ReadCanceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile read canceled")
    }
}

impl std::error::Error for ReadCanceled {}
