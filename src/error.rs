//! Error types for caqscan.

use crate::config::DistType;
use thiserror::Error;

/// Errors that can occur while constructing or driving an estimator.
///
/// All errors are surfaced to the caller; nothing is retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaqError {
    /// Distance-type constraint violated at estimator construction.
    #[error("distance type mismatch: estimator requires {expected:?}, config says {actual:?}")]
    ConfigMismatch { expected: DistType, actual: DistType },

    /// Fast-scan estimator built on single-layout data, or vice versa.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    /// A code path that is intentionally not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Aligned allocation returned null.
    #[error("aligned allocation of {bytes} bytes (align {align}) failed")]
    Allocation { bytes: usize, align: usize },

    /// Dimension mismatch between a query/vector and the quantizer metadata.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for caqscan operations.
pub type Result<T> = std::result::Result<T, CaqError>;
