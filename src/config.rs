//! Search configuration and the numeric constants fixed by the design.

use serde::{Deserialize, Serialize};

/// Number of vectors per fast-scan block.
///
/// Fast-scan interleaves the 1-bit codes of 32 vectors so that one 16-byte
/// row feeds a 16-lane SIMD shuffle (low nibbles = vectors 0..16, high
/// nibbles = vectors 16..32).
pub const FASTSCAN_BLOCK: usize = 32;

/// Vector dimensions are padded to a multiple of this.
pub const DIM_PAD: usize = 64;

/// Maximum total quantization bits per dimension.
pub const MAX_QUANTIZE_BITS: u8 = 13;

/// Calibration constant for the single-vector 1-bit estimate.
pub const CONST_BOUND: f32 = 0.58;

/// Calibration constant for the single-vector 1-bit estimate.
pub const EST_ERROR: f32 = 0.8;

/// Distance function the estimator computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistType {
    /// Squared Euclidean distance.
    L2Sqr,
    /// Inner product (larger = closer; the estimator reports raw IP values).
    Ip,
}

/// Runtime knobs for the distance estimators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearcherConfig {
    /// Which distance the estimator computes.
    pub dist_type: DistType,
    /// Whether the consumed data uses the fast-scan block layout.
    pub use_fastscan: bool,
    /// Multiplier applied to the variance handed to `set_prune_bound`.
    pub vars_bound_m: f32,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            dist_type: DistType::L2Sqr,
            use_fastscan: true,
            vars_bound_m: 1.0,
        }
    }
}

impl SearcherConfig {
    /// Config for squared-L2 search over fast-scan data.
    pub fn l2() -> Self {
        Self::default()
    }

    /// Config for inner-product search over fast-scan data.
    pub fn ip() -> Self {
        Self {
            dist_type: DistType::Ip,
            ..Self::default()
        }
    }

    /// Switch to the single-vector (non-blocked) layout.
    pub fn single_layout(self) -> Self {
        Self {
            use_fastscan: false,
            ..self
        }
    }
}
