//! Quantizer metadata and the read-only per-cluster data view.
//!
//! A cluster owns the packed codes and correction factors for its vectors;
//! estimators only ever borrow from it. All buffers are 64-byte aligned so
//! the SIMD kernels can use aligned loads.
//!
//! # Layouts
//!
//! Codes for a vector's padded dimension `D` and total bits `B`:
//!
//! - **Sign codes, fast-scan**: per block of 32 vectors, group-major.
//!   Group `g` (dimensions `4g..4g+4`) occupies bytes `[16g, 16g+16)`
//!   of the block; byte `k` holds the 4 sign bits of vector `k` in its
//!   low nibble and of vector `k + 16` in its high nibble, bit `t` of a
//!   nibble belonging to dimension `4g + t`. Block stride: `4·D` bytes.
//! - **Sign codes, single**: per vector, bit `d % 8` of byte `d / 8`.
//!   Stride `D/8` bytes.
//! - **Extended codes**: per vector, bit-sliced across `B - 1` planes,
//!   plane-major; plane `p` occupies `D/8` bytes and its bit `d % 8` of
//!   byte `d / 8` is bit `p` of dimension `d`'s extended code. Rows are
//!   padded to 64 bytes so each vector's codes start cache-line aligned.

use crate::config::{DIM_PAD, FASTSCAN_BLOCK, MAX_QUANTIZE_BITS};
use crate::error::{CaqError, Result};
use crate::memory::AlignedBuffer;
use crate::rotator::Rotator;

/// Per-vector multiplicative correction restoring unbiasedness of the
/// extended-bit inner-product estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExFactor {
    pub rescale: f32,
}

/// Immutable quantizer metadata shared by every cluster of an index.
#[derive(Debug, Clone)]
pub struct QuantizerMeta {
    dim_pad: usize,
    bits: u8,
    use_fastscan: bool,
    rotator: Option<Rotator>,
}

impl QuantizerMeta {
    /// Create metadata for a padded dimension (multiple of 64) and a
    /// total bit count in `[0, 13]`.
    pub fn new(
        dim_pad: usize,
        bits: u8,
        use_fastscan: bool,
        rotator: Option<Rotator>,
    ) -> Result<Self> {
        if dim_pad == 0 || dim_pad % DIM_PAD != 0 {
            return Err(CaqError::InvalidParameter(format!(
                "padded dimension {dim_pad} must be a positive multiple of {DIM_PAD}"
            )));
        }
        if bits > MAX_QUANTIZE_BITS {
            return Err(CaqError::InvalidParameter(format!(
                "quantization bits {bits} exceed the maximum of {MAX_QUANTIZE_BITS}"
            )));
        }
        if let Some(rot) = &rotator {
            if rot.dim() != dim_pad {
                return Err(CaqError::DimensionMismatch {
                    expected: dim_pad,
                    got: rot.dim(),
                });
            }
        }
        Ok(Self {
            dim_pad,
            bits,
            use_fastscan,
            rotator,
        })
    }

    /// Padded dimension.
    #[inline]
    #[must_use]
    pub fn dim_pad(&self) -> usize {
        self.dim_pad
    }

    /// Total quantization bits per dimension.
    #[inline]
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Extended bits per dimension (`bits - 1`, or 0).
    #[inline]
    #[must_use]
    pub fn ex_bits(&self) -> u8 {
        self.bits.saturating_sub(1)
    }

    /// Whether the data uses the fast-scan block layout.
    #[inline]
    #[must_use]
    pub fn use_fastscan(&self) -> bool {
        self.use_fastscan
    }

    /// The rotation applied before quantization, if any.
    #[inline]
    #[must_use]
    pub fn rotator(&self) -> Option<&Rotator> {
        self.rotator.as_ref()
    }

    /// Rotate a query into the frame the data was quantized in.
    pub(crate) fn rotate_query(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.dim_pad {
            return Err(CaqError::DimensionMismatch {
                expected: self.dim_pad,
                got: query.len(),
            });
        }
        Ok(match &self.rotator {
            Some(rot) => rot.apply(query),
            None => query.to_vec(),
        })
    }

    /// Bytes per vector of bit-sliced extended code, padded so each row
    /// starts 64-byte aligned.
    pub(crate) fn long_code_stride(&self) -> usize {
        let raw = self.dim_pad * self.ex_bits() as usize / 8;
        (raw + 63) / 64 * 64
    }
}

/// Quantized data for one cluster: centroid, per-vector residual norms,
/// sign codes in both layouts, bit-sliced extended codes, and rescale
/// factors. Read-only for the lifetime of the index.
#[derive(Debug)]
pub struct ClusterData {
    num_vectors: usize,
    dim_pad: usize,
    ex_bits: u8,
    long_stride: usize,
    centroid: AlignedBuffer<f32>,
    // One f32 per vector, padded to whole blocks of 32.
    factor_o_l2norm: AlignedBuffer<f32>,
    // num_blocks * 4 * dim_pad bytes, fast-scan layout.
    short_codes_fastscan: AlignedBuffer<u8>,
    // num_vectors * dim_pad / 8 bytes, single layout.
    short_codes_single: AlignedBuffer<u8>,
    // num_vectors * long_stride bytes; empty when ex_bits == 0.
    long_codes: AlignedBuffer<u8>,
    ex_factors: Vec<ExFactor>,
}

impl ClusterData {
    pub(crate) fn from_parts(
        num_vectors: usize,
        meta: &QuantizerMeta,
        centroid: AlignedBuffer<f32>,
        factor_o_l2norm: AlignedBuffer<f32>,
        short_codes_fastscan: AlignedBuffer<u8>,
        short_codes_single: AlignedBuffer<u8>,
        long_codes: AlignedBuffer<u8>,
        ex_factors: Vec<ExFactor>,
    ) -> Self {
        Self {
            num_vectors,
            dim_pad: meta.dim_pad(),
            ex_bits: meta.ex_bits(),
            long_stride: meta.long_code_stride(),
            centroid,
            factor_o_l2norm,
            short_codes_fastscan,
            short_codes_single,
            long_codes,
            ex_factors,
        }
    }

    /// Number of vectors stored in the cluster.
    #[inline]
    #[must_use]
    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    /// Number of fast-scan blocks (the last one may be partially filled).
    #[inline]
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        (self.num_vectors + FASTSCAN_BLOCK - 1) / FASTSCAN_BLOCK
    }

    /// The cluster centroid, in the quantization frame.
    #[inline]
    #[must_use]
    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    /// Residual L2 norms for a block's 32 vectors, 64-byte aligned.
    #[inline]
    pub fn factor_o_l2norm(&self, block_idx: usize) -> &[f32] {
        let base = block_idx * FASTSCAN_BLOCK;
        &self.factor_o_l2norm[base..base + FASTSCAN_BLOCK]
    }

    /// A block's sign codes in fast-scan layout (`4·D` bytes, aligned).
    /// Empty when the quantizer has zero bits.
    #[inline]
    pub fn short_code(&self, block_idx: usize) -> &[u8] {
        if self.short_codes_fastscan.is_empty() {
            return &[];
        }
        let stride = 4 * self.dim_pad;
        let base = block_idx * stride;
        &self.short_codes_fastscan[base..base + stride]
    }

    /// One vector's sign codes in single layout (`D/8` bytes). Empty when
    /// the quantizer has zero bits.
    #[inline]
    pub fn short_code_single(&self, vec_idx: usize) -> &[u8] {
        if self.short_codes_single.is_empty() {
            return &[];
        }
        let stride = self.dim_pad / 8;
        let base = vec_idx * stride;
        &self.short_codes_single[base..base + stride]
    }

    /// One vector's bit-sliced extended code (`D·(B-1)/8` bytes, 64-byte
    /// aligned). Empty when the quantizer has no extended bits.
    #[inline]
    pub fn long_code(&self, vec_idx: usize) -> &[u8] {
        if self.ex_bits == 0 {
            return &[];
        }
        let base = vec_idx * self.long_stride;
        &self.long_codes[base..base + self.dim_pad * self.ex_bits as usize / 8]
    }

    /// One vector's rescale factor.
    #[inline]
    pub fn long_factor(&self, vec_idx: usize) -> &ExFactor {
        &self.ex_factors[vec_idx]
    }
}
