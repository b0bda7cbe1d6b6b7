//! Query-dependent lookup table for fast-scan scoring.
//!
//! For every group of 4 dimensions the table stores the 16 possible
//! partial inner products of the query segment with a ±1 sign pattern.
//! Scoring a block of 32 vectors is then `D/4` shuffle-style gathers per
//! 16 lanes instead of `32·D` multiplies.
//!
//! The table also carries the scratch the accurate stage needs: the
//! prepared query, its sum, and the 32 raw sign inner products of the
//! most recently scanned block. [`Lut::ext_ip`] folds those into the
//! extended-bit reconstruction without ever de-interleaving the
//! fast-scan codes.

use crate::bits::{ip_func, IpFn};
use crate::config::FASTSCAN_BLOCK;
use crate::error::Result;
use crate::memory::AlignedBuffer;
use crate::simd;

/// SIMD lookup table plus accurate-stage scratch for one query.
#[derive(Debug)]
pub struct Lut {
    dim: usize,
    ip_fn: IpFn,
    /// `dim/4` rows of 16 partial inner products.
    table: AlignedBuffer<f32>,
    /// The query `prepare` was last called with.
    query: AlignedBuffer<f32>,
    q_l2sqr: f32,
    sum_q: f32,
    inv_sqrt_d: f32,
    /// Raw sign inner products of the last scanned block.
    block_sign_ip: [f32; FASTSCAN_BLOCK],
}

impl Lut {
    /// Reserve storage for a padded dimension and `ex_bits` extended bits.
    pub fn new(dim: usize, ex_bits: u8) -> Result<Self> {
        debug_assert_eq!(dim % 64, 0);
        Ok(Self {
            dim,
            ip_fn: ip_func(ex_bits),
            table: AlignedBuffer::new(dim / 4 * 16)?,
            query: AlignedBuffer::new(dim)?,
            q_l2sqr: 0.0,
            sum_q: 0.0,
            inv_sqrt_d: 1.0 / (dim as f32).sqrt(),
            block_sign_ip: [0.0; FASTSCAN_BLOCK],
        })
    }

    /// Build the table for a query segment (already rotated, and already
    /// centroid-shifted for L2 search).
    pub fn prepare(&mut self, q: &[f32]) {
        debug_assert_eq!(q.len(), self.dim);
        self.query.copy_from_slice(q);
        self.q_l2sqr = simd::l2_sqr(q);
        self.sum_q = q.iter().sum();

        let table = self.table.as_mut_slice();
        for (g, seg) in q.chunks_exact(4).enumerate() {
            let row = &mut table[g * 16..(g + 1) * 16];
            for (c, slot) in row.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for (t, &qt) in seg.iter().enumerate() {
                    acc += if (c >> t) & 1 != 0 { qt } else { -qt };
                }
                *slot = acc;
            }
        }
    }

    /// Squared L2 norm of the prepared query.
    #[inline]
    #[must_use]
    pub fn q_l2sqr(&self) -> f32 {
        self.q_l2sqr
    }

    /// Score one fast-scan block of 32 vectors.
    ///
    /// Writes `2 · x_j · <q, sgn_j> / sqrt(D)` per vector into `out` when
    /// present. With `out == None` the call still refreshes the internal
    /// block state, which is what validates a following [`Lut::ext_ip`]
    /// for any vector of this block.
    pub fn comp_fast_ip(
        &mut self,
        o_l2norm: &[f32],
        short_code: &[u8],
        out: Option<&mut [f32; FASTSCAN_BLOCK]>,
    ) {
        debug_assert_eq!(short_code.len(), 4 * self.dim);
        self.accumulate(short_code);

        if let Some(out) = out {
            let scale = 2.0 * self.inv_sqrt_d;
            for (o, (&x, &ip)) in out
                .iter_mut()
                .zip(o_l2norm.iter().zip(self.block_sign_ip.iter()))
            {
                *o = scale * x * ip;
            }
        }
    }

    /// Inner product of the prepared query with vector `j`'s full B-bit
    /// reconstruction, `sq_delta = 2 / 2^B`.
    ///
    /// Valid only for `j` inside the block most recently passed to
    /// [`Lut::comp_fast_ip`]; the sign contribution comes from the stored
    /// block state.
    pub fn ext_ip(&self, long_code: &[u8], sq_delta: f32, j: usize) -> f32 {
        let mask_ip_j = 0.5 * (self.block_sign_ip[j] + self.sum_q);
        let ex = (self.ip_fn)(&self.query, long_code, self.dim);
        mask_ip_j + sq_delta * ex + (-1.0 + 0.5 * sq_delta) * self.sum_q
    }

    fn accumulate(&mut self, short_code: &[u8]) {
        #[cfg(all(target_arch = "x86_64", feature = "nightly"))]
        if is_x86_feature_detected!("avx512f") {
            // SAFETY: avx512f verified at runtime.
            unsafe { self.accumulate_avx512(short_code) };
            return;
        }
        self.accumulate_scalar(short_code);
    }

    fn accumulate_scalar(&mut self, short_code: &[u8]) {
        let table = self.table.as_slice();
        let mut sums = [0.0f32; FASTSCAN_BLOCK];
        for (g, bytes) in short_code.chunks_exact(16).enumerate() {
            let row = &table[g * 16..(g + 1) * 16];
            for (k, &b) in bytes.iter().enumerate() {
                sums[k] += row[(b & 0x0F) as usize];
                sums[k + 16] += row[(b >> 4) as usize];
            }
        }
        self.block_sign_ip = sums;
    }

    /// One `vpermps` gather per nibble half: the 16 low nibbles index the
    /// group's LUT row for vectors 0..16, the high nibbles for 16..32.
    #[cfg(all(target_arch = "x86_64", feature = "nightly"))]
    #[target_feature(enable = "avx512f")]
    unsafe fn accumulate_avx512(&mut self, short_code: &[u8]) {
        use std::arch::x86_64::*;

        let table = self.table.as_ptr();
        let mut acc_lo = _mm512_setzero_ps();
        let mut acc_hi = _mm512_setzero_ps();
        let nibble_mask = _mm512_set1_epi32(0x0F);

        for g in 0..self.dim / 4 {
            let row = _mm512_load_ps(table.add(g * 16));
            let codes = _mm_loadu_si128(short_code.as_ptr().add(g * 16) as *const __m128i);
            let codes32 = _mm512_cvtepu8_epi32(codes);
            let lo = _mm512_and_epi32(codes32, nibble_mask);
            let hi = _mm512_srli_epi32::<4>(codes32);
            acc_lo = _mm512_add_ps(acc_lo, _mm512_permutexvar_ps(lo, row));
            acc_hi = _mm512_add_ps(acc_hi, _mm512_permutexvar_ps(hi, row));
        }

        _mm512_storeu_ps(self.block_sign_ip.as_mut_ptr(), acc_lo);
        _mm512_storeu_ps(self.block_sign_ip.as_mut_ptr().add(16), acc_hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pack one block in fast-scan layout from per-vector sign bit rows.
    fn pack_block(signs: &[Vec<u8>], dim: usize) -> Vec<u8> {
        let mut out = vec![0u8; 4 * dim];
        for (k, row) in signs.iter().enumerate() {
            for g in 0..dim / 4 {
                let mut nibble = 0u8;
                for t in 0..4 {
                    nibble |= row[4 * g + t] << t;
                }
                out[g * 16 + k % 16] |= nibble << (k / 16 * 4);
            }
        }
        out
    }

    #[test]
    fn table_rows_enumerate_sign_patterns() {
        let dim = 64;
        let mut lut = Lut::new(dim, 0).unwrap();
        let q: Vec<f32> = (0..dim).map(|i| i as f32 * 0.1).collect();
        lut.prepare(&q);

        // Row 0, code 0b0101: +q0 -q1 +q2 -q3.
        let want = q[0] - q[1] + q[2] - q[3];
        assert!((lut.table[0b0101] - want).abs() < 1e-5);
        // Code 0: all negative.
        let want: f32 = -(q[0] + q[1] + q[2] + q[3]);
        assert!((lut.table[0] - want).abs() < 1e-5);
    }

    #[test]
    fn block_scan_matches_naive_sign_ip() {
        let dim = 64;
        let mut lut = Lut::new(dim, 0).unwrap();
        let q: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.37).sin()).collect();
        lut.prepare(&q);

        let signs: Vec<Vec<u8>> = (0..FASTSCAN_BLOCK)
            .map(|k| (0..dim).map(|d| ((d * 13 + k * 7) % 3 == 0) as u8).collect())
            .collect();
        let block = pack_block(&signs, dim);
        let norms = [1.0f32; FASTSCAN_BLOCK];

        let mut out = [0.0f32; FASTSCAN_BLOCK];
        lut.comp_fast_ip(&norms, &block, Some(&mut out));

        let scale = 2.0 / (dim as f32).sqrt();
        for k in 0..FASTSCAN_BLOCK {
            let want: f32 = (0..dim)
                .map(|d| if signs[k][d] != 0 { q[d] } else { -q[d] })
                .sum();
            assert!(
                (out[k] - scale * want).abs() < 1e-3,
                "vector {k}: {} vs {}",
                out[k],
                scale * want
            );
        }
    }

    #[test]
    fn scan_without_output_still_updates_block_state() {
        let dim = 64;
        let mut lut = Lut::new(dim, 0).unwrap();
        let q = vec![1.0f32; dim];
        lut.prepare(&q);

        let signs: Vec<Vec<u8>> = (0..FASTSCAN_BLOCK)
            .map(|k| (0..dim).map(|d| ((d + k) % 2) as u8).collect())
            .collect();
        let block = pack_block(&signs, dim);
        lut.comp_fast_ip(&[1.0; FASTSCAN_BLOCK], &block, None);

        // With q all ones, <q, sgn> = set_bits - unset_bits = 0 here.
        for k in 0..FASTSCAN_BLOCK {
            assert!(lut.block_sign_ip[k].abs() < 1e-4);
        }
    }

    #[test]
    fn ext_ip_reconstructs_full_code_ip() {
        let dim = 64;
        let bits = 4u8;
        let ex_bits = bits - 1;
        let sq_delta = 2.0 / (1u32 << bits) as f32;
        let mut lut = Lut::new(dim, ex_bits).unwrap();
        let q: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.21).cos()).collect();
        lut.prepare(&q);

        // One synthetic vector with known total codes, placed at j = 0.
        let codes: Vec<u32> = (0..dim).map(|d| ((d * 5 + 2) % 16) as u32).collect();
        let signs: Vec<Vec<u8>> = (0..FASTSCAN_BLOCK)
            .map(|k| {
                if k == 0 {
                    codes.iter().map(|&c| (c >> 3) as u8).collect()
                } else {
                    vec![0u8; dim]
                }
            })
            .collect();
        let block = pack_block(&signs, dim);
        let mut long_code = vec![0u8; ex_bits as usize * dim / 8];
        for (d, &c) in codes.iter().enumerate() {
            for p in 0..ex_bits as usize {
                if (c >> p) & 1 != 0 {
                    long_code[p * dim / 8 + d / 8] |= 1 << (d % 8);
                }
            }
        }

        lut.comp_fast_ip(&[1.0; FASTSCAN_BLOCK], &block, None);
        let got = lut.ext_ip(&long_code, sq_delta, 0);

        let want: f32 = (0..dim)
            .map(|d| q[d] * (-1.0 + sq_delta * (codes[d] as f32 + 0.5)))
            .sum();
        assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
    }
}
