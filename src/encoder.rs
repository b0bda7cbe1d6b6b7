//! Apply the CAQ quantizer to raw vectors, producing [`ClusterData`].
//!
//! Each vector is encoded relative to the cluster centroid, in the rotated
//! frame when the quantizer carries a rotator:
//!
//! 1. residual `r = P(v) - P(c)`, stored norm `x = |r|`;
//! 2. sign bits record the direction of each rotated dimension; extended
//!    bits refine the magnitude, with a per-vector scaling factor chosen
//!    by a heap-based sweep that maximizes alignment between the residual
//!    and its reconstruction on the `2^B`-step ladder
//!    `val = -1 + (2/2^B)(code + 0.5)`;
//! 3. a per-vector rescale factor `<r, val> / <val, val>` makes the
//!    extended-bit inner-product estimate unbiased.
//!
//! Sign codes are emitted in both the fast-scan block layout and the
//! single-vector layout (see `data` module docs); extended codes are
//! bit-sliced into planes.
//!
//! Learning the rotation or the centroids is out of scope; this module
//! only applies a fixed quantizer.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::config::FASTSCAN_BLOCK;
use crate::data::{ClusterData, ExFactor, QuantizerMeta};
use crate::error::{CaqError, Result};
use crate::memory::AlignedBuffer;
use crate::simd;

/// Encode `num_vectors` vectors (flat row-major slice) against `centroid`
/// into a cluster's packed representation.
pub fn encode_cluster(
    meta: &QuantizerMeta,
    centroid: &[f32],
    vectors: &[f32],
    num_vectors: usize,
) -> Result<ClusterData> {
    let dim = meta.dim_pad();
    if centroid.len() != dim {
        return Err(CaqError::DimensionMismatch {
            expected: dim,
            got: centroid.len(),
        });
    }
    if vectors.len() != num_vectors * dim {
        return Err(CaqError::InvalidParameter(format!(
            "expected {} floats for {num_vectors} vectors, got {}",
            num_vectors * dim,
            vectors.len()
        )));
    }

    let bits = meta.bits();
    let ex_bits = meta.ex_bits() as usize;
    let num_blocks = (num_vectors + FASTSCAN_BLOCK - 1) / FASTSCAN_BLOCK;
    let long_stride = meta.long_code_stride();

    let rot_centroid = meta.rotate_query(centroid)?;
    let mut centroid_buf = AlignedBuffer::<f32>::new(dim)?;
    centroid_buf.copy_from_slice(&rot_centroid);

    let mut factors = AlignedBuffer::<f32>::new(num_blocks * FASTSCAN_BLOCK)?;
    let mut ex_factors = vec![ExFactor::default(); num_vectors];

    let (mut fastscan, mut single, mut long_codes) = if bits > 0 {
        (
            AlignedBuffer::<u8>::new(num_blocks * 4 * dim)?,
            AlignedBuffer::<u8>::new(num_vectors * dim / 8)?,
            AlignedBuffer::<u8>::new(num_vectors * long_stride)?,
        )
    } else {
        (
            AlignedBuffer::<u8>::new(0)?,
            AlignedBuffer::<u8>::new(0)?,
            AlignedBuffer::<u8>::new(0)?,
        )
    };

    let sq_delta = 2.0 / (1u32 << bits) as f32;

    let mut residual = vec![0.0f32; dim];
    let mut unit_abs = vec![0.0f32; dim];
    let mut codes = vec![0u32; dim];
    let mut recon = vec![0.0f32; dim];

    for i in 0..num_vectors {
        let v = &vectors[i * dim..(i + 1) * dim];
        let rv = meta.rotate_query(v)?;
        for (r, (a, b)) in residual.iter_mut().zip(rv.iter().zip(rot_centroid.iter())) {
            *r = a - b;
        }
        let x = simd::norm(&residual);
        factors[i] = x;

        if bits == 0 {
            continue;
        }

        let inv_x = if x > 0.0 { 1.0 / x } else { 0.0 };
        for (a, &r) in unit_abs.iter_mut().zip(residual.iter()) {
            *a = (r * inv_x).abs();
        }
        let t = if ex_bits > 0 {
            optimal_code_scale(&unit_abs, ex_bits)
        } else {
            0.0
        };

        let ex_mask = (1u32 << ex_bits) - 1;
        for d in 0..dim {
            let mut ex = ((t * unit_abs[d] as f64 + GRID_EPS) as u32).min(ex_mask);
            if residual[d] < 0.0 {
                ex = (!ex) & ex_mask;
            }
            let sign = u32::from(residual[d] >= 0.0);
            let c = (sign << ex_bits) | ex;
            codes[d] = c;
            recon[d] = -1.0 + sq_delta * (c as f32 + 0.5);
        }

        let recon_sqr = simd::l2_sqr(&recon);
        ex_factors[i].rescale = if recon_sqr > f32::EPSILON {
            simd::dot(&residual, &recon) / recon_sqr
        } else {
            0.0
        };

        write_sign_codes(&codes, bits, dim, i, &mut fastscan, &mut single);
        write_long_code(&codes, ex_bits, dim, &mut long_codes[i * long_stride..]);
    }

    Ok(ClusterData::from_parts(
        num_vectors,
        meta,
        centroid_buf,
        factors,
        fastscan,
        single,
        long_codes,
        ex_factors,
    ))
}

fn write_sign_codes(
    codes: &[u32],
    bits: u8,
    dim: usize,
    vec_idx: usize,
    fastscan: &mut [u8],
    single: &mut [u8],
) {
    let sign_shift = bits - 1;
    let block = vec_idx / FASTSCAN_BLOCK;
    let k = vec_idx % FASTSCAN_BLOCK;
    let block_base = block * 4 * dim;
    let nibble_shift = (k / 16 * 4) as u32;
    let single_base = vec_idx * dim / 8;

    for g in 0..dim / 4 {
        let mut nibble = 0u8;
        for t in 0..4 {
            let d = 4 * g + t;
            let sign = ((codes[d] >> sign_shift) & 1) as u8;
            nibble |= sign << t;
            single[single_base + d / 8] |= sign << (d % 8);
        }
        fastscan[block_base + g * 16 + k % 16] |= nibble << nibble_shift;
    }
}

fn write_long_code(codes: &[u32], ex_bits: usize, dim: usize, out: &mut [u8]) {
    let plane_bytes = dim / 8;
    for p in 0..ex_bits {
        let plane = &mut out[p * plane_bytes..(p + 1) * plane_bytes];
        for d in 0..dim {
            plane[d / 8] |= (((codes[d] >> p) & 1) as u8) << (d % 8);
        }
    }
}

// ============================================================================
// Magnitude scale selection
// ============================================================================

// Absorbs float rounding when a scaled magnitude sits on a grid line.
const GRID_EPS: f64 = 1e-5;

// How far past full saturation of the largest magnitude the sweep looks.
const SWEEP_SLACK: f64 = 16.0;

/// Pick the scale `t` at which the unit residual magnitudes quantize best
/// onto the extended-code grid `{0.5, 1.5, ..}`.
///
/// Scaled up from zero, dimension `d` crosses onto grid step `k` at
/// `t = k / |u_d|`; between crossings every code is constant, so the
/// alignment between the magnitudes and their quantization only changes
/// at crossings. The crossings of all dimensions are visited in ascending
/// order (a min-heap merges the per-dimension sequences), the alignment
/// is updated incrementally at each one, and the best `t` seen wins.
///
/// Alignment is compared as `<u, g>^2 / |g|^2` for the grid point `g`
/// with `g_d = code_d + 0.5`, which ranks identically to the cosine and
/// needs no square root per crossing.
fn optimal_code_scale(unit_abs: &[f32], ex_bits: usize) -> f64 {
    let grid_max = (1u64 << ex_bits) - 1;
    let peak = unit_abs.iter().cloned().fold(0.0f32, f32::max) as f64;
    if peak <= f64::EPSILON {
        return 1.0;
    }
    let t_limit = (grid_max as f64 + SWEEP_SLACK) / peak;

    let mut code = vec![0u64; unit_abs.len()];
    let mut dot: f64 = unit_abs.iter().map(|&a| 0.5 * a as f64).sum();
    let mut energy = 0.25 * unit_abs.len() as f64;

    // Event time is keyed by its f64 bit pattern: for non-negative
    // floats, bit order equals numeric order.
    let mut crossings: BinaryHeap<Reverse<(u64, usize)>> = unit_abs
        .iter()
        .enumerate()
        .filter(|&(_, &a)| a > 0.0)
        .map(|(d, &a)| Reverse(((1.0 / a as f64).to_bits(), d)))
        .collect();

    let mut best_t = 0.0f64;
    let mut best_score = dot * dot / energy;

    while let Some(Reverse((t_bits, d))) = crossings.pop() {
        let t = f64::from_bits(t_bits);
        if t >= t_limit {
            // Pops arrive in ascending order; nothing closer remains.
            break;
        }

        code[d] += 1;
        dot += unit_abs[d] as f64;
        energy += 2.0 * code[d] as f64;

        let score = dot * dot / energy;
        if score > best_score {
            best_score = score;
            best_t = t;
        }

        if code[d] < grid_max {
            let next = (code[d] + 1) as f64 / unit_abs[d] as f64;
            if next < t_limit {
                crossings.push(Reverse((next.to_bits(), d)));
            }
        }
    }

    best_t
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
    }

    #[test]
    fn residual_norms_are_stored() {
        let dim = 64;
        let meta = QuantizerMeta::new(dim, 4, true, None).unwrap();
        let centroid = vec![0.25f32; dim];
        let vectors = random_vectors(5, dim, 1);
        let cluster = encode_cluster(&meta, &centroid, &vectors, 5).unwrap();

        for i in 0..5 {
            let v = &vectors[i * dim..(i + 1) * dim];
            let want: f32 = v
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt();
            let got = cluster.factor_o_l2norm(i / 32)[i % 32];
            assert!((got - want).abs() < 1e-4, "vector {i}: {got} vs {want}");
        }
    }

    #[test]
    fn fastscan_layout_matches_single_layout() {
        let dim = 128;
        let meta = QuantizerMeta::new(dim, 3, true, None).unwrap();
        let centroid = vec![0.0f32; dim];
        let n = 40; // spans two blocks, second partially filled
        let vectors = random_vectors(n, dim, 2);
        let cluster = encode_cluster(&meta, &centroid, &vectors, n).unwrap();

        for i in 0..n {
            let single = cluster.short_code_single(i);
            let block = cluster.short_code(i / 32);
            let k = i % 32;
            for d in 0..dim {
                let s_bit = (single[d / 8] >> (d % 8)) & 1;
                let byte = block[(d / 4) * 16 + k % 16];
                let nibble = if k < 16 { byte & 0x0F } else { byte >> 4 };
                let f_bit = (nibble >> (d % 4)) & 1;
                assert_eq!(s_bit, f_bit, "vector {i} dimension {d}");
            }
        }
    }

    #[test]
    fn sign_bits_follow_residual_signs() {
        let dim = 64;
        let meta = QuantizerMeta::new(dim, 5, true, None).unwrap();
        let centroid = vec![0.2f32; dim];
        let vectors = random_vectors(3, dim, 3);
        let cluster = encode_cluster(&meta, &centroid, &vectors, 3).unwrap();

        for i in 0..3 {
            let v = &vectors[i * dim..(i + 1) * dim];
            let single = cluster.short_code_single(i);
            for d in 0..dim {
                let bit = (single[d / 8] >> (d % 8)) & 1;
                let expect = u8::from(v[d] - centroid[d] >= 0.0);
                assert_eq!(bit, expect, "vector {i} dimension {d}");
            }
        }
    }

    #[test]
    fn extended_codes_flip_for_negative_dimensions() {
        // For a vector with mirrored components, the reconstruction must
        // be antisymmetric: flipping the residual sign complements the
        // extended code.
        let dim = 64;
        let bits = 5u8;
        let ex_bits = (bits - 1) as usize;
        let meta = QuantizerMeta::new(dim, bits, true, None).unwrap();
        let centroid = vec![0.0f32; dim];

        let half = random_vectors(1, dim / 2, 7);
        let mut v = half.clone();
        v.extend(half.iter().map(|x| -x));
        let cluster = encode_cluster(&meta, &centroid, &v, 1).unwrap();

        let long = cluster.long_code(0);
        let ex_mask = (1u32 << ex_bits) - 1;
        for d in 0..dim / 2 {
            let decode = |d: usize| -> u32 {
                let mut c = 0u32;
                for p in 0..ex_bits {
                    c |= (((long[p * dim / 8 + d / 8] >> (d % 8)) & 1) as u32) << p;
                }
                c
            };
            let pos = decode(d);
            let neg = decode(d + dim / 2);
            assert_eq!(
                neg,
                (!pos) & ex_mask,
                "dimension {d}: codes {pos} and {neg} are not complements"
            );
        }
    }

    #[test]
    fn rescale_reconstructs_residual_inner_products() {
        let dim = 128;
        let meta = QuantizerMeta::new(dim, 8, true, None).unwrap();
        let centroid = vec![0.1f32; dim];
        let vectors = random_vectors(4, dim, 4);
        let cluster = encode_cluster(&meta, &centroid, &vectors, 4).unwrap();

        let sq_delta = 2.0 / 256.0f32;
        for i in 0..4 {
            let v = &vectors[i * dim..(i + 1) * dim];
            let residual: Vec<f32> = v.iter().zip(centroid.iter()).map(|(a, b)| a - b).collect();
            let x = crate::simd::norm(&residual);

            // Reassemble the reconstruction from the packed codes.
            let single = cluster.short_code_single(i);
            let long = cluster.long_code(i);
            let mut recon = vec![0.0f32; dim];
            for d in 0..dim {
                let mut c = 0u32;
                for p in 0..7usize {
                    c |= (((long[p * dim / 8 + d / 8] >> (d % 8)) & 1) as u32) << p;
                }
                c |= (((single[d / 8] >> (d % 8)) & 1) as u32) << 7;
                recon[d] = -1.0 + sq_delta * (c as f32 + 0.5);
            }

            let rescale = cluster.long_factor(i).rescale;
            let approx: Vec<f32> = recon.iter().map(|&r| r * rescale).collect();
            let err = crate::simd::l2_distance_squared(&approx, &residual).sqrt();
            assert!(err < 0.05 * x, "vector {i}: reconstruction error {err} vs norm {x}");
        }
    }

    #[test]
    fn zero_bits_has_no_codes() {
        let dim = 64;
        let meta = QuantizerMeta::new(dim, 0, true, None).unwrap();
        let centroid = vec![0.0f32; dim];
        let vectors = random_vectors(2, dim, 5);
        let cluster = encode_cluster(&meta, &centroid, &vectors, 2).unwrap();
        assert_eq!(cluster.long_code(0).len(), 0);
        assert!(cluster.factor_o_l2norm(0)[0] > 0.0);
    }

    #[test]
    fn input_lengths_are_validated() {
        let meta = QuantizerMeta::new(64, 4, true, None).unwrap();
        let centroid = vec![0.0f32; 64];
        assert!(encode_cluster(&meta, &centroid, &[0.0; 100], 2).is_err());
        assert!(encode_cluster(&meta, &[0.0; 32], &[0.0; 128], 2).is_err());
    }
}
