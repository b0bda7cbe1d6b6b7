//! Bit-level inner-product kernels.
//!
//! Everything here operates on packed codes: 1-bit sign codes (bit `d % 8`
//! of byte `d / 8`), bit-sliced extended codes (one plane of `D/8` bytes
//! per extended bit), and the bitplane-transposed 8-bit scalar
//! quantization of the query used by the single-vector warm-up estimate.
//! Dimensions are always padded to a multiple of 64, so every kernel walks
//! whole `u64` words assembled from little-endian byte groups.

/// Number of bitplanes used for the scalar-quantized query.
pub const QUERY_SQ_BITS: usize = 8;

#[inline]
fn load_word(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Transpose 8-bit query codes into bitplane words.
///
/// Output layout: for each chunk `c` of 64 dimensions, words
/// `out[c*bits + p]` hold bit `p` of dimensions `64c..64c+64`, one
/// dimension per bit position.
pub fn transpose_bin(codes: &[u16], out: &mut [u64], dim: usize, bits: usize) {
    debug_assert_eq!(dim % 64, 0);
    debug_assert_eq!(codes.len(), dim);
    debug_assert_eq!(out.len(), dim / 64 * bits);

    for chunk in 0..dim / 64 {
        let base = chunk * 64;
        for p in 0..bits {
            let mut word = 0u64;
            for t in 0..64 {
                word |= (((codes[base + t] >> p) & 1) as u64) << t;
            }
            out[chunk * bits + p] = word;
        }
    }
}

/// Bitplane-level inner product of the query's scalar-quantized codes
/// with a vector's 1-bit sign code.
///
/// Evaluates `sum over set sign bits d of (vl_shift + delta * sq[d])`
/// using one popcount per plane per 64-dimension chunk, where `sq` is the
/// transposed query in `query_bin` (layout as [`transpose_bin`]).
pub fn warmup_ip(
    short_code: &[u8],
    query_bin: &[u64],
    delta: f32,
    vl_shift: f32,
    dim: usize,
    bits: usize,
) -> f32 {
    debug_assert_eq!(dim % 64, 0);
    debug_assert!(short_code.len() >= dim / 8);

    let mut code_sum = 0u64;
    let mut set_cnt = 0u32;
    for (chunk, bytes) in short_code[..dim / 8].chunks_exact(8).enumerate() {
        let code_word = load_word(bytes);
        set_cnt += code_word.count_ones();
        let planes = &query_bin[chunk * bits..(chunk + 1) * bits];
        for (p, &plane) in planes.iter().enumerate() {
            code_sum += ((plane & code_word).count_ones() as u64) << p;
        }
    }
    delta * code_sum as f32 + vl_shift * set_cnt as f32
}

/// Masked inner product: sum of `query[d]` over dimensions whose sign bit
/// is set in `sign_code`.
pub fn mask_ip(query: &[f32], sign_code: &[u8], dim: usize) -> f32 {
    debug_assert_eq!(dim % 64, 0);
    debug_assert!(query.len() >= dim);
    debug_assert!(sign_code.len() >= dim / 8);

    let mut sum = 0.0f32;
    for (chunk, bytes) in sign_code[..dim / 8].chunks_exact(8).enumerate() {
        let mut word = load_word(bytes);
        let base = chunk * 64;
        while word != 0 {
            let t = word.trailing_zeros() as usize;
            sum += query[base + t];
            word &= word - 1;
        }
    }
    sum
}

/// Inner product of the query with a bit-sliced extended code:
/// `sum_d query[d] * ex[d]` where `ex[d]` is reassembled from `P` planes.
#[inline]
fn ip_ex_planes<const P: usize>(query: &[f32], long_code: &[u8], dim: usize) -> f32 {
    if P == 0 {
        return 0.0;
    }
    let plane_bytes = dim / 8;
    debug_assert!(long_code.len() >= P * plane_bytes);

    let mut total = 0.0f32;
    for p in 0..P {
        let plane = &long_code[p * plane_bytes..(p + 1) * plane_bytes];
        total += ((1u32 << p) as f32) * mask_ip(query, plane, dim);
    }
    total
}

/// Signature of the extended-bit inner-product routines.
pub type IpFn = fn(&[f32], &[u8], usize) -> f32;

/// Select the inner-product routine for `ex_bits` extended bitplanes.
///
/// The family is indexed by `ex_bits` in `[0, 12]`; each entry is a
/// monomorphized kernel with its plane loop unrolled.
pub fn ip_func(ex_bits: u8) -> IpFn {
    match ex_bits {
        0 => ip_ex_planes::<0>,
        1 => ip_ex_planes::<1>,
        2 => ip_ex_planes::<2>,
        3 => ip_ex_planes::<3>,
        4 => ip_ex_planes::<4>,
        5 => ip_ex_planes::<5>,
        6 => ip_ex_planes::<6>,
        7 => ip_ex_planes::<7>,
        8 => ip_ex_planes::<8>,
        9 => ip_ex_planes::<9>,
        10 => ip_ex_planes::<10>,
        11 => ip_ex_planes::<11>,
        12 => ip_ex_planes::<12>,
        _ => unreachable!("ex_bits {ex_bits} out of range (max 12)"),
    }
}
