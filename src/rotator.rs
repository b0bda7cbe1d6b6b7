//! Orthonormal rotation applied before quantization.
//!
//! Quantizing the rotated residual spreads information evenly across
//! dimensions, which is what makes the sign-bit direction estimate and the
//! extended-bit refinement accurate. The same matrix must be applied to the
//! query at search time; [`Rotator::apply`] is that transform.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{CaqError, Result};
use crate::simd;

/// A D×D orthonormal matrix, stored row-major. Shared by reference between
/// the quantized data and every per-query estimator.
#[derive(Debug, Clone)]
pub struct Rotator {
    dim: usize,
    mat: Vec<f32>,
}

impl Rotator {
    /// Wrap an existing row-major D×D matrix. Orthonormality is the
    /// caller's responsibility; only the shape is checked.
    pub fn from_matrix(dim: usize, mat: Vec<f32>) -> Result<Self> {
        if mat.len() != dim * dim {
            return Err(CaqError::InvalidParameter(format!(
                "rotation matrix has {} entries, expected {}",
                mat.len(),
                dim * dim
            )));
        }
        Ok(Self { dim, mat })
    }

    /// The identity rotation.
    pub fn identity(dim: usize) -> Self {
        let mut mat = vec![0.0f32; dim * dim];
        for i in 0..dim {
            mat[i * dim + i] = 1.0;
        }
        Self { dim, mat }
    }

    /// Random orthonormal rotation via Gram-Schmidt on Gaussian rows.
    pub fn random(dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut basis: Vec<Vec<f32>> = Vec::with_capacity(dim);

        for i in 0..dim {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();

            for b in &basis {
                let d = simd::dot(&v, b);
                for (vi, bi) in v.iter_mut().zip(b.iter()) {
                    *vi -= d * bi;
                }
            }

            let n = simd::norm(&v);
            if n > 1e-10 {
                for vi in &mut v {
                    *vi /= n;
                }
                basis.push(v);
            } else {
                // Degenerate draw: fall back to a unit axis.
                let mut v = vec![0.0f32; dim];
                v[i] = 1.0;
                basis.push(v);
            }
        }

        let mut mat = vec![0.0f32; dim * dim];
        for (i, row) in basis.iter().enumerate() {
            mat[i * dim..(i + 1) * dim].copy_from_slice(row);
        }
        Self { dim, mat }
    }

    /// Dimension of the rotation.
    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row-vector transform `v · P`.
    #[must_use]
    pub fn apply(&self, v: &[f32]) -> Vec<f32> {
        debug_assert_eq!(v.len(), self.dim);
        let mut out = vec![0.0f32; self.dim];
        for (i, &vi) in v.iter().enumerate() {
            let row = &self.mat[i * self.dim..(i + 1) * self.dim];
            for (o, &m) in out.iter_mut().zip(row.iter()) {
                *o += vi * m;
            }
        }
        out
    }
}
