//! Fast-scan cluster estimator: 32-wide distance estimates per block.

use crate::config::{DistType, SearcherConfig, FASTSCAN_BLOCK};
use crate::data::{ClusterData, QuantizerMeta};
use crate::error::{CaqError, Result};
use crate::estimator::{Lut, RuntimeMetrics};
use crate::memory::{mem_prefetch_l1, mem_prefetch_l2};
use crate::simd;

/// Estimates distances between one query and the quantized vectors of a
/// cluster, a fast-scan block of 32 at a time.
///
/// Call order within a query: `prepare(cluster)`, then per block
/// `comp_fast_dist(block_idx, ..)`, then `comp_accurate_dist(vec_idx)`
/// for surviving vectors of that same block. The lookup table carries
/// per-block state, so accurate refinement is only valid for the most
/// recently scanned block.
#[derive(Debug)]
pub struct ClusterEstimator<'a> {
    dim: usize,
    bits: u8,
    is_ip: bool,
    cfg: SearcherConfig,
    sq_delta: f32,
    prune_bound: f32,
    ip_q_c: f32,
    q_l2sqr: f32,
    query: Vec<f32>,
    lut: Lut,
    cluster: Option<&'a ClusterData>,
    last_block: usize,
    metrics: RuntimeMetrics,
}

impl<'a> ClusterEstimator<'a> {
    /// Build an estimator for `query` over fast-scan quantized data,
    /// accepting whichever distance type `cfg` selects.
    ///
    /// The query is rotated here if the quantizer carries a rotator.
    pub fn new(meta: &QuantizerMeta, cfg: SearcherConfig, query: &[f32]) -> Result<Self> {
        if !cfg.use_fastscan || !meta.use_fastscan() {
            return Err(CaqError::LayoutMismatch(
                "cluster estimator requires fast-scan layout; use ClusterSingleEstimator instead"
                    .into(),
            ));
        }
        let query = meta.rotate_query(query)?;
        let bits = meta.bits();
        Ok(Self {
            dim: meta.dim_pad(),
            bits,
            is_ip: cfg.dist_type == DistType::Ip,
            cfg,
            sq_delta: 2.0 / (1u32 << bits) as f32,
            prune_bound: 0.0,
            ip_q_c: 0.0,
            q_l2sqr: 0.0,
            query,
            lut: Lut::new(meta.dim_pad(), meta.ex_bits())?,
            cluster: None,
            last_block: usize::MAX,
            metrics: RuntimeMetrics::default(),
        })
    }

    /// Like [`ClusterEstimator::new`], but fails with a config mismatch
    /// unless `cfg` selects squared-L2 distance.
    pub fn new_l2(meta: &QuantizerMeta, cfg: SearcherConfig, query: &[f32]) -> Result<Self> {
        if cfg.dist_type != DistType::L2Sqr {
            return Err(CaqError::ConfigMismatch {
                expected: DistType::L2Sqr,
                actual: cfg.dist_type,
            });
        }
        Self::new(meta, cfg, query)
    }

    /// Like [`ClusterEstimator::new`], but fails with a config mismatch
    /// unless `cfg` selects inner-product distance.
    pub fn new_ip(meta: &QuantizerMeta, cfg: SearcherConfig, query: &[f32]) -> Result<Self> {
        if cfg.dist_type != DistType::Ip {
            return Err(CaqError::ConfigMismatch {
                expected: DistType::Ip,
                actual: cfg.dist_type,
            });
        }
        Self::new(meta, cfg, query)
    }

    /// Set the variance-derived pruning bound used by `vars_est_dist`.
    pub fn set_prune_bound(&mut self, vars: f32) {
        self.prune_bound = vars * self.cfg.vars_bound_m;
    }

    /// Work counters accumulated since construction.
    #[must_use]
    pub fn runtime_metrics(&self) -> RuntimeMetrics {
        self.metrics
    }

    /// Point the estimator at a cluster and precompute query-vs-centroid
    /// terms. Must be called before any distance computation; may be
    /// called again for the next cluster.
    pub fn prepare(&mut self, cluster: &'a ClusterData) {
        self.cluster = Some(cluster);
        self.last_block = usize::MAX;

        if self.is_ip {
            self.ip_q_c = simd::dot(&self.query, cluster.centroid());
            self.lut.prepare(&self.query);
        } else {
            let residual = simd::sub(&self.query, cluster.centroid());
            self.lut.prepare(&residual);
        }
        self.q_l2sqr = self.lut.q_l2sqr();

        if self.bits > 0 && cluster.num_blocks() > 0 {
            mem_prefetch_l1(cluster.short_code(0).as_ptr(), self.dim / 16);
        }
    }

    /// Pruning-only estimates for a block, from residual norms alone.
    pub fn vars_est_dist(&self, block_idx: usize, out: &mut [f32; FASTSCAN_BLOCK]) {
        if self.is_ip {
            out.fill(self.ip_q_c - self.prune_bound);
            return;
        }
        let cluster = self.cluster.expect("prepare() must be called first");
        let factors = cluster.factor_o_l2norm(block_idx);
        let base = self.q_l2sqr - 2.0 * self.prune_bound;
        for (o, &x) in out.iter_mut().zip(factors.iter()) {
            *o = (x * x + base).max(0.0);
        }
    }

    /// Fast 1-bit distance estimates for a block of 32 vectors.
    ///
    /// With `out == None` the call only refreshes the lookup table's
    /// block state so that `comp_accurate_dist` becomes valid for this
    /// block. Falls back to `vars_est_dist` when the quantizer has zero
    /// bits.
    pub fn comp_fast_dist(&mut self, block_idx: usize, out: Option<&mut [f32; FASTSCAN_BLOCK]>) {
        if self.bits == 0 {
            if let Some(out) = out {
                self.vars_est_dist(block_idx, out);
            }
            return;
        }

        let cluster = self.cluster.expect("prepare() must be called first");
        let factors = cluster.factor_o_l2norm(block_idx);
        let code = cluster.short_code(block_idx);

        match out {
            Some(out) => {
                self.lut.comp_fast_ip(factors, code, Some(&mut *out));
                if self.is_ip {
                    for o in out.iter_mut() {
                        *o = *o * 0.5 + self.ip_q_c;
                    }
                } else {
                    for (o, &x) in out.iter_mut().zip(factors.iter()) {
                        *o = (x * x + self.q_l2sqr - *o).max(0.0);
                    }
                }
            }
            None => self.lut.comp_fast_ip(factors, code, None),
        }

        self.last_block = block_idx;
        self.metrics.fast_bitsum += FASTSCAN_BLOCK * self.dim;

        if block_idx + 1 < cluster.num_blocks() {
            mem_prefetch_l1(cluster.short_code(block_idx + 1).as_ptr(), self.dim / 16);
        }
        if self.bits > 1 {
            let first = block_idx * FASTSCAN_BLOCK;
            if first < cluster.num_vectors() {
                let code = cluster.long_code(first);
                mem_prefetch_l2(code.as_ptr(), code.len() / 64 + 1);
            }
        }
    }

    /// Accurate distance for one vector, using its extended-bit code.
    ///
    /// Only valid when the most recent `comp_fast_dist` call covered this
    /// vector's block (debug-asserted).
    pub fn comp_accurate_dist(&mut self, vec_idx: usize) -> f32 {
        let cluster = self.cluster.expect("prepare() must be called first");
        let block_idx = vec_idx / FASTSCAN_BLOCK;
        let j = vec_idx % FASTSCAN_BLOCK;
        let x = cluster.factor_o_l2norm(block_idx)[j];
        let x_sqr = x * x;

        self.metrics.total_comp_cnt += 1;

        if self.bits == 0 {
            return if self.is_ip {
                self.ip_q_c
            } else {
                x_sqr + self.q_l2sqr
            };
        }

        debug_assert_eq!(
            self.last_block, block_idx,
            "comp_fast_dist({block_idx}) must precede comp_accurate_dist({vec_idx})"
        );

        let long_code = cluster.long_code(vec_idx);
        let rescale = cluster.long_factor(vec_idx).rescale;
        let ip_o_q = rescale * self.lut.ext_ip(long_code, self.sq_delta, j);

        self.metrics.acc_bitsum += self.dim * (self.bits as usize - 1);

        if self.is_ip {
            ip_o_q + self.ip_q_c
        } else {
            x_sqr + self.q_l2sqr - 2.0 * ip_o_q
        }
    }
}
