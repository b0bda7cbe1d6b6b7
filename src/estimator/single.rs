//! Per-vector estimators for layouts without fast-scan blocking.
//!
//! The fast stage here cannot lean on the shuffle LUT; instead the query
//! is 8-bit scalar-quantized once per `prepare` and bit-transposed, so a
//! 1-bit estimate costs one popcount per bitplane word. The accurate
//! stage evaluates the same extended-bit reconstruction as the fast-scan
//! path, via the dispatched plane-sliced inner-product kernels.

use crate::bits::{self, IpFn, QUERY_SQ_BITS};
use crate::config::{DistType, SearcherConfig, CONST_BOUND, EST_ERROR, FASTSCAN_BLOCK};
use crate::data::{ClusterData, ExFactor, QuantizerMeta};
use crate::error::{CaqError, Result};
use crate::estimator::RuntimeMetrics;
use crate::simd;

/// Query state shared by the single-vector estimator variants.
#[derive(Debug)]
struct SingleCore {
    dim: usize,
    bits: u8,
    is_ip: bool,
    cfg: SearcherConfig,
    caq_delta: f32,
    one_over_sqrt_d: f32,
    ip_fn: IpFn,

    query: Vec<f32>,
    query_sq: Vec<u16>,
    query_bin: Vec<u64>,
    delta: f32,
    q_vl: f32,
    sum_q: f32,
    q_l2sqr: f32,
    q_l2norm: f32,
    ip_q_c: f32,
    prune_bound: f32,
    metrics: RuntimeMetrics,
}

impl SingleCore {
    fn new(meta: &QuantizerMeta, cfg: SearcherConfig) -> Result<Self> {
        if cfg.use_fastscan || meta.use_fastscan() {
            return Err(CaqError::LayoutMismatch(
                "single-vector estimator requires non-fast-scan layout; use ClusterEstimator instead"
                    .into(),
            ));
        }
        let dim = meta.dim_pad();
        let bits = meta.bits();
        Ok(Self {
            dim,
            bits,
            is_ip: cfg.dist_type == DistType::Ip,
            cfg,
            caq_delta: 2.0 / (1u32 << bits) as f32,
            one_over_sqrt_d: 1.0 / (dim as f32).sqrt(),
            ip_fn: bits::ip_func(meta.ex_bits()),
            query: Vec::new(),
            query_sq: Vec::new(),
            query_bin: Vec::new(),
            delta: 0.0,
            q_vl: 0.0,
            sum_q: 0.0,
            q_l2sqr: 0.0,
            q_l2norm: 0.0,
            ip_q_c: 0.0,
            prune_bound: 0.0,
            metrics: RuntimeMetrics::default(),
        })
    }

    /// Scalar-quantize and bit-transpose a prepared (rotated, and for L2
    /// centroid-shifted) query.
    fn prepare(&mut self, query: Vec<f32>) {
        debug_assert_eq!(query.len(), self.dim);
        self.q_l2sqr = simd::l2_sqr(&query);
        self.q_l2norm = self.q_l2sqr.sqrt();
        self.sum_q = query.iter().sum();

        let q_vl = query.iter().copied().fold(f32::INFINITY, f32::min);
        let q_vr = query.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        // The 0.01 margin keeps the top code strictly below 2^bits.
        let delta =
            ((q_vr - q_vl) / ((1 << QUERY_SQ_BITS) as f32 - 0.01)).max(f32::MIN_POSITIVE);
        self.q_vl = q_vl;
        self.delta = delta;

        self.query_sq = query.iter().map(|&v| ((v - q_vl) / delta) as u16).collect();
        self.query_bin = vec![0u64; self.dim / 64 * QUERY_SQ_BITS];
        bits::transpose_bin(&self.query_sq, &mut self.query_bin, self.dim, QUERY_SQ_BITS);

        self.query = query;
    }

    fn set_prune_bound(&mut self, vars: f32) {
        self.prune_bound = vars * self.cfg.vars_bound_m;
    }

    fn vars_est_dist(&self, o_l2norm: f32) -> f32 {
        if self.is_ip {
            return self.ip_q_c - self.prune_bound;
        }
        (o_l2norm * o_l2norm + self.q_l2sqr - 2.0 * self.prune_bound).max(0.0)
    }

    fn comp_fast_dist(&mut self, o_l2norm: f32, short_code: &[u8]) -> f32 {
        if self.bits == 0 {
            return self.vars_est_dist(o_l2norm);
        }

        let tmp = bits::warmup_ip(
            short_code,
            &self.query_bin,
            self.delta,
            self.q_vl + 0.5 * self.delta,
            self.dim,
            QUERY_SQ_BITS,
        );
        let ip_oa1_qq = (tmp - (0.5 * self.sum_q - CONST_BOUND * self.q_l2norm))
            * (4.0 / EST_ERROR * self.one_over_sqrt_d)
            * o_l2norm;

        self.metrics.fast_bitsum += self.dim;

        if self.is_ip {
            ip_oa1_qq * 0.5
        } else {
            (self.q_l2sqr + o_l2norm * o_l2norm - ip_oa1_qq).max(0.0)
        }
    }

    fn comp_accurate_dist(
        &mut self,
        o_l2norm: f32,
        short_code: &[u8],
        long_code: &[u8],
        ex_fac: &ExFactor,
    ) -> f32 {
        let o_l2sqr = o_l2norm * o_l2norm;
        self.metrics.total_comp_cnt += 1;

        if self.bits == 0 {
            return if self.is_ip {
                self.ip_q_c
            } else {
                o_l2sqr + self.q_l2sqr
            };
        }

        let ip_oa1_q = bits::mask_ip(&self.query, short_code, self.dim);
        let ex_ip = (self.ip_fn)(&self.query, long_code, self.dim);
        let tmp = ip_oa1_q + ex_ip * self.caq_delta + (-1.0 + 0.5 * self.caq_delta) * self.sum_q;
        let ip_o_q = ex_fac.rescale * tmp;

        self.metrics.acc_bitsum += self.dim * (self.bits as usize - 1);

        if self.is_ip {
            ip_o_q + self.ip_q_c
        } else {
            o_l2sqr + self.q_l2sqr - 2.0 * ip_o_q
        }
    }
}

/// Flat single-vector estimator: the query is prepared once at
/// construction and scored against caller-supplied per-vector views.
pub struct SingleEstimator {
    core: SingleCore,
}

impl SingleEstimator {
    /// Build and prepare an estimator for `query` (rotated here if the
    /// quantizer carries a rotator).
    pub fn new(meta: &QuantizerMeta, cfg: SearcherConfig, query: &[f32]) -> Result<Self> {
        let mut core = SingleCore::new(meta, cfg)?;
        core.prepare(meta.rotate_query(query)?);
        Ok(Self { core })
    }

    /// Set the variance-derived pruning bound used by `vars_est_dist`.
    pub fn set_prune_bound(&mut self, vars: f32) {
        self.core.set_prune_bound(vars);
    }

    /// Work counters accumulated since construction.
    #[must_use]
    pub fn runtime_metrics(&self) -> RuntimeMetrics {
        self.core.metrics
    }

    /// Pruning-only estimate from the residual norm alone.
    pub fn vars_est_dist(&self, o_l2norm: f32) -> f32 {
        self.core.vars_est_dist(o_l2norm)
    }

    /// Fast 1-bit estimate from a vector's sign code.
    pub fn comp_fast_dist(&mut self, o_l2norm: f32, short_code: &[u8]) -> f32 {
        self.core.comp_fast_dist(o_l2norm, short_code)
    }

    /// Accurate estimate from a vector's full code and rescale factor.
    pub fn comp_accurate_dist(
        &mut self,
        o_l2norm: f32,
        short_code: &[u8],
        long_code: &[u8],
        ex_fac: &ExFactor,
    ) -> f32 {
        self.core
            .comp_accurate_dist(o_l2norm, short_code, long_code, ex_fac)
    }
}

/// Per-cluster single-vector estimator: same contract as
/// [`crate::ClusterEstimator`] but without 32-wide blocking.
///
/// Only squared-L2 distance is implemented; preparing an inner-product
/// instance fails with [`CaqError::Unsupported`].
#[derive(Debug)]
pub struct ClusterSingleEstimator<'a> {
    core: SingleCore,
    query: Vec<f32>,
    cluster: Option<&'a ClusterData>,
}

impl<'a> ClusterSingleEstimator<'a> {
    /// Build an estimator for `query` over single-layout quantized data.
    pub fn new(meta: &QuantizerMeta, cfg: SearcherConfig, query: &[f32]) -> Result<Self> {
        let core = SingleCore::new(meta, cfg)?;
        let query = meta.rotate_query(query)?;
        Ok(Self {
            core,
            query,
            cluster: None,
        })
    }

    /// Set the variance-derived pruning bound used by `vars_est_dist`.
    pub fn set_prune_bound(&mut self, vars: f32) {
        self.core.set_prune_bound(vars);
    }

    /// Work counters accumulated since construction.
    #[must_use]
    pub fn runtime_metrics(&self) -> RuntimeMetrics {
        self.core.metrics
    }

    /// Prepare the query against a cluster's centroid.
    pub fn prepare(&mut self, cluster: &'a ClusterData) -> Result<()> {
        if self.core.is_ip {
            return Err(CaqError::Unsupported(
                "inner-product distance is not implemented for the per-cluster single-vector \
                 estimator"
                    .into(),
            ));
        }
        let residual = simd::sub(&self.query, cluster.centroid());
        self.core.prepare(residual);
        self.cluster = Some(cluster);
        Ok(())
    }

    fn o_l2norm(&self, vec_idx: usize) -> (f32, &'a ClusterData) {
        let cluster = self.cluster.expect("prepare() must be called first");
        let block_idx = vec_idx / FASTSCAN_BLOCK;
        let j = vec_idx % FASTSCAN_BLOCK;
        (cluster.factor_o_l2norm(block_idx)[j], cluster)
    }

    /// Pruning-only estimate for one vector.
    pub fn vars_est_dist(&self, vec_idx: usize) -> f32 {
        let (x, _) = self.o_l2norm(vec_idx);
        self.core.vars_est_dist(x)
    }

    /// Fast 1-bit estimate for one vector.
    pub fn comp_fast_dist(&mut self, vec_idx: usize) -> f32 {
        let (x, cluster) = self.o_l2norm(vec_idx);
        self.core.comp_fast_dist(x, cluster.short_code_single(vec_idx))
    }

    /// Accurate estimate for one vector.
    pub fn comp_accurate_dist(&mut self, vec_idx: usize) -> f32 {
        let (x, cluster) = self.o_l2norm(vec_idx);
        self.core.comp_accurate_dist(
            x,
            cluster.short_code_single(vec_idx),
            cluster.long_code(vec_idx),
            cluster.long_factor(vec_idx),
        )
    }
}
