// Crate-level lint configuration.
// Dead code is allowed since some kernels exist for host integration
// and are not exercised by the library itself.
#![allow(dead_code)]

//! caqscan: Compressed Asymmetric Quantization distance estimation and
//! beam-search primitives for ANN search.
//!
//! This crate implements the two components on the hottest inner loop of
//! a graph-based approximate-nearest-neighbor query:
//!
//! - a **multi-stage distance estimator** over CAQ codes (1 sign bit plus
//!   up to 12 extended bits per dimension), combining bit-packed codes,
//!   SIMD lookup tables and variance-based pruning into a sequence of
//!   progressively more accurate estimates, and
//! - a **beam buffer**: a sorted bounded candidate set with a checked
//!   flag and a pop-unchecked-min cursor, driving best-first graph walk
//!   with constant-amortized insert/pop.
//!
//! Everything around them — index construction, the graph traversal
//! outer loop, I/O, threading — is the host's business. The host feeds
//! quantized cluster data in; the estimator hands distance estimates
//! back.
//!
//! # Which Estimator Should I Use?
//!
//! | Situation | Estimator |
//! |-----------|-----------|
//! | Fast-scan data (blocks of 32) | [`ClusterEstimator`] |
//! | Single-vector layout, per-cluster | [`ClusterSingleEstimator`] |
//! | Single-vector layout, flat views | [`SingleEstimator`] |
//!
//! # Query Flow
//!
//! ```text
//! estimator.prepare(cluster)
//!   for each block:
//!     estimator.comp_fast_dist(block, &mut est)      // 32 estimates
//!     for candidates with est[j] < beam.top_dist():
//!       d = estimator.comp_accurate_dist(vec)        // refined
//!       beam.insert(id, d)
//! next = beam.pop()                                   // frontier vertex
//! ```
//!
//! # Estimate Stages
//!
//! 1. **Variance bound** (`vars_est_dist`): residual norms plus a
//!    caller-supplied prune bound; no codes touched.
//! 2. **Fast** (`comp_fast_dist`): 1-bit sign codes through a 16-entry
//!    SIMD lookup table per 4 dimensions (fast-scan), or a popcount
//!    bitplane product (single layout).
//! 3. **Accurate** (`comp_accurate_dist`): the extended-bit
//!    reconstruction, rescaled per vector to stay unbiased.
//!
//! Scalar reference kernels are always compiled; AVX-512 fast paths sit
//! behind the `nightly` feature and are runtime-detected.

pub mod beam;
pub mod bits;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod estimator;
pub mod memory;
pub mod rotator;
pub mod simd;

// Re-exports
pub use beam::{BeamBuffer, Candidate, PointId};
pub use config::{DistType, SearcherConfig};
pub use data::{ClusterData, ExFactor, QuantizerMeta};
pub use error::{CaqError, Result};
pub use estimator::{ClusterEstimator, ClusterSingleEstimator, RuntimeMetrics, SingleEstimator};
pub use rotator::Rotator;
