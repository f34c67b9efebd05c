//! # Vicinity
//!
//! Approximate and exact k-nearest-neighbor search over fixed-dimension
//! `f32` vectors.
//!
//! ## Features
//!
//! - HNSW layered-graph index with concurrent batch insertion and search
//! - Exact brute-force index sharing the same metric abstraction
//! - Squared L2, inner product and cosine distances with SIMD kernels
//! - Soft deletion, tombstoned slot reuse and capacity growth
//! - Checksummed binary snapshots
//!
//! ## Example
//!
//! ```
//! use vicinity::prelude::*;
//!
//! let mut index = BruteForceIndex::new(DistanceMetric::Cosine, 3)?;
//! index.init(16)?;
//!
//! let data = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
//! index.add_items(&VectorBatch::new(&data, 3)?, Some(&[7, 8]), 1)?;
//!
//! let hits = index.search_knn(&VectorBatch::single(&[0.0, 2.0, 0.1])?, 1, 1)?;
//! assert_eq!(hits[0][0].label, 8);
//! # Ok::<(), vicinity::error::VicinityError>(())
//! ```

pub mod error;
pub mod parallel_vector_index;
pub mod util;
pub mod vector;

pub mod prelude {
    pub use crate::error::{ErrorKind, Result, VicinityError};
    pub use crate::parallel_vector_index::ParallelExecutor;
    pub use crate::vector::index::config::HnswIndexConfig;
    pub use crate::vector::{
        BruteForceIndex, DistanceMetric, HnswIndex, MetricSpace, SearchHit, VectorBatch,
        VectorIndex,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
