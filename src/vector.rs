//! Vector indexes for k-nearest-neighbor search.
//!
//! # Module Structure
//!
//! - `core`: Core data structures (distance metrics, row-major batches)
//! - `index`: Index implementations (HNSW graph, brute-force flat scan)

pub mod core;
pub mod index;

pub use self::core::distance::{DistanceMetric, MetricSpace};
pub use self::core::vector::VectorBatch;
pub use self::index::flat::BruteForceIndex;
pub use self::index::hnsw::HnswIndex;
pub use self::index::{SearchHit, VectorIndex};
