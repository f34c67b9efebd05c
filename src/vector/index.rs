//! Vector index implementations and the interface they share.
//!
//! Two index types implement [`VectorIndex`]:
//! - [`hnsw::HnswIndex`]: approximate search over a layered proximity graph,
//! - [`flat::BruteForceIndex`]: exact search by linear scan.
//!
//! Both own a [`MetricSpace`] and use it to normalize vectors (cosine) and to
//! compute distances, so results from the two are directly comparable.

pub mod config;
pub mod flat;
pub mod hnsw;
pub mod io;

use std::sync::OnceLock;

use crate::error::{Result, VicinityError};
use crate::vector::core::distance::{DistanceMetric, MetricSpace};
use crate::vector::core::vector::VectorBatch;

/// A single k-NN result: the stored label and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub label: u64,
    pub distance: f32,
}

impl SearchHit {
    pub fn new(label: u64, distance: f32) -> Self {
        Self { label, distance }
    }
}

/// Trait for vector index implementations.
///
/// Batch operations take a `threads` argument: `0` means one worker per core,
/// `1` runs on the calling thread. Labels are a pure function of the row
/// position (explicit label or `next_label + row`), never of scheduling.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// The metric space this index computes distances in.
    fn metric_space(&self) -> &MetricSpace;

    /// Fixed dimension of every stored and queried vector.
    fn dimension(&self) -> usize {
        self.metric_space().dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric_space().metric()
    }

    /// Number of stored elements (including tombstoned ones, if any).
    fn current_count(&self) -> usize;

    /// Configured capacity; 0 before initialization.
    fn max_elements(&self) -> usize;

    /// Insert every row of `batch`, labeling row `i` with `labels[i]` or with
    /// the next auto-assigned label.
    fn add_items(
        &mut self,
        batch: &VectorBatch<'_>,
        labels: Option<&[u64]>,
        threads: usize,
    ) -> Result<()>;

    /// Search the `k` nearest stored vectors for every row of `queries`.
    ///
    /// Each inner list holds exactly `k` hits sorted by ascending distance;
    /// if any query cannot be satisfied the whole batch fails.
    fn search_knn(
        &self,
        queries: &VectorBatch<'_>,
        k: usize,
        threads: usize,
    ) -> Result<Vec<Vec<SearchHit>>>;
}

/// Check a batch (and its optional labels) against the index dimension.
pub(crate) fn validate_batch(
    space: &MetricSpace,
    batch: &VectorBatch<'_>,
    labels: Option<&[u64]>,
) -> Result<()> {
    space.check_dimension(batch.dimension())?;
    if let Some(labels) = labels
        && labels.len() != batch.len()
    {
        return Err(VicinityError::invalid_argument(format!(
            "Label count {} does not match row count {}",
            labels.len(),
            batch.len()
        )));
    }
    Ok(())
}

pub(crate) fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(VicinityError::invalid_argument("k must be >= 1"));
    }
    Ok(())
}

/// Label of row `row`: explicit when provided, sequential otherwise.
#[inline]
pub(crate) fn label_for(labels: Option<&[u64]>, next_label: u64, row: usize) -> u64 {
    match labels {
        Some(labels) => labels[row],
        None => next_label + row as u64,
    }
}

/// Per-row result slots written by parallel workers.
pub(crate) fn result_slots(len: usize) -> Vec<OnceLock<Vec<SearchHit>>> {
    (0..len).map(|_| OnceLock::new()).collect()
}

pub(crate) fn collect_slots(slots: Vec<OnceLock<Vec<SearchHit>>>) -> Vec<Vec<SearchHit>> {
    slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap_or_default())
        .collect()
}
