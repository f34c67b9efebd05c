//! Flat (brute-force) vector index implementation.
//!
//! Vectors are stored contiguously in insertion order and every search scans
//! all of them, so results are exact. Useful as ground truth for
//! [`super::hnsw::HnswIndex`] and for small collections.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use ahash::AHashMap;

use crate::error::{Result, VicinityError};
use crate::parallel_vector_index::ParallelExecutor;
use crate::vector::core::distance::{DistanceMetric, MetricSpace};
use crate::vector::core::vector::VectorBatch;
use crate::vector::index::{
    SearchHit, VectorIndex, collect_slots, label_for, result_slots, validate_batch, validate_k,
};

/// Heap entry ordered by distance, then label.
#[derive(Debug, Clone, Copy)]
struct ScoredLabel {
    distance: f32,
    label: u64,
}

impl PartialEq for ScoredLabel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScoredLabel {}

impl PartialOrd for ScoredLabel {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredLabel {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// Flat storage: labels and vectors side by side, plus a label lookup.
#[derive(Debug)]
struct FlatStore {
    max_elements: usize,
    labels: Vec<u64>,
    vectors: Vec<f32>,
    lookup: AHashMap<u64, usize>,
}

impl FlatStore {
    fn new(max_elements: usize, dimension: usize) -> Result<Self> {
        let mut labels = Vec::new();
        labels.try_reserve_exact(max_elements)?;
        let mut vectors = Vec::new();
        vectors.try_reserve_exact(max_elements.saturating_mul(dimension))?;
        Ok(Self {
            max_elements,
            labels,
            vectors,
            lookup: AHashMap::new(),
        })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn vector(&self, slot: usize, dimension: usize) -> &[f32] {
        &self.vectors[slot * dimension..(slot + 1) * dimension]
    }
}

/// Exact k-NN index by linear scan.
#[derive(Debug)]
pub struct BruteForceIndex {
    space: MetricSpace,
    store: Option<FlatStore>,
    next_label: u64,
    executor: ParallelExecutor,
}

impl BruteForceIndex {
    /// Create an uninitialized index.
    pub fn new(metric: DistanceMetric, dimension: usize) -> Result<Self> {
        Ok(Self {
            space: MetricSpace::new(metric, dimension)?,
            store: None,
            next_label: 0,
            executor: ParallelExecutor::new(),
        })
    }

    /// Allocate storage for `max_elements` vectors, discarding previous contents.
    pub fn init(&mut self, max_elements: usize) -> Result<()> {
        if max_elements == 0 {
            return Err(VicinityError::invalid_argument("max_elements must be > 0"));
        }
        self.store = None;
        self.store = Some(FlatStore::new(max_elements, self.space.dimension())?);
        self.next_label = 0;
        tracing::debug!(
            metric = %self.space.metric(),
            dimension = self.space.dimension(),
            max_elements,
            "initialized brute-force index"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&FlatStore> {
        self.store
            .as_ref()
            .ok_or_else(|| VicinityError::not_initialized("call init first"))
    }

    /// Insert one vector; an existing label is overwritten in place.
    pub fn insert(&mut self, vector: &[f32], label: u64) -> Result<()> {
        self.space.check_dimension(vector.len())?;
        let dimension = self.space.dimension();
        let prepared = self.space.prepare(vector);
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| VicinityError::not_initialized("call init first"))?;

        if let Some(&slot) = store.lookup.get(&label) {
            store.vectors[slot * dimension..(slot + 1) * dimension].copy_from_slice(&prepared);
            return Ok(());
        }
        if store.len() >= store.max_elements {
            return Err(VicinityError::capacity_exceeded(format!(
                "The number of elements exceeds the specified limit of {}",
                store.max_elements
            )));
        }

        store.lookup.insert(label, store.len());
        store.labels.push(label);
        store.vectors.extend_from_slice(&prepared);
        Ok(())
    }

    /// Exact `k` nearest neighbors of one query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        validate_k(k)?;
        self.space.check_dimension(query.len())?;
        let store = self.store()?;
        if self.space.normalizes() {
            self.scan(store, &self.space.prepare(query), k)
        } else {
            self.scan(store, query, k)
        }
    }

    /// Bounded max-heap selection over every stored vector.
    fn scan(&self, store: &FlatStore, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let count = store.len();
        if count < k {
            return Err(VicinityError::insufficient_results(k, count));
        }

        let dimension = self.space.dimension();
        let mut heap: BinaryHeap<ScoredLabel> = BinaryHeap::with_capacity(k + 1);
        for (slot, &label) in store.labels.iter().enumerate() {
            let entry = ScoredLabel {
                distance: self.space.distance(query, store.vector(slot, dimension)),
                label,
            };
            if heap.len() < k {
                heap.push(entry);
            } else if heap.peek().is_some_and(|worst| entry < *worst) {
                heap.pop();
                heap.push(entry);
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| SearchHit::new(e.label, e.distance))
            .collect())
    }

    /// Stored vector of `label` (normalized under cosine).
    pub fn get_vector(&self, label: u64) -> Option<Vec<f32>> {
        let store = self.store.as_ref()?;
        let slot = *store.lookup.get(&label)?;
        Some(store.vector(slot, self.space.dimension()).to_vec())
    }

    pub fn contains(&self, label: u64) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| store.lookup.contains_key(&label))
    }
}

impl VectorIndex for BruteForceIndex {
    fn metric_space(&self) -> &MetricSpace {
        &self.space
    }

    fn current_count(&self) -> usize {
        self.store.as_ref().map_or(0, FlatStore::len)
    }

    fn max_elements(&self) -> usize {
        self.store.as_ref().map_or(0, |store| store.max_elements)
    }

    /// Sequential insert; `threads` is accepted for interface parity.
    fn add_items(
        &mut self,
        batch: &VectorBatch<'_>,
        labels: Option<&[u64]>,
        _threads: usize,
    ) -> Result<()> {
        self.store()?;
        validate_batch(&self.space, batch, labels)?;

        let next_label = self.next_label;
        for (row, vector) in batch.rows().enumerate() {
            self.insert(vector, label_for(labels, next_label, row))?;
        }
        self.next_label += batch.len() as u64;
        Ok(())
    }

    fn search_knn(
        &self,
        queries: &VectorBatch<'_>,
        k: usize,
        threads: usize,
    ) -> Result<Vec<Vec<SearchHit>>> {
        let store = self.store()?;
        validate_k(k)?;
        validate_batch(&self.space, queries, None)?;

        let slots = result_slots(queries.len());
        self.executor.run(0, queries.len(), threads, |row, _| {
            let query = queries.row(row);
            let hits = if self.space.normalizes() {
                self.scan(store, &self.space.prepare(query), k)?
            } else {
                self.scan(store, query, k)?
            };
            let _ = slots[row].set(hits);
            Ok(())
        })?;

        Ok(collect_slots(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn index_with(data: &[f32], dim: usize, labels: &[u64]) -> BruteForceIndex {
        let mut index = BruteForceIndex::new(DistanceMetric::Euclidean, dim).unwrap();
        index.init(labels.len() + 2).unwrap();
        index
            .add_items(&VectorBatch::new(data, dim).unwrap(), Some(labels), 1)
            .unwrap();
        index
    }

    #[test]
    fn test_exact_order() {
        let index = index_with(&[0.0, 3.0, 1.0, 7.0], 1, &[10, 11, 12, 13]);
        let hits = index.search(&[0.9], 3).unwrap();
        let labels: Vec<u64> = hits.iter().map(|h| h.label).collect();
        assert_eq!(labels, vec![12, 10, 11]);
        assert!((hits[0].distance - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_label() {
        let index = index_with(&[1.0, -1.0, 1.0, -1.0], 1, &[40, 30, 20, 10]);
        let hits = index.search(&[0.0], 4).unwrap();
        let labels: Vec<u64> = hits.iter().map(|h| h.label).collect();
        assert_eq!(labels, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_overwrite_keeps_capacity() {
        let mut index = BruteForceIndex::new(DistanceMetric::Euclidean, 1).unwrap();
        index.init(1).unwrap();
        index.insert(&[1.0], 5).unwrap();
        index.insert(&[2.0], 5).unwrap();
        assert_eq!(index.current_count(), 1);
        assert_eq!(index.get_vector(5).unwrap(), vec![2.0]);

        let err = index.insert(&[3.0], 6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    }

    #[test]
    fn test_insufficient_results() {
        let index = index_with(&[0.0, 1.0], 1, &[1, 2]);
        let err = index.search(&[0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            VicinityError::InsufficientResults {
                requested: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_uninitialized() {
        let mut index = BruteForceIndex::new(DistanceMetric::Cosine, 2).unwrap();
        assert_eq!(index.max_elements(), 0);
        let data = [1.0, 0.0];
        let err = index
            .add_items(&VectorBatch::new(&data, 2).unwrap(), None, 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
        assert!(index.init(0).is_err());
    }

    #[test]
    fn test_cosine_self_distance() {
        let mut index = BruteForceIndex::new(DistanceMetric::Cosine, 3).unwrap();
        index.init(2).unwrap();
        let data = [1.0, 2.0, 3.0, -3.0, 0.5, 0.0];
        index
            .add_items(&VectorBatch::new(&data, 3).unwrap(), None, 2)
            .unwrap();

        let hits = index
            .search_knn(&VectorBatch::new(&data, 3).unwrap(), 1, 2)
            .unwrap();
        assert_eq!(hits[0][0].label, 0);
        assert_eq!(hits[1][0].label, 1);
        assert!(hits.iter().all(|h| h[0].distance.abs() < 1e-5));
    }
}
