//! HNSW (Hierarchical Navigable Small World) vector index implementation.
//!
//! [`HnswIndex`] owns the metric space, the graph and a parallel executor.
//! Batched inserts and searches fan out over the executor; every worker
//! works directly on the shared [`graph::HnswGraph`].
//!
//! ```
//! use vicinity::vector::{DistanceMetric, HnswIndex, VectorBatch, VectorIndex};
//!
//! let mut index = HnswIndex::new(DistanceMetric::Euclidean, 2).unwrap();
//! index.init(100, 16, 200, 42, false).unwrap();
//!
//! let data = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
//! index
//!     .add_items(&VectorBatch::new(&data, 2).unwrap(), Some(&[10, 11, 12]), 1)
//!     .unwrap();
//!
//! let hits = index
//!     .search_knn(&VectorBatch::single(&[0.9, 0.1]).unwrap(), 1, 1)
//!     .unwrap();
//! assert_eq!(hits[0][0].label, 11);
//! ```

pub mod graph;
pub mod persistence;
pub mod visited;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use self::graph::HnswGraph;
use crate::error::{Result, VicinityError};
use crate::parallel_vector_index::ParallelExecutor;
use crate::vector::core::distance::{DistanceMetric, MetricSpace};
use crate::vector::core::vector::VectorBatch;
use crate::vector::index::config::{HnswIndexConfig, MAX_M};
use crate::vector::index::{
    SearchHit, VectorIndex, collect_slots, label_for, result_slots, validate_batch, validate_k,
};

/// Default search-time candidate list size.
pub const DEFAULT_EF: usize = 10;

/// Approximate k-NN index over a layered proximity graph.
#[derive(Debug)]
pub struct HnswIndex {
    space: MetricSpace,
    graph: Option<HnswGraph>,
    /// `ef` applied by the next `init`; mirrors the live value afterwards.
    default_ef: AtomicUsize,
    next_label: u64,
    executor: ParallelExecutor,
}

impl HnswIndex {
    /// Create an uninitialized index.
    pub fn new(metric: DistanceMetric, dimension: usize) -> Result<Self> {
        Ok(Self {
            space: MetricSpace::new(metric, dimension)?,
            graph: None,
            default_ef: AtomicUsize::new(DEFAULT_EF),
            next_label: 0,
            executor: ParallelExecutor::new(),
        })
    }

    /// Allocate an empty graph, discarding any previous state.
    pub fn init(
        &mut self,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
        allow_replace_deleted: bool,
    ) -> Result<()> {
        let config = HnswIndexConfig::new(max_elements)
            .with_m(m)
            .with_ef_construction(ef_construction)
            .with_ef_search(self.default_ef.load(Ordering::Acquire))
            .with_seed(seed)
            .with_allow_replace_deleted(allow_replace_deleted);
        self.init_with_config(&config)
    }

    /// Allocate an empty graph from a configuration, including its `ef_search`.
    pub fn init_with_config(&mut self, config: &HnswIndexConfig) -> Result<()> {
        config.validate()?;

        let mut m = config.m;
        if m > MAX_M {
            tracing::warn!(m, max = MAX_M, "M is too large, clamping");
            m = MAX_M;
        }

        self.graph = None;
        let graph = HnswGraph::new(
            self.space,
            config.max_elements,
            m,
            config.ef_construction,
            config.ef_search,
            config.seed,
            config.allow_replace_deleted,
        )?;
        tracing::debug!(
            metric = %self.space.metric(),
            dimension = self.space.dimension(),
            max_elements = config.max_elements,
            m,
            ef_construction = graph.ef_construction(),
            "initialized HNSW index"
        );

        self.default_ef.store(config.ef_search, Ordering::Release);
        self.graph = Some(graph);
        self.next_label = 0;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.graph.is_some()
    }

    fn graph(&self) -> Result<&HnswGraph> {
        self.graph
            .as_ref()
            .ok_or_else(|| VicinityError::not_initialized("call init or load first"))
    }

    /// Insert a batch; with `replace_deleted`, new labels reuse tombstoned
    /// slots when any are free.
    pub fn insert_items(
        &mut self,
        batch: &VectorBatch<'_>,
        labels: Option<&[u64]>,
        threads: usize,
        replace_deleted: bool,
    ) -> Result<()> {
        let graph = self.graph()?;
        validate_batch(&self.space, batch, labels)?;
        let rows = batch.len();
        if rows == 0 {
            return Ok(());
        }

        let next_label = self.next_label;
        let mut start = 0;
        if graph.entry_point().is_none() {
            let vector = self.space.prepare(batch.row(0));
            graph.insert(&vector, label_for(labels, next_label, 0), replace_deleted)?;
            start = 1;
        }

        let workers = ParallelExecutor::worker_count(threads, rows - start);
        let scratch: Vec<Mutex<Vec<f32>>> = (0..workers)
            .map(|_| Mutex::new(Vec::with_capacity(self.space.dimension())))
            .collect();

        self.executor.run(start, rows, threads, |row, worker| {
            let mut buffer = scratch[worker].lock();
            self.space.prepare_into(batch.row(row), &mut buffer);
            graph.insert(&buffer, label_for(labels, next_label, row), replace_deleted)
        })?;

        self.next_label += rows as u64;
        Ok(())
    }

    /// Search one already-validated query.
    fn search_one(
        &self,
        graph: &HnswGraph,
        query: &[f32],
        k: usize,
        buffer: &mut Vec<f32>,
    ) -> Result<Vec<SearchHit>> {
        if self.space.normalizes() {
            self.space.prepare_into(query, buffer);
            graph.search(buffer, k)
        } else {
            graph.search(query, k)
        }
    }

    /// Set the search-time candidate list size. Searches that start afterwards
    /// see the new value; before `init` it becomes the initial `ef`.
    pub fn set_ef(&self, ef: usize) {
        self.default_ef.store(ef, Ordering::Release);
        if let Some(graph) = &self.graph {
            graph.set_ef(ef);
        }
    }

    /// Current `ef`; 0 before initialization.
    pub fn ef(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::ef)
    }

    pub fn m(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::m)
    }

    pub fn ef_construction(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::ef_construction)
    }

    pub fn deleted_count(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::deleted_count)
    }

    /// Whether `label` is stored and live.
    pub fn contains(&self, label: u64) -> bool {
        self.graph.as_ref().is_some_and(|g| g.contains(label))
    }

    /// Stored vector of a live label (normalized under cosine).
    pub fn get_vector(&self, label: u64) -> Option<Vec<f32>> {
        self.graph.as_ref()?.get_vector(label)
    }

    /// Live labels in ascending order.
    pub fn labels(&self) -> Vec<u64> {
        self.graph.as_ref().map(HnswGraph::labels).unwrap_or_default()
    }

    /// Exclude `label` from search results. Returns `Ok(false)` when the label
    /// is unknown or already deleted.
    pub fn mark_deleted(&self, label: u64) -> Result<bool> {
        let deleted = self.graph()?.mark_deleted(label);
        if !deleted {
            tracing::warn!(label, "mark_deleted: label is unknown or already deleted");
        }
        Ok(deleted)
    }

    /// Make a tombstoned label searchable again. Returns `Ok(false)` when the
    /// label is unknown or not deleted.
    pub fn unmark_deleted(&self, label: u64) -> Result<bool> {
        let restored = self.graph()?.unmark_deleted(label);
        if !restored {
            tracing::warn!(label, "unmark_deleted: label is unknown or not deleted");
        }
        Ok(restored)
    }

    /// Grow capacity to `new_capacity`.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| VicinityError::not_initialized("call init or load first"))?;
        let before = graph.capacity();
        graph.resize(new_capacity)?;
        tracing::debug!(from = before, to = graph.capacity(), "resized HNSW index");
        Ok(())
    }

    /// Write a snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let graph = self.graph()?;
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        graph.write_to(writer, self.next_label)?;
        tracing::debug!(path = %path.display(), elements = graph.len(), "saved HNSW index");
        Ok(())
    }

    /// Load a snapshot written by [`HnswIndex::save`].
    ///
    /// `metric` and `dimension` must match the stored ones. Capacity is the
    /// larger of `max_elements` and the stored element count.
    pub fn load<P: AsRef<Path>>(
        metric: DistanceMetric,
        dimension: usize,
        path: P,
        max_elements: usize,
        allow_replace_deleted: bool,
    ) -> Result<Self> {
        let mut index = Self::new(metric, dimension)?;
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let (graph, next_label) = HnswGraph::read_from(
            BufReader::new(file),
            index.space,
            max_elements,
            allow_replace_deleted,
            file_len,
        )?;
        tracing::debug!(
            path = %path.display(),
            elements = graph.len(),
            capacity = graph.capacity(),
            "loaded HNSW index"
        );

        index.default_ef.store(graph.ef(), Ordering::Release);
        index.next_label = next_label;
        index.graph = Some(graph);
        Ok(index)
    }
}

impl VectorIndex for HnswIndex {
    fn metric_space(&self) -> &MetricSpace {
        &self.space
    }

    fn current_count(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::len)
    }

    fn max_elements(&self) -> usize {
        self.graph.as_ref().map_or(0, HnswGraph::capacity)
    }

    fn add_items(
        &mut self,
        batch: &VectorBatch<'_>,
        labels: Option<&[u64]>,
        threads: usize,
    ) -> Result<()> {
        self.insert_items(batch, labels, threads, false)
    }

    fn search_knn(
        &self,
        queries: &VectorBatch<'_>,
        k: usize,
        threads: usize,
    ) -> Result<Vec<Vec<SearchHit>>> {
        let graph = self.graph()?;
        validate_k(k)?;
        validate_batch(&self.space, queries, None)?;

        let rows = queries.len();
        let workers = ParallelExecutor::worker_count(threads, rows);
        let scratch: Vec<Mutex<Vec<f32>>> = (0..workers)
            .map(|_| Mutex::new(Vec::with_capacity(self.space.dimension())))
            .collect();
        let slots = result_slots(rows);

        self.executor.run(0, rows, threads, |row, worker| {
            let mut buffer = scratch[worker].lock();
            let hits = self.search_one(graph, queries.row(row), k, &mut buffer)?;
            let _ = slots[row].set(hits);
            Ok(())
        })?;

        Ok(collect_slots(slots))
    }
}
