//! Concurrent layered proximity graph.
//!
//! Nodes live in a fixed arena indexed by [`NodeId`]. Each node keeps its
//! neighbor lists and its vector behind separate `RwLock`s; the entry point
//! and the current top layer share one small mutex. Lock order is
//! label map -> node links -> node vector, and no thread ever holds two
//! neighbor-list locks at once.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::visited::VisitedPool;
use crate::error::{Result, VicinityError};
use crate::vector::core::distance::MetricSpace;
use crate::vector::index::SearchHit;

/// Dense slot index into the node arena.
pub type NodeId = u32;

/// A node together with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchCandidate {
    pub distance: f32,
    pub node_id: NodeId,
}

impl SearchCandidate {
    fn new(distance: f32, node_id: NodeId) -> Self {
        Self { distance, node_id }
    }
}

impl PartialEq for SearchCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for SearchCandidate {}

impl PartialOrd for SearchCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchCandidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

/// One slot of the arena.
#[derive(Debug, Default)]
pub(super) struct HnswNode {
    pub(super) label: AtomicU64,
    pub(super) deleted: AtomicBool,
    pub(super) vector: RwLock<Vec<f32>>,
    /// `links[layer]`; the node's level is `links.len() - 1`.
    pub(super) links: RwLock<Vec<Vec<NodeId>>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct EntryPoint {
    pub(super) node: Option<NodeId>,
    pub(super) max_level: usize,
}

/// Seeded level sampler. Counts its draws so a loaded graph can resume the
/// exact sequence.
#[derive(Debug)]
pub(super) struct LevelGenerator {
    rng: StdRng,
    level_mult: f64,
    pub(super) draws: u64,
}

impl LevelGenerator {
    pub(super) fn new(seed: u64, m: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            level_mult: 1.0 / (m.max(2) as f64).ln(),
            draws: 0,
        }
    }

    pub(super) fn next_level(&mut self) -> usize {
        self.draws += 1;
        let uniform: f64 = 1.0 - self.rng.random::<f64>();
        (-uniform.ln() * self.level_mult) as usize
    }

    pub(super) fn skip(&mut self, draws: u64) {
        for _ in 0..draws {
            self.next_level();
        }
    }
}

enum Claim {
    Fresh { id: NodeId, level: usize },
    Reused(NodeId),
    Existing(NodeId),
}

/// The HNSW graph proper: arena, parameters and shared mutable state.
pub struct HnswGraph {
    pub(super) space: MetricSpace,
    pub(super) m: usize,
    pub(super) max_m0: usize,
    pub(super) ef_construction: usize,
    pub(super) seed: u64,
    pub(super) allow_replace_deleted: bool,
    pub(super) ef: AtomicUsize,
    pub(super) nodes: Vec<HnswNode>,
    pub(super) element_count: AtomicUsize,
    pub(super) deleted_count: AtomicUsize,
    pub(super) label_lookup: Mutex<AHashMap<u64, NodeId>>,
    pub(super) deleted_slots: Mutex<BTreeSet<NodeId>>,
    pub(super) entry: Mutex<EntryPoint>,
    pub(super) levels: Mutex<LevelGenerator>,
    visited: VisitedPool,
}

impl std::fmt::Debug for HnswGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswGraph")
            .field("metric", &self.space.metric())
            .field("dimension", &self.space.dimension())
            .field("m", &self.m)
            .field("ef_construction", &self.ef_construction)
            .field("ef", &self.ef())
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("deleted", &self.deleted_count())
            .field("entry", &*self.entry.lock())
            .finish()
    }
}

impl HnswGraph {
    /// Allocate an empty graph with `capacity` slots.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        space: MetricSpace,
        capacity: usize,
        m: usize,
        ef_construction: usize,
        ef: usize,
        seed: u64,
        allow_replace_deleted: bool,
    ) -> Result<Self> {
        if capacity > NodeId::MAX as usize {
            return Err(VicinityError::invalid_argument(format!(
                "Capacity {capacity} exceeds the maximum of {}",
                NodeId::MAX
            )));
        }
        if m == 0 {
            return Err(VicinityError::invalid_argument("M must be > 0"));
        }

        let mut nodes = Vec::new();
        nodes.try_reserve_exact(capacity)?;
        nodes.resize_with(capacity, HnswNode::default);

        Ok(Self {
            space,
            m,
            max_m0: m * 2,
            ef_construction: ef_construction.max(m),
            seed,
            allow_replace_deleted,
            ef: AtomicUsize::new(ef),
            nodes,
            element_count: AtomicUsize::new(0),
            deleted_count: AtomicUsize::new(0),
            label_lookup: Mutex::new(AHashMap::new()),
            deleted_slots: Mutex::new(BTreeSet::new()),
            entry: Mutex::new(EntryPoint::default()),
            levels: Mutex::new(LevelGenerator::new(seed, m)),
            visited: VisitedPool::new(),
        })
    }

    pub fn space(&self) -> &MetricSpace {
        &self.space
    }

    /// Number of occupied slots, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.element_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_count.load(Ordering::Acquire)
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    pub fn ef(&self) -> usize {
        self.ef.load(Ordering::Acquire)
    }

    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef, Ordering::Release);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn allow_replace_deleted(&self) -> bool {
        self.allow_replace_deleted
    }

    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry.lock().node
    }

    pub fn max_level(&self) -> usize {
        self.entry.lock().max_level
    }

    /// Whether `label` is stored and not tombstoned.
    pub fn contains(&self, label: u64) -> bool {
        self.label_lookup
            .lock()
            .get(&label)
            .is_some_and(|&id| !self.is_deleted(id))
    }

    /// Stored (possibly normalized) vector of a live label.
    pub fn get_vector(&self, label: u64) -> Option<Vec<f32>> {
        let id = *self.label_lookup.lock().get(&label)?;
        if self.is_deleted(id) {
            return None;
        }
        Some(self.node_vector(id))
    }

    /// Live labels in ascending order.
    pub fn labels(&self) -> Vec<u64> {
        let mut labels: Vec<u64> = self
            .label_lookup
            .lock()
            .iter()
            .filter(|&(_, &id)| !self.is_deleted(id))
            .map(|(&label, _)| label)
            .collect();
        labels.sort_unstable();
        labels
    }

    /// Insert or update one already-prepared vector.
    pub fn insert(&self, vector: &[f32], label: u64, replace_deleted: bool) -> Result<()> {
        if replace_deleted && !self.allow_replace_deleted {
            return Err(VicinityError::invalid_argument(
                "Replacement of deleted elements is disabled for this index",
            ));
        }

        match self.claim(vector, label, replace_deleted)? {
            Claim::Fresh { id, level } => self.link_new(id, vector, level),
            Claim::Reused(id) => {
                self.write_vector(id, vector);
                if self.clear_tombstone(id) {
                    self.promote_entry(id);
                }
                self.relink(id, vector);
            }
            Claim::Existing(id) => {
                let deleted = self.is_deleted(id);
                if deleted && self.allow_replace_deleted {
                    return Err(VicinityError::invalid_argument(format!(
                        "Label {label} is deleted; insert with replace_deleted to reuse its slot"
                    )));
                }
                self.write_vector(id, vector);
                if deleted && self.clear_tombstone(id) {
                    self.promote_entry(id);
                }
                self.relink(id, vector);
            }
        }
        Ok(())
    }

    /// `k` nearest live nodes to an already-prepared query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let EntryPoint { node, max_level } = *self.entry.lock();
        let Some(entry) = node else {
            return Err(VicinityError::insufficient_results(k, 0));
        };

        let ef = self.ef().max(k);
        let start = self.greedy_descend(query, entry, max_level, 1);
        let mut found = self.search_layer(start, query, 0, ef, false).into_sorted_vec();
        found.truncate(k);
        if found.len() < k {
            return Err(VicinityError::insufficient_results(k, found.len()));
        }

        Ok(found
            .into_iter()
            .map(|c| SearchHit::new(self.label_of(c.node_id), c.distance))
            .collect())
    }

    /// Tombstone `label`. Returns `false` if it is unknown or already deleted.
    pub fn mark_deleted(&self, label: u64) -> bool {
        let id = {
            let lookup = self.label_lookup.lock();
            let Some(&id) = lookup.get(&label) else {
                return false;
            };
            if self.node(id).deleted.swap(true, Ordering::AcqRel) {
                return false;
            }
            self.deleted_count.fetch_add(1, Ordering::AcqRel);
            if self.allow_replace_deleted {
                self.deleted_slots.lock().insert(id);
            }
            id
        };
        self.relocate_entry_from(id);
        true
    }

    /// Clear the tombstone of `label`. Returns `false` if it is unknown or live.
    pub fn unmark_deleted(&self, label: u64) -> bool {
        let id = {
            let lookup = self.label_lookup.lock();
            let Some(&id) = lookup.get(&label) else {
                return false;
            };
            if !self.clear_tombstone(id) {
                return false;
            }
            id
        };
        self.promote_entry(id);
        true
    }

    /// Grow the arena. Occupied slots never move; a smaller request that still
    /// covers them leaves the capacity unchanged.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        let count = self.len();
        if new_capacity < count {
            return Err(VicinityError::invalid_argument(format!(
                "Cannot resize to {new_capacity}: the index holds {count} elements"
            )));
        }
        if new_capacity > NodeId::MAX as usize {
            return Err(VicinityError::invalid_argument(format!(
                "Capacity {new_capacity} exceeds the maximum of {}",
                NodeId::MAX
            )));
        }
        if new_capacity <= self.nodes.len() {
            return Ok(());
        }

        self.nodes.try_reserve_exact(new_capacity - self.nodes.len())?;
        self.nodes.resize_with(new_capacity, HnswNode::default);
        self.visited.reset();
        Ok(())
    }

    fn claim(&self, vector: &[f32], label: u64, replace_deleted: bool) -> Result<Claim> {
        let mut lookup = self.label_lookup.lock();
        if let Some(&id) = lookup.get(&label) {
            return Ok(Claim::Existing(id));
        }

        if replace_deleted && let Some(id) = self.deleted_slots.lock().pop_first() {
            let node = self.node(id);
            lookup.remove(&node.label.load(Ordering::Acquire));
            lookup.insert(label, id);
            node.label.store(label, Ordering::Release);
            return Ok(Claim::Reused(id));
        }

        let id = self.element_count.load(Ordering::Acquire);
        if id >= self.nodes.len() {
            return Err(VicinityError::capacity_exceeded(format!(
                "The number of elements exceeds the specified limit of {}",
                self.nodes.len()
            )));
        }

        let level = self.levels.lock().next_level();
        let node = &self.nodes[id];
        *node.links.write() = vec![Vec::new(); level + 1];
        {
            let mut stored = node.vector.write();
            stored.clear();
            stored.extend_from_slice(vector);
        }
        node.deleted.store(false, Ordering::Release);
        node.label.store(label, Ordering::Release);

        let id = id as NodeId;
        lookup.insert(label, id);
        self.element_count.fetch_add(1, Ordering::AcqRel);
        Ok(Claim::Fresh { id, level })
    }

    fn link_new(&self, id: NodeId, vector: &[f32], level: usize) {
        let (entry, max_level) = {
            let mut entry = self.entry.lock();
            match entry.node {
                Some(node) => (node, entry.max_level),
                None => {
                    entry.node = Some(id);
                    entry.max_level = level;
                    return;
                }
            }
        };

        self.link_from(id, vector, level, entry, max_level);
        self.promote_entry(id);
    }

    /// Re-link an existing node after its vector changed.
    fn relink(&self, id: NodeId, vector: &[f32]) {
        let EntryPoint { node, max_level } = *self.entry.lock();
        let Some(entry) = node else {
            return;
        };
        if self.len() <= 1 {
            return;
        }
        let level = self.level_of(id);
        self.link_from(id, vector, level, entry, max_level);
    }

    fn link_from(
        &self,
        id: NodeId,
        vector: &[f32],
        level: usize,
        entry: NodeId,
        max_level: usize,
    ) {
        let mut current = self.greedy_descend(vector, entry, max_level, level + 1);
        for layer in (0..=level.min(max_level)).rev() {
            let candidates =
                self.search_layer(current, vector, layer, self.ef_construction, true);
            if let Some(next) = self.connect(id, vector, candidates, layer) {
                current = next;
            }
        }
    }

    /// Greedy 1-NN walk from layer `top` down to layer `bottom`.
    fn greedy_descend(&self, query: &[f32], entry: NodeId, top: usize, bottom: usize) -> NodeId {
        let mut current = entry;
        if bottom > top {
            return current;
        }
        let mut current_dist = self.distance_to(query, current);

        for layer in (bottom..=top).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                for neighbor in self.neighbors(current, layer) {
                    let dist = self.distance_to(query, neighbor);
                    if dist < current_dist {
                        current_dist = dist;
                        current = neighbor;
                        changed = true;
                    }
                }
            }
        }
        current
    }

    /// Best-first search on one layer, keeping the `ef` closest nodes.
    ///
    /// Tombstoned nodes are always expanded; they are only collected when
    /// `collect_deleted` is set (construction).
    fn search_layer(
        &self,
        entry: NodeId,
        query: &[f32],
        layer: usize,
        ef: usize,
        collect_deleted: bool,
    ) -> BinaryHeap<SearchCandidate> {
        let mut visited = self.visited.acquire(self.nodes.len());
        let mut top: BinaryHeap<SearchCandidate> = BinaryHeap::with_capacity(ef + 1);
        let mut frontier: BinaryHeap<std::cmp::Reverse<SearchCandidate>> = BinaryHeap::new();

        let start = SearchCandidate::new(self.distance_to(query, entry), entry);
        let mut lower_bound = f32::MAX;
        if collect_deleted || !self.is_deleted(entry) {
            lower_bound = start.distance;
            top.push(start);
        }
        frontier.push(std::cmp::Reverse(start));
        visited.insert(entry);

        while let Some(std::cmp::Reverse(current)) = frontier.pop() {
            if current.distance > lower_bound && top.len() >= ef {
                break;
            }

            for neighbor in self.neighbors(current.node_id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance_to(query, neighbor);
                if top.len() < ef || dist < lower_bound {
                    let candidate = SearchCandidate::new(dist, neighbor);
                    frontier.push(std::cmp::Reverse(candidate));
                    if collect_deleted || !self.is_deleted(neighbor) {
                        top.push(candidate);
                    }
                    if top.len() > ef {
                        top.pop();
                    }
                    if let Some(worst) = top.peek() {
                        lower_bound = worst.distance;
                    }
                }
            }
        }
        top
    }

    /// Diversity heuristic over candidates sorted by ascending distance: a
    /// candidate is kept only if no already-kept neighbor is closer to it than
    /// the base node is.
    fn select_neighbors(&self, candidates: Vec<SearchCandidate>, m: usize) -> Vec<SearchCandidate> {
        if candidates.len() < m {
            return candidates;
        }

        let mut selected: Vec<SearchCandidate> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let vector = self.node_vector(candidate.node_id);
            let diverse = selected
                .iter()
                .all(|kept| self.distance_to(&vector, kept.node_id) >= candidate.distance);
            if diverse {
                selected.push(candidate);
            }
        }
        selected
    }

    /// Merge the selected neighbors into `id`'s links on `layer` and add the
    /// reverse links, pruning full neighbor lists. Returns the closest
    /// selected neighbor.
    fn connect(
        &self,
        id: NodeId,
        vector: &[f32],
        candidates: BinaryHeap<SearchCandidate>,
        layer: usize,
    ) -> Option<NodeId> {
        let mut sorted = candidates.into_sorted_vec();
        sorted.retain(|c| c.node_id != id);
        let selected = self.select_neighbors(sorted, self.m);
        let closest = selected.first()?.node_id;
        let max_degree = self.max_degree(layer);

        {
            let mut links = self.node(id).links.write();
            if let Some(list) = links.get_mut(layer) {
                // Concurrent inserts may already have linked back to `id` on
                // this layer while it was linking the layers above.
                let mut pool = selected.clone();
                for &other in list.iter() {
                    if other != id && pool.iter().all(|c| c.node_id != other) {
                        pool.push(SearchCandidate::new(self.distance_to(vector, other), other));
                    }
                }
                if pool.len() > max_degree {
                    pool.sort_unstable();
                    pool = self.select_neighbors(pool, max_degree);
                }
                list.clear();
                list.extend(pool.iter().map(|c| c.node_id));
            }
        }

        for neighbor in &selected {
            let mut links = self.node(neighbor.node_id).links.write();
            let Some(list) = links.get_mut(layer) else {
                continue;
            };
            if list.contains(&id) {
                continue;
            }
            if list.len() < max_degree {
                list.push(id);
                continue;
            }

            let base = self.node_vector(neighbor.node_id);
            let mut pool: Vec<SearchCandidate> = list
                .iter()
                .map(|&other| SearchCandidate::new(self.distance_to(&base, other), other))
                .collect();
            pool.push(SearchCandidate::new(neighbor.distance, id));
            pool.sort_unstable();

            let kept = self.select_neighbors(pool, max_degree);
            list.clear();
            list.extend(kept.iter().map(|c| c.node_id));
        }

        Some(closest)
    }

    /// Make `id` the entry point if it tops the graph or the current entry
    /// point is tombstoned.
    fn promote_entry(&self, id: NodeId) {
        if self.is_deleted(id) {
            return;
        }
        let level = self.level_of(id);
        let mut entry = self.entry.lock();
        if self.is_deleted(id) {
            return;
        }
        let replace = match entry.node {
            None => true,
            Some(current) if current == id => false,
            Some(current) => level > entry.max_level || self.is_deleted(current),
        };
        if replace {
            entry.node = Some(id);
            entry.max_level = level;
        }
    }

    /// After tombstoning the entry point, hand it to the highest live node.
    ///
    /// The chosen node may itself be tombstoned between the scan and the
    /// update, so the scan repeats until a live node is installed.
    pub(super) fn relocate_entry_from(&self, id: NodeId) {
        loop {
            if self.entry.lock().node != Some(id) {
                return;
            }
            let Some((level, node)) = self.highest_live_node() else {
                return;
            };

            let mut entry = self.entry.lock();
            if entry.node != Some(id) || !self.is_deleted(id) {
                return;
            }
            if !self.is_deleted(node) {
                entry.node = Some(node);
                entry.max_level = level;
                return;
            }
        }
    }

    fn highest_live_node(&self) -> Option<(usize, NodeId)> {
        let mut best: Option<(usize, NodeId)> = None;
        for candidate in 0..self.len() as NodeId {
            if self.is_deleted(candidate) {
                continue;
            }
            let level = self.level_of(candidate);
            if best.is_none_or(|(best_level, _)| level > best_level) {
                best = Some((level, candidate));
            }
        }
        best
    }

    /// Clear a tombstone flag and its bookkeeping; `false` if it was not set.
    fn clear_tombstone(&self, id: NodeId) -> bool {
        if !self.node(id).deleted.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.deleted_count.fetch_sub(1, Ordering::AcqRel);
        if self.allow_replace_deleted {
            self.deleted_slots.lock().remove(&id);
        }
        true
    }

    fn write_vector(&self, id: NodeId, vector: &[f32]) {
        let mut stored = self.node(id).vector.write();
        stored.clear();
        stored.extend_from_slice(vector);
    }

    #[inline]
    fn node(&self, id: NodeId) -> &HnswNode {
        &self.nodes[id as usize]
    }

    #[inline]
    pub(super) fn is_deleted(&self, id: NodeId) -> bool {
        self.node(id).deleted.load(Ordering::Acquire)
    }

    #[inline]
    pub(super) fn label_of(&self, id: NodeId) -> u64 {
        self.node(id).label.load(Ordering::Acquire)
    }

    pub(super) fn level_of(&self, id: NodeId) -> usize {
        self.node(id).links.read().len().saturating_sub(1)
    }

    fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 { self.max_m0 } else { self.m }
    }

    /// Snapshot of one neighbor list; empty if the node has no such layer.
    fn neighbors(&self, id: NodeId, layer: usize) -> Vec<NodeId> {
        self.node(id)
            .links
            .read()
            .get(layer)
            .cloned()
            .unwrap_or_default()
    }

    pub(super) fn node_vector(&self, id: NodeId) -> Vec<f32> {
        self.node(id).vector.read().clone()
    }

    #[inline]
    fn distance_to(&self, query: &[f32], id: NodeId) -> f32 {
        let stored = self.node(id).vector.read();
        self.space.distance(query, &stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::core::distance::DistanceMetric;

    fn graph(capacity: usize, m: usize, allow_replace: bool) -> HnswGraph {
        let space = MetricSpace::new(DistanceMetric::Euclidean, 2).unwrap();
        HnswGraph::new(space, capacity, m, 100, 10, 7, allow_replace).unwrap()
    }

    fn grid(graph: &HnswGraph, side: usize) {
        for i in 0..side * side {
            let v = [(i % side) as f32, (i / side) as f32];
            graph.insert(&v, i as u64, false).unwrap();
        }
    }

    #[test]
    fn test_candidate_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(SearchCandidate::new(0.5, 1));
        heap.push(SearchCandidate::new(0.1, 2));
        heap.push(SearchCandidate::new(0.5, 0));
        let sorted: Vec<NodeId> = heap.into_sorted_vec().iter().map(|c| c.node_id).collect();
        assert_eq!(sorted, vec![2, 0, 1]);
    }

    #[test]
    fn test_level_distribution_is_seeded() {
        let mut a = LevelGenerator::new(42, 16);
        let mut b = LevelGenerator::new(42, 16);
        let levels: Vec<usize> = (0..1000).map(|_| a.next_level()).collect();
        assert_eq!(levels, (0..1000).map(|_| b.next_level()).collect::<Vec<_>>());
        assert!(levels.iter().filter(|&&l| l == 0).count() > 800);

        let mut c = LevelGenerator::new(42, 16);
        c.skip(1000);
        assert_eq!(c.draws, 1000);
        assert_eq!(c.next_level(), a.next_level());
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let graph = graph(4, 4, false);
        assert!(graph.entry_point().is_none());
        graph.insert(&[1.0, 1.0], 9, false).unwrap();
        assert_eq!(graph.entry_point(), Some(0));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_degree_bounds_hold() {
        let graph = graph(400, 4, false);
        grid(&graph, 20);

        for id in 0..graph.len() as NodeId {
            let links = graph.node(id).links.read();
            assert!(links[0].len() <= 8);
            for layer in links.iter().skip(1) {
                assert!(layer.len() <= 4);
            }
            assert!(!links[0].contains(&id));
        }
    }

    #[test]
    fn test_search_finds_exact_match() {
        let graph = graph(100, 8, false);
        grid(&graph, 10);

        let hits = graph.search(&[3.0, 4.0], 3).unwrap();
        assert_eq!(hits[0].label, 43);
        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_capacity_exceeded() {
        let graph = graph(2, 4, false);
        graph.insert(&[0.0, 0.0], 1, false).unwrap();
        graph.insert(&[1.0, 0.0], 2, false).unwrap();
        let err = graph.insert(&[2.0, 0.0], 3, false).unwrap_err();
        assert!(matches!(err, VicinityError::CapacityExceeded(_)));

        // Updating an existing label does not need a slot.
        graph.insert(&[5.0, 5.0], 2, false).unwrap();
        assert_eq!(graph.get_vector(2).unwrap(), vec![5.0, 5.0]);
    }

    #[test]
    fn test_entry_point_moves_off_tombstone() {
        let graph = graph(100, 4, false);
        grid(&graph, 10);

        let entry = graph.entry_point().unwrap();
        let label = graph.label_of(entry);
        assert!(graph.mark_deleted(label));
        let moved = graph.entry_point().unwrap();
        assert_ne!(moved, entry);
        assert!(!graph.is_deleted(moved));
        assert_eq!(graph.max_level(), graph.level_of(moved));

        assert!(graph.unmark_deleted(label));
        assert_eq!(graph.deleted_count(), 0);
        assert!(!graph.is_deleted(graph.entry_point().unwrap()));
    }

    #[test]
    fn test_connect_keeps_links_added_by_other_inserts() {
        let graph = graph(8, 4, false);
        for i in 0..5 {
            graph.insert(&[i as f32, 0.0], i, false).unwrap();
        }

        *graph.node(0).links.write() = vec![vec![4]];
        let mut candidates = BinaryHeap::new();
        candidates.push(SearchCandidate::new(1.0, 1));
        graph.connect(0, &[0.0, 0.0], candidates, 0);

        let mut links = graph.neighbors(0, 0);
        links.sort_unstable();
        assert_eq!(links, vec![1, 4]);
        assert!(graph.neighbors(1, 0).contains(&0));
    }

    #[test]
    fn test_concurrent_deletes_keep_entry_point_live() {
        for _ in 0..5 {
            let graph = graph(400, 4, false);
            grid(&graph, 20);

            std::thread::scope(|scope| {
                for chunk in 0..8u64 {
                    let graph = &graph;
                    scope.spawn(move || {
                        for label in (chunk * 50..(chunk + 1) * 50).filter(|l| l % 50 != 0) {
                            assert!(graph.mark_deleted(label));
                        }
                    });
                }
            });

            assert_eq!(graph.deleted_count(), 392);
            let entry = graph.entry_point().unwrap();
            assert!(!graph.is_deleted(entry));
            assert_eq!(graph.max_level(), graph.level_of(entry));
            let hits = graph.search(&[0.0, 0.0], 1).unwrap();
            assert_eq!(hits[0].label % 50, 0);
        }
    }

    #[test]
    fn test_tombstone_toggles_are_idempotent() {
        let graph = graph(10, 4, false);
        graph.insert(&[0.0, 0.0], 1, false).unwrap();
        assert!(!graph.mark_deleted(99));
        assert!(graph.mark_deleted(1));
        assert!(!graph.mark_deleted(1));
        assert_eq!(graph.deleted_count(), 1);
        assert!(!graph.unmark_deleted(99));
        assert!(graph.unmark_deleted(1));
        assert!(!graph.unmark_deleted(1));
    }

    #[test]
    fn test_replace_deleted_reuses_slot() {
        let graph = graph(3, 4, true);
        graph.insert(&[0.0, 0.0], 1, false).unwrap();
        graph.insert(&[1.0, 0.0], 2, false).unwrap();
        graph.insert(&[2.0, 0.0], 3, false).unwrap();
        assert!(graph.mark_deleted(2));

        graph.insert(&[9.0, 9.0], 4, true).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.deleted_count(), 0);
        assert!(!graph.contains(2));
        assert_eq!(graph.labels(), vec![1, 3, 4]);

        let hits = graph.search(&[9.0, 9.0], 1).unwrap();
        assert_eq!(hits[0].label, 4);
    }

    #[test]
    fn test_update_of_deleted_label_rules() {
        let strict = graph(4, 4, true);
        strict.insert(&[0.0, 0.0], 1, false).unwrap();
        strict.mark_deleted(1);
        assert!(strict.insert(&[1.0, 1.0], 1, false).is_err());

        let lenient = graph(4, 4, false);
        lenient.insert(&[0.0, 0.0], 1, false).unwrap();
        lenient.mark_deleted(1);
        lenient.insert(&[1.0, 1.0], 1, false).unwrap();
        assert!(lenient.contains(1));
        assert!(lenient.insert(&[1.0, 1.0], 2, true).is_err());
    }

    #[test]
    fn test_resize_rules() {
        let mut graph = graph(4, 4, false);
        for i in 0..3 {
            graph.insert(&[i as f32, 0.0], i, false).unwrap();
        }
        assert!(graph.resize(2).is_err());
        graph.resize(3).unwrap();
        assert_eq!(graph.capacity(), 4);
        graph.resize(16).unwrap();
        assert_eq!(graph.capacity(), 16);
        graph.insert(&[7.0, 0.0], 7, false).unwrap();
        assert_eq!(graph.search(&[7.0, 0.0], 1).unwrap()[0].label, 7);
    }
}
