//! Reusable visited lists for graph traversal.
//!
//! Each traversal borrows a generation-stamped list from a shared pool instead
//! of allocating a `HashSet`. Clearing bumps the generation; the backing array
//! is only zeroed when the `u16` counter wraps.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::graph::NodeId;

/// Generation-stamped visited marks, indexed by node id.
#[derive(Debug, Default)]
pub struct VisitedList {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedList {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0; capacity],
            generation: 1,
        }
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    /// Mark `id`; returns `true` if it was not visited yet.
    #[inline]
    pub fn insert(&mut self, id: NodeId) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

/// Pool of visited lists shared by concurrent searches.
#[derive(Debug, Default)]
pub struct VisitedPool {
    free: Mutex<Vec<VisitedList>>,
}

impl VisitedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a cleared list covering at least `capacity` ids.
    pub fn acquire(&self, capacity: usize) -> VisitedGuard<'_> {
        let mut list = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| VisitedList::new(capacity));
        list.ensure_capacity(capacity);
        list.clear();
        VisitedGuard { pool: self, list }
    }

    /// Drop every pooled list, e.g. after the node arena was resized.
    pub fn reset(&self) {
        self.free.lock().clear();
    }
}

/// A borrowed [`VisitedList`]; returned to its pool on drop.
pub struct VisitedGuard<'a> {
    pool: &'a VisitedPool,
    list: VisitedList,
}

impl Deref for VisitedGuard<'_> {
    type Target = VisitedList;

    fn deref(&self) -> &VisitedList {
        &self.list
    }
}

impl DerefMut for VisitedGuard<'_> {
    fn deref_mut(&mut self) -> &mut VisitedList {
        &mut self.list
    }
}

impl Drop for VisitedGuard<'_> {
    fn drop(&mut self) {
        let list = std::mem::take(&mut self.list);
        self.pool.free.lock().push(list);
    }
}
