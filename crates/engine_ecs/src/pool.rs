//! Bounded free-list of reusable hash sets.
//!
//! Interested-query sets in the [`QueryRegistry`](crate::QueryRegistry) are
//! torn down whenever a component loses its last interested query and rebuilt
//! when one comes back. Recycling the emptied sets keeps their bucket
//! allocations alive across that churn. The pool bound only caps retained
//! memory; an empty pool just allocates.

use std::collections::HashSet;
use std::hash::Hash;

/// A capacity-bounded stack of cleared sets.
#[derive(Debug)]
pub struct SetPool<T> {
    free: Vec<HashSet<T>>,
    capacity: usize,
}

impl<T: Eq + Hash> SetPool<T> {
    /// Creates a pool retaining at most `capacity` sets.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Takes a set from the pool, or allocates one if the pool is empty.
    ///
    /// Pooled sets are already empty.
    pub fn acquire(&mut self) -> HashSet<T> {
        self.free.pop().unwrap_or_default()
    }

    /// Clears `set` and returns it to the pool, or drops it if the pool is full.
    pub fn release(&mut self, mut set: HashSet<T>) {
        if self.free.len() >= self.capacity {
            return;
        }
        set.clear();
        self.free.push(set);
    }

    /// Number of sets currently pooled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Returns `true` if no set is pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Maximum number of pooled sets.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
