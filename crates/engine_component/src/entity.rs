//! Entity identity and allocation.
//!
//! An [`EntityId`] packs a slot index and a generation into a single `u32`.
//! The [`EntityManager`] recycles indices of destroyed entities with a bumped
//! generation so stale ids never resolve to the slot's new occupant. Once an
//! index has used up every generation it is retired for good instead of
//! wrapping around.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ComponentError;

/// Number of low bits holding the slot index.
pub const INDEX_BITS: u32 = 20;

/// Number of high bits holding the generation.
pub const GENERATION_BITS: u32 = 32 - INDEX_BITS;

/// Largest representable slot index.
pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;

/// Largest representable generation. Destroying an entity at this generation
/// retires its index.
pub const MAX_GENERATION: u16 = (1 << GENERATION_BITS) - 1;

/// Total number of distinct slot indices.
pub const INDEX_SPACE: u32 = MAX_INDEX + 1;

/// A generational entity identifier.
///
/// Two ids are equal only when both index and generation match. An id whose
/// generation differs from the live generation at its index is stale and is
/// treated as absent everywhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// Pack an index and generation into an id.
    ///
    /// Bits beyond [`INDEX_BITS`] / [`GENERATION_BITS`] are masked off.
    #[must_use]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self((index & MAX_INDEX) | (((generation & MAX_GENERATION) as u32) << INDEX_BITS))
    }

    /// Rebuild an id from its packed representation.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The packed representation.
    #[must_use]
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// The slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }

    /// The generation (reuse counter of the slot).
    #[must_use]
    pub const fn generation(self) -> u16 {
        (self.0 >> INDEX_BITS) as u16
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// A recycled index waiting to be reissued, paired with the generation it
/// will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    /// The slot index.
    pub index: u32,
    /// The generation the next occupant receives.
    pub generation: u16,
}

/// Raw allocator counters, exposed so a serializer can rebuild an
/// [`EntityManager`] exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Next never-issued index.
    pub next_index: u32,
    /// Recycled indices, in LIFO order (last entry is reissued first).
    pub free_list: Vec<FreeSlot>,
    /// Indices retired after generation exhaustion, ascending.
    pub exhausted: Vec<u32>,
    /// Live entities, ascending by index.
    pub active: Vec<EntityId>,
}

/// Allocates and recycles entity ids with generational tracking.
#[derive(Debug)]
pub struct EntityManager {
    /// Live generation per issued index.
    generations: Vec<u16>,
    alive: Vec<bool>,
    free_list: Vec<FreeSlot>,
    exhausted: BTreeSet<u32>,
    next_index: u32,
    limit: u32,
    len: usize,
    /// Rebuilt lazily after any create/destroy.
    active_cache: OnceCell<Rc<[EntityId]>>,
}

impl EntityManager {
    /// Creates an allocator spanning the full index space.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(INDEX_SPACE)
    }

    /// Creates an allocator that issues at most `limit` distinct indices.
    ///
    /// `limit` is clamped to [`INDEX_SPACE`].
    #[must_use]
    pub fn with_limit(limit: u32) -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free_list: Vec::new(),
            exhausted: BTreeSet::new(),
            next_index: 0,
            limit: limit.min(INDEX_SPACE),
            len: 0,
            active_cache: OnceCell::new(),
        }
    }

    /// Allocates an entity, reusing the most recently freed index first.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::ResourceExhausted`] when no recycled index is
    /// available and every fresh index up to the limit has been issued or
    /// retired.
    pub fn create(&mut self) -> Result<EntityId, ComponentError> {
        let id = if let Some(slot) = self.free_list.pop() {
            let idx = slot.index as usize;
            self.generations[idx] = slot.generation;
            self.alive[idx] = true;
            EntityId::new(slot.index, slot.generation)
        } else {
            while self.exhausted.contains(&self.next_index) {
                self.next_index += 1;
            }
            if self.next_index >= self.limit {
                warn!(
                    limit = self.limit,
                    retired = self.exhausted.len(),
                    "entity index space exhausted"
                );
                return Err(ComponentError::ResourceExhausted {
                    limit: self.limit,
                    retired: self.exhausted.len(),
                });
            }
            let index = self.next_index;
            self.next_index += 1;
            self.ensure_slot(index);
            self.generations[index as usize] = 0;
            self.alive[index as usize] = true;
            EntityId::new(index, 0)
        };
        self.len += 1;
        self.active_cache.take();
        Ok(id)
    }

    /// Destroys a live entity. Returns `false` if `id` is not currently alive.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        if !self.is_valid(id) {
            return false;
        }
        let index = id.index();
        self.alive[index as usize] = false;
        self.len -= 1;
        self.active_cache.take();

        let generation = id.generation();
        if generation >= MAX_GENERATION {
            self.exhausted.insert(index);
            debug!(index, "entity index retired after generation exhaustion");
        } else {
            self.free_list.push(FreeSlot {
                index,
                generation: generation + 1,
            });
        }
        true
    }

    /// Returns `true` if `id` refers to a live entity of the current generation.
    #[must_use]
    pub fn is_valid(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.alive.len() && self.alive[idx] && self.generations[idx] == id.generation()
    }

    /// Number of live entities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All live entities in ascending index order.
    ///
    /// The same shared slice is returned until the next create or destroy.
    pub fn all_active(&self) -> Rc<[EntityId]> {
        self.active_cache
            .get_or_init(|| {
                self.alive
                    .iter()
                    .enumerate()
                    .filter(|(_, alive)| **alive)
                    .map(|(idx, _)| EntityId::new(idx as u32, self.generations[idx]))
                    .collect()
            })
            .clone()
    }

    /// Number of indices permanently retired.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.exhausted.len()
    }

    /// The maximum number of distinct indices this allocator may issue.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Snapshot of the raw allocator counters.
    #[must_use]
    pub fn state(&self) -> AllocatorState {
        AllocatorState {
            next_index: self.next_index,
            free_list: self.free_list.clone(),
            exhausted: self.exhausted.iter().copied().collect(),
            active: self.all_active().to_vec(),
        }
    }

    /// Rebuilds an allocator from raw counters captured by [`Self::state`].
    #[must_use]
    pub fn from_state(state: AllocatorState, limit: u32) -> Self {
        let mut manager = Self::with_limit(limit);
        manager.next_index = state.next_index;

        for id in &state.active {
            manager.ensure_slot(id.index());
            let idx = id.index() as usize;
            if manager.alive[idx] {
                warn!(entity = %id, "duplicate active index in allocator state");
                continue;
            }
            manager.generations[idx] = id.generation();
            manager.alive[idx] = true;
            manager.len += 1;
        }
        manager.exhausted = state.exhausted.into_iter().collect();
        for slot in state.free_list {
            manager.ensure_slot(slot.index);
            if slot.generation > MAX_GENERATION {
                warn!(
                    index = slot.index,
                    generation = slot.generation,
                    "free slot generation out of range, retiring index"
                );
                manager.exhausted.insert(slot.index);
                continue;
            }
            manager.free_list.push(slot);
        }
        // Indices below the highest one referenced are never handed out fresh.
        let issued = manager.alive.len() as u32;
        manager.next_index = manager.next_index.max(issued);
        manager
    }

    fn ensure_slot(&mut self, index: u32) {
        let needed = index as usize + 1;
        if self.generations.len() < needed {
            self.generations.resize(needed, 0);
            self.alive.resize(needed, false);
        }
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_packing() {
        let id = EntityId::new(42, 7);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 7);
        assert_eq!(EntityId::from_bits(id.to_bits()), id);

        let edge = EntityId::new(MAX_INDEX, MAX_GENERATION);
        assert_eq!(edge.index(), MAX_INDEX);
        assert_eq!(edge.generation(), MAX_GENERATION);
        assert_eq!(edge.to_bits(), u32::MAX);
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId::new(3, 1).to_string(), "3v1");
        assert_eq!(format!("{:?}", EntityId::new(3, 1)), "EntityId(3v1)");
    }

    #[test]
    fn test_allocate_sequential() {
        let mut manager = EntityManager::new();
        let e0 = manager.create().unwrap();
        let e1 = manager.create().unwrap();
        assert_eq!(e0.index(), 0);
        assert_eq!(e1.index(), 1);
        assert_eq!(e0.generation(), 0);
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn test_destroy_and_reuse_bumps_generation() {
        let mut manager = EntityManager::new();
        let e0 = manager.create().unwrap();
        assert!(manager.destroy(e0));
        assert!(!manager.is_valid(e0));

        let reused = manager.create().unwrap();
        assert_eq!(reused.index(), e0.index());
        assert!(reused.generation() > e0.generation());
        assert_ne!(e0, reused);
        assert!(manager.is_valid(reused));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut manager = EntityManager::new();
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        manager.destroy(a);
        manager.destroy(b);
        assert_eq!(manager.create().unwrap().index(), b.index());
        assert_eq!(manager.create().unwrap().index(), a.index());
    }

    #[test]
    fn test_double_destroy_fails() {
        let mut manager = EntityManager::new();
        let e = manager.create().unwrap();
        assert!(manager.destroy(e));
        assert!(!manager.destroy(e));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_stale_id_cannot_destroy_new_occupant() {
        let mut manager = EntityManager::new();
        let old = manager.create().unwrap();
        manager.destroy(old);
        let new = manager.create().unwrap();
        assert!(!manager.destroy(old));
        assert!(manager.is_valid(new));
    }

    #[test]
    fn test_index_retired_after_generation_exhaustion() {
        let mut manager = EntityManager::new();
        let mut id = manager.create().unwrap();
        for _ in 0..MAX_GENERATION {
            assert!(manager.destroy(id));
            id = manager.create().unwrap();
            assert_eq!(id.index(), 0);
        }
        assert_eq!(id.generation(), MAX_GENERATION);

        assert!(manager.destroy(id));
        assert_eq!(manager.retired_count(), 1);

        let next = manager.create().unwrap();
        assert_eq!(next.index(), 1, "retired index must never be reissued");
        assert!(!manager.is_valid(id));
    }

    #[test]
    fn test_resource_exhausted_at_limit() {
        let mut manager = EntityManager::with_limit(2);
        let a = manager.create().unwrap();
        manager.create().unwrap();
        let err = manager.create().unwrap_err();
        assert_eq!(
            err,
            ComponentError::ResourceExhausted {
                limit: 2,
                retired: 0
            }
        );

        // Recycling still works after exhaustion.
        manager.destroy(a);
        assert!(manager.create().is_ok());
    }

    #[test]
    fn test_retired_indices_alone_exhaust_limit() {
        let mut manager = EntityManager::with_limit(1);
        let mut id = manager.create().unwrap();
        for _ in 0..MAX_GENERATION {
            assert!(manager.destroy(id));
            id = manager.create().unwrap();
        }
        assert!(manager.destroy(id));
        assert_eq!(manager.count(), 0);

        assert_eq!(
            manager.create().unwrap_err(),
            ComponentError::ResourceExhausted {
                limit: 1,
                retired: 1
            }
        );
    }

    #[test]
    fn test_limit_is_clamped_to_index_space() {
        let manager = EntityManager::with_limit(u32::MAX);
        assert_eq!(manager.limit(), INDEX_SPACE);
    }

    #[test]
    fn test_all_active_is_cached_until_mutation() {
        let mut manager = EntityManager::new();
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();

        let first = manager.all_active();
        let second = manager.all_active();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(&*first, &[a, b]);

        manager.destroy(a);
        let third = manager.all_active();
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(&*third, &[b]);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut manager = EntityManager::new();
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        let c = manager.create().unwrap();
        manager.destroy(b);

        let state = manager.state();
        let bytes = rmp_serde::to_vec(&state).unwrap();
        let decoded: AllocatorState = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, state);

        let mut restored = EntityManager::from_state(decoded, INDEX_SPACE);
        assert!(restored.is_valid(a));
        assert!(!restored.is_valid(b));
        assert!(restored.is_valid(c));
        assert_eq!(restored.count(), 2);

        let recycled = restored.create().unwrap();
        assert_eq!(recycled, EntityId::new(b.index(), b.generation() + 1));
        assert_eq!(restored.create().unwrap().index(), 3);
    }

    #[test]
    fn test_restored_allocator_skips_exhausted_indices() {
        let state = AllocatorState {
            next_index: 0,
            free_list: Vec::new(),
            exhausted: vec![0, 1],
            active: Vec::new(),
        };
        let mut manager = EntityManager::from_state(state, INDEX_SPACE);
        assert_eq!(manager.create().unwrap().index(), 2);
    }

    #[test]
    fn test_restore_retires_out_of_range_free_slots() {
        let state = AllocatorState {
            next_index: 2,
            free_list: vec![
                FreeSlot {
                    index: 0,
                    generation: MAX_GENERATION + 1,
                },
                FreeSlot {
                    index: 1,
                    generation: 3,
                },
            ],
            exhausted: Vec::new(),
            active: Vec::new(),
        };
        let mut manager = EntityManager::from_state(state, INDEX_SPACE);
        assert_eq!(manager.retired_count(), 1);
        assert_eq!(manager.state().free_list.len(), 1);

        let recycled = manager.create().unwrap();
        assert_eq!(recycled, EntityId::new(1, 3));
        assert!(manager.is_valid(recycled));
        assert_eq!(manager.create().unwrap().index(), 2);
    }
}
