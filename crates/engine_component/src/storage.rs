//! Sparse-set storage for a single component type.
//!
//! A sparse vector maps entity index to a dense slot; two parallel dense
//! vectors hold the values and the owning [`EntityId`]s. A sparse entry is only
//! trusted if the dense entity at that slot is exactly the id being looked up,
//! which rejects stale ids left over from a previous occupant of the same
//! index without clearing the sparse vector on removal.

use crate::entity::EntityId;

const EMPTY: u32 = u32::MAX;

/// Sparse-set storage with O(1) add/remove/lookup and gap-free iteration.
#[derive(Debug, Clone)]
pub struct ComponentStorage<T> {
    /// Entity index → dense slot, or [`EMPTY`].
    sparse: Vec<u32>,
    values: Vec<T>,
    entities: Vec<EntityId>,
}

impl<T> ComponentStorage<T> {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sparse: Vec::new(),
            values: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Dense slot owned by `entity`, if any.
    fn slot(&self, entity: EntityId) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        if slot == EMPTY {
            return None;
        }
        let slot = slot as usize;
        (self.entities.get(slot) == Some(&entity)).then_some(slot)
    }

    /// Inserts or overwrites the value for `entity`.
    ///
    /// Overwriting keeps the entity's position in iteration order.
    pub fn add(&mut self, entity: EntityId, value: T) {
        if let Some(slot) = self.slot(entity) {
            self.values[slot] = value;
            return;
        }
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, EMPTY);
        }
        self.sparse[idx] = self.values.len() as u32;
        self.values.push(value);
        self.entities.push(entity);
    }

    /// Removes the value for `entity`, returning it if present.
    ///
    /// The last dense entry is swapped into the freed slot, so iteration order
    /// is not preserved across removals.
    pub fn take(&mut self, entity: EntityId) -> Option<T> {
        let slot = self.slot(entity)?;
        let last = self.values.len() - 1;
        if slot != last {
            let moved = self.entities[last];
            self.sparse[moved.index() as usize] = slot as u32;
        }
        self.sparse[entity.index() as usize] = EMPTY;
        self.entities.swap_remove(slot);
        Some(self.values.swap_remove(slot))
    }

    /// Removes the value for `entity`. Returns `true` if it was present.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.take(entity).is_some()
    }

    /// The value for `entity`, if present.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.slot(entity).map(|slot| &self.values[slot])
    }

    /// Returns `true` if `entity` has a value in this storage.
    #[must_use]
    pub fn has(&self, entity: EntityId) -> bool {
        self.slot(entity).is_some()
    }

    /// Owning entities, in dense order.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Values, in dense order (parallel to [`Self::entities`]).
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Iterates `(entity, value)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.entities.iter().copied().zip(self.values.iter())
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes every value.
    pub fn clear(&mut self) {
        self.sparse.clear();
        self.values.clear();
        self.entities.clear();
    }
}

impl<T> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}
