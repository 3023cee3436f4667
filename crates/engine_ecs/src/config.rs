//! World configuration.

use engine_component::entity::INDEX_SPACE;
use serde::{Deserialize, Serialize};

/// Default number of emptied interested-query sets kept for reuse.
pub const DEFAULT_SET_POOL_CAPACITY: usize = 64;

/// Tunables for a [`World`](crate::World).
///
/// Missing fields deserialize to their defaults, so a partial JSON document
/// such as `{"max_entities": 1024}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Maximum number of distinct entity indices. Clamped to the id space.
    pub max_entities: u32,
    /// Maximum number of pooled interested-query sets.
    pub set_pool_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_entities: INDEX_SPACE,
            set_pool_capacity: DEFAULT_SET_POOL_CAPACITY,
        }
    }
}

impl WorldConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the entity index limit.
    #[must_use]
    pub fn with_max_entities(mut self, max_entities: u32) -> Self {
        self.max_entities = max_entities;
        self
    }

    /// Override the set pool capacity.
    #[must_use]
    pub fn with_set_pool_capacity(mut self, capacity: usize) -> Self {
        self.set_pool_capacity = capacity;
        self
    }
}
