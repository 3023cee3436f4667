//! Whole-world capture and restore.
//!
//! A [`WorldSnapshot`] is plain serde data: the allocator's raw counters and
//! every stored component value. No wire format is imposed; hosts pick one.
//! Restoring rebinds component names to caller-supplied [`ComponentType`]s,
//! since component identity is a process-local token and cannot be serialized.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use engine_component::{AllocatorState, ComponentRegistry, ComponentType, EntityId, EntityManager};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, debug_span};

use crate::error::WorldError;
use crate::world::World;

/// Every value stored under one component name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDump {
    /// The component name.
    pub name: String,
    /// `(entity, value)` pairs in ascending entity index order.
    pub entries: Vec<(EntityId, Value)>,
}

/// Serializable capture of a [`World`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Raw allocator counters.
    pub allocator: AllocatorState,
    /// Component data, sorted by component name.
    pub components: Vec<ComponentDump>,
}

impl WorldSnapshot {
    /// Total number of stored component values.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.components.iter().map(|dump| dump.entries.len()).sum()
    }
}

impl World {
    /// Capture the allocator and all component data.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut components: Vec<ComponentDump> = self
            .components()
            .entries()
            .filter(|(_, storage)| !storage.is_empty())
            .map(|(component_type, storage)| {
                let mut entries: Vec<(EntityId, Value)> = storage
                    .iter()
                    .map(|(entity, value)| (entity, Value::clone(value)))
                    .collect();
                entries.sort_by_key(|(entity, _)| entity.index());
                ComponentDump {
                    name: component_type.name().to_string(),
                    entries,
                }
            })
            .collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));

        WorldSnapshot {
            allocator: self.allocator_state(),
            components,
        }
    }

    /// Replace this world's entities and components with `snapshot`.
    ///
    /// `types` supplies the component type for every name in the snapshot.
    /// Values are stored as captured; defaults are not re-merged. Every live
    /// query is invalidated. On error the world is left unchanged.
    ///
    /// # Errors
    ///
    /// - [`WorldError::UnknownComponent`] if no type in `types` has a dumped name.
    /// - [`WorldError::EntityNotFound`] if a value belongs to an entity the
    ///   allocator state does not list as active.
    pub fn restore(
        &mut self,
        snapshot: WorldSnapshot,
        types: &[ComponentType],
    ) -> Result<(), WorldError> {
        let _span = debug_span!("restore", components = snapshot.components.len()).entered();

        let by_name: HashMap<&str, &ComponentType> =
            types.iter().map(|ty| (ty.name(), ty)).collect();
        let entities = EntityManager::from_state(snapshot.allocator, self.config().max_entities);
        let mut components = ComponentRegistry::new();
        let mut entity_components: HashMap<EntityId, BTreeSet<String>> = HashMap::new();

        for dump in snapshot.components {
            let component_type = by_name
                .get(dump.name.as_str())
                .copied()
                .ok_or_else(|| WorldError::UnknownComponent(dump.name.clone()))?;
            let storage = components.get_or_create(component_type)?;
            for (entity, value) in dump.entries {
                if !entities.is_valid(entity) {
                    return Err(WorldError::EntityNotFound(entity));
                }
                storage.add(entity, Rc::new(value));
                entity_components
                    .entry(entity)
                    .or_default()
                    .insert(dump.name.clone());
            }
        }

        debug!(
            entities = entities.count(),
            components = components.len(),
            "world restored"
        );
        self.replace_state(entities, components, entity_components);
        Ok(())
    }
}
