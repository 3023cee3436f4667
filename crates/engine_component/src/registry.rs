//! Name-keyed registry of component storages.
//!
//! Each component name is bound to exactly one [`ComponentType`] on first use.
//! Lookups through a different type that happens to share the name are
//! rejected, so nominal identity survives the name-keyed layout.

use std::collections::HashMap;

use tracing::debug;

use crate::component::{ComponentType, ComponentValue};
use crate::error::ComponentError;
use crate::storage::ComponentStorage;

#[derive(Debug)]
struct Slot {
    component_type: ComponentType,
    storage: ComponentStorage<ComponentValue>,
}

/// Lazily populated map from component name to storage.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    slots: HashMap<String, Slot>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Storage for `component_type`, if it has ever been created.
    ///
    /// Returns `None` when the name is bound to a different type.
    #[must_use]
    pub fn get(&self, component_type: &ComponentType) -> Option<&ComponentStorage<ComponentValue>> {
        self.slots
            .get(component_type.name())
            .filter(|slot| slot.component_type == *component_type)
            .map(|slot| &slot.storage)
    }

    /// Mutable storage for `component_type`, if it has ever been created.
    pub fn get_mut(
        &mut self,
        component_type: &ComponentType,
    ) -> Option<&mut ComponentStorage<ComponentValue>> {
        self.slots
            .get_mut(component_type.name())
            .filter(|slot| slot.component_type == *component_type)
            .map(|slot| &mut slot.storage)
    }

    /// Storage bound to `name`, regardless of which type holds it.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&ComponentStorage<ComponentValue>> {
        self.slots.get(name).map(|slot| &slot.storage)
    }

    /// Mutable storage bound to `name`.
    pub fn get_by_name_mut(&mut self, name: &str) -> Option<&mut ComponentStorage<ComponentValue>> {
        self.slots.get_mut(name).map(|slot| &mut slot.storage)
    }

    /// The type bound to `name`.
    #[must_use]
    pub fn component_type(&self, name: &str) -> Option<&ComponentType> {
        self.slots.get(name).map(|slot| &slot.component_type)
    }

    /// Storage for `component_type`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::TypeMismatch`] if the name is already bound
    /// to a different component type.
    pub fn get_or_create(
        &mut self,
        component_type: &ComponentType,
    ) -> Result<&mut ComponentStorage<ComponentValue>, ComponentError> {
        let slot = self
            .slots
            .entry(component_type.name().to_string())
            .or_insert_with(|| {
                debug!(component = component_type.name(), "created component storage");
                Slot {
                    component_type: component_type.clone(),
                    storage: ComponentStorage::new(),
                }
            });
        if slot.component_type != *component_type {
            return Err(ComponentError::TypeMismatch {
                name: component_type.name().to_string(),
            });
        }
        Ok(&mut slot.storage)
    }

    /// Iterates all storages.
    pub fn values(&self) -> impl Iterator<Item = &ComponentStorage<ComponentValue>> {
        self.slots.values().map(|slot| &slot.storage)
    }

    /// Iterates all storages mutably.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ComponentStorage<ComponentValue>> {
        self.slots.values_mut().map(|slot| &mut slot.storage)
    }

    /// Iterates `(type, storage)` pairs.
    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (&ComponentType, &ComponentStorage<ComponentValue>)> {
        self.slots
            .values()
            .map(|slot| (&slot.component_type, &slot.storage))
    }

    /// Number of component names with storage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no storage has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
