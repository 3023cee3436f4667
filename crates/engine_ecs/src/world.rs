/// ECS World: entity allocation, sparse component storage, and cached queries.
///
/// Components are runtime-defined [`ComponentType`]s carrying
/// `serde_json::Value` data keyed by component name. Every mutation is routed
/// to the [`QueryRegistry`] so that only queries tracking the touched
/// component lose their cached result.
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use engine_component::{
    AllocatorState, ComponentRegistry, ComponentType, EntityId, EntityManager,
};
use serde_json::Value;
use tracing::{debug, debug_span, trace};
use uuid::Uuid;

use crate::config::WorldConfig;
use crate::error::{ConfigurationError, WorldError};
use crate::query::{Query, QueryConfig, QueryRegistry};

/// The ECS world.
pub struct World {
    id: Uuid,
    config: WorldConfig,
    entities: EntityManager,
    components: ComponentRegistry,
    /// Reverse index: which component names each live entity carries.
    entity_components: HashMap<EntityId, BTreeSet<String>>,
    queries: Rc<RefCell<QueryRegistry>>,
}

impl World {
    /// Create a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with explicit tunables.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(world = %id, max_entities = config.max_entities, "world created");
        Self {
            id,
            entities: EntityManager::with_limit(config.max_entities),
            components: ComponentRegistry::new(),
            entity_components: HashMap::new(),
            queries: Rc::new(RefCell::new(QueryRegistry::new(config.set_pool_capacity))),
            config,
        }
    }

    /// Unique id of this world instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The configuration this world was built with.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // -- Entity lifecycle --

    /// Allocate a new entity.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Component`] wrapping `ResourceExhausted` when the
    /// index space is used up.
    pub fn create_entity(&mut self) -> Result<EntityId, WorldError> {
        let id = self.entities.create()?;
        self.queries.borrow_mut().invalidate_entity_scans();
        trace!(entity = %id, "entity created");
        Ok(id)
    }

    /// Destroy an entity and every component it carries.
    ///
    /// Returns `false` for dead or stale ids.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        if !self.entities.is_valid(id) {
            return false;
        }
        let _span = debug_span!("destroy_entity", entity = %id).entered();

        let names = self.entity_components.remove(&id).unwrap_or_default();
        for name in &names {
            if let Some(storage) = self.components.get_by_name_mut(name) {
                storage.remove(id);
            }
        }
        self.entities.destroy(id);

        let mut registry = self.queries.borrow_mut();
        for name in &names {
            registry.invalidate_for_component(name);
        }
        registry.invalidate_entity_scans();
        trace!(entity = %id, components = names.len(), "entity destroyed");
        true
    }

    /// Returns `true` if `id` refers to a live entity.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entities.is_valid(id)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    /// All live entities in ascending index order.
    ///
    /// The same shared slice is returned until the next create or destroy.
    #[must_use]
    pub fn entities(&self) -> Rc<[EntityId]> {
        self.entities.all_active()
    }

    /// Raw allocator counters, for faithful reconstruction.
    #[must_use]
    pub fn allocator_state(&self) -> AllocatorState {
        self.entities.state()
    }

    /// Read access to the entity allocator.
    #[must_use]
    pub fn entity_manager(&self) -> &EntityManager {
        &self.entities
    }

    // -- Component operations --

    /// Attach (or overwrite) a component, merging `data` over the type's
    /// defaults.
    ///
    /// # Errors
    ///
    /// - [`WorldError::EntityNotFound`] if `id` is dead or stale.
    /// - [`WorldError::Component`] if `data` is not an object or null, or if
    ///   the name is already bound to a different component type.
    ///
    /// Storage is untouched on error.
    pub fn add_component(
        &mut self,
        id: EntityId,
        component_type: &ComponentType,
        data: Value,
    ) -> Result<(), WorldError> {
        if !self.entities.is_valid(id) {
            return Err(WorldError::EntityNotFound(id));
        }
        let value = component_type.create(data)?;
        self.components
            .get_or_create(component_type)?
            .add(id, Rc::new(value));

        let name = component_type.name();
        let carried = self.entity_components.entry(id).or_default();
        if !carried.contains(name) {
            carried.insert(name.to_string());
        }
        self.queries.borrow_mut().invalidate_for_component(name);
        Ok(())
    }

    /// Detach a component. Returns `false` if there was nothing to remove.
    pub fn remove_component(&mut self, id: EntityId, component_type: &ComponentType) -> bool {
        let removed = self
            .components
            .get_mut(component_type)
            .is_some_and(|storage| storage.remove(id));
        if !removed {
            return false;
        }

        let name = component_type.name();
        if let Some(carried) = self.entity_components.get_mut(&id) {
            carried.remove(name);
        }
        self.queries.borrow_mut().invalidate_for_component(name);
        true
    }

    /// The component's data on `id`, or `None` if absent or `id` is stale.
    #[must_use]
    pub fn get_component(&self, id: EntityId, component_type: &ComponentType) -> Option<&Value> {
        self.components
            .get(component_type)?
            .get(id)
            .map(|value| &**value)
    }

    /// Returns `true` if `id` carries `component_type`.
    #[must_use]
    pub fn has_component(&self, id: EntityId, component_type: &ComponentType) -> bool {
        self.components
            .get(component_type)
            .is_some_and(|storage| storage.has(id))
    }

    /// Names of the components `id` carries, sorted.
    pub fn components_of(&self, id: EntityId) -> impl Iterator<Item = &str> {
        self.entity_components
            .get(&id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Read access to every component storage.
    #[must_use]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // -- Queries --

    /// Build a cached query, subscribed to every component it names.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if `config` breaks a validation rule.
    ///
    /// # Panics
    ///
    /// The returned query panics when it is read against any world other than
    /// this one.
    pub fn query(&self, config: QueryConfig) -> Result<Query, ConfigurationError> {
        Query::new(config, Rc::clone(&self.queries), self.id)
    }

    /// Number of live queries subscribed to this world.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.borrow().len()
    }

    /// Open an invalidation batch. See [`QueryRegistry::start_batch`].
    pub fn start_batch(&self) {
        self.queries.borrow_mut().start_batch();
    }

    /// Close an invalidation batch. Returns the number of queries notified.
    pub fn end_batch(&self) -> usize {
        let _span = debug_span!("end_batch").entered();
        self.queries.borrow_mut().end_batch()
    }

    /// Returns `true` while a batch is open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.queries.borrow().is_batching()
    }

    /// Run `f` inside an invalidation batch.
    ///
    /// The batch is closed even if `f` panics.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut World) -> R) -> R {
        self.start_batch();
        let _guard = BatchGuard {
            registry: Rc::clone(&self.queries),
        };
        f(self)
    }

    /// Mark every query dirty.
    pub fn invalidate_all_queries(&self) -> usize {
        self.queries.borrow_mut().invalidate_all()
    }

    /// Replace all entity and component state, then dirty every query.
    pub(crate) fn replace_state(
        &mut self,
        entities: EntityManager,
        components: ComponentRegistry,
        entity_components: HashMap<EntityId, BTreeSet<String>>,
    ) {
        self.entities = entities;
        self.components = components;
        self.entity_components = entity_components;
        self.invalidate_all_queries();
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entities.count())
            .field("components", &self.components.len())
            .field("queries", &self.query_count())
            .finish()
    }
}

struct BatchGuard {
    registry: Rc<RefCell<QueryRegistry>>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.try_borrow_mut() {
            registry.end_batch();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use engine_component::ComponentError;
    use serde_json::json;

    use super::*;

    fn position() -> ComponentType {
        ComponentType::new("Position", json!({ "x": 0, "y": 0 })).unwrap()
    }

    fn velocity() -> ComponentType {
        ComponentType::new("Velocity", json!({ "dx": 0, "dy": 0 })).unwrap()
    }

    #[test]
    fn test_add_merges_defaults() {
        let mut world = World::new();
        let pos = position();
        let e = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({ "x": 5 })).unwrap();

        assert!(world.has_component(e, &pos));
        assert_eq!(world.get_component(e, &pos), Some(&json!({ "x": 5, "y": 0 })));
        assert_eq!(world.components_of(e).collect::<Vec<_>>(), vec!["Position"]);
    }

    #[test]
    fn test_add_overwrites_in_place() {
        let mut world = World::new();
        let pos = position();
        let e = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({ "x": 1 })).unwrap();
        world.add_component(e, &pos, json!({ "y": 2 })).unwrap();

        assert_eq!(world.get_component(e, &pos), Some(&json!({ "x": 0, "y": 2 })));
        assert_eq!(world.components().get(&pos).unwrap().len(), 1);
    }

    #[test]
    fn test_add_to_dead_entity_fails_cleanly() {
        let mut world = World::new();
        let pos = position();
        let e = world.create_entity().unwrap();
        world.destroy_entity(e);

        assert_eq!(
            world.add_component(e, &pos, json!({})),
            Err(WorldError::EntityNotFound(e))
        );
        assert!(world.components().get(&pos).is_none());
    }

    #[test]
    fn test_add_invalid_data_touches_nothing() {
        let mut world = World::new();
        let pos = position();
        let e = world.create_entity().unwrap();
        let err = world.add_component(e, &pos, json!(42)).unwrap_err();
        assert!(matches!(
            err,
            WorldError::Component(ComponentError::InvalidData { .. })
        ));
        assert!(!world.has_component(e, &pos));
        assert_eq!(world.components_of(e).count(), 0);
    }

    #[test]
    fn test_same_name_different_type_rejected() {
        let mut world = World::new();
        let pos = position();
        let impostor = ComponentType::new("Position", json!({ "x": 0, "y": 0 })).unwrap();
        let e = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({})).unwrap();

        assert!(matches!(
            world.add_component(e, &impostor, json!({})),
            Err(WorldError::Component(ComponentError::TypeMismatch { .. }))
        ));
        assert!(!world.has_component(e, &impostor));
        assert!(world.get_component(e, &impostor).is_none());
    }

    #[test]
    fn test_remove_component_reports_removal() {
        let mut world = World::new();
        let pos = position();
        let vel = velocity();
        let e = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({})).unwrap();

        assert!(!world.remove_component(e, &vel));
        assert!(world.remove_component(e, &pos));
        assert!(!world.remove_component(e, &pos));
        assert!(!world.has_component(e, &pos));
        assert_eq!(world.components_of(e).count(), 0);
    }

    #[test]
    fn test_remove_then_readd_is_indistinguishable() {
        let mut world = World::new();
        let pos = position();
        let ids: Vec<_> = (0..4).map(|_| world.create_entity().unwrap()).collect();
        for (i, &e) in ids.iter().enumerate() {
            world.add_component(e, &pos, json!({ "x": i })).unwrap();
        }
        world.remove_component(ids[1], &pos);
        world.add_component(ids[1], &pos, json!({ "x": 1 })).unwrap();

        for (i, &e) in ids.iter().enumerate() {
            assert_eq!(world.get_component(e, &pos), Some(&json!({ "x": i, "y": 0 })));
        }
        let q = world.query(QueryConfig::new().with([&pos])).unwrap();
        let found: HashSet<_> = q.entities(&world).into_iter().collect();
        assert_eq!(found, ids.into_iter().collect());
    }

    #[test]
    fn test_destroy_sweeps_all_storages() {
        let mut world = World::new();
        let pos = position();
        let vel = velocity();
        let e = world.create_entity().unwrap();
        let other = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({})).unwrap();
        world.add_component(e, &vel, json!({})).unwrap();
        world.add_component(other, &pos, json!({ "x": 7 })).unwrap();

        assert!(world.destroy_entity(e));
        assert!(!world.destroy_entity(e));
        assert!(!world.is_alive(e));
        assert!(!world.has_component(e, &pos));
        assert_eq!(world.components().get(&pos).unwrap().len(), 1);
        assert!(world.components().get(&vel).unwrap().is_empty());
        assert_eq!(world.get_component(other, &pos), Some(&json!({ "x": 7, "y": 0 })));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_recycled_index_gets_greater_generation() {
        let mut world = World::new();
        let e1 = world.create_entity().unwrap();
        world.destroy_entity(e1);
        let e2 = world.create_entity().unwrap();
        assert_eq!(e1.index(), e2.index());
        assert!(e2.generation() > e1.generation());
        assert!(!world.is_alive(e1));
        assert!(world.is_alive(e2));
    }

    #[test]
    fn test_stale_id_not_matched_after_recycle() {
        let mut world = World::new();
        let a = position();
        let e1 = world.create_entity().unwrap();
        world.add_component(e1, &a, json!({})).unwrap();

        let q = world.query(QueryConfig::new().with([&a])).unwrap();
        assert_eq!(q.entities(&world), vec![e1]);

        world.destroy_entity(e1);
        let e2 = world.create_entity().unwrap();
        assert_eq!(e2.index(), e1.index());
        assert!(q.is_dirty());
        assert!(q.rows(&world).is_empty());
        assert!(!world.has_component(e1, &a));
        assert!(!world.has_component(e2, &a));

        world.add_component(e2, &a, json!({})).unwrap();
        assert_eq!(q.entities(&world), vec![e2]);
    }

    #[test]
    fn test_mutation_invalidates_only_interested_queries() {
        let mut world = World::new();
        let pos = position();
        let vel = velocity();
        let e = world.create_entity().unwrap();

        let q_pos = world.query(QueryConfig::new().with([&pos])).unwrap();
        let q_vel = world.query(QueryConfig::new().without([&vel])).unwrap();
        q_pos.rows(&world);
        q_vel.rows(&world);

        world.add_component(e, &pos, json!({})).unwrap();
        assert_eq!(q_pos.invalidation_count(), 1);
        assert_eq!(q_vel.invalidation_count(), 0);
        assert!(q_pos.is_dirty());
        assert!(!q_vel.is_dirty());

        // Removing nothing does not invalidate.
        assert!(!world.remove_component(e, &vel));
        assert_eq!(q_vel.invalidation_count(), 0);
    }

    #[test]
    fn test_actual_removal_invalidates_tracking_queries() {
        let mut world = World::new();
        let pos = position();
        let vel = velocity();
        let e = world.create_entity().unwrap();
        let other = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({})).unwrap();
        world.add_component(other, &pos, json!({})).unwrap();

        let q_pos = world.query(QueryConfig::new().with([&pos])).unwrap();
        let q_vel = world.query(QueryConfig::new().with([&vel])).unwrap();
        assert_eq!(q_pos.entities(&world), vec![e, other]);
        q_vel.rows(&world);

        assert!(world.remove_component(e, &pos));
        assert_eq!(q_pos.invalidation_count(), 1);
        assert!(q_pos.is_dirty());
        assert_eq!(q_vel.invalidation_count(), 0);
        assert_eq!(q_pos.entities(&world), vec![other]);
    }

    #[test]
    #[should_panic(expected = "did not create it")]
    fn test_query_read_against_other_world_panics() {
        let world = World::new();
        let other = World::new();
        let q = world.query(QueryConfig::new().with([&position()])).unwrap();
        q.rows(&other);
    }

    #[test]
    fn test_cache_reused_without_mutation() {
        let mut world = World::new();
        let pos = position();
        let e = world.create_entity().unwrap();
        world.add_component(e, &pos, json!({})).unwrap();

        let q = world.query(QueryConfig::new().with([&pos])).unwrap();
        let first = q.rows(&world);
        world.create_entity().unwrap();
        let second = q.rows(&world);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_batch_flushes_once_per_component() {
        let mut world = World::new();
        let pos = position();
        let q = world.query(QueryConfig::new().with([&pos])).unwrap();

        let ids: Vec<_> = (0..50).map(|_| world.create_entity().unwrap()).collect();
        world.batch(|world| {
            for &e in &ids {
                world.add_component(e, &pos, json!({})).unwrap();
            }
            assert!(world.is_batching());
        });

        assert!(!world.is_batching());
        assert_eq!(q.invalidation_count(), 1);
        assert_eq!(q.count(&world), 50);
    }

    #[test]
    fn test_manual_batch_nesting() {
        let mut world = World::new();
        let pos = position();
        let q = world.query(QueryConfig::new().with([&pos])).unwrap();
        let e = world.create_entity().unwrap();

        world.start_batch();
        world.batch(|world| world.add_component(e, &pos, json!({})).unwrap());
        assert!(world.is_batching());
        assert_eq!(q.invalidation_count(), 0);
        assert_eq!(world.end_batch(), 1);
        assert_eq!(q.invalidation_count(), 1);
    }

    #[test]
    fn test_invalidate_all_queries() {
        let world = World::new();
        let pos = position();
        let vel = velocity();
        let q1 = world.query(QueryConfig::new().with([&pos])).unwrap();
        let q2 = world.query(QueryConfig::new().one_of([&vel])).unwrap();
        assert_eq!(world.invalidate_all_queries(), 2);
        assert_eq!(q1.invalidation_count(), 1);
        assert_eq!(q2.invalidation_count(), 1);
    }

    #[test]
    fn test_entity_limit_surfaces_resource_exhausted() {
        let mut world = World::with_config(WorldConfig::new().with_max_entities(2));
        world.create_entity().unwrap();
        world.create_entity().unwrap();
        assert!(matches!(
            world.create_entity(),
            Err(WorldError::Component(ComponentError::ResourceExhausted { limit: 2, .. }))
        ));
    }

    #[test]
    fn test_allocator_state_lists_active() {
        let mut world = World::new();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();
        world.destroy_entity(a);

        let state = world.allocator_state();
        assert_eq!(state.active, vec![b]);
        assert_eq!(state.free_list.len(), 1);
        assert_eq!(&*world.entities(), &[b]);
    }
}
