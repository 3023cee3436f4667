//! Cached constraint queries.
//!
//! A [`Query`] answers "which entities have all of `with`, none of `without`,
//! and at least one of `oneOf`", caching the full result until the World
//! reports a mutation of a component the query tracks.
//!
//! ## Cache states
//!
//! ```text
//!            full evaluation (rows / count)
//!   dirty ──────────────────────────────────▶ clean
//!     ▲                                         │
//!     └───── tracked component mutated ─────────┘
//!            or query reshaped (with / without / one_of)
//! ```
//!
//! A query starts dirty. While clean, [`Query::rows`] hands back the very same
//! shared slice on every call. [`Query::first`] never populates the cache.

mod config;
mod registry;

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use engine_component::{ComponentStorage, ComponentType, ComponentValue, EntityId};
use serde_json::Value;
use tracing::{debug, debug_span, trace};
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::world::World;

pub use config::{QueryConfig, Role};
pub use registry::{QueryId, QueryRegistry};

/// One matched entity: its id followed by the value of each `with` component,
/// in `with` declaration order.
///
/// Components matched through `without` or `oneOf` never appear in `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// The matched entity.
    pub entity: EntityId,
    /// One value per `with` component.
    pub data: Vec<ComponentValue>,
}

impl QueryRow {
    /// The value of the `column`-th `with` component.
    #[must_use]
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.data.get(column).map(|value| &**value)
    }
}

/// Result cache shared between a [`Query`] and the registry that invalidates it.
#[derive(Debug)]
pub(crate) struct QueryCache {
    id: QueryId,
    rows: RefCell<Option<Rc<[QueryRow]>>>,
    invalidations: Cell<u64>,
    evaluations: Cell<u64>,
}

impl QueryCache {
    pub(crate) fn new(id: QueryId) -> Self {
        Self {
            id,
            rows: RefCell::new(None),
            invalidations: Cell::new(0),
            evaluations: Cell::new(0),
        }
    }

    pub(crate) fn id(&self) -> QueryId {
        self.id
    }

    pub(crate) fn invalidate(&self) {
        self.rows.borrow_mut().take();
        self.invalidations.set(self.invalidations.get() + 1);
    }

    pub(crate) fn invalidation_count(&self) -> u64 {
        self.invalidations.get()
    }

    fn cached(&self) -> Option<Rc<[QueryRow]>> {
        self.rows.borrow().clone()
    }

    fn store(&self, rows: Rc<[QueryRow]>) {
        *self.rows.borrow_mut() = Some(rows);
        self.evaluations.set(self.evaluations.get() + 1);
    }
}

/// A live, cached query created by [`World::query`].
///
/// Dropping the query unsubscribes it from its World.
pub struct Query {
    config: QueryConfig,
    tracked: BTreeSet<String>,
    cache: Rc<QueryCache>,
    registry: Rc<RefCell<QueryRegistry>>,
    world_id: Uuid,
}

impl Query {
    pub(crate) fn new(
        config: QueryConfig,
        registry: Rc<RefCell<QueryRegistry>>,
        world_id: Uuid,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let tracked: BTreeSet<String> = config
            .components()
            .map(|ty| ty.name().to_string())
            .collect();

        let cache = {
            let mut registry = registry.borrow_mut();
            let cache = Rc::new(QueryCache::new(registry.allocate_id()));
            registry.register(&cache, tracked.iter().map(String::as_str));
            if config.with_types().is_empty() {
                registry.register_entity_scan(&cache);
            }
            cache
        };
        debug!(query = cache.id(), components = ?tracked, "query created");

        Ok(Self {
            config,
            tracked,
            cache,
            registry,
            world_id,
        })
    }

    /// Appends to `with`, re-registers, and marks the query dirty.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the extended configuration breaks a
    /// validation rule. The query is dropped in that case.
    pub fn with<'a>(
        self,
        types: impl IntoIterator<Item = &'a ComponentType>,
    ) -> Result<Self, ConfigurationError> {
        let config = self.config.clone().with(types);
        self.reshape(config)
    }

    /// Appends to `without`, re-registers, and marks the query dirty.
    ///
    /// # Errors
    ///
    /// See [`Query::with`].
    pub fn without<'a>(
        self,
        types: impl IntoIterator<Item = &'a ComponentType>,
    ) -> Result<Self, ConfigurationError> {
        let config = self.config.clone().without(types);
        self.reshape(config)
    }

    /// Appends to `oneOf`, re-registers, and marks the query dirty.
    ///
    /// # Errors
    ///
    /// See [`Query::with`].
    pub fn one_of<'a>(
        self,
        types: impl IntoIterator<Item = &'a ComponentType>,
    ) -> Result<Self, ConfigurationError> {
        let config = self.config.clone().one_of(types);
        self.reshape(config)
    }

    fn reshape(mut self, config: QueryConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let added: Vec<String> = config
            .components()
            .map(|ty| ty.name().to_string())
            .filter(|name| !self.tracked.contains(name))
            .collect();
        self.config = config;

        {
            let mut registry = self.registry.borrow_mut();
            registry.register(&self.cache, added.iter().map(String::as_str));
            if self.config.with_types().is_empty() {
                registry.register_entity_scan(&self.cache);
            } else {
                registry.unregister_entity_scan(self.cache.id());
            }
        }
        self.tracked.extend(added);
        self.cache.invalidate();
        debug!(query = self.cache.id(), components = ?self.tracked, "query reshaped");
        Ok(self)
    }

    /// All matching rows, evaluating only if the cache is dirty.
    ///
    /// While nothing relevant changes, every call returns the same shared slice.
    ///
    /// # Panics
    ///
    /// Panics if `world` is not the World that created this query.
    pub fn rows(&self, world: &World) -> Rc<[QueryRow]> {
        self.check_world(world);
        if let Some(rows) = self.cache.cached() {
            trace!(query = self.cache.id(), "query cache hit");
            return rows;
        }

        let _span = debug_span!("query_evaluate", query = self.cache.id()).entered();
        let rows: Rc<[QueryRow]> = match Plan::build(&self.config, world) {
            Some(plan) => plan
                .candidates()
                .iter()
                .filter_map(|&entity| plan.row(entity))
                .collect(),
            None => Rc::from(Vec::new()),
        };
        self.cache.store(Rc::clone(&rows));
        debug!(query = self.cache.id(), rows = rows.len(), "query evaluated");
        rows
    }

    /// The matching entities, in result order.
    ///
    /// # Panics
    ///
    /// See [`Query::rows`].
    pub fn entities(&self, world: &World) -> Vec<EntityId> {
        self.rows(world).iter().map(|row| row.entity).collect()
    }

    /// The first match, stopping the scan there.
    ///
    /// Uses the cache when it is clean but never fills it.
    ///
    /// # Panics
    ///
    /// See [`Query::rows`].
    pub fn first(&self, world: &World) -> Option<QueryRow> {
        self.check_world(world);
        if let Some(rows) = self.cache.cached() {
            return rows.first().cloned();
        }
        let plan = Plan::build(&self.config, world)?;
        plan.candidates()
            .iter()
            .find_map(|&entity| plan.row(entity))
    }

    /// Number of matches. Fills the cache if it is dirty.
    ///
    /// # Panics
    ///
    /// See [`Query::rows`].
    pub fn count(&self, world: &World) -> usize {
        self.rows(world).len()
    }

    /// Returns `true` if nothing matches. Equivalent to `first(world).is_none()`.
    ///
    /// # Panics
    ///
    /// See [`Query::rows`].
    pub fn is_empty(&self, world: &World) -> bool {
        self.first(world).is_none()
    }

    /// The registry id of this query.
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.cache.id()
    }

    /// The constraint configuration.
    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Names of every component this query is subscribed to, sorted.
    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(String::as_str)
    }

    /// Returns `true` if the next [`Query::rows`] call will re-evaluate.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.cache.rows.borrow().is_none()
    }

    /// How many times this query has been told to drop its cache.
    #[must_use]
    pub fn invalidation_count(&self) -> u64 {
        self.cache.invalidation_count()
    }

    /// How many full evaluations have filled the cache.
    #[must_use]
    pub fn evaluation_count(&self) -> u64 {
        self.cache.evaluations.get()
    }

    fn check_world(&self, world: &World) {
        assert_eq!(
            world.id(),
            self.world_id,
            "query {} evaluated against a world that did not create it",
            self.cache.id()
        );
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        // Dead subscriptions are pruned lazily if the registry is busy.
        if let Ok(mut registry) = self.registry.try_borrow_mut() {
            registry.unregister(self.cache.id());
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.cache.id())
            .field("tracked", &self.tracked)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// Storages resolved for one evaluation pass.
struct Plan<'w> {
    with: Vec<&'w ComponentStorage<ComponentValue>>,
    /// Index into `with` of the storage driving the scan.
    driver: Option<usize>,
    without: Vec<&'w ComponentStorage<ComponentValue>>,
    one_of: Option<Vec<&'w ComponentStorage<ComponentValue>>>,
    all_active: Option<Rc<[EntityId]>>,
}

impl<'w> Plan<'w> {
    /// Resolves storages, or `None` when nothing can possibly match.
    fn build(config: &QueryConfig, world: &'w World) -> Option<Self> {
        let components = world.components();

        // A `with` component that was never stored matches nobody.
        let with = config
            .with_types()
            .iter()
            .map(|ty| components.get(ty))
            .collect::<Option<Vec<_>>>()?;

        let without = config
            .without_types()
            .iter()
            .filter_map(|ty| components.get(ty))
            .collect();

        let one_of = match config.one_of.as_deref() {
            Some(types) => {
                let storages: Vec<_> = types.iter().filter_map(|ty| components.get(ty)).collect();
                if storages.is_empty() {
                    return None;
                }
                Some(storages)
            }
            None => None,
        };

        // Smallest `with` storage drives the scan; first seen wins ties.
        let mut driver: Option<usize> = None;
        for (idx, storage) in with.iter().enumerate() {
            if driver.is_none_or(|best| storage.len() < with[best].len()) {
                driver = Some(idx);
            }
        }
        let all_active = driver.is_none().then(|| world.entities());

        Some(Self {
            with,
            driver,
            without,
            one_of,
            all_active,
        })
    }

    fn candidates(&self) -> &[EntityId] {
        match (self.driver, &self.all_active) {
            (Some(idx), _) => self.with[idx].entities(),
            (None, Some(all)) => &all[..],
            (None, None) => &[],
        }
    }

    fn row(&self, entity: EntityId) -> Option<QueryRow> {
        let lacks_with = self
            .with
            .iter()
            .enumerate()
            .any(|(idx, storage)| Some(idx) != self.driver && !storage.has(entity));
        if lacks_with {
            return None;
        }
        if self.without.iter().any(|storage| storage.has(entity)) {
            return None;
        }
        if let Some(one_of) = &self.one_of {
            if !one_of.iter().any(|storage| storage.has(entity)) {
                return None;
            }
        }
        let data = self
            .with
            .iter()
            .filter_map(|storage| storage.get(entity).cloned())
            .collect();
        Some(QueryRow { entity, data })
    }
}
