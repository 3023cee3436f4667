//! Reverse index from component name to the queries that track it.
//!
//! A mutation touching component `C` notifies only the queries subscribed to
//! `C`, so invalidation cost scales with interested queries rather than with
//! every live query. Subscriptions hold [`Weak`] references: a query that is
//! dropped unregisters itself, and any registration whose query has vanished
//! anyway is pruned the next time it would have been notified.
//!
//! Queries without a `with` list scan every live entity, so they also
//! subscribe to entity creation and destruction as an "entity scan".

use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::pool::SetPool;
use crate::query::QueryCache;

/// Identifier of a query within one registry.
pub type QueryId = u64;

#[derive(Debug)]
struct Subscription {
    cache: Weak<QueryCache>,
    names: Vec<String>,
}

/// Subscribe/notify index between component names and cached queries.
#[derive(Debug)]
pub struct QueryRegistry {
    interested: HashMap<String, HashSet<QueryId>>,
    /// Queries whose candidates are all live entities.
    entity_scans: HashSet<QueryId>,
    subscriptions: HashMap<QueryId, Subscription>,
    pool: SetPool<QueryId>,
    /// Component names invalidated while a batch is open.
    pending: HashSet<String>,
    pending_entity_scan: bool,
    batch_depth: u32,
    next_id: QueryId,
}

impl QueryRegistry {
    /// Creates an empty registry pooling up to `pool_capacity` emptied sets.
    #[must_use]
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            interested: HashMap::new(),
            entity_scans: HashSet::new(),
            subscriptions: HashMap::new(),
            pool: SetPool::new(pool_capacity),
            pending: HashSet::new(),
            pending_entity_scan: false,
            batch_depth: 0,
            next_id: 1,
        }
    }

    pub(crate) fn allocate_id(&mut self) -> QueryId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Subscribes `cache` to every name in `names`. Repeated names and
    /// repeated registrations are no-ops.
    pub(crate) fn register<'a>(
        &mut self,
        cache: &Rc<QueryCache>,
        names: impl IntoIterator<Item = &'a str>,
    ) {
        let id = cache.id();
        let subscription = self.subscriptions.entry(id).or_insert_with(|| Subscription {
            cache: Rc::downgrade(cache),
            names: Vec::new(),
        });
        for name in names {
            let set = self
                .interested
                .entry(name.to_string())
                .or_insert_with(|| self.pool.acquire());
            if set.insert(id) {
                subscription.names.push(name.to_string());
                trace!(query = id, component = name, "query registered");
            }
        }
    }

    /// Subscribes `cache` to entity creation and destruction.
    pub(crate) fn register_entity_scan(&mut self, cache: &Rc<QueryCache>) {
        let id = cache.id();
        self.subscriptions.entry(id).or_insert_with(|| Subscription {
            cache: Rc::downgrade(cache),
            names: Vec::new(),
        });
        if self.entity_scans.insert(id) {
            trace!(query = id, "query registered for entity scans");
        }
    }

    /// Drops only the entity-scan subscription of query `id`, keeping its
    /// component subscriptions. Returns `false` if it had none.
    pub fn unregister_entity_scan(&mut self, id: QueryId) -> bool {
        let removed = self.entity_scans.remove(&id);
        if removed {
            trace!(query = id, "query unregistered from entity scans");
        }
        removed
    }

    /// Removes every subscription of query `id`. Returns `false` if it was
    /// not registered.
    pub fn unregister(&mut self, id: QueryId) -> bool {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        self.entity_scans.remove(&id);
        for name in &subscription.names {
            let now_empty = self.interested.get_mut(name).is_some_and(|set| {
                set.remove(&id);
                set.is_empty()
            });
            if now_empty {
                if let Some(set) = self.interested.remove(name) {
                    self.pool.release(set);
                }
            }
        }
        trace!(query = id, "query unregistered");
        true
    }

    /// Marks dirty every query tracking `name`.
    ///
    /// Inside a batch the name is only recorded, and the notification happens
    /// once at the closing [`Self::end_batch`]. Returns the number of queries
    /// notified now.
    pub fn invalidate_for_component(&mut self, name: &str) -> usize {
        if self.batch_depth > 0 {
            if !self.pending.contains(name) {
                self.pending.insert(name.to_string());
            }
            return 0;
        }
        self.notify(name)
    }

    /// Marks dirty every query scanning all live entities. Called when an
    /// entity is created or destroyed. Batched like component invalidation.
    pub fn invalidate_entity_scans(&mut self) -> usize {
        if self.batch_depth > 0 {
            self.pending_entity_scan = true;
            return 0;
        }
        let ids: Vec<QueryId> = self.entity_scans.iter().copied().collect();
        let notified = self.notify_ids(ids);
        trace!(queries = notified, "invalidated entity scans");
        notified
    }

    /// Marks every registered query dirty, tracked names notwithstanding.
    pub fn invalidate_all(&mut self) -> usize {
        let mut notified = 0;
        let mut dead = Vec::new();
        for (id, subscription) in &self.subscriptions {
            match subscription.cache.upgrade() {
                Some(cache) => {
                    cache.invalidate();
                    notified += 1;
                }
                None => dead.push(*id),
            }
        }
        for id in dead {
            self.unregister(id);
        }
        debug!(queries = notified, "invalidated all queries");
        notified
    }

    /// Opens a batch. Batches nest; only the outermost close flushes.
    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Closes a batch, flushing deduplicated invalidations if it was the
    /// outermost one. Returns the number of query notifications sent.
    pub fn end_batch(&mut self) -> usize {
        if self.batch_depth == 0 {
            warn!("end_batch called without a matching start_batch");
            return 0;
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return 0;
        }

        let mut pending = std::mem::take(&mut self.pending);
        let components = pending.len();
        let mut notified: usize = pending.drain().map(|name| self.notify(&name)).sum();
        self.pending = pending;
        if std::mem::take(&mut self.pending_entity_scan) {
            notified += self.invalidate_entity_scans();
        }
        debug!(components, queries = notified, "flushed invalidation batch");
        notified
    }

    /// Returns `true` while a batch is open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Number of queries subscribed to `name`.
    #[must_use]
    pub fn interested_count(&self, name: &str) -> usize {
        self.interested.get(name).map_or(0, HashSet::len)
    }

    /// Number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` if no query is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of emptied interested-sets waiting for reuse.
    #[must_use]
    pub fn pooled_sets(&self) -> usize {
        self.pool.len()
    }

    fn notify(&mut self, name: &str) -> usize {
        let Some(ids) = self.interested.get(name) else {
            return 0;
        };
        let ids: Vec<QueryId> = ids.iter().copied().collect();
        let notified = self.notify_ids(ids);
        trace!(component = name, queries = notified, "invalidated queries");
        notified
    }

    fn notify_ids(&mut self, ids: Vec<QueryId>) -> usize {
        let mut notified = 0;
        for id in ids {
            match self.subscriptions.get(&id).and_then(|s| s.cache.upgrade()) {
                Some(cache) => {
                    cache.invalidate();
                    notified += 1;
                }
                None => {
                    self.unregister(id);
                }
            }
        }
        notified
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SET_POOL_CAPACITY)
    }
}
