//! # engine_ecs: World and Cached Queries
//!
//! The [`World`] composes the storage layer from `engine_component` with a
//! query cache that is invalidated precisely: each mutation notifies only the
//! queries that track the touched component.
//!
//! ```
//! use engine_component::ComponentType;
//! use engine_ecs::{QueryConfig, World};
//! use serde_json::json;
//!
//! let position = ComponentType::new("Position", json!({ "x": 0.0, "y": 0.0 }))?;
//! let frozen = ComponentType::tag("Frozen")?;
//!
//! let mut world = World::new();
//! let e = world.create_entity()?;
//! world.add_component(e, &position, json!({ "x": 1.5 }))?;
//!
//! let moving = world.query(QueryConfig::new().with([&position]).without([&frozen]))?;
//! assert_eq!(moving.entities(&world), vec![e]);
//!
//! world.add_component(e, &frozen, json!(null))?;
//! assert!(moving.is_empty(&world));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Everything here is single-threaded. Queries and component values are
//! reference counted with `Rc` and are neither `Send` nor `Sync`.

pub mod config;
pub mod error;
pub mod pool;
pub mod query;
pub mod snapshot;
pub mod world;

pub use config::WorldConfig;
pub use error::{ConfigurationError, WorldError};
pub use pool::SetPool;
pub use query::{Query, QueryConfig, QueryId, QueryRegistry, QueryRow, Role};
pub use snapshot::{ComponentDump, WorldSnapshot};
pub use world::World;
