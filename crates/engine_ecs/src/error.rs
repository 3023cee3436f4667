//! World and query error types.

use engine_component::{ComponentError, EntityId};

use crate::query::Role;

/// An invalid query configuration. Never retried; the caller must fix the
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// None of `with`, `without`, `oneOf` was given.
    #[error("query needs at least one of `with`, `without`, `oneOf`")]
    NoConstraints,

    /// A list was given but is empty; omit it instead.
    #[error("`{role}` list is empty; omit it instead of passing an empty list")]
    EmptyList {
        /// The empty list.
        role: Role,
    },

    /// The same component appears twice in one list.
    #[error("component '{component}' is listed twice in `{role}`")]
    DuplicateComponent {
        /// The repeated component name.
        component: String,
        /// The list it is repeated in.
        role: Role,
    },

    /// The same component appears in two different lists.
    #[error("component '{component}' appears in both `{first}` and `{second}`")]
    ConflictingRoles {
        /// The conflicting component name.
        component: String,
        /// The list it was first seen in.
        first: Role,
        /// The list it conflicts with.
        second: Role,
    },
}

/// Errors returned by [`World`](crate::World) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The entity is not alive (destroyed or a stale id).
    #[error("entity {0} is not alive")]
    EntityNotFound(EntityId),

    /// A snapshot names a component no supplied type is bound to.
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    /// Invalid query configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Entity allocation or component type failure.
    #[error(transparent)]
    Component(#[from] ComponentError),
}
