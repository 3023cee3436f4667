//! Component-layer error types.

/// Errors raised by entity allocation and component type handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    /// Every entity index up to the configured limit has been issued and no
    /// recycled index is available.
    #[error("entity index space exhausted: limit {limit}, {retired} indices retired")]
    ResourceExhausted {
        /// Number of indices the allocator may issue.
        limit: u32,
        /// Indices permanently retired after generation exhaustion.
        retired: usize,
    },

    /// A component type definition is unusable.
    #[error("malformed component type '{name}': {reason}")]
    MalformedType {
        /// The offending component name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The component name is already bound to a different type definition.
    #[error("component name '{name}' is already bound to a different component type")]
    TypeMismatch {
        /// The contested component name.
        name: String,
    },

    /// Component data could not be merged over the type's defaults.
    #[error("invalid data for component '{component}': {reason}")]
    InvalidData {
        /// The component the data was intended for.
        component: String,
        /// What is wrong with it.
        reason: String,
    },
}
