//! Query constraint configuration and its validation rules.

use std::collections::{HashMap, HashSet};

use engine_component::ComponentType;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// The list a component is constrained by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Must be present; contributes data to result rows.
    With,
    /// Must be absent.
    Without,
    /// At least one of the list must be present; contributes no data.
    OneOf,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::With => "with",
            Role::Without => "without",
            Role::OneOf => "oneOf",
        })
    }
}

/// The `with` / `without` / `oneOf` constraint lists of a query.
///
/// An omitted list is `None`. A present-but-empty list is a configuration
/// error, so the builders below record exactly what the caller passed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryConfig {
    /// Components that must all be present, in result column order.
    pub with: Option<Vec<ComponentType>>,
    /// Components that must all be absent.
    pub without: Option<Vec<ComponentType>>,
    /// Components of which at least one must be present.
    pub one_of: Option<Vec<ComponentType>>,
}

impl QueryConfig {
    /// An empty configuration. Invalid until a list is added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the `with` list.
    #[must_use]
    pub fn with<'a>(mut self, types: impl IntoIterator<Item = &'a ComponentType>) -> Self {
        extend(&mut self.with, types);
        self
    }

    /// Appends to the `without` list.
    #[must_use]
    pub fn without<'a>(mut self, types: impl IntoIterator<Item = &'a ComponentType>) -> Self {
        extend(&mut self.without, types);
        self
    }

    /// Appends to the `oneOf` list.
    #[must_use]
    pub fn one_of<'a>(mut self, types: impl IntoIterator<Item = &'a ComponentType>) -> Self {
        extend(&mut self.one_of, types);
        self
    }

    /// The list for `role`.
    #[must_use]
    pub fn list(&self, role: Role) -> Option<&[ComponentType]> {
        match role {
            Role::With => self.with.as_deref(),
            Role::Without => self.without.as_deref(),
            Role::OneOf => self.one_of.as_deref(),
        }
    }

    /// The `with` list, or an empty slice.
    #[must_use]
    pub fn with_types(&self) -> &[ComponentType] {
        self.with.as_deref().unwrap_or_default()
    }

    /// The `without` list, or an empty slice.
    #[must_use]
    pub fn without_types(&self) -> &[ComponentType] {
        self.without.as_deref().unwrap_or_default()
    }

    /// The `oneOf` list, or an empty slice.
    #[must_use]
    pub fn one_of_types(&self) -> &[ComponentType] {
        self.one_of.as_deref().unwrap_or_default()
    }

    /// Every component named by any list, in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &ComponentType> {
        self.with_types()
            .iter()
            .chain(self.without_types())
            .chain(self.one_of_types())
    }

    /// Checks the configuration rules.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::NoConstraints`] when every list is omitted.
    /// - [`ConfigurationError::EmptyList`] when a list is present but empty.
    /// - [`ConfigurationError::DuplicateComponent`] when a name repeats within
    ///   one list.
    /// - [`ConfigurationError::ConflictingRoles`] when a name appears in two
    ///   lists.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let lists: Vec<(Role, &[ComponentType])> = [Role::With, Role::Without, Role::OneOf]
            .into_iter()
            .filter_map(|role| self.list(role).map(|list| (role, list)))
            .collect();

        if lists.is_empty() {
            return Err(ConfigurationError::NoConstraints);
        }
        if let Some((role, _)) = lists.iter().find(|(_, list)| list.is_empty()) {
            return Err(ConfigurationError::EmptyList { role: *role });
        }

        let mut seen: HashMap<&str, Role> = HashMap::new();
        for (role, list) in &lists {
            let mut local = HashSet::new();
            for ty in *list {
                if !local.insert(ty.name()) {
                    return Err(ConfigurationError::DuplicateComponent {
                        component: ty.name().to_string(),
                        role: *role,
                    });
                }
                if let Some(first) = seen.insert(ty.name(), *role) {
                    return Err(ConfigurationError::ConflictingRoles {
                        component: ty.name().to_string(),
                        first,
                        second: *role,
                    });
                }
            }
        }
        Ok(())
    }
}

fn extend<'a>(
    list: &mut Option<Vec<ComponentType>>,
    types: impl IntoIterator<Item = &'a ComponentType>,
) {
    list.get_or_insert_with(Vec::new)
        .extend(types.into_iter().cloned());
}
