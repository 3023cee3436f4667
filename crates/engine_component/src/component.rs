//! Nominal component types.
//!
//! A [`ComponentType`] is a named, identity-bearing token. Its data model is a
//! JSON object of defaults; values attached to entities are the defaults with
//! caller-supplied fields merged over them.
//!
//! ## Identity
//!
//! Identity is a process-unique token minted at construction, not the name and
//! not the shape of the defaults. Two types built separately with the same name
//! and the same defaults are different types and never interchangeable.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ComponentError;

/// A stored component value, shared between storage and query results.
pub type ComponentValue = Rc<Value>;

#[derive(Debug)]
struct ComponentDef {
    token: Uuid,
    name: String,
    defaults: Map<String, Value>,
}

/// A nominal component type: a name, documented defaults, and a unique token.
///
/// Cloning is cheap and preserves identity.
///
/// # Examples
///
/// ```rust
/// use engine_component::ComponentType;
/// use serde_json::json;
///
/// let health = ComponentType::new("Health", json!({ "current": 100, "max": 100 })).unwrap();
/// let value = health.create(json!({ "current": 40 })).unwrap();
/// assert_eq!(value, json!({ "current": 40, "max": 100 }));
/// ```
#[derive(Debug, Clone)]
pub struct ComponentType {
    def: Arc<ComponentDef>,
}

impl ComponentType {
    /// Defines a new component type.
    ///
    /// `defaults` must be a JSON object (or `null` for a type with no fields).
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::MalformedType`] if the name is blank or the
    /// defaults are not an object.
    pub fn new(name: impl Into<String>, defaults: Value) -> Result<Self, ComponentError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ComponentError::MalformedType {
                name,
                reason: "name must not be empty".to_string(),
            });
        }
        let defaults = match defaults {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ComponentError::MalformedType {
                    name,
                    reason: format!("defaults must be an object, got {}", kind_of(&other)),
                });
            }
        };
        Ok(Self {
            def: Arc::new(ComponentDef {
                token: Uuid::new_v4(),
                name,
                defaults,
            }),
        })
    }

    /// Defines a data-less marker type.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::MalformedType`] if the name is blank.
    pub fn tag(name: impl Into<String>) -> Result<Self, ComponentError> {
        Self::new(name, Value::Null)
    }

    /// The component name. Storage and query tracking are keyed by it.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// The identity token.
    #[must_use]
    pub fn token(&self) -> Uuid {
        self.def.token
    }

    /// The documented defaults.
    #[must_use]
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.def.defaults
    }

    /// Builds a component value by merging `partial` over the defaults.
    ///
    /// The merge is shallow: each top-level key of `partial` replaces the
    /// default of the same key. `null` yields the defaults unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidData`] if `partial` is neither an
    /// object nor `null`.
    pub fn create(&self, partial: Value) -> Result<Value, ComponentError> {
        let mut merged = self.def.defaults.clone();
        match partial {
            Value::Null => {}
            Value::Object(fields) => merged.extend(fields),
            other => {
                return Err(ComponentError::InvalidData {
                    component: self.def.name.clone(),
                    reason: format!("expected an object, got {}", kind_of(&other)),
                });
            }
        }
        Ok(Value::Object(merged))
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.def.token == other.def.token
    }
}

impl Eq for ComponentType {}

impl std::hash::Hash for ComponentType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.def.token.hash(state);
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.def.name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
