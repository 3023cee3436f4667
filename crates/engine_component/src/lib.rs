//! # engine_component
//!
//! The "E" and "C" in ECS: entity identity, what a component type is, and
//! how component values are stored.
//!
//! This crate provides:
//!
//! - [`EntityId`] - packed `u32` generational entity identifiers.
//! - [`EntityManager`] - allocator that recycles indices and retires them once
//!   their generation is exhausted.
//! - [`ComponentType`] - nominal component type token with defaults.
//! - [`ComponentStorage`] - sparse-set storage for one component type.
//! - [`ComponentRegistry`] - name-keyed lookup of storages.

pub mod component;
pub mod entity;
pub mod error;
pub mod registry;
pub mod storage;

pub use component::{ComponentType, ComponentValue};
pub use entity::{AllocatorState, EntityId, EntityManager, FreeSlot};
pub use error::ComponentError;
pub use registry::ComponentRegistry;
pub use storage::ComponentStorage;
