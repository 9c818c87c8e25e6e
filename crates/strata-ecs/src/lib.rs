//! Strata ECS -- data-oriented entity/component core for the scene engine.
//!
//! Entities are plain integer handles recycled through a dense/sparse
//! allocator with per-entity epochs. Components are described at runtime by
//! [`ComponentMeta`](meta::ComponentMeta) records (ordered scalar fields)
//! and stored column-wise in [`ComponentStore`](store::ComponentStore)s with
//! Structure-of-Arrays layout. The [`World`](world::World) ties the two
//! together and adds protected entities, registered hierarchies, and a
//! snapshot layer for save/load.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! let mut world = World::new();
//! world
//!     .register(
//!         ComponentMeta::new("position", vec![FieldMeta::f32("x", 0.0), FieldMeta::f32("y", 0.0)]),
//!         16,
//!     )
//!     .unwrap();
//!
//! let e = world.create_entity();
//! world.store_mut("position").unwrap().add(e, &[("x", 1.0), ("y", 2.0)]);
//!
//! let store = world.store("position").unwrap();
//! assert_eq!(store.get(e, "x"), Some(1.0));
//! ```

#![deny(unsafe_code)]

pub mod column;
pub mod entity;
pub mod meta;
pub mod snapshot;
pub mod store;
pub mod world;

/// Sentinel encoding an absent entity or row in signed link columns.
pub const NONE: i32 = -1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A component name was referenced that has not been registered.
    #[error("component '{name}' is not registered")]
    UnknownComponent { name: String },

    /// A component name was registered twice.
    #[error("component '{name}' is already registered")]
    DuplicateComponent { name: String },

    /// A hierarchy name was registered twice.
    #[error("hierarchy '{name}' is already registered")]
    DuplicateHierarchy { name: String },

    /// Attempted to destroy an entity in the protected set (e.g. a tree root).
    #[error("entity {entity:?} is protected and cannot be destroyed")]
    ProtectedEntity { entity: entity::Entity },

    /// A registered hierarchy failed while removing an entity during a
    /// world-level destroy cascade.
    #[error("hierarchy '{name}' failed to remove an entity: {details}")]
    HierarchyRemove { name: String, details: String },

    /// Snapshot import into a world that already has live entities.
    #[error("cannot import a snapshot into a world that already has entities")]
    WorldNotEmpty,

    /// Snapshot names a component the receiving world does not know.
    #[error("snapshot contains unknown component '{name}'")]
    UnknownSnapshotComponent { name: String },

    /// Snapshot columns do not line up with the registered meta.
    #[error("snapshot for component '{name}' does not match the registered meta: {details}")]
    SnapshotMetaMismatch { name: String, details: String },

    /// A snapshotted tree has neither a named nor a default rehydrator.
    #[error("no rehydrator registered for tree '{name}' and no default is set")]
    MissingRehydrator { name: String },

    /// A rehydrator failed to re-attach tree bookkeeping after import.
    #[error("rehydrating tree '{name}' failed: {details}")]
    RehydrateFailed { name: String, details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::column::Column;
    pub use crate::entity::{Entity, EntityAllocator};
    pub use crate::meta::{is_hierarchy_meta, ComponentMeta, FieldKind, FieldMeta};
    pub use crate::snapshot::{digest, WorldSnapshot};
    pub use crate::store::ComponentStore;
    pub use crate::world::{Hierarchy, QueryView, World};
    pub use crate::{EcsError, NONE};
}
