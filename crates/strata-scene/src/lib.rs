//! Strata Scene -- hierarchical trees and transform propagation over the ECS.
//!
//! This crate layers single-rooted intrusive hierarchies ([`tree::Tree`]) on
//! top of hierarchy-schema component stores, adds the transform-preserving
//! [`transform::TransformTree`] variant, and provides the per-frame
//! [`propagate::propagate_transforms`] system that refreshes world and
//! inverse-world 3x4 matrices under dirty-cascade rules.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//! use strata_scene::prelude::*;
//!
//! let mut world = World::new();
//! let tree = TransformTree::new(&mut world).unwrap();
//!
//! let node = tree.borrow_mut().spawn_node(&mut world, None).unwrap();
//! world.store_mut(TRANSFORM).unwrap().update(node, &[("l03", 2.0), ("dirty", 1.0)]);
//!
//! let mut workspace = TransformWorkspace::new();
//! propagate_transforms(&mut world, &mut workspace).unwrap();
//!
//! let store = world.store(TRANSFORM).unwrap();
//! assert_eq!(store.get(node, "w03"), Some(2.0));
//! ```

#![deny(unsafe_code)]

pub mod math;
pub mod propagate;
pub mod render;
pub mod transform;
pub mod tree;

use strata_ecs::entity::Entity;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// A tree was constructed over a meta lacking the hierarchy schema.
    #[error("component '{name}' does not satisfy the hierarchy schema")]
    InvalidHierarchyMeta { name: String },

    /// A tree operation referenced an entity without a node row.
    #[error("entity {entity:?} is not a member of tree '{tree}'")]
    NotAMember { entity: Entity, tree: String },

    /// The tree root cannot be reparented or removed.
    #[error("the root of tree '{tree}' cannot be reparented or removed")]
    RootImmutable { tree: String },

    /// A tree was rehydrated from a node store with no row 0.
    #[error("node store '{name}' has no root row to rehydrate from")]
    MissingRoot { name: String },

    /// Reparenting would create a cycle.
    #[error("cannot reparent {entity:?} under its own descendant {parent:?}")]
    ReparentToDescendant { entity: Entity, parent: Entity },

    /// General affine inverse hit a near-zero determinant.
    #[error("matrix is singular (|det| = {det:e})")]
    SingularMatrix { det: f64 },

    /// An underlying ECS operation failed.
    #[error(transparent)]
    Ecs(#[from] strata_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::math::Mat34;
    pub use crate::propagate::{propagate_transforms, TransformWorkspace};
    pub use crate::render::{
        create_render_tree, operation_meta, render_node_meta, shape_leaf_meta, spawn_inert,
        spawn_operation, spawn_shape, OPERATION, RENDER_NODE, SHAPE_LEAF,
    };
    pub use crate::transform::{
        transform_meta, transform_node_meta, TransformTree, DIRTY, INVERSE, LOCAL, TRANSFORM,
        TRANSFORM_NODE, WORLD,
    };
    pub use crate::tree::Tree;
    pub use crate::SceneError;
}
