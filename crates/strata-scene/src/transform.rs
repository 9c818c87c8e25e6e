//! Transform components and the transform-preserving tree.
//!
//! A Transform row is 12 local + 12 world + 12 inverse-world floats plus an
//! integer `dirty` bit, laid out in that column order (see [`LOCAL`],
//! [`WORLD`], [`INVERSE`], [`DIRTY`]). [`TransformTree`] is the hierarchy
//! over `TransformNode` rows: reparenting rewrites the member's local
//! transform so its world transform is preserved, and removal promotes
//! children to the root the same way.

use std::cell::RefCell;
use std::rc::Rc;

use strata_ecs::entity::Entity;
use strata_ecs::meta::{hierarchy_node_meta, ComponentMeta, FieldMeta};
use strata_ecs::snapshot::Rehydrator;
use strata_ecs::store::ComponentStore;
use strata_ecs::world::{Hierarchy, World};
use strata_ecs::EcsError;

use crate::math::Mat34;
use crate::tree::Tree;
use crate::SceneError;

/// Component name of the transform data store.
pub const TRANSFORM: &str = "Transform";

/// Component name of the transform hierarchy node store.
pub const TRANSFORM_NODE: &str = "TransformNode";

/// First column of the local 3x4.
pub const LOCAL: usize = 0;

/// First column of the world 3x4.
pub const WORLD: usize = 12;

/// First column of the inverse-world 3x4.
pub const INVERSE: usize = 24;

/// Column of the dirty bit.
pub const DIRTY: usize = 36;

// ---------------------------------------------------------------------------
// Metas
// ---------------------------------------------------------------------------

/// The Transform meta: `l00..l23`, `w00..w23`, `i00..i23`, `dirty`.
///
/// Matrix fields default to identity. `dirty` defaults to 1 so freshly added
/// rows are computed by the next propagation.
pub fn transform_meta() -> ComponentMeta {
    let mut fields = Vec::with_capacity(37);
    for prefix in ["l", "w", "i"] {
        for row in 0..3 {
            for col in 0..4 {
                let default = if row == col { 1.0 } else { 0.0 };
                fields.push(FieldMeta::f32(format!("{prefix}{row}{col}"), default));
            }
        }
    }
    fields.push(FieldMeta::i32("dirty", 1));
    ComponentMeta::new(TRANSFORM, fields)
}

/// The TransformNode meta: the five hierarchy link fields.
pub fn transform_node_meta() -> ComponentMeta {
    hierarchy_node_meta(TRANSFORM_NODE)
}

// ---------------------------------------------------------------------------
// Column access
// ---------------------------------------------------------------------------

/// Read a 3x4 matrix from twelve consecutive float columns.
pub fn read_mat(store: &ComponentStore, row: usize, base: usize) -> Mat34 {
    let mut m = [0.0f32; 12];
    for (k, slot) in m.iter_mut().enumerate() {
        *slot = store.column(base + k).as_f32()[row];
    }
    Mat34(m)
}

/// Write the local matrix and raise the dirty bit (epochs bumped).
pub(crate) fn write_local_dirty(store: &mut ComponentStore, row: usize, local: &Mat34) {
    {
        let columns = store.columns_mut();
        for (k, value) in local.0.iter().enumerate() {
            columns[LOCAL + k].as_f32_mut()[row] = *value;
        }
        columns[DIRTY].as_i32_mut()[row] = 1;
    }
    store.bump_row_version(row);
    store.bump_store_epoch();
}

/// Write world + inverse-world and clear the dirty bit (epochs bumped).
pub(crate) fn write_world_inverse(
    store: &mut ComponentStore,
    row: usize,
    world: &Mat34,
    inverse: &Mat34,
) {
    {
        let columns = store.columns_mut();
        for (k, value) in world.0.iter().enumerate() {
            columns[WORLD + k].as_f32_mut()[row] = *value;
        }
        for (k, value) in inverse.0.iter().enumerate() {
            columns[INVERSE + k].as_f32_mut()[row] = *value;
        }
        columns[DIRTY].as_i32_mut()[row] = 0;
    }
    store.bump_row_version(row);
    store.bump_store_epoch();
}

// ---------------------------------------------------------------------------
// TransformTree
// ---------------------------------------------------------------------------

/// A [`Tree`] over `TransformNode` rows that keeps world transforms stable
/// across structural edits.
pub struct TransformTree {
    base: Tree,
}

impl TransformTree {
    /// Create the transform hierarchy: registers the `Transform` and
    /// `TransformNode` stores, creates the root (identity, not dirty), and
    /// registers the hierarchy handle.
    pub fn new(world: &mut World) -> Result<Rc<RefCell<TransformTree>>, SceneError> {
        let base = Tree::init(
            world,
            Some(transform_meta()),
            transform_node_meta(),
            &[("dirty", 0.0)],
        )?;
        let handle = Rc::new(RefCell::new(TransformTree { base }));
        world.register_hierarchy(TRANSFORM_NODE, handle.clone())?;
        Ok(handle)
    }

    /// Re-attach a transform tree to restored stores (snapshot import).
    pub fn rehydrate(world: &mut World) -> Result<Rc<RefCell<TransformTree>>, SceneError> {
        let base = Tree::attach(world, TRANSFORM_NODE, Some(TRANSFORM.to_owned()))?;
        let root = base.root();
        let handle = Rc::new(RefCell::new(TransformTree { base }));
        world.protect_entity(root);
        world.register_hierarchy(TRANSFORM_NODE, handle.clone())?;
        Ok(handle)
    }

    /// A rehydrator for the transform tree's snapshot entry.
    pub fn rehydrator() -> Rehydrator {
        Rc::new(|world, name| {
            TransformTree::rehydrate(world)
                .map(|_| ())
                .map_err(|err| EcsError::RehydrateFailed {
                    name: name.to_owned(),
                    details: err.to_string(),
                })
        })
    }

    // -- delegated accessors -------------------------------------------------

    /// The root entity.
    #[inline]
    pub fn root(&self) -> Entity {
        self.base.root()
    }

    /// Structural epoch.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.base.epoch()
    }

    /// Cached DFS preorder.
    #[inline]
    pub fn order(&self) -> Rc<Vec<Entity>> {
        self.base.order()
    }

    /// Current parent of a member.
    pub fn parent_of(&self, world: &World, entity: Entity) -> Option<Entity> {
        self.base.parent_of(world, entity)
    }

    /// Direct children of a member.
    pub fn children_of(&self, world: &World, entity: Entity) -> Vec<Entity> {
        self.base.children_of(world, entity)
    }

    // -- structural edits ----------------------------------------------------

    /// Create an entity with identity transform and node rows, attached
    /// under `parent` (`None` = root). Its world transform starts as
    /// identity; the rewritten local compensates for the parent's world.
    pub fn spawn_node(
        &mut self,
        world: &mut World,
        parent: Option<Entity>,
    ) -> Result<Entity, SceneError> {
        let entity = world.create_entity();
        world.store_mut(TRANSFORM)?.add(entity, &[]);
        world.store_mut(TRANSFORM_NODE)?.add(entity, &[]);
        self.set_parent(world, entity, parent)?;
        Ok(entity)
    }

    /// Reparent, preserving the member's world transform.
    ///
    /// Before relinking, `local' = inverse(parent_world) * world_before` is
    /// written into the member's local columns and the row is marked dirty.
    /// The parent world is identity when the new parent is the root or has
    /// no Transform row.
    pub fn set_parent(
        &mut self,
        world: &mut World,
        entity: Entity,
        parent: Option<Entity>,
    ) -> Result<(), SceneError> {
        let Some(resolved) = self.base.validate_reparent(world, entity, parent)? else {
            return Ok(());
        };

        let pending = {
            let store = world.store(TRANSFORM)?;
            store.dense_index_of(entity).map(|row| {
                let world_before = read_mat(store, row, WORLD);
                let parent_world = if resolved == self.base.root() {
                    Mat34::IDENTITY
                } else {
                    match store.dense_index_of(resolved) {
                        Some(parent_row) => read_mat(store, parent_row, WORLD),
                        None => Mat34::IDENTITY,
                    }
                };
                (row, parent_world, world_before)
            })
        };
        if let Some((row, parent_world, world_before)) = pending {
            let local_prime = parent_world.inverse()?.mul(&world_before);
            write_local_dirty(world.store_mut(TRANSFORM)?, row, &local_prime);
        }

        self.base.relink(world, entity, resolved)
    }

    /// Remove a member: its children are reparented to the root with their
    /// world transforms preserved, then the entity is destroyed through the
    /// world (without re-entering this tree).
    pub fn remove(&mut self, world: &mut World, entity: Entity) -> Result<(), SceneError> {
        self.base.ensure_removable(world, entity)?;
        let children = self.base.children_of(world, entity);

        {
            let store = world.store_mut(TRANSFORM_NODE)?;
            self.base.detach_row(store, entity);
        }
        for child in children {
            self.set_parent(world, child, None)?;
        }
        world.store_mut(TRANSFORM_NODE)?.remove(entity);

        self.base.bump_epoch_internal();
        world.destroy_entity_safe(entity, false)?;
        self.base.rebuild_order(world);
        Ok(())
    }

    /// Unregister the hierarchy and unprotect the root.
    pub fn dispose(&mut self, world: &mut World) {
        self.base.dispose(world);
    }
}

impl Hierarchy for TransformTree {
    fn node_component(&self) -> &str {
        TRANSFORM_NODE
    }

    fn remove(&mut self, world: &mut World, entity: Entity) -> Result<(), EcsError> {
        TransformTree::remove(self, world, entity).map_err(|err| match err {
            SceneError::Ecs(inner) => inner,
            other => EcsError::HierarchyRemove {
                name: TRANSFORM_NODE.to_owned(),
                details: other.to_string(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
