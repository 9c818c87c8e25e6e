//! Render-scene components: the render hierarchy plus its payload stores.
//!
//! A render-tree entity is one of three things: a *shape leaf* (an integer
//! shape kind with up to six scalar parameters and a material id), an
//! *operation* (an integer op kind combining its children), or *inert*
//! (a grouping node with no payload). The payloads live in their own stores;
//! the hierarchy itself is a plain [`Tree`] over `RenderNode` rows.

use std::cell::RefCell;
use std::rc::Rc;

use strata_ecs::entity::Entity;
use strata_ecs::meta::{hierarchy_node_meta, ComponentMeta, FieldMeta};
use strata_ecs::world::World;

use crate::tree::Tree;
use crate::SceneError;

/// Component name of the render hierarchy node store.
pub const RENDER_NODE: &str = "RenderNode";

/// Component name of the shape-leaf payload store.
pub const SHAPE_LEAF: &str = "ShapeLeaf";

/// Component name of the operation payload store.
pub const OPERATION: &str = "Operation";

/// Field keys of the six shape parameters.
pub const SHAPE_PARAMS: [&str; 6] = ["p0", "p1", "p2", "p3", "p4", "p5"];

// ---------------------------------------------------------------------------
// Metas
// ---------------------------------------------------------------------------

/// The RenderNode meta: the five hierarchy link fields.
pub fn render_node_meta() -> ComponentMeta {
    hierarchy_node_meta(RENDER_NODE)
}

/// The ShapeLeaf meta: `shapeType`, `materialId` (default -1), `p0..p5`.
pub fn shape_leaf_meta() -> ComponentMeta {
    let mut fields = vec![
        FieldMeta::i32("shapeType", 0),
        FieldMeta::i32("materialId", -1),
    ];
    for key in SHAPE_PARAMS {
        fields.push(FieldMeta::f32(key, 0.0));
    }
    ComponentMeta::new(SHAPE_LEAF, fields)
}

/// The Operation meta: `opType`.
pub fn operation_meta() -> ComponentMeta {
    ComponentMeta::new(OPERATION, vec![FieldMeta::i32("opType", 0)])
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Create the render tree, registering `RenderNode` plus the `ShapeLeaf`
/// and `Operation` payload stores.
pub fn create_render_tree(world: &mut World) -> Result<Rc<RefCell<Tree>>, SceneError> {
    world.register(shape_leaf_meta(), 16)?;
    world.register(operation_meta(), 16)?;
    Tree::new(world, None, render_node_meta(), &[])
}

/// Spawn a shape leaf under `parent` (`None` = root).
pub fn spawn_shape(
    world: &mut World,
    tree: &mut Tree,
    parent: Option<Entity>,
    shape_type: i32,
    material: i32,
    params: &[f32],
) -> Result<Entity, SceneError> {
    let entity = world.create_entity();
    let mut initial: Vec<(&str, f64)> = vec![
        ("shapeType", shape_type as f64),
        ("materialId", material as f64),
    ];
    for (key, value) in SHAPE_PARAMS.iter().zip(params.iter()) {
        initial.push((key, *value as f64));
    }
    world.store_mut(SHAPE_LEAF)?.add(entity, &initial);
    world.store_mut(RENDER_NODE)?.add(entity, &[]);
    tree.set_parent(world, entity, parent)?;
    Ok(entity)
}

/// Spawn an operation node under `parent` (`None` = root).
pub fn spawn_operation(
    world: &mut World,
    tree: &mut Tree,
    parent: Option<Entity>,
    op_type: i32,
) -> Result<Entity, SceneError> {
    let entity = world.create_entity();
    world
        .store_mut(OPERATION)?
        .add(entity, &[("opType", op_type as f64)]);
    world.store_mut(RENDER_NODE)?.add(entity, &[]);
    tree.set_parent(world, entity, parent)?;
    Ok(entity)
}

/// Spawn an inert grouping node (no payload) under `parent` (`None` = root).
pub fn spawn_inert(
    world: &mut World,
    tree: &mut Tree,
    parent: Option<Entity>,
) -> Result<Entity, SceneError> {
    let entity = world.create_entity();
    world.store_mut(RENDER_NODE)?.add(entity, &[]);
    tree.set_parent(world, entity, parent)?;
    Ok(entity)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
