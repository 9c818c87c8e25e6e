//! Transform propagation: refresh world/inverse matrices under dirty-cascade
//! rules.
//!
//! [`propagate_transforms`] walks every root of the transform hierarchy
//! (node rows whose `parent` is `NONE` -- the tree root plus any detached
//! nodes) in ascending entity-id order. Each root is traversed with an
//! explicit enter/leave DFS that carries the parent world matrix per depth
//! and an `ancestor_dirty` counter. A node recomputes iff it is dirty itself
//! or sits under a recomputed ancestor; clean subtrees are skipped entirely
//! (their stored world matrices are reused as the carried context).

use strata_ecs::entity::Entity;
use strata_ecs::store::ComponentStore;
use strata_ecs::world::World;
use strata_ecs::NONE;

use crate::math::Mat34;
use crate::transform::{read_mat, write_world_inverse, DIRTY, LOCAL, TRANSFORM, TRANSFORM_NODE, WORLD};
use crate::tree::{link_value, step_cap, LinkFields};
use crate::SceneError;

// ---------------------------------------------------------------------------
// TransformWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Frame {
    /// Cursor into the entity's child list (`NONE` when exhausted).
    next_child: i32,
    /// Whether this frame incremented `ancestor_dirty`.
    bumped: bool,
}

/// Reusable traversal stacks for [`propagate_transforms`].
///
/// The frame stack and the parent-matrix plane grow geometrically with tree
/// depth and keep their capacity across frames.
#[derive(Debug)]
pub struct TransformWorkspace {
    frames: Vec<Frame>,
    parents: Vec<Mat34>,
    roots: Vec<Entity>,
}

impl TransformWorkspace {
    /// Create a workspace with a small preallocated depth.
    pub fn new() -> Self {
        Self {
            frames: Vec::with_capacity(64),
            parents: Vec::with_capacity(64),
            roots: Vec::with_capacity(8),
        }
    }
}

impl Default for TransformWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

/// Enter a node: recompute (dirty) or reuse (clean) its world matrix.
///
/// Returns the matrix carried to the node's children and whether the node
/// was recomputed (which raises `ancestor_dirty` for the subtree).
fn enter_node(
    node: Entity,
    parent_ctx: &Mat34,
    ancestor_dirty: usize,
    transforms: &mut ComponentStore,
) -> Result<(Mat34, bool), SceneError> {
    let Some(row) = transforms.dense_index_of(node) else {
        // No Transform row: the parent context passes through unchanged.
        return Ok((*parent_ctx, false));
    };
    let self_dirty = transforms.column(DIRTY).as_i32()[row] != 0;
    if ancestor_dirty > 0 || self_dirty {
        let local = read_mat(transforms, row, LOCAL);
        let world = parent_ctx.mul(&local);
        let inverse = world.inverse()?;
        write_world_inverse(transforms, row, &world, &inverse);
        Ok((world, true))
    } else {
        Ok((read_mat(transforms, row, WORLD), false))
    }
}

/// Refresh world and inverse-world transforms for the whole hierarchy.
///
/// Visits roots in ascending entity-id order and children in
/// `firstChild -> nextSibling` order. Recomputed rows get their `dirty` bit
/// cleared and their row/store epochs bumped. DFS walks are bounded by
/// `4 * size + 16` steps against corrupted links.
///
/// # Errors
///
/// Propagates [`SceneError::SingularMatrix`] from the general inverse; the
/// stores must have the `Transform`/`TransformNode` metas registered.
pub fn propagate_transforms(
    world: &mut World,
    workspace: &mut TransformWorkspace,
) -> Result<(), SceneError> {
    let (nodes, transforms) = world.store_pair_mut(TRANSFORM_NODE, TRANSFORM)?;
    let links = LinkFields::resolve(nodes.meta())
        .expect("TransformNode satisfies the hierarchy schema");

    workspace.roots.clear();
    for row in 0..nodes.size() {
        if link_value(nodes, links.parent, row) == NONE {
            if let Some(entity) = nodes.entity_at(row) {
                workspace.roots.push(entity);
            }
        }
    }
    workspace.roots.sort_unstable();

    let cap = step_cap(nodes.size());
    let roots = std::mem::take(&mut workspace.roots);
    for &root in &roots {
        workspace.frames.clear();
        workspace.parents.clear();
        let mut ancestor_dirty = 0usize;
        let mut steps = 0usize;

        let (carried, bumped) = enter_node(root, &Mat34::IDENTITY, 0, transforms)?;
        if bumped {
            ancestor_dirty += 1;
        }
        workspace.frames.push(Frame {
            next_child: child_head(nodes, &links, root),
            bumped,
        });
        workspace.parents.push(carried);

        loop {
            let Some(top) = workspace.frames.last_mut() else {
                break;
            };
            steps += 1;
            if steps > cap {
                tracing::warn!(root = %root, "propagation walk exceeded step cap");
                break;
            }

            let child_link = top.next_child;
            let Some(child) = Entity::from_link(child_link) else {
                let done = workspace.frames.pop().expect("frame stack is non-empty");
                workspace.parents.pop();
                if done.bumped {
                    ancestor_dirty -= 1;
                }
                continue;
            };
            top.next_child = sibling_next(nodes, &links, child);

            let parent_ctx = *workspace.parents.last().expect("parent plane tracks frames");
            let (carried, bumped) = enter_node(child, &parent_ctx, ancestor_dirty, transforms)?;
            if bumped {
                ancestor_dirty += 1;
            }
            workspace.frames.push(Frame {
                next_child: child_head(nodes, &links, child),
                bumped,
            });
            workspace.parents.push(carried);
        }
    }
    workspace.roots = roots;
    Ok(())
}

fn child_head(nodes: &ComponentStore, links: &LinkFields, entity: Entity) -> i32 {
    nodes
        .dense_index_of(entity)
        .map(|row| link_value(nodes, links.first_child, row))
        .unwrap_or(NONE)
}

fn sibling_next(nodes: &ComponentStore, links: &LinkFields, entity: Entity) -> i32 {
    nodes
        .dense_index_of(entity)
        .map(|row| link_value(nodes, links.next_sibling, row))
        .unwrap_or(NONE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
