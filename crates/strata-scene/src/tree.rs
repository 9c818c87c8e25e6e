//! Single-rooted hierarchical trees over hierarchy-schema stores.
//!
//! Links live as intrusive signed columns (`parent`, `firstChild`,
//! `lastChild`, `nextSibling`, `prevSibling`) in the node component itself,
//! so detach and append-at-end are O(1) list splices. Every structural edit
//! bumps the tree epoch and the edited entity's allocator epoch, and rebuilds
//! the cached depth-first preorder.
//!
//! The root occupies row 0 of the node store (and of the optional data
//! store), is protected from world-level destruction, and can be neither
//! reparented nor removed.

use std::cell::RefCell;
use std::rc::Rc;

use strata_ecs::entity::Entity;
use strata_ecs::meta::{is_hierarchy_meta, ComponentMeta};
use strata_ecs::snapshot::Rehydrator;
use strata_ecs::store::ComponentStore;
use strata_ecs::world::{Hierarchy, World};
use strata_ecs::{EcsError, NONE};

use crate::SceneError;

// ---------------------------------------------------------------------------
// Link plumbing
// ---------------------------------------------------------------------------

/// Resolved column indices of the five hierarchy link fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkFields {
    pub parent: usize,
    pub first_child: usize,
    pub last_child: usize,
    pub next_sibling: usize,
    pub prev_sibling: usize,
}

impl LinkFields {
    pub(crate) fn resolve(meta: &ComponentMeta) -> Option<Self> {
        Some(Self {
            parent: meta.field_index("parent")?,
            first_child: meta.field_index("firstChild")?,
            last_child: meta.field_index("lastChild")?,
            next_sibling: meta.field_index("nextSibling")?,
            prev_sibling: meta.field_index("prevSibling")?,
        })
    }
}

#[inline]
pub(crate) fn link_value(store: &ComponentStore, field: usize, row: usize) -> i32 {
    store.column(field).as_i32()[row]
}

/// Write a link column slot, bumping row/store epochs only on change.
pub(crate) fn write_link(store: &mut ComponentStore, field: usize, row: usize, value: i32) {
    let current = store.column(field).as_i32()[row];
    if current != value {
        store.columns_mut()[field].as_i32_mut()[row] = value;
        store.bump_row_version(row);
        store.bump_store_epoch();
    }
}

/// Step bound for DFS walks, defending against corrupted links.
#[inline]
pub(crate) fn step_cap(node_count: usize) -> usize {
    4 * node_count + 16
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A single-rooted hierarchy layered over a node-shaped component store.
pub struct Tree {
    node_component: String,
    data_component: Option<String>,
    root: Entity,
    epoch: u64,
    order: Rc<Vec<Entity>>,
    pub(crate) links: LinkFields,
}

impl Tree {
    /// Build the tree state and its stores without registering a hierarchy
    /// handle; the public constructors wrap this.
    pub(crate) fn init(
        world: &mut World,
        data_meta: Option<ComponentMeta>,
        node_meta: ComponentMeta,
        root_data: &[(&str, f64)],
    ) -> Result<Tree, SceneError> {
        if !is_hierarchy_meta(&node_meta) {
            return Err(SceneError::InvalidHierarchyMeta {
                name: node_meta.name().to_owned(),
            });
        }
        let links = LinkFields::resolve(&node_meta)
            .expect("hierarchy schema guarantees the link fields");

        let data_component = data_meta.as_ref().map(|m| m.name().to_owned());
        let node_component = node_meta.name().to_owned();
        if let Some(meta) = data_meta {
            world.register(meta, 16)?;
        }
        world.register(node_meta, 16)?;

        let root = world.create_entity();
        if let Some(name) = &data_component {
            world.store_mut(name)?.add(root, root_data);
        }
        world.store_mut(&node_component)?.add(root, &[]);
        world.protect_entity(root);

        let mut tree = Tree {
            node_component,
            data_component,
            root,
            epoch: 0,
            order: Rc::new(Vec::new()),
            links,
        };
        tree.rebuild_order(world);
        Ok(tree)
    }

    /// Create a tree, registering fresh stores and the hierarchy handle.
    ///
    /// The optional `data_meta` store shares row 0 with the root, which is
    /// created, protected, and given `root_data` as its data row.
    ///
    /// # Errors
    ///
    /// Fails if the node meta lacks the hierarchy schema or either store
    /// name is already registered.
    pub fn new(
        world: &mut World,
        data_meta: Option<ComponentMeta>,
        node_meta: ComponentMeta,
        root_data: &[(&str, f64)],
    ) -> Result<Rc<RefCell<Tree>>, SceneError> {
        let tree = Tree::init(world, data_meta, node_meta, root_data)?;
        let name = tree.node_component.clone();
        let handle = Rc::new(RefCell::new(tree));
        world.register_hierarchy(&name, handle.clone())?;
        Ok(handle)
    }

    /// Attach tree bookkeeping to already-restored stores (snapshot import).
    ///
    /// The root is recovered from row 0 of the node store.
    pub(crate) fn attach(
        world: &World,
        node_component: &str,
        data_component: Option<String>,
    ) -> Result<Tree, SceneError> {
        let store = world.store(node_component)?;
        if !is_hierarchy_meta(store.meta()) {
            return Err(SceneError::InvalidHierarchyMeta {
                name: node_component.to_owned(),
            });
        }
        let links = LinkFields::resolve(store.meta())
            .expect("hierarchy schema guarantees the link fields");
        let root = store.entity_at(0).ok_or_else(|| SceneError::MissingRoot {
            name: node_component.to_owned(),
        })?;
        let mut tree = Tree {
            node_component: node_component.to_owned(),
            data_component,
            root,
            epoch: 0,
            order: Rc::new(Vec::new()),
            links,
        };
        tree.rebuild_order_ref(world);
        Ok(tree)
    }

    /// Re-attach a tree to restored stores and re-register it.
    pub fn rehydrate(
        world: &mut World,
        node_component: &str,
    ) -> Result<Rc<RefCell<Tree>>, SceneError> {
        let tree = Tree::attach(world, node_component, None)?;
        let root = tree.root;
        let handle = Rc::new(RefCell::new(tree));
        world.protect_entity(root);
        world.register_hierarchy(node_component, handle.clone())?;
        Ok(handle)
    }

    /// A rehydrator that re-attaches a plain [`Tree`] by node-store name.
    pub fn rehydrator() -> Rehydrator {
        Rc::new(|world, name| {
            Tree::rehydrate(world, name)
                .map(|_| ())
                .map_err(|err| EcsError::RehydrateFailed {
                    name: name.to_owned(),
                    details: err.to_string(),
                })
        })
    }

    // -- accessors -----------------------------------------------------------

    /// The node-component name this tree is registered under.
    #[inline]
    pub fn node_component(&self) -> &str {
        &self.node_component
    }

    /// The optional data-component name.
    #[inline]
    pub fn data_component(&self) -> Option<&str> {
        self.data_component.as_deref()
    }

    /// The root entity.
    #[inline]
    pub fn root(&self) -> Entity {
        self.root
    }

    /// Structural epoch; increments on every mutation.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The cached depth-first preorder, root first.
    #[inline]
    pub fn order(&self) -> Rc<Vec<Entity>> {
        self.order.clone()
    }

    /// Whether an entity has a node row in this tree.
    pub fn is_member(&self, world: &World, entity: Entity) -> bool {
        world
            .store(&self.node_component)
            .map(|s| s.has(entity))
            .unwrap_or(false)
    }

    /// Current parent of a member, `None` for detached nodes and the root.
    pub fn parent_of(&self, world: &World, entity: Entity) -> Option<Entity> {
        let store = world.store(&self.node_component).ok()?;
        let row = store.dense_index_of(entity)?;
        Entity::from_link(link_value(store, self.links.parent, row))
    }

    /// Direct children of a member, in sibling order.
    pub fn children_of(&self, world: &World, entity: Entity) -> Vec<Entity> {
        let Ok(store) = world.store(&self.node_component) else {
            return Vec::new();
        };
        let Some(row) = store.dense_index_of(entity) else {
            return Vec::new();
        };
        let cap = step_cap(store.size());
        let mut steps = 0;
        let mut children = Vec::new();
        let mut cursor = link_value(store, self.links.first_child, row);
        while let Some(child) = Entity::from_link(cursor) {
            steps += 1;
            if steps > cap {
                tracing::warn!(tree = %self.node_component, "child walk exceeded step cap");
                break;
            }
            children.push(child);
            match store.dense_index_of(child) {
                Some(crow) => cursor = link_value(store, self.links.next_sibling, crow),
                None => break,
            }
        }
        children
    }

    // -- structural edits ----------------------------------------------------

    /// Reparent `entity` under `parent` (`None` coerces to the root).
    ///
    /// # Errors
    ///
    /// Root reparent, non-members, and descendant targets fail; reparenting
    /// to the current parent is a no-op.
    pub fn set_parent(
        &mut self,
        world: &mut World,
        entity: Entity,
        parent: Option<Entity>,
    ) -> Result<(), SceneError> {
        match self.validate_reparent(world, entity, parent)? {
            Some(resolved) => self.relink(world, entity, resolved),
            None => Ok(()),
        }
    }

    /// Remove a member, promoting its children to the end of the root's
    /// child list, then destroying the entity through the world (without
    /// re-entering this tree).
    pub fn remove(&mut self, world: &mut World, entity: Entity) -> Result<(), SceneError> {
        self.ensure_removable(world, entity)?;
        let children = self.children_of(world, entity);

        {
            let store = world.store_mut(&self.node_component)?;
            self.detach_row(store, entity);

            // Splice the captured child chain (links intact) onto the root.
            if let (Some(&first), Some(&last)) = (children.first(), children.last()) {
                let root_row = store
                    .dense_index_of(self.root)
                    .expect("root always has a node row");
                for &child in &children {
                    if let Some(crow) = store.dense_index_of(child) {
                        write_link(store, self.links.parent, crow, self.root.to_link());
                    }
                }
                let tail = link_value(store, self.links.last_child, root_row);
                if let Some(tail_row) =
                    Entity::from_link(tail).and_then(|t| store.dense_index_of(t))
                {
                    write_link(store, self.links.next_sibling, tail_row, first.to_link());
                    if let Some(frow) = store.dense_index_of(first) {
                        write_link(store, self.links.prev_sibling, frow, tail);
                    }
                } else {
                    write_link(store, self.links.first_child, root_row, first.to_link());
                }
                write_link(store, self.links.last_child, root_row, last.to_link());
            }

            // Clear the removed entity's child pointers and drop its row;
            // the world-level destroy skips registered node stores.
            if let Some(row) = store.dense_index_of(entity) {
                write_link(store, self.links.first_child, row, NONE);
                write_link(store, self.links.last_child, row, NONE);
            }
            store.remove(entity);
        }

        self.epoch += 1;
        world.destroy_entity_safe(entity, false)?;
        self.rebuild_order(world);
        Ok(())
    }

    /// Unregister the hierarchy and unprotect the root. The stores and their
    /// rows are left in place.
    pub fn dispose(&mut self, world: &mut World) {
        world.unregister_hierarchy(&self.node_component);
        world.unprotect_entity(self.root);
    }

    // -- internals shared with TransformTree ---------------------------------

    pub(crate) fn ensure_removable(
        &self,
        world: &World,
        entity: Entity,
    ) -> Result<(), SceneError> {
        if entity == self.root {
            return Err(SceneError::RootImmutable {
                tree: self.node_component.clone(),
            });
        }
        let store = world.store(&self.node_component)?;
        if !store.has(entity) {
            return Err(SceneError::NotAMember {
                entity,
                tree: self.node_component.clone(),
            });
        }
        Ok(())
    }

    /// Validate a reparent request. Returns the resolved parent, or `None`
    /// when the request is a no-op (already the current parent).
    pub(crate) fn validate_reparent(
        &self,
        world: &World,
        entity: Entity,
        parent: Option<Entity>,
    ) -> Result<Option<Entity>, SceneError> {
        if entity == self.root {
            return Err(SceneError::RootImmutable {
                tree: self.node_component.clone(),
            });
        }
        let store = world.store(&self.node_component)?;
        let Some(entity_row) = store.dense_index_of(entity) else {
            return Err(SceneError::NotAMember {
                entity,
                tree: self.node_component.clone(),
            });
        };
        let parent = parent.unwrap_or(self.root);
        if !store.has(parent) {
            return Err(SceneError::NotAMember {
                entity: parent,
                tree: self.node_component.clone(),
            });
        }
        if link_value(store, self.links.parent, entity_row) == parent.to_link() {
            return Ok(None);
        }

        // Slow/fast walk up the parent chain: reject if `entity` appears
        // above `parent`; bail out of corrupt cycles that never reach it.
        let mut slow = parent;
        let mut fast = parent;
        loop {
            if fast == entity {
                return Err(SceneError::ReparentToDescendant { entity, parent });
            }
            let Some(step) = self.parent_entity(store, fast) else {
                break;
            };
            if step == entity {
                return Err(SceneError::ReparentToDescendant { entity, parent });
            }
            let Some(step2) = self.parent_entity(store, step) else {
                break;
            };
            fast = step2;
            if let Some(s) = self.parent_entity(store, slow) {
                slow = s;
            }
            if slow == fast {
                tracing::warn!(tree = %self.node_component, "parent chain cycle detected");
                break;
            }
        }
        Ok(Some(parent))
    }

    /// Detach, append under `parent`, bump epochs, rebuild the DFS order.
    pub(crate) fn relink(
        &mut self,
        world: &mut World,
        entity: Entity,
        parent: Entity,
    ) -> Result<(), SceneError> {
        {
            let store = world.store_mut(&self.node_component)?;
            self.detach_row(store, entity);
            self.append_row(store, parent, entity);
        }
        self.epoch += 1;
        world.allocator_mut().bump_epoch(entity);
        self.rebuild_order(world);
        Ok(())
    }

    fn parent_entity(&self, store: &ComponentStore, entity: Entity) -> Option<Entity> {
        let row = store.dense_index_of(entity)?;
        Entity::from_link(link_value(store, self.links.parent, row))
    }

    /// O(1) unlink from the parent's intrusive child list.
    pub(crate) fn detach_row(&self, store: &mut ComponentStore, entity: Entity) {
        let Some(row) = store.dense_index_of(entity) else {
            return;
        };
        let parent = link_value(store, self.links.parent, row);
        if parent < 0 {
            return;
        }
        let prev = link_value(store, self.links.prev_sibling, row);
        let next = link_value(store, self.links.next_sibling, row);

        if let Some(parent_row) =
            Entity::from_link(parent).and_then(|p| store.dense_index_of(p))
        {
            if prev < 0 {
                write_link(store, self.links.first_child, parent_row, next);
            }
            if next < 0 {
                write_link(store, self.links.last_child, parent_row, prev);
            }
        }
        if let Some(prev_row) = Entity::from_link(prev).and_then(|p| store.dense_index_of(p)) {
            write_link(store, self.links.next_sibling, prev_row, next);
        }
        if let Some(next_row) = Entity::from_link(next).and_then(|n| store.dense_index_of(n)) {
            write_link(store, self.links.prev_sibling, next_row, prev);
        }

        write_link(store, self.links.parent, row, NONE);
        write_link(store, self.links.prev_sibling, row, NONE);
        write_link(store, self.links.next_sibling, row, NONE);
    }

    /// O(1) append at the end of the parent's child list.
    fn append_row(&self, store: &mut ComponentStore, parent: Entity, child: Entity) {
        let Some(parent_row) = store.dense_index_of(parent) else {
            return;
        };
        let Some(child_row) = store.dense_index_of(child) else {
            return;
        };
        let tail = link_value(store, self.links.last_child, parent_row);
        if let Some(tail_row) = Entity::from_link(tail).and_then(|t| store.dense_index_of(t)) {
            write_link(store, self.links.next_sibling, tail_row, child.to_link());
            write_link(store, self.links.prev_sibling, child_row, tail);
        } else {
            write_link(store, self.links.first_child, parent_row, child.to_link());
        }
        write_link(store, self.links.last_child, parent_row, child.to_link());
        write_link(store, self.links.parent, child_row, parent.to_link());
    }

    /// Bump the structural epoch (TransformTree removal path).
    pub(crate) fn bump_epoch_internal(&mut self) {
        self.epoch += 1;
    }

    /// Recompute the cached DFS preorder.
    pub(crate) fn rebuild_order(&mut self, world: &World) {
        self.rebuild_order_ref(world);
    }

    fn rebuild_order_ref(&mut self, world: &World) {
        if let Ok(store) = world.store(&self.node_component) {
            self.order = Rc::new(compute_dfs_order(store, self.links, self.root));
        }
    }
}

impl Hierarchy for Tree {
    fn node_component(&self) -> &str {
        &self.node_component
    }

    fn remove(&mut self, world: &mut World, entity: Entity) -> Result<(), EcsError> {
        Tree::remove(self, world, entity).map_err(|err| match err {
            SceneError::Ecs(inner) => inner,
            other => EcsError::HierarchyRemove {
                name: self.node_component.clone(),
                details: other.to_string(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// DFS order
// ---------------------------------------------------------------------------

/// Iterative depth-first preorder from `root`, following
/// `firstChild -> nextSibling`. Children are pushed in reverse (via
/// `lastChild`/`prevSibling`) so the first child pops first. A step cap of
/// `4 * size + 16` truncates walks over corrupted links.
pub(crate) fn compute_dfs_order(
    store: &ComponentStore,
    links: LinkFields,
    root: Entity,
) -> Vec<Entity> {
    let cap = step_cap(store.size());
    let mut steps = 0usize;
    let mut order = Vec::with_capacity(store.size());
    let mut stack = vec![root];

    while let Some(entity) = stack.pop() {
        steps += 1;
        if steps > cap {
            tracing::warn!(root = %root, "DFS walk exceeded step cap; returning partial order");
            break;
        }
        order.push(entity);
        let Some(row) = store.dense_index_of(entity) else {
            continue;
        };
        let mut cursor = link_value(store, links.last_child, row);
        while let Some(child) = Entity::from_link(cursor) {
            steps += 1;
            if steps > cap {
                tracing::warn!(root = %root, "DFS walk exceeded step cap; returning partial order");
                return order;
            }
            stack.push(child);
            match store.dense_index_of(child) {
                Some(crow) => cursor = link_value(store, links.prev_sibling, crow),
                None => break,
            }
        }
    }
    order
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
