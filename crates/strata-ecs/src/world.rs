//! The [`World`]: store registry, allocator owner, protected entities, and
//! registered hierarchies.
//!
//! The core is single-threaded and cooperative (no locks), so hierarchy
//! handles are shared as `Rc<RefCell<dyn Hierarchy>>`. During a destroy
//! cascade the world clones the relevant handles out of its registry first,
//! which lets a tree mutate the world without aliasing the registry; trees
//! destroy their own members with `remove_from_trees = false` so the cascade
//! never re-enters the tree that initiated it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::entity::{Entity, EntityAllocator};
use crate::meta::ComponentMeta;
use crate::snapshot::Rehydrator;
use crate::store::ComponentStore;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// A registered hierarchy, as the world sees it.
///
/// Trees implement this so [`World::destroy_entity_safe`] can cascade member
/// removal (child promotion included) before dropping component rows.
pub trait Hierarchy {
    /// Name of the node component this hierarchy is built over.
    fn node_component(&self) -> &str;

    /// Remove `entity` from the hierarchy, promoting its children per the
    /// tree's semantics. Must not re-enter the world-level tree cascade.
    fn remove(&mut self, world: &mut World, entity: Entity) -> Result<(), EcsError>;
}

/// Shared handle to a registered hierarchy.
pub type HierarchyHandle = Rc<RefCell<dyn Hierarchy>>;

// ---------------------------------------------------------------------------
// QueryView
// ---------------------------------------------------------------------------

/// Snapshot result of a multi-store intersection query.
///
/// `rows[k][i]` is the dense row in the k-th queried store for
/// `entities[i]`. The view holds no borrow of the world.
#[derive(Debug, Default)]
pub struct QueryView {
    /// Matching entities, in the driving store's dense order.
    pub entities: Vec<Entity>,
    /// Per-store dense rows, parallel to `entities`.
    pub rows: Vec<Vec<usize>>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container.
pub struct World {
    pub(crate) allocator: EntityAllocator,
    /// Stores in registration order.
    pub(crate) stores: Vec<ComponentStore>,
    /// Component name -> index into `stores`.
    store_index: HashMap<String, usize>,
    /// Entities the world refuses to destroy (tree roots).
    pub(crate) protected: HashSet<Entity>,
    /// Registered hierarchies, in registration order.
    hierarchies: Vec<(String, HierarchyHandle)>,
    /// Per-tree snapshot rehydrators (see the snapshot module).
    pub(crate) rehydrators: HashMap<String, Rehydrator>,
    /// Fallback rehydrator for trees without a named one.
    pub(crate) default_rehydrator: Option<Rehydrator>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.allocator.len())
            .field("store_count", &self.stores.len())
            .field("hierarchy_count", &self.hierarchies.len())
            .finish()
    }
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            stores: Vec::new(),
            store_index: HashMap::new(),
            protected: HashSet::new(),
            hierarchies: Vec::new(),
            rehydrators: HashMap::new(),
            default_rehydrator: None,
        }
    }

    // -- store registry ------------------------------------------------------

    /// Register a component store for `meta`.
    ///
    /// # Errors
    ///
    /// Fails with [`EcsError::DuplicateComponent`] if the name is taken.
    pub fn register(
        &mut self,
        meta: ComponentMeta,
        initial_capacity: usize,
    ) -> Result<&mut ComponentStore, EcsError> {
        if self.store_index.contains_key(meta.name()) {
            return Err(EcsError::DuplicateComponent {
                name: meta.name().to_owned(),
            });
        }
        let index = self.stores.len();
        self.store_index.insert(meta.name().to_owned(), index);
        self.stores.push(ComponentStore::new(meta, initial_capacity));
        Ok(&mut self.stores[index])
    }

    /// Whether a component name is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.store_index.contains_key(name)
    }

    /// Look up a store by component name.
    pub fn store(&self, name: &str) -> Result<&ComponentStore, EcsError> {
        self.store_index
            .get(name)
            .map(|&idx| &self.stores[idx])
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
            })
    }

    /// Look up a store mutably by component name.
    pub fn store_mut(&mut self, name: &str) -> Result<&mut ComponentStore, EcsError> {
        match self.store_index.get(name) {
            Some(&idx) => Ok(&mut self.stores[idx]),
            None => Err(EcsError::UnknownComponent {
                name: name.to_owned(),
            }),
        }
    }

    /// Look up the store registered for a meta.
    pub fn store_of(&self, meta: &ComponentMeta) -> Result<&ComponentStore, EcsError> {
        self.store(meta.name())
    }

    /// Registered component names, in registration order.
    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.meta().name()).collect()
    }

    /// Borrow one store shared and another exclusively.
    ///
    /// The transform propagator reads hierarchy links from one store while
    /// writing matrices into another; this is the safe split for that.
    pub fn store_pair_mut(
        &mut self,
        read: &str,
        write: &str,
    ) -> Result<(&ComponentStore, &mut ComponentStore), EcsError> {
        let read_idx = *self
            .store_index
            .get(read)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: read.to_owned(),
            })?;
        let write_idx = *self
            .store_index
            .get(write)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: write.to_owned(),
            })?;
        assert_ne!(read_idx, write_idx, "store_pair_mut requires distinct stores");
        if read_idx < write_idx {
            let (left, right) = self.stores.split_at_mut(write_idx);
            Ok((&left[read_idx], &mut right[0]))
        } else {
            let (left, right) = self.stores.split_at_mut(read_idx);
            Ok((&right[0], &mut left[write_idx]))
        }
    }

    // -- entity lifecycle ----------------------------------------------------

    /// Allocate a new entity id.
    pub fn create_entity(&mut self) -> Entity {
        self.allocator.create()
    }

    /// Destroy an entity, cascading through registered hierarchies.
    ///
    /// Equivalent to `destroy_entity_safe(entity, true)`.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.destroy_entity_safe(entity, true)
    }

    /// Destroy an entity.
    ///
    /// Protected entities fail. When `remove_from_trees` is set, every
    /// registered hierarchy whose node store has the entity removes it first
    /// (cascading child promotion per that tree's semantics). Rows in stores
    /// that are not registered node stores are then dropped, and the id is
    /// freed. Trees destroying their own members pass `false` so the cascade
    /// does not re-enter them; their node rows are removed by the tree itself.
    pub fn destroy_entity_safe(
        &mut self,
        entity: Entity,
        remove_from_trees: bool,
    ) -> Result<(), EcsError> {
        if self.protected.contains(&entity) {
            return Err(EcsError::ProtectedEntity { entity });
        }

        if remove_from_trees {
            let involved: Vec<HierarchyHandle> = self
                .hierarchies
                .iter()
                .filter(|(name, _)| {
                    self.store(name).map(|s| s.has(entity)).unwrap_or(false)
                })
                .map(|(_, handle)| handle.clone())
                .collect();
            for handle in involved {
                handle.borrow_mut().remove(self, entity)?;
            }
        }

        let node_stores: HashSet<&str> =
            self.hierarchies.iter().map(|(name, _)| name.as_str()).collect();
        for store in &mut self.stores {
            if !node_stores.contains(store.meta().name()) {
                store.remove(entity);
            }
        }

        self.allocator.destroy(entity);
        Ok(())
    }

    /// Shared access to the allocator.
    #[inline]
    pub fn allocator(&self) -> &EntityAllocator {
        &self.allocator
    }

    /// Exclusive access to the allocator (epoch bumps from trees).
    #[inline]
    pub fn allocator_mut(&mut self) -> &mut EntityAllocator {
        &mut self.allocator
    }

    // -- protected entities --------------------------------------------------

    /// Add an entity to the protected set.
    pub fn protect_entity(&mut self, entity: Entity) {
        self.protected.insert(entity);
    }

    /// Remove an entity from the protected set.
    pub fn unprotect_entity(&mut self, entity: Entity) {
        self.protected.remove(&entity);
    }

    /// Whether the entity is protected.
    pub fn is_protected(&self, entity: Entity) -> bool {
        self.protected.contains(&entity)
    }

    // -- hierarchy registry --------------------------------------------------

    /// Register a hierarchy under its node-component name.
    pub fn register_hierarchy(
        &mut self,
        name: &str,
        handle: HierarchyHandle,
    ) -> Result<(), EcsError> {
        if self.hierarchies.iter().any(|(n, _)| n == name) {
            return Err(EcsError::DuplicateHierarchy {
                name: name.to_owned(),
            });
        }
        self.hierarchies.push((name.to_owned(), handle));
        Ok(())
    }

    /// Unregister a hierarchy, returning its handle if it was registered.
    pub fn unregister_hierarchy(&mut self, name: &str) -> Option<HierarchyHandle> {
        let idx = self.hierarchies.iter().position(|(n, _)| n == name)?;
        Some(self.hierarchies.remove(idx).1)
    }

    /// Look up a registered hierarchy handle.
    pub fn hierarchy(&self, name: &str) -> Option<&HierarchyHandle> {
        self.hierarchies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handle)| handle)
    }

    /// Visit registered hierarchies in registration order.
    pub fn for_each_tree(&self, mut f: impl FnMut(&str, &HierarchyHandle)) {
        for (name, handle) in &self.hierarchies {
            f(name, handle);
        }
    }

    /// Names of registered hierarchies, in registration order.
    pub fn tree_names(&self) -> Vec<String> {
        self.hierarchies.iter().map(|(n, _)| n.clone()).collect()
    }

    // -- queries -------------------------------------------------------------

    /// Intersect stores by component name in a single pass.
    ///
    /// Drives iteration from the smallest store; the result is a snapshot
    /// (no borrow is held). Entity order follows the driver's dense order.
    pub fn query_view(&self, names: &[&str]) -> Result<QueryView, EcsError> {
        let mut view = QueryView {
            entities: Vec::new(),
            rows: vec![Vec::new(); names.len()],
        };
        if names.is_empty() {
            return Ok(view);
        }

        let stores: Vec<&ComponentStore> = names
            .iter()
            .map(|name| self.store(name))
            .collect::<Result<_, _>>()?;

        let driver = stores
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.size())
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        'rows: for row in 0..stores[driver].size() {
            let Some(entity) = stores[driver].entity_at(row) else {
                continue;
            };
            let mut rows = Vec::with_capacity(names.len());
            for store in &stores {
                match store.dense_index_of(entity) {
                    Some(r) => rows.push(r),
                    None => continue 'rows,
                }
            }
            view.entities.push(entity);
            for (k, r) in rows.into_iter().enumerate() {
                view.rows[k].push(r);
            }
        }
        Ok(view)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
