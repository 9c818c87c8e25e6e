//! World snapshot and restore (save/load).
//!
//! [`WorldSnapshot`] is a fully serializable, JSON-compatible capture of the
//! allocator, every store, the protected set, and the names of registered
//! hierarchies. Export can *densify*: live ids are renumbered to `[0, size)`
//! in ascending dense order, the free list empties, `nextId` resets to
//! `size`, and every `link`-flagged column is remapped through the bijection.
//! Import restores a freshly created world (same metas registered) and
//! re-attaches tree bookkeeping through registered rehydrator callbacks.
//!
//! Maps are `BTreeMap`s so serialization order -- and therefore
//! [`digest`] -- is deterministic.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::entity::{Entity, EntityAllocator};
use crate::world::World;
use crate::{EcsError, NONE};

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Serializable capture of the entity allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatorSnapshot {
    /// Live ids in dense order.
    pub dense: Vec<u32>,
    /// Entity index -> dense index, or -1.
    pub sparse: Vec<i32>,
    /// Recycled ids (LIFO order preserved).
    pub free: Vec<u32>,
    /// Next never-used id.
    pub next_id: u32,
    /// Per-entity epochs.
    pub entity_epoch: Vec<u32>,
}

/// Serializable capture of one component store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Component name (matches the map key).
    pub name: String,
    /// Live row count.
    pub size: usize,
    /// Allocated row capacity.
    pub capacity: usize,
    /// Coarse change counter at capture time.
    pub store_epoch: u64,
    /// Entity index -> dense row, or -1.
    pub entity_to_dense: Vec<i32>,
    /// Dense row -> entity id, or -1.
    pub dense_to_entity: Vec<i32>,
    /// Per-row change counters.
    pub row_version: Vec<u32>,
    /// Field key -> column values, as plain number arrays.
    pub fields: BTreeMap<String, Vec<f64>>,
}

/// A complete, serializable snapshot of the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    /// Allocator state.
    pub allocator: AllocatorSnapshot,
    /// Store captures keyed by component name.
    pub components: BTreeMap<String, StoreSnapshot>,
    /// Protected entity ids, ascending.
    pub protected_ids: Vec<u32>,
    /// Node-component names of registered hierarchies, registration order.
    pub trees: Vec<String>,
}

/// Re-attaches tree bookkeeping to restored stores after import.
///
/// Receives the receiving world and the node-component name from the
/// snapshot's `trees` section. Shared (`Rc`) so a fallback can serve several
/// trees.
pub type Rehydrator = Rc<dyn Fn(&mut World, &str) -> Result<(), EcsError>>;

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest of the snapshot's canonical JSON bytes.
///
/// Identical worlds produce identical digests, which is what the
/// determinism tests assert across export/import round trips.
pub fn digest(snapshot: &WorldSnapshot) -> String {
    let bytes = serde_json::to_vec(snapshot)
        .expect("WorldSnapshot should always be JSON-serializable");
    blake3::hash(&bytes).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

impl World {
    /// Register a rehydrator for one tree name.
    pub fn set_tree_rehydrator(&mut self, name: &str, rehydrator: Rehydrator) {
        self.rehydrators.insert(name.to_owned(), rehydrator);
    }

    /// Register the fallback rehydrator used when no named one exists.
    pub fn set_default_rehydrator(&mut self, rehydrator: Rehydrator) {
        self.default_rehydrator = Some(rehydrator);
    }

    /// Capture a snapshot of the world, optionally densifying entity ids.
    pub fn export(&self, densify: bool) -> WorldSnapshot {
        let (dense, sparse, free, next_id, entity_epoch) = self.allocator.snapshot_state();
        let allocator = AllocatorSnapshot {
            dense,
            sparse,
            free,
            next_id,
            entity_epoch,
        };

        let mut components = BTreeMap::new();
        for store in &self.stores {
            let (entity_to_dense, dense_to_entity, row_version) = store.snapshot_tables();
            let mut fields = BTreeMap::new();
            for (idx, field) in store.meta().fields().iter().enumerate() {
                let column = store.column(idx);
                let values: Vec<f64> = (0..store.capacity()).map(|row| column.get(row)).collect();
                fields.insert(field.key().to_owned(), values);
            }
            components.insert(
                store.meta().name().to_owned(),
                StoreSnapshot {
                    name: store.meta().name().to_owned(),
                    size: store.size(),
                    capacity: store.capacity(),
                    store_epoch: store.store_epoch(),
                    entity_to_dense,
                    dense_to_entity,
                    row_version,
                    fields,
                },
            );
        }

        let mut protected_ids: Vec<u32> = self.protected.iter().map(|e| e.index()).collect();
        protected_ids.sort_unstable();

        let mut snapshot = WorldSnapshot {
            allocator,
            components,
            protected_ids,
            trees: self.tree_names(),
        };

        if densify {
            densify_snapshot(self, &mut snapshot);
        }
        snapshot
    }

    /// Restore the world from a snapshot.
    ///
    /// The world must have no live entities and must have the snapshot's
    /// metas already registered. Stores registered here but absent from the
    /// snapshot remain empty. After state is restored, each tree named in the
    /// snapshot is rehydrated through its registered (or the default)
    /// rehydrator.
    ///
    /// # Errors
    ///
    /// [`EcsError::WorldNotEmpty`], [`EcsError::UnknownSnapshotComponent`],
    /// [`EcsError::SnapshotMetaMismatch`], or [`EcsError::MissingRehydrator`].
    /// Validation runs before any state is overwritten.
    pub fn import(&mut self, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
        if !self.allocator.is_empty() {
            return Err(EcsError::WorldNotEmpty);
        }

        // Validate every snapshot store against the registered metas before
        // touching anything.
        for (name, store_snap) in &snapshot.components {
            let store = self
                .store(name)
                .map_err(|_| EcsError::UnknownSnapshotComponent { name: name.clone() })?;
            let meta = store.meta();
            if meta.fields().len() != store_snap.fields.len() {
                return Err(EcsError::SnapshotMetaMismatch {
                    name: name.clone(),
                    details: format!(
                        "{} fields registered, {} in snapshot",
                        meta.fields().len(),
                        store_snap.fields.len()
                    ),
                });
            }
            for field in meta.fields() {
                if !store_snap.fields.contains_key(field.key()) {
                    return Err(EcsError::SnapshotMetaMismatch {
                        name: name.clone(),
                        details: format!("missing column '{}'", field.key()),
                    });
                }
            }
        }
        for name in &snapshot.trees {
            if !self.rehydrators.contains_key(name) && self.default_rehydrator.is_none() {
                return Err(EcsError::MissingRehydrator { name: name.clone() });
            }
        }

        self.allocator = EntityAllocator::restore_state(
            snapshot.allocator.dense.clone(),
            snapshot.allocator.sparse.clone(),
            snapshot.allocator.free.clone(),
            snapshot.allocator.next_id,
            snapshot.allocator.entity_epoch.clone(),
        );

        for (name, store_snap) in &snapshot.components {
            let store = self.store_mut(name)?;
            let capacity = store_snap.capacity.max(1);
            let columns: Vec<Column> = store
                .meta()
                .fields()
                .iter()
                .map(|field| {
                    let values = &store_snap.fields[field.key()];
                    let mut column = Column::new(field.kind(), capacity, field.default());
                    for (row, value) in values.iter().take(capacity).enumerate() {
                        column.set(row, *value);
                    }
                    column
                })
                .collect();
            let mut row_version = store_snap.row_version.clone();
            row_version.resize(capacity, 0);
            let mut dense_to_entity = store_snap.dense_to_entity.clone();
            dense_to_entity.resize(capacity, NONE);
            store.restore_tables(
                store_snap.size,
                capacity,
                store_snap.store_epoch,
                store_snap.entity_to_dense.clone(),
                dense_to_entity,
                row_version,
                columns,
            );
        }

        self.protected = snapshot
            .protected_ids
            .iter()
            .map(|&id| Entity::from_index(id))
            .collect();

        for name in &snapshot.trees {
            let rehydrator = self
                .rehydrators
                .get(name)
                .cloned()
                .or_else(|| self.default_rehydrator.clone())
                .ok_or_else(|| EcsError::MissingRehydrator { name: name.clone() })?;
            (*rehydrator)(self, name)?;
        }

        tracing::debug!(
            entities = self.allocator.len(),
            stores = snapshot.components.len(),
            trees = snapshot.trees.len(),
            "snapshot imported"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Densify
// ---------------------------------------------------------------------------

/// Rewrite a snapshot so live ids become `[0, size)` in ascending dense
/// order. Link columns remap through the bijection; references to dead ids
/// collapse to `NONE` (the bijection only covers live ids).
fn densify_snapshot(world: &World, snapshot: &mut WorldSnapshot) {
    let live = snapshot.allocator.dense.len();
    let mut remap: HashMap<u32, u32> = HashMap::with_capacity(live);
    for (new_id, &old_id) in snapshot.allocator.dense.iter().enumerate() {
        remap.insert(old_id, new_id as u32);
    }

    let mut entity_epoch = vec![0u32; live];
    for (&old_id, &new_id) in &remap {
        entity_epoch[new_id as usize] = snapshot
            .allocator
            .entity_epoch
            .get(old_id as usize)
            .copied()
            .unwrap_or(0);
    }
    snapshot.allocator = AllocatorSnapshot {
        dense: (0..live as u32).collect(),
        sparse: (0..live as i32).collect(),
        free: Vec::new(),
        next_id: live as u32,
        entity_epoch,
    };

    let remap_link = |value: i32| -> i32 {
        if value < 0 {
            return value;
        }
        remap
            .get(&(value as u32))
            .map(|&new_id| new_id as i32)
            .unwrap_or(NONE)
    };

    for store_snap in snapshot.components.values_mut() {
        let mut entity_to_dense = vec![NONE; live];
        for (old_id, &row) in store_snap.entity_to_dense.iter().enumerate() {
            if row >= 0 {
                if let Some(&new_id) = remap.get(&(old_id as u32)) {
                    entity_to_dense[new_id as usize] = row;
                }
            }
        }
        store_snap.entity_to_dense = entity_to_dense;
        for slot in store_snap.dense_to_entity.iter_mut() {
            *slot = remap_link(*slot);
        }

        let store = world
            .store(&store_snap.name)
            .expect("snapshot was exported from this world");
        for field in store.meta().fields() {
            if !field.is_link() {
                continue;
            }
            let column = store_snap
                .fields
                .get_mut(field.key())
                .expect("exported column exists");
            for value in column.iter_mut() {
                *value = remap_link(*value as i32) as f64;
            }
        }
    }

    for id in snapshot.protected_ids.iter_mut() {
        if let Some(&new_id) = remap.get(id) {
            *id = new_id;
        }
    }
    snapshot.protected_ids.sort_unstable();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ComponentMeta, FieldMeta};

    fn build_world() -> World {
        let mut world = World::new();
        world
            .register(
                ComponentMeta::new("a", vec![FieldMeta::f32("x", 0.0)]),
                4,
            )
            .unwrap();
        world
            .register(
                ComponentMeta::new("b", vec![FieldMeta::link("parent")]),
                4,
            )
            .unwrap();
        world
    }

    #[test]
    fn export_shape_matches_wire_format() {
        let mut world = build_world();
        let e = world.create_entity();
        world.store_mut("a").unwrap().add(e, &[("x", 1.5)]);

        let snapshot = world.export(false);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["allocator"]["nextId"].is_number());
        assert!(json["components"]["a"]["entityToDense"].is_array());
        assert!(json["components"]["a"]["fields"]["x"].is_array());
        assert!(json["protectedIds"].is_array());
        assert!(json["trees"].is_array());
    }

    #[test]
    fn densify_renumbers_and_remaps_links() {
        let mut world = build_world();
        let entities: Vec<Entity> = (0..5).map(|_| world.create_entity()).collect();
        for &e in &entities {
            world.store_mut("b").unwrap().add(e, &[]);
        }
        // b[3].parent = entity 4, then destroy entity 2 so ids are sparse.
        world
            .store_mut("b")
            .unwrap()
            .update(entities[3], &[("parent", entities[4].index() as f64)]);
        world.destroy_entity(entities[2]).unwrap();

        let snapshot = world.export(true);
        assert_eq!(snapshot.allocator.next_id, 4);
        assert!(snapshot.allocator.free.is_empty());
        assert_eq!(snapshot.allocator.dense, vec![0, 1, 2, 3]);

        // Old id 4 was the last created live entity; find the remapped parent
        // through the densified store tables.
        let b = &snapshot.components["b"];
        let parent_col = &b.fields["parent"];
        let remapped: Vec<i32> = (0..b.size)
            .map(|row| parent_col[row] as i32)
            .filter(|&v| v >= 0)
            .collect();
        assert_eq!(remapped.len(), 1);
        assert!(remapped[0] >= 0 && (remapped[0] as usize) < b.size);
    }

    #[test]
    fn densify_maps_dead_links_to_none() {
        let mut world = build_world();
        let a = world.create_entity();
        let b = world.create_entity();
        world.store_mut("b").unwrap().add(a, &[]);
        world
            .store_mut("b")
            .unwrap()
            .update(a, &[("parent", b.index() as f64)]);
        world.destroy_entity(b).unwrap();

        let snapshot = world.export(true);
        let parent_col = &snapshot.components["b"].fields["parent"];
        assert_eq!(parent_col[0] as i32, NONE);
    }

    #[test]
    fn import_requires_empty_world() {
        let mut world = build_world();
        world.create_entity();
        let snapshot = world.export(false);

        let mut receiver = build_world();
        receiver.create_entity();
        assert!(matches!(
            receiver.import(&snapshot),
            Err(EcsError::WorldNotEmpty)
        ));
    }

    #[test]
    fn import_unknown_store_fails() {
        let mut world = build_world();
        world.create_entity();
        let snapshot = world.export(false);

        let mut receiver = World::new();
        assert!(matches!(
            receiver.import(&snapshot),
            Err(EcsError::UnknownSnapshotComponent { .. })
        ));
    }

    #[test]
    fn digest_is_deterministic() {
        let mut world = build_world();
        let e = world.create_entity();
        world.store_mut("a").unwrap().add(e, &[("x", 2.0)]);
        let s1 = world.export(true);
        let s2 = world.export(true);
        assert_eq!(digest(&s1), digest(&s2));
    }
}
