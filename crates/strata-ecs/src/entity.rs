//! Entity handles and the dense/sparse allocator.
//!
//! An [`Entity`] is a non-negative integer id. Ids are recycled LIFO after
//! destruction; the allocator keeps a per-entity *epoch* counter that is
//! bumped on destroy (and on structural tree edits) so change-detection
//! layers can tell a recycled id from the entity it used to be.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::NONE;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A non-negative integer entity handle.
///
/// Signed link columns encode entities as `i32` with [`NONE`](crate::NONE)
/// for absence; [`Entity::to_link`] and [`Entity::from_link`] convert at that
/// boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(u32);

impl Entity {
    /// Construct from a raw index.
    #[inline]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// The raw index of this entity.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Encode for a signed link column.
    #[inline]
    pub fn to_link(self) -> i32 {
        self.0 as i32
    }

    /// Decode from a signed link column; negative values are absent.
    #[inline]
    pub fn from_link(link: i32) -> Option<Self> {
        if link < 0 {
            None
        } else {
            Some(Self(link as u32))
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`Entity`] ids with liveness and epoch tracking.
///
/// Live ids sit in `dense` in insertion order (mutated by swap-remove on
/// destroy); `sparse[id]` holds the dense index of a live id or `-1`.
/// Recycling is LIFO: the most recently destroyed id is handed out first.
#[derive(Debug)]
pub struct EntityAllocator {
    /// Live ids in insertion order.
    dense: Vec<Entity>,
    /// Entity index -> dense index, or -1 when dead.
    sparse: Vec<i32>,
    /// Recycled ids, popped LIFO.
    free: Vec<Entity>,
    /// Next never-used id.
    next_id: u32,
    /// Per-entity epoch, bumped on destroy (wrapping mod 2^32).
    entity_epoch: Vec<u32>,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an allocator with pre-sized sparse tables.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dense: Vec::with_capacity(capacity),
            sparse: vec![NONE; capacity],
            free: Vec::new(),
            next_id: 0,
            entity_epoch: vec![0; capacity],
        }
    }

    /// Grow the sparse tables geometrically until `index` is addressable.
    fn grow_to(&mut self, index: u32) {
        let needed = index as usize + 1;
        if needed <= self.sparse.len() {
            return;
        }
        let new_len = needed.max(self.sparse.len() * 2).max(4);
        self.sparse.resize(new_len, NONE);
        self.entity_epoch.resize(new_len, 0);
    }

    /// Allocate an entity id, reusing the most recently freed one if any.
    pub fn create(&mut self) -> Entity {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = Entity::from_index(self.next_id);
                self.next_id += 1;
                id
            }
        };
        self.grow_to(id.index());
        self.sparse[id.index() as usize] = self.dense.len() as i32;
        self.dense.push(id);
        id
    }

    /// Destroy an entity id.
    ///
    /// Invalid or already-dead ids are silently ignored. Destroying swaps the
    /// id out of `dense`, pushes it onto the free list, and bumps its epoch.
    pub fn destroy(&mut self, entity: Entity) {
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() || self.sparse[idx] < 0 {
            return;
        }
        let dense_index = self.sparse[idx] as usize;
        let last = self.dense.len() - 1;
        self.dense.swap(dense_index, last);
        self.dense.pop();
        if dense_index < self.dense.len() {
            let moved = self.dense[dense_index];
            self.sparse[moved.index() as usize] = dense_index as i32;
        }
        self.sparse[idx] = NONE;
        self.free.push(entity);
        self.entity_epoch[idx] = self.entity_epoch[idx].wrapping_add(1);
    }

    /// Whether the id is currently alive.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index() as usize;
        idx < self.sparse.len() && self.sparse[idx] >= 0
    }

    /// Dense index of a live id, or `None` for dead/out-of-range ids.
    #[inline]
    pub fn dense_index_of(&self, entity: Entity) -> Option<usize> {
        let idx = entity.index() as usize;
        if idx < self.sparse.len() && self.sparse[idx] >= 0 {
            Some(self.sparse[idx] as usize)
        } else {
            None
        }
    }

    /// The current epoch of an id (0 for ids never grown into the table).
    #[inline]
    pub fn epoch_of(&self, entity: Entity) -> u32 {
        self.entity_epoch
            .get(entity.index() as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Bump the epoch of an id without changing liveness.
    ///
    /// Used by trees, which advance a member's epoch on every reparent.
    pub fn bump_epoch(&mut self, entity: Entity) {
        let idx = entity.index() as usize;
        if idx < self.entity_epoch.len() {
            self.entity_epoch[idx] = self.entity_epoch[idx].wrapping_add(1);
        }
    }

    /// Live ids in dense (insertion, modulo swap-remove) order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.dense
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Whether no entities are alive.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    // -- snapshot support ----------------------------------------------------

    /// Capture the raw allocator state: `(dense, sparse, free, next_id, epochs)`.
    pub fn snapshot_state(&self) -> (Vec<u32>, Vec<i32>, Vec<u32>, u32, Vec<u32>) {
        (
            self.dense.iter().map(|e| e.index()).collect(),
            self.sparse.clone(),
            self.free.iter().map(|e| e.index()).collect(),
            self.next_id,
            self.entity_epoch.clone(),
        )
    }

    /// Rebuild an allocator from a previously captured state.
    pub fn restore_state(
        dense: Vec<u32>,
        sparse: Vec<i32>,
        free: Vec<u32>,
        next_id: u32,
        entity_epoch: Vec<u32>,
    ) -> Self {
        Self {
            dense: dense.into_iter().map(Entity::from_index).collect(),
            sparse,
            free: free.into_iter().map(Entity::from_index).collect(),
            next_id,
            entity_epoch,
        }
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sequential_ids() {
        let mut alloc = EntityAllocator::with_capacity(2);
        let ids: Vec<u32> = (0..5).map(|_| alloc.create().index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(alloc.len(), 5);
    }

    #[test]
    fn lifo_reuse() {
        let mut alloc = EntityAllocator::new();
        for _ in 0..5 {
            alloc.create();
        }
        alloc.destroy(Entity::from_index(1));
        alloc.destroy(Entity::from_index(3));
        assert_eq!(alloc.create().index(), 3);
        assert_eq!(alloc.create().index(), 1);
    }

    #[test]
    fn destroy_is_silent_on_invalid_ids() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.create();
        alloc.destroy(Entity::from_index(99));
        alloc.destroy(e);
        alloc.destroy(e); // double destroy: no-op
        assert_eq!(alloc.len(), 0);
    }

    #[test]
    fn epoch_bumps_on_destroy() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.create();
        assert_eq!(alloc.epoch_of(e), 0);
        alloc.destroy(e);
        assert_eq!(alloc.epoch_of(e), 1);
        let e2 = alloc.create();
        assert_eq!(e2, e);
        assert_eq!(alloc.epoch_of(e2), 1);
    }

    #[test]
    fn dense_sparse_bijection_after_swap_remove() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<Entity> = (0..6).map(|_| alloc.create()).collect();
        alloc.destroy(ids[2]);
        alloc.destroy(ids[0]);
        for (i, &e) in alloc.entities().iter().enumerate() {
            assert_eq!(alloc.dense_index_of(e), Some(i));
        }
        assert!(!alloc.is_alive(ids[0]));
        assert!(!alloc.is_alive(ids[2]));
        assert_eq!(alloc.len(), 4);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut alloc = EntityAllocator::new();
        for _ in 0..4 {
            alloc.create();
        }
        alloc.destroy(Entity::from_index(1));
        let (dense, sparse, free, next_id, epochs) = alloc.snapshot_state();
        let restored = EntityAllocator::restore_state(dense, sparse, free, next_id, epochs);
        assert_eq!(restored.len(), 3);
        assert!(restored.is_alive(Entity::from_index(0)));
        assert!(!restored.is_alive(Entity::from_index(1)));
        assert_eq!(restored.epoch_of(Entity::from_index(1)), 1);
    }

    #[test]
    fn link_round_trip() {
        let e = Entity::from_index(7);
        assert_eq!(e.to_link(), 7);
        assert_eq!(Entity::from_link(7), Some(e));
        assert_eq!(Entity::from_link(crate::NONE), None);
    }
}
