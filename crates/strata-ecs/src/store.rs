//! Structure-of-Arrays component stores.
//!
//! A [`ComponentStore`] holds dense rows of scalar columns, indexed by entity
//! through a sparse `entity_to_dense` table and its inverse. Removal is
//! swap-with-last, so dense order is stable only modulo removes. Every
//! mutation bumps the coarse `store_epoch`; row-level mutations additionally
//! bump that row's `row_version`. Change-detection layers need both: the
//! epoch as a cheap early-out gate, the versions to enumerate changed rows.

use crate::column::Column;
use crate::entity::Entity;
use crate::meta::ComponentMeta;
use crate::NONE;

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// SoA store for one component, keyed by entity id.
#[derive(Debug)]
pub struct ComponentStore {
    meta: ComponentMeta,
    size: usize,
    capacity: usize,
    store_epoch: u64,
    /// Per-dense-row change counter (wrapping).
    row_version: Vec<u32>,
    /// Entity index -> dense row, or -1.
    entity_to_dense: Vec<i32>,
    /// Dense row -> entity id (stale beyond `size`).
    dense_to_entity: Vec<i32>,
    /// One column per meta field, in field order.
    columns: Vec<Column>,
}

impl ComponentStore {
    /// Create a store with pre-sized row capacity.
    pub fn new(meta: ComponentMeta, initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        let columns = meta
            .fields()
            .iter()
            .map(|f| Column::new(f.kind(), capacity, f.default()))
            .collect();
        Self {
            meta,
            size: 0,
            capacity,
            store_epoch: 0,
            row_version: vec![0; capacity],
            entity_to_dense: Vec::new(),
            dense_to_entity: vec![NONE; capacity],
            columns,
        }
    }

    /// The store's meta.
    #[inline]
    pub fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    /// Number of live rows.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Allocated row capacity (always >= size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Coarse change counter; strictly increases on add/update/remove.
    #[inline]
    pub fn store_epoch(&self) -> u64 {
        self.store_epoch
    }

    /// Per-row change counters, indexed by dense row.
    #[inline]
    pub fn row_version(&self) -> &[u32] {
        &self.row_version
    }

    // -- growth --------------------------------------------------------------

    fn ensure_row_capacity(&mut self, rows: usize) {
        if rows <= self.capacity {
            return;
        }
        let new_capacity = rows.max(self.capacity * 2);
        for (column, field) in self.columns.iter_mut().zip(self.meta.fields()) {
            column.grow(new_capacity, field.default());
        }
        self.row_version.resize(new_capacity, 0);
        self.dense_to_entity.resize(new_capacity, NONE);
        self.capacity = new_capacity;
    }

    fn ensure_entity_capacity(&mut self, entity: Entity) {
        let needed = entity.index() as usize + 1;
        if needed > self.entity_to_dense.len() {
            let new_len = needed.max(self.entity_to_dense.len() * 2).max(4);
            self.entity_to_dense.resize(new_len, NONE);
        }
    }

    // -- lookups -------------------------------------------------------------

    /// Whether the entity has a row.
    #[inline]
    pub fn has(&self, entity: Entity) -> bool {
        self.dense_index_of(entity).is_some()
    }

    /// Dense row of an entity, if present.
    #[inline]
    pub fn dense_index_of(&self, entity: Entity) -> Option<usize> {
        let idx = entity.index() as usize;
        match self.entity_to_dense.get(idx) {
            Some(&row) if row >= 0 => Some(row as usize),
            _ => None,
        }
    }

    /// Entity occupying a dense row. Rows >= size hold no entity.
    #[inline]
    pub fn entity_at(&self, row: usize) -> Option<Entity> {
        if row < self.size {
            Entity::from_link(self.dense_to_entity[row])
        } else {
            None
        }
    }

    // -- row lifecycle -------------------------------------------------------

    /// Add a row for `entity`, writing field defaults then `initial`.
    ///
    /// If the entity already has a row, `initial` is applied as an update and
    /// the existing dense index is returned.
    pub fn add(&mut self, entity: Entity, initial: &[(&str, f64)]) -> usize {
        if let Some(row) = self.dense_index_of(entity) {
            self.update(entity, initial);
            return row;
        }

        self.ensure_row_capacity(self.size + 1);
        self.ensure_entity_capacity(entity);

        let row = self.size;
        self.size += 1;
        for (column, field) in self.columns.iter_mut().zip(self.meta.fields()) {
            column.set(row, field.default());
        }
        for (key, value) in initial {
            if let Some(field) = self.meta.field_index(key) {
                self.columns[field].set(row, *value);
            }
        }
        self.entity_to_dense[entity.index() as usize] = row as i32;
        self.dense_to_entity[row] = entity.to_link();
        self.row_version[row] = self.row_version[row].wrapping_add(1);
        self.store_epoch += 1;
        row
    }

    /// Apply a partial patch to an entity's row.
    ///
    /// Keys not in the meta are ignored. Returns whether any stored value
    /// changed; epochs bump only in that case. Absent entities return false.
    pub fn update(&mut self, entity: Entity, patch: &[(&str, f64)]) -> bool {
        let Some(row) = self.dense_index_of(entity) else {
            return false;
        };
        let mut changed = false;
        for (key, value) in patch {
            if let Some(field) = self.meta.field_index(key) {
                changed |= self.columns[field].set(row, *value);
            }
        }
        if changed {
            self.row_version[row] = self.row_version[row].wrapping_add(1);
            self.store_epoch += 1;
        }
        changed
    }

    /// Remove an entity's row by swap-with-last.
    ///
    /// The moved-in row's version bumps so incremental consumers observe the
    /// relocation. Returns whether a row was removed.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Some(row) = self.dense_index_of(entity) else {
            return false;
        };
        let last = self.size - 1;
        if row != last {
            for column in &mut self.columns {
                column.copy_row(last, row);
            }
            let moved = self.dense_to_entity[last];
            self.dense_to_entity[row] = moved;
            self.entity_to_dense[moved as usize] = row as i32;
            self.row_version[row] = self.row_version[last].wrapping_add(1);
        }
        self.dense_to_entity[last] = NONE;
        self.entity_to_dense[entity.index() as usize] = NONE;
        self.size = last;
        self.store_epoch += 1;
        true
    }

    // -- scalar access -------------------------------------------------------

    /// Read one field of an entity's row.
    pub fn get(&self, entity: Entity, key: &str) -> Option<f64> {
        let row = self.dense_index_of(entity)?;
        let field = self.meta.field_index(key)?;
        Some(self.columns[field].get(row))
    }

    /// Borrow a column by field index (meta field order).
    #[inline]
    pub fn column(&self, field: usize) -> &Column {
        &self.columns[field]
    }

    /// Borrow a column by field key.
    pub fn column_by_key(&self, key: &str) -> Option<&Column> {
        self.meta.field_index(key).map(|idx| &self.columns[idx])
    }

    /// Exclusive access to every column, in meta field order.
    ///
    /// This is the inline-mutation contract used by the transform propagator
    /// and the trees: callers writing through these slices must bump
    /// [`bump_row_version`](Self::bump_row_version) and
    /// [`bump_store_epoch`](Self::bump_store_epoch) themselves.
    #[inline]
    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    /// Bump one row's change counter (inline-mutation contract).
    #[inline]
    pub fn bump_row_version(&mut self, row: usize) {
        self.row_version[row] = self.row_version[row].wrapping_add(1);
    }

    /// Bump the coarse store epoch (inline-mutation contract).
    #[inline]
    pub fn bump_store_epoch(&mut self) {
        self.store_epoch += 1;
    }

    // -- snapshot support ----------------------------------------------------

    /// Raw tables for the snapshot layer:
    /// `(entity_to_dense, dense_to_entity, row_version)`.
    pub(crate) fn snapshot_tables(&self) -> (Vec<i32>, Vec<i32>, Vec<u32>) {
        (
            self.entity_to_dense.clone(),
            self.dense_to_entity.clone(),
            self.row_version.clone(),
        )
    }

    /// Overwrite the store's state from snapshot tables.
    pub(crate) fn restore_tables(
        &mut self,
        size: usize,
        capacity: usize,
        store_epoch: u64,
        entity_to_dense: Vec<i32>,
        dense_to_entity: Vec<i32>,
        row_version: Vec<u32>,
        columns: Vec<Column>,
    ) {
        self.size = size;
        self.capacity = capacity.max(1);
        self.store_epoch = store_epoch;
        self.entity_to_dense = entity_to_dense;
        self.dense_to_entity = dense_to_entity;
        self.row_version = row_version;
        self.columns = columns;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
