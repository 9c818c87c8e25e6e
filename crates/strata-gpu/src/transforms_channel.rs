//! Inverse-world transform rows in DFS order.
//!
//! Each row is 12 float lanes (48 bytes): the inverse-world 3x4 packed
//! row-major (`r00 r01 r02 tx  r10 r11 r12 ty  r20 r21 r22 tz`). Rows map
//! 1:1 onto the provided transform DFS order; entities without a Transform
//! row pack deterministic zero rows.
//!
//! Change detection is the epoch pair from the store: `store_epoch` as the
//! early-out gate, per-row `row_version` against a per-slot cache to find
//! the rows that actually need repacking.

use strata_ecs::entity::Entity;
use strata_ecs::store::ComponentStore;
use strata_ecs::world::World;
use strata_scene::transform::{INVERSE, TRANSFORM};

use crate::bridge::GpuChannel;
use crate::order::OrderProvider;
use crate::rows::RowBuffer;
use crate::GpuError;

/// Bytes per transform row (12 f32 lanes).
pub const TRANSFORM_ROW_BYTES: usize = 48;

// ---------------------------------------------------------------------------
// TransformsChannel
// ---------------------------------------------------------------------------

/// Packs inverse-world transforms in a chosen DFS order.
pub struct TransformsChannel {
    rows: RowBuffer,
    provider: OrderProvider,
    last_order_epoch: Option<u64>,
    last_store_epoch: Option<u64>,
    /// Cached store `row_version` per order slot; 0 marks a slot packed as
    /// absent (zero row).
    versions: Vec<u32>,
}

impl TransformsChannel {
    /// Create a channel fed by `provider` (usually the transform tree).
    pub fn new(provider: OrderProvider) -> Self {
        Self {
            rows: RowBuffer::new("strata_transforms"),
            provider,
            last_order_epoch: None,
            last_store_epoch: None,
            versions: Vec::new(),
        }
    }

    /// The CPU row buffer (tests and diagnostics).
    pub fn rows(&self) -> &RowBuffer {
        &self.rows
    }

    /// Mutable CPU row buffer, for driving dirty state without a device.
    pub fn rows_mut(&mut self) -> &mut RowBuffer {
        &mut self.rows
    }

    fn pack_row(&mut self, slot: usize, store: &ComponentStore, entity: Entity) {
        match store.dense_index_of(entity) {
            Some(row) => {
                for lane in 0..12 {
                    self.rows
                        .write_f32(slot, lane, store.column(INVERSE + lane).as_f32()[row]);
                }
                self.versions[slot] = store.row_version()[row];
            }
            None => {
                for lane in 0..12 {
                    self.rows.write_f32(slot, lane, 0.0);
                }
                self.versions[slot] = 0;
            }
        }
    }
}

impl GpuChannel for TransformsChannel {
    fn label(&self) -> &str {
        "strata_transforms"
    }

    fn sync(&mut self, world: &World) -> Result<bool, GpuError> {
        let args = (self.provider)(world);
        let store = world.store(TRANSFORM)?;
        let order = args.order.clone();

        let order_changed =
            self.last_order_epoch != Some(args.epoch) || order.len() != self.rows.count();
        if order_changed {
            self.rows.ensure_cpu(order.len(), TRANSFORM_ROW_BYTES);
            self.versions.clear();
            self.versions.resize(order.len(), 0);
            for (slot, &entity) in order.iter().enumerate() {
                self.pack_row(slot, store, entity);
            }
            self.rows.mark_all_dirty();
            self.last_order_epoch = Some(args.epoch);
            self.last_store_epoch = Some(store.store_epoch());
            return Ok(true);
        }

        if self.last_store_epoch == Some(store.store_epoch()) {
            return Ok(false);
        }

        let mut changed = false;
        for (slot, &entity) in order.iter().enumerate() {
            let current = store
                .dense_index_of(entity)
                .map(|row| store.row_version()[row])
                .unwrap_or(0);
            if self.versions[slot] != current {
                self.pack_row(slot, store, entity);
                self.rows.mark_row_dirty(slot);
                changed = true;
            }
        }
        self.last_store_epoch = Some(store.store_epoch());
        Ok(changed)
    }

    fn create_or_resize(&mut self, device: &wgpu::Device) -> bool {
        self.rows.create_or_resize(device)
    }

    fn flush(&mut self, queue: &wgpu::Queue) {
        self.rows.flush(queue);
    }

    fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        self.rows.gpu_buffer()
    }

    fn destroy_gpu(&mut self) {
        self.rows.destroy_gpu();
    }
}
