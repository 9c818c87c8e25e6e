//! Per-node render rows in DFS order.
//!
//! Each row is 16 lanes (64 bytes). Lanes 0..3 are the integer header
//! `(kind, firstChildRow, nextSiblingRow, flags)`; lanes 4..15 are a payload
//! interpreted by the kind:
//!
//! - **Shape** (`kind = shapeType`): payload lane 0 is the row index of the
//!   entity's transform in the transform channel's DFS order (0 when
//!   absent), lane 1 the material id (default -1), lanes 2..7 the six shape
//!   parameters, lanes 8..11 zero.
//! - **Operation** (`kind = opType`): payload lane 0 is the count of direct
//!   children in the render tree; the rest zero.
//! - **Inert** (`kind = 0`): all payload lanes zero.
//!
//! Hierarchy lanes are row indices into this channel's buffer (derived from
//! the render DFS order), not entity ids; -1 marks absence. Rows map 1:1
//! onto the supplied order, root first -- the root occupies row 0 and is
//! packed from its own payload rows like any other entity.
//!
//! A changed row is always rewritten in full, so kind transitions (shape ->
//! op, anything -> inert) leave no stale payload bytes.

use std::collections::HashMap;

use strata_ecs::entity::Entity;
use strata_ecs::store::ComponentStore;
use strata_ecs::world::World;
use strata_ecs::NONE;
use strata_scene::render::{OPERATION, RENDER_NODE, SHAPE_LEAF, SHAPE_PARAMS};

use crate::bridge::GpuChannel;
use crate::order::OrderProvider;
use crate::rows::RowBuffer;
use crate::GpuError;

/// Bytes per render row (16 lanes).
pub const RENDER_ROW_BYTES: usize = 64;

/// First payload lane.
const PAYLOAD: usize = 4;

// ---------------------------------------------------------------------------
// Row cache
// ---------------------------------------------------------------------------

/// Everything a packed row depends on; a mismatch forces a full repack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RowCache {
    kind: i32,
    shape_version: u32,
    op_version: u32,
    render_version: u32,
    transform_slot: i32,
}

/// Resolved field indices into the three payload stores.
struct PackContext<'a> {
    shapes: &'a ComponentStore,
    ops: &'a ComponentStore,
    render: &'a ComponentStore,
    shape_type: usize,
    material_id: usize,
    params: [usize; 6],
    op_type: usize,
    first_child: usize,
    next_sibling: usize,
    slots: &'a HashMap<Entity, i32>,
    transform_slots: &'a HashMap<Entity, i32>,
}

impl<'a> PackContext<'a> {
    fn new(
        shapes: &'a ComponentStore,
        ops: &'a ComponentStore,
        render: &'a ComponentStore,
        slots: &'a HashMap<Entity, i32>,
        transform_slots: &'a HashMap<Entity, i32>,
    ) -> Self {
        let field = |store: &ComponentStore, key: &str| {
            store
                .meta()
                .field_index(key)
                .expect("render metas define their documented fields")
        };
        Self {
            shape_type: field(shapes, "shapeType"),
            material_id: field(shapes, "materialId"),
            params: SHAPE_PARAMS.map(|key| field(shapes, key)),
            op_type: field(ops, "opType"),
            first_child: field(render, "firstChild"),
            next_sibling: field(render, "nextSibling"),
            shapes,
            ops,
            render,
            slots,
            transform_slots,
        }
    }

    fn row_slot(&self, link: i32) -> i32 {
        Entity::from_link(link)
            .and_then(|e| self.slots.get(&e).copied())
            .unwrap_or(NONE)
    }

    /// Count direct children of a render node, bounded against corruption.
    fn child_count(&self, row: usize) -> i32 {
        let cap = 4 * self.render.size() + 16;
        let mut count = 0i32;
        let mut cursor = self.render.column(self.first_child).as_i32()[row];
        while let Some(child) = Entity::from_link(cursor) {
            count += 1;
            if count as usize > cap {
                tracing::warn!("render child walk exceeded step cap");
                break;
            }
            match self.render.dense_index_of(child) {
                Some(crow) => cursor = self.render.column(self.next_sibling).as_i32()[crow],
                None => break,
            }
        }
        count
    }

    /// The cache entry a row should currently have.
    fn current_cache(&self, entity: Entity) -> RowCache {
        let shape_row = self.shapes.dense_index_of(entity);
        let op_row = self.ops.dense_index_of(entity);
        let kind = if let Some(row) = shape_row {
            self.shapes.column(self.shape_type).as_i32()[row]
        } else if let Some(row) = op_row {
            self.ops.column(self.op_type).as_i32()[row]
        } else {
            0
        };
        RowCache {
            kind,
            shape_version: shape_row.map(|r| self.shapes.row_version()[r]).unwrap_or(0),
            op_version: op_row.map(|r| self.ops.row_version()[r]).unwrap_or(0),
            render_version: self
                .render
                .dense_index_of(entity)
                .map(|r| self.render.row_version()[r])
                .unwrap_or(0),
            transform_slot: if shape_row.is_some() {
                self.transform_slots.get(&entity).copied().unwrap_or(0)
            } else {
                0
            },
        }
    }
}

/// Fully rewrite one row (header + payload) and refresh its cache entry.
fn pack_row(
    rows: &mut RowBuffer,
    cache: &mut [RowCache],
    slot: usize,
    entity: Entity,
    ctx: &PackContext<'_>,
) {
    let current = ctx.current_cache(entity);

    // Header: kind, firstChildRow, nextSiblingRow, flags.
    rows.write_i32(slot, 0, current.kind);
    let (first_child_row, next_sibling_row) = match ctx.render.dense_index_of(entity) {
        Some(row) => (
            ctx.row_slot(ctx.render.column(ctx.first_child).as_i32()[row]),
            ctx.row_slot(ctx.render.column(ctx.next_sibling).as_i32()[row]),
        ),
        None => (NONE, NONE),
    };
    rows.write_i32(slot, 1, first_child_row);
    rows.write_i32(slot, 2, next_sibling_row);
    rows.write_i32(slot, 3, 0);

    // Payload, zeroed first so kind transitions leave no stale lanes.
    for lane in PAYLOAD..16 {
        rows.write_u32(slot, lane, 0);
    }
    if let Some(shape_row) = ctx.shapes.dense_index_of(entity) {
        rows.write_i32(slot, PAYLOAD, current.transform_slot);
        rows.write_i32(
            slot,
            PAYLOAD + 1,
            ctx.shapes.column(ctx.material_id).as_i32()[shape_row],
        );
        for (k, &param_field) in ctx.params.iter().enumerate() {
            rows.write_f32(
                slot,
                PAYLOAD + 2 + k,
                ctx.shapes.column(param_field).as_f32()[shape_row],
            );
        }
    } else if let Some(render_row) = ctx.render.dense_index_of(entity) {
        if ctx.ops.has(entity) {
            rows.write_i32(slot, PAYLOAD, ctx.child_count(render_row));
        }
    }

    cache[slot] = current;
}

// ---------------------------------------------------------------------------
// RenderChannel
// ---------------------------------------------------------------------------

/// Packs per-node render rows (kind, hierarchy links, payload) in a chosen
/// render DFS order, pointing shape rows at the transform channel's order.
pub struct RenderChannel {
    rows: RowBuffer,
    render_provider: OrderProvider,
    transform_provider: OrderProvider,
    last_order_epoch: Option<u64>,
    last_transform_epoch: Option<u64>,
    /// (shape, op, render) store epochs at the last sync.
    last_store_epochs: Option<(u64, u64, u64)>,
    /// Render entity -> row index in this channel.
    slots: HashMap<Entity, i32>,
    /// Transform entity -> row index in the transforms channel.
    transform_slots: HashMap<Entity, i32>,
    cache: Vec<RowCache>,
}

impl RenderChannel {
    /// Create a channel fed by the render and transform DFS orders.
    pub fn new(render_provider: OrderProvider, transform_provider: OrderProvider) -> Self {
        Self {
            rows: RowBuffer::new("strata_render_nodes"),
            render_provider,
            transform_provider,
            last_order_epoch: None,
            last_transform_epoch: None,
            last_store_epochs: None,
            slots: HashMap::new(),
            transform_slots: HashMap::new(),
            cache: Vec::new(),
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
}

impl GpuChannel for RenderChannel {
    fn label(&self) -> &str {
        "strata_render_nodes"
    }

    fn sync(&mut self, world: &World) -> Result<bool, GpuError> {
        let render_args = (self.render_provider)(world);
        let transform_args = (self.transform_provider)(world);
        let shapes = world.store(SHAPE_LEAF)?;
        let ops = world.store(OPERATION)?;
        let render = world.store(RENDER_NODE)?;
        let order = render_args.order.clone();

        let order_changed = self.last_order_epoch != Some(render_args.epoch)
            || order.len() != self.rows.count();
        let transform_order_changed = self.last_transform_epoch != Some(transform_args.epoch);
        let store_epochs = (shapes.store_epoch(), ops.store_epoch(), render.store_epoch());

        // Early-out: nothing watched has advanced.
        if !order_changed
            && !transform_order_changed
            && self.last_store_epochs == Some(store_epochs)
        {
            return Ok(false);
        }

        if transform_order_changed || order_changed {
            self.transform_slots.clear();
            for (slot, &entity) in transform_args.order.iter().enumerate() {
                self.transform_slots.insert(entity, slot as i32);
            }
            self.last_transform_epoch = Some(transform_args.epoch);
        }

        let mut changed = false;
        if order_changed {
            // Full rebuild: new row mapping, repack everything.
            self.rows.ensure_cpu(order.len(), RENDER_ROW_BYTES);
            self.slots.clear();
            for (slot, &entity) in order.iter().enumerate() {
                self.slots.insert(entity, slot as i32);
            }
            self.cache.clear();
            self.cache.resize(order.len(), RowCache::default());

            let ctx = PackContext::new(shapes, ops, render, &self.slots, &self.transform_slots);
            for (slot, &entity) in order.iter().enumerate() {
                pack_row(&mut self.rows, &mut self.cache, slot, entity, &ctx);
            }
            self.rows.mark_all_dirty();
            self.last_order_epoch = Some(render_args.epoch);
            changed = true;
        } else {
            // Incremental: repack rows whose dependencies moved. A rebuilt
            // transform order surfaces here as changed `transform_slot`s on
            // shape rows; link edits surface as render row-version bumps.
            let ctx = PackContext::new(shapes, ops, render, &self.slots, &self.transform_slots);
            for (slot, &entity) in order.iter().enumerate() {
                if ctx.current_cache(entity) != self.cache[slot] {
                    pack_row(&mut self.rows, &mut self.cache, slot, entity, &ctx);
                    self.rows.mark_row_dirty(slot);
                    changed = true;
                }
            }
        }

        self.last_store_epochs = Some(store_epochs);
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
