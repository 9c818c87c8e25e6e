//! Channel packing and dirty-range tests at the CPU lane level, plus
//! device-backed bridge smoke tests that skip when no adapter is present.

use std::cell::RefCell;
use std::rc::Rc;

use strata_ecs::prelude::*;
use strata_gpu::prelude::*;
use strata_scene::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn shared_args(order: Vec<Entity>) -> (Rc<RefCell<OrderArgs>>, OrderProvider) {
    let cell = Rc::new(RefCell::new(OrderArgs {
        order: Rc::new(order),
        epoch: 0,
    }));
    let provider = fixed_order(cell.clone());
    (cell, provider)
}

fn empty_transform_provider() -> OrderProvider {
    let (_, provider) = shared_args(Vec::new());
    provider
}

/// Transform scene with three children of the root, worlds at tx = 1, 2, 3.
fn transform_scene() -> (World, Vec<Entity>) {
    let mut world = World::new();
    let tree = TransformTree::new(&mut world).unwrap();
    let mut nodes = Vec::new();
    for i in 0..3 {
        let e = tree.borrow_mut().spawn_node(&mut world, None).unwrap();
        world.store_mut(TRANSFORM).unwrap().update(
            e,
            &[("l03", (i + 1) as f64), ("dirty", 1.0)],
        );
        nodes.push(e);
    }
    let mut ws = TransformWorkspace::new();
    propagate_transforms(&mut world, &mut ws).unwrap();
    (world, nodes)
}

fn try_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await?;
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("strata_channel_tests"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .ok()
    })
}

// ---------------------------------------------------------------------------
// Transforms channel
// ---------------------------------------------------------------------------

#[test]
fn transforms_channel_packs_inverse_world_rows() {
    let (world, nodes) = transform_scene();
    let (_, provider) = shared_args(nodes.clone());
    let mut channel = TransformsChannel::new(provider);

    assert!(channel.sync(&world).unwrap());
    let rows = channel.rows();
    assert_eq!(rows.count(), 3);
    assert_eq!(rows.row_size_bytes(), TRANSFORM_ROW_BYTES);
    for (slot, _) in nodes.iter().enumerate() {
        // Inverse of a translation(tx) is translation(-tx); lane 3 is tx.
        assert_eq!(rows.read_f32(slot, 3), -((slot + 1) as f32));
        assert_eq!(rows.read_f32(slot, 0), 1.0);
    }
}

#[test]
fn transforms_channel_incremental_upload_matches_scenario() {
    let (mut world, nodes) = transform_scene();
    let (_, provider) = shared_args(nodes.clone());
    let mut channel = TransformsChannel::new(provider);

    // First sync: full range, one 3*48-byte write at offset 0.
    assert!(channel.sync(&world).unwrap());
    assert_eq!(
        channel.rows().pending_upload_spans(),
        vec![(0, 3 * TRANSFORM_ROW_BYTES)]
    );
    channel.rows_mut().clear_dirty();

    // Unchanged world: early-out, no writes.
    assert!(!channel.sync(&world).unwrap());
    assert!(channel.rows().pending_upload_spans().is_empty());

    // Touch the middle entity's row: one 48-byte write at offset 48.
    world
        .store_mut(TRANSFORM)
        .unwrap()
        .update(nodes[1], &[("i03", 9.0)]);
    assert!(channel.sync(&world).unwrap());
    assert_eq!(
        channel.rows().pending_upload_spans(),
        vec![(TRANSFORM_ROW_BYTES as u64, TRANSFORM_ROW_BYTES)]
    );
    assert_eq!(channel.rows().read_f32(1, 3), 9.0);
}

#[test]
fn transforms_channel_zero_fills_entities_without_rows() {
    let (mut world, mut nodes) = transform_scene();
    let bare = world.create_entity();
    nodes.push(bare);
    let (_, provider) = shared_args(nodes);
    let mut channel = TransformsChannel::new(provider);

    channel.sync(&world).unwrap();
    for lane in 0..12 {
        assert_eq!(channel.rows().read_f32(3, lane), 0.0);
    }
}

#[test]
fn transforms_channel_order_change_forces_full_repack() {
    let (world, nodes) = transform_scene();
    let (cell, provider) = shared_args(nodes.clone());
    let mut channel = TransformsChannel::new(provider);
    channel.sync(&world).unwrap();
    channel.rows_mut().clear_dirty();

    // Reverse the order and bump the epoch: everything repacks.
    {
        let mut args = cell.borrow_mut();
        let mut reversed: Vec<Entity> = nodes.clone();
        reversed.reverse();
        args.order = Rc::new(reversed);
        args.epoch += 1;
    }
    assert!(channel.sync(&world).unwrap());
    assert_eq!(
        channel.rows().pending_upload_spans(),
        vec![(0, 3 * TRANSFORM_ROW_BYTES)]
    );
    assert_eq!(channel.rows().read_f32(0, 3), -3.0);
}

#[test]
fn transforms_channel_is_deterministic() {
    let (world, nodes) = transform_scene();
    let (_, p1) = shared_args(nodes.clone());
    let (_, p2) = shared_args(nodes);
    let mut c1 = TransformsChannel::new(p1);
    let mut c2 = TransformsChannel::new(p2);
    c1.sync(&world).unwrap();
    c2.sync(&world).unwrap();
    assert_eq!(c1.rows().live_lanes(), c2.rows().live_lanes());
}

// ---------------------------------------------------------------------------
// Render channel
// ---------------------------------------------------------------------------

/// Root is an op (kind 7) with a shape child and an inert child; the
/// shape's transform sits at transform-order index 0.
fn render_scene() -> (World, Rc<RefCell<Tree>>, Entity, Entity, Entity) {
    let mut world = World::new();
    let tree = create_render_tree(&mut world).unwrap();
    let root = tree.borrow().root();
    world
        .store_mut(OPERATION)
        .unwrap()
        .add(root, &[("opType", 7.0)]);

    let s1 = spawn_shape(
        &mut world,
        &mut tree.borrow_mut(),
        None,
        2,
        -1,
        &[10.0, 20.0],
    )
    .unwrap();
    let inert = spawn_inert(&mut world, &mut tree.borrow_mut(), None).unwrap();
    (world, tree, root, s1, inert)
}

#[test]
fn render_channel_packs_headers_and_payloads() {
    let (world, tree, _root, s1, _inert) = render_scene();
    let (_, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);

    assert!(channel.sync(&world).unwrap());
    let rows = channel.rows();
    assert_eq!(rows.count(), 3);
    assert_eq!(rows.row_size_bytes(), RENDER_ROW_BYTES);

    // Row 0: the root op. Header (7, 1, -1, 0), payload lane 0 = 2 children.
    assert_eq!(
        [
            rows.read_i32(0, 0),
            rows.read_i32(0, 1),
            rows.read_i32(0, 2),
            rows.read_i32(0, 3)
        ],
        [7, 1, -1, 0]
    );
    assert_eq!(rows.read_i32(0, 4), 2);
    for lane in 5..16 {
        assert_eq!(rows.read_u32(0, lane), 0);
    }

    // Row 1: the shape. Next sibling is the inert node at row 2.
    assert_eq!(
        [
            rows.read_i32(1, 0),
            rows.read_i32(1, 1),
            rows.read_i32(1, 2),
            rows.read_i32(1, 3)
        ],
        [2, -1, 2, 0]
    );
    assert_eq!(rows.read_i32(1, 4), 0); // transform-order index
    assert_eq!(rows.read_i32(1, 5), -1); // material fallback
    assert_eq!(rows.read_f32(1, 6), 10.0);
    assert_eq!(rows.read_f32(1, 7), 20.0);
    for lane in 8..16 {
        assert_eq!(rows.read_u32(1, lane), 0);
    }

    // Row 2: inert. Zero kind, no links, zero payload.
    assert_eq!(
        [
            rows.read_i32(2, 0),
            rows.read_i32(2, 1),
            rows.read_i32(2, 2),
            rows.read_i32(2, 3)
        ],
        [0, -1, -1, 0]
    );
    for lane in 4..16 {
        assert_eq!(rows.read_u32(2, lane), 0);
    }
}

#[test]
fn render_channel_early_outs_when_nothing_changed() {
    let (world, tree, _root, s1, _inert) = render_scene();
    let (_, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);
    assert!(channel.sync(&world).unwrap());
    channel.rows_mut().clear_dirty();
    assert!(!channel.sync(&world).unwrap());
    assert!(!channel.rows().has_dirty());
}

#[test]
fn render_channel_incremental_repacks_only_changed_rows() {
    let (mut world, tree, _root, s1, _inert) = render_scene();
    let (_, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);
    channel.sync(&world).unwrap();
    channel.rows_mut().clear_dirty();

    world
        .store_mut(SHAPE_LEAF)
        .unwrap()
        .update(s1, &[("p0", 99.0)]);
    assert!(channel.sync(&world).unwrap());
    assert_eq!(
        channel.rows().merged_ranges(),
        vec![[1, 1]],
        "only the shape's row repacks"
    );
    assert_eq!(channel.rows().read_f32(1, 6), 99.0);
}

#[test]
fn render_channel_structural_edit_rebuilds_rows() {
    let (mut world, tree, root, s1, inert) = render_scene();
    let (_, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);
    channel.sync(&world).unwrap();
    channel.rows_mut().clear_dirty();

    // Move the shape under the inert node: order epoch bumps, full rebuild.
    tree.borrow_mut()
        .set_parent(&mut world, s1, Some(inert))
        .unwrap();
    assert!(channel.sync(&world).unwrap());
    let rows = channel.rows();
    assert_eq!(rows.pending_upload_spans(), vec![(0, 3 * RENDER_ROW_BYTES)]);
    // New DFS: [root, inert, s1]; root still has 1 remaining direct child.
    assert_eq!(rows.read_i32(0, 4), 1);
    assert_eq!(rows.read_i32(1, 0), 0); // inert now at row 1
    assert_eq!(rows.read_i32(1, 1), 2); // ...with the shape as first child
    assert_eq!(rows.read_i32(2, 0), 2); // the shape's kind
    let _ = root;
}

#[test]
fn render_channel_reindexes_shapes_on_transform_order_change() {
    let (world, tree, _root, s1, _inert) = render_scene();
    let (cell, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);
    channel.sync(&world).unwrap();
    channel.rows_mut().clear_dirty();
    assert_eq!(channel.rows().read_i32(1, 4), 0);

    // The transform DFS gains a node ahead of the shape.
    {
        let mut args = cell.borrow_mut();
        let filler = Entity::from_index(900);
        args.order = Rc::new(vec![filler, s1]);
        args.epoch += 1;
    }
    assert!(channel.sync(&world).unwrap());
    assert_eq!(channel.rows().read_i32(1, 4), 1);
    assert_eq!(channel.rows().merged_ranges(), vec![[1, 1]]);
}

#[test]
fn render_channel_kind_transition_clears_stale_payload() {
    let (mut world, tree, _root, s1, _inert) = render_scene();
    let (_, transform_provider) = shared_args(vec![s1]);
    let mut channel = RenderChannel::new(tree_order(&tree), transform_provider);
    channel.sync(&world).unwrap();
    channel.rows_mut().clear_dirty();
    assert_eq!(channel.rows().read_f32(1, 6), 10.0);

    // The shape becomes an operation: its payload must fully rewrite.
    world.store_mut(SHAPE_LEAF).unwrap().remove(s1);
    world
        .store_mut(OPERATION)
        .unwrap()
        .add(s1, &[("opType", 3.0)]);
    assert!(channel.sync(&world).unwrap());
    let rows = channel.rows();
    assert_eq!(rows.read_i32(1, 0), 3);
    assert_eq!(rows.read_i32(1, 4), 0); // no children
    for lane in 5..16 {
        assert_eq!(rows.read_u32(1, lane), 0, "stale shape lanes must clear");
    }
}

#[test]
fn render_channel_is_deterministic() {
    let (world, tree, _root, s1, _inert) = render_scene();
    let (_, p1) = shared_args(vec![s1]);
    let (_, p2) = shared_args(vec![s1]);
    let mut c1 = RenderChannel::new(tree_order(&tree), p1);
    let mut c2 = RenderChannel::new(tree_order(&tree), p2);
    c1.sync(&world).unwrap();
    c2.sync(&world).unwrap();
    assert_eq!(c1.rows().live_lanes(), c2.rows().live_lanes());
}

// ---------------------------------------------------------------------------
// Device-backed bridge tests (skipped without an adapter)
// ---------------------------------------------------------------------------

#[test]
fn bridge_sync_all_uploads_and_binds() {
    let Some((device, queue)) = try_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };
    let (mut world, nodes) = transform_scene();
    let (cell, provider) = shared_args(nodes.clone());

    let mut bridge = GpuBridge::new();
    bridge
        .register(
            ChannelSlot { group: 0, binding: 0 },
            Box::new(TransformsChannel::new(provider)),
        )
        .unwrap();

    bridge.sync_all(&world, &device, &queue).unwrap();
    let slot = ChannelSlot { group: 0, binding: 0 };
    let size_before = bridge.channel(slot).unwrap().gpu_buffer().unwrap().size();
    assert_eq!(size_before, (3 * TRANSFORM_ROW_BYTES) as u64);
    assert_eq!(bridge.bind_group_entries_for(0).unwrap().len(), 1);

    // Growing the order resizes the GPU buffer; the recreation leaves no
    // dirty rows behind (the full range was uploaded by the same sync_all).
    let extra = world.create_entity();
    {
        let mut args = cell.borrow_mut();
        let mut order = nodes.clone();
        order.push(extra);
        args.order = Rc::new(order);
        args.epoch += 1;
    }
    bridge.sync_all(&world, &device, &queue).unwrap();
    let size_after = bridge.channel(slot).unwrap().gpu_buffer().unwrap().size();
    assert_eq!(size_after, (4 * TRANSFORM_ROW_BYTES) as u64);

    bridge.destroy();
    assert!(bridge.layout_entries_for(0).is_empty());
}

#[test]
fn bridge_zero_row_channel_allocates_minimum_buffer() {
    let Some((device, queue)) = try_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };
    let mut world = World::new();
    let _tree = TransformTree::new(&mut world).unwrap();

    let mut bridge = GpuBridge::new();
    bridge
        .register(
            ChannelSlot { group: 0, binding: 0 },
            Box::new(TransformsChannel::new(empty_transform_provider())),
        )
        .unwrap();
    bridge.sync_all(&world, &device, &queue).unwrap();
    let slot = ChannelSlot { group: 0, binding: 0 };
    assert_eq!(bridge.channel(slot).unwrap().gpu_buffer().unwrap().size(), 4);
    bridge.destroy();
}
