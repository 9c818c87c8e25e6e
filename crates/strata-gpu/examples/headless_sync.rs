//! Headless end-to-end frame: build a scene, propagate transforms, and
//! mirror it onto the GPU through the bridge.
//!
//! Run with `cargo run -p strata-gpu --example headless_sync`. Requires any
//! GPU adapter (no window or surface).

use strata_ecs::prelude::*;
use strata_gpu::prelude::*;
use strata_scene::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // -- build the scene -----------------------------------------------------

    let mut world = World::new();
    let transform_tree = TransformTree::new(&mut world)?;
    let render_tree = create_render_tree(&mut world)?;

    // Root op combining two shapes and an inert group.
    let root = render_tree.borrow().root();
    world.store_mut(OPERATION)?.add(root, &[("opType", 1.0)]);

    let group = spawn_inert(&mut world, &mut render_tree.borrow_mut(), None)?;
    let sphere = spawn_shape(
        &mut world,
        &mut render_tree.borrow_mut(),
        Some(group),
        2,
        0,
        &[1.0],
    )?;
    let box_leaf = spawn_shape(
        &mut world,
        &mut render_tree.borrow_mut(),
        None,
        3,
        1,
        &[0.5, 0.5, 0.5],
    )?;

    // Give the shapes transforms: nodes in the transform tree with offsets.
    for (entity, tx) in [(sphere, 2.0f64), (box_leaf, -2.0)] {
        world.store_mut(TRANSFORM)?.add(entity, &[]);
        world.store_mut(TRANSFORM_NODE)?.add(entity, &[]);
        transform_tree
            .borrow_mut()
            .set_parent(&mut world, entity, None)?;
        world
            .store_mut(TRANSFORM)?
            .update(entity, &[("l03", tx), ("dirty", 1.0)]);
    }

    let mut workspace = TransformWorkspace::new();
    propagate_transforms(&mut world, &mut workspace)?;

    // -- bring up a headless device ------------------------------------------

    let (device, queue) = pollster::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or_else(|| anyhow::anyhow!("no GPU adapter available"))?;
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("strata_headless_sync"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(anyhow::Error::from)
    })?;

    // -- register channels and run a frame -----------------------------------

    let mut bridge = GpuBridge::new();
    bridge.register(
        ChannelSlot { group: 0, binding: 0 },
        Box::new(TransformsChannel::new(transform_tree_order(&transform_tree))),
    )?;
    bridge.register(
        ChannelSlot { group: 0, binding: 1 },
        Box::new(RenderChannel::new(
            tree_order(&render_tree),
            transform_tree_order(&transform_tree),
        )),
    )?;

    bridge.sync_all(&world, &device, &queue)?;

    let layout = bridge.layout_entries_for(0);
    println!("bind group 0 layout ({} entries):", layout.len());
    for entry in &layout {
        println!("  binding {} -> {:?}", entry.binding, entry.ty);
    }
    for binding in [0u32, 1] {
        let slot = ChannelSlot { group: 0, binding };
        let channel = bridge.channel(slot).expect("registered above");
        let size = channel.gpu_buffer().expect("created by sync_all").size();
        println!("  binding {} buffer: {} bytes ({})", binding, size, channel.label());
    }
    let bind_entries = bridge.bind_group_entries_for(0)?;
    println!("bind group entries ready: {}", bind_entries.len());
    drop(bind_entries);

    // -- an incremental frame ------------------------------------------------

    world.store_mut(TRANSFORM)?.update(sphere, &[("l03", 5.0), ("dirty", 1.0)]);
    propagate_transforms(&mut world, &mut workspace)?;
    bridge.sync_all(&world, &device, &queue)?;
    println!("incremental frame synced (sphere moved to tx = 5)");

    bridge.destroy();
    Ok(())
}
