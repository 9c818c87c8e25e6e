//! The GPU bridge: a `(group, binding)`-keyed registry of channels.
//!
//! `sync_all` drives each channel once per frame in ascending `(group,
//! binding)` order: pull ECS state into the CPU row buffer, size the GPU
//! buffer, and upload coalesced dirty ranges. The bridge also assembles
//! bind-group-layout and bind-group entries for the compute pipelines that
//! consume the buffers.

use std::collections::BTreeMap;

use strata_ecs::world::World;

use crate::GpuError;

// ---------------------------------------------------------------------------
// GpuChannel
// ---------------------------------------------------------------------------

/// One packed buffer mirrored from ECS data.
pub trait GpuChannel {
    /// Label for diagnostics and the GPU allocation.
    fn label(&self) -> &str;

    /// Pull from the world into the CPU row buffer.
    ///
    /// Returns whether any CPU content changed this call.
    fn sync(&mut self, world: &World) -> Result<bool, GpuError>;

    /// Ensure the GPU buffer matches the CPU size. Returns whether the
    /// buffer was recreated (in which case all rows were marked dirty).
    fn create_or_resize(&mut self, device: &wgpu::Device) -> bool;

    /// Upload pending dirty ranges.
    fn flush(&mut self, queue: &wgpu::Queue);

    /// The current GPU buffer, if created.
    fn gpu_buffer(&self) -> Option<&wgpu::Buffer>;

    /// Destroy the GPU buffer.
    fn destroy_gpu(&mut self);

    /// Bind-group-layout entry for this channel. Defaults to a read-only
    /// storage buffer visible to the compute stage; channels may override.
    fn layout_entry(&self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// Address of a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelSlot {
    pub group: u32,
    pub binding: u32,
}

// ---------------------------------------------------------------------------
// GpuBridge
// ---------------------------------------------------------------------------

/// Registry of channels keyed by `(group, binding)`.
pub struct GpuBridge {
    /// BTreeMap keeps iteration in ascending (group, binding) order.
    channels: BTreeMap<(u32, u32), Box<dyn GpuChannel>>,
}

impl std::fmt::Debug for GpuBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBridge")
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

impl GpuBridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Register a channel at a slot.
    ///
    /// # Errors
    ///
    /// [`GpuError::DuplicateBinding`] if the slot is taken.
    pub fn register(
        &mut self,
        slot: ChannelSlot,
        channel: Box<dyn GpuChannel>,
    ) -> Result<(), GpuError> {
        let key = (slot.group, slot.binding);
        if self.channels.contains_key(&key) {
            return Err(GpuError::DuplicateBinding {
                group: slot.group,
                binding: slot.binding,
            });
        }
        self.channels.insert(key, channel);
        Ok(())
    }

    /// Remove a channel, optionally destroying its GPU buffer.
    pub fn unregister(
        &mut self,
        slot: ChannelSlot,
        destroy_buffer: bool,
    ) -> Option<Box<dyn GpuChannel>> {
        let mut channel = self.channels.remove(&(slot.group, slot.binding))?;
        if destroy_buffer {
            channel.destroy_gpu();
        }
        Some(channel)
    }

    /// Borrow a registered channel (test/introspection hook).
    pub fn channel(&self, slot: ChannelSlot) -> Option<&dyn GpuChannel> {
        self.channels
            .get(&(slot.group, slot.binding))
            .map(|c| c.as_ref())
    }

    /// Bind-group-layout entries for a group, ascending binding order.
    pub fn layout_entries_for(&self, group: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.channels
            .range((group, 0)..=(group, u32::MAX))
            .map(|(&(_, binding), channel)| channel.layout_entry(binding))
            .collect()
    }

    /// Bind-group entries for a group, referring to each channel's current
    /// GPU buffer.
    ///
    /// # Errors
    ///
    /// [`GpuError::MissingBuffer`] if any channel has not yet created its
    /// buffer (i.e. before the first `sync_all`).
    pub fn bind_group_entries_for(
        &self,
        group: u32,
    ) -> Result<Vec<wgpu::BindGroupEntry<'_>>, GpuError> {
        self.channels
            .range((group, 0)..=(group, u32::MAX))
            .map(|(&(_, binding), channel)| {
                let buffer = channel.gpu_buffer().ok_or(GpuError::MissingBuffer {
                    group,
                    binding,
                })?;
                Ok(wgpu::BindGroupEntry {
                    binding,
                    resource: buffer.as_entire_binding(),
                })
            })
            .collect()
    }

    /// Sync, size, and flush every registered channel in slot order.
    pub fn sync_all(
        &mut self,
        world: &World,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(), GpuError> {
        for (&(group, binding), channel) in self.channels.iter_mut() {
            let changed = channel.sync(world)?;
            let recreated = channel.create_or_resize(device);
            if changed || recreated {
                tracing::trace!(
                    group,
                    binding,
                    label = channel.label(),
                    recreated,
                    "channel updated"
                );
            }
            channel.flush(queue);
        }
        Ok(())
    }

    /// Unregister everything and destroy the GPU buffers.
    pub fn destroy(&mut self) {
        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.destroy_gpu();
        }
    }
}

impl Default for GpuBridge {
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

    /// Channel stub with no GPU state, for registry-level tests.
    struct Stub;

    impl GpuChannel for Stub {
        fn label(&self) -> &str {
            "stub"
        }
        fn sync(&mut self, _world: &World) -> Result<bool, GpuError> {
            Ok(false)
        }
        fn create_or_resize(&mut self, _device: &wgpu::Device) -> bool {
            false
        }
        fn flush(&mut self, _queue: &wgpu::Queue) {}
        fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
            None
        }
        fn destroy_gpu(&mut self) {}
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let mut bridge = GpuBridge::new();
        let slot = ChannelSlot { group: 0, binding: 1 };
        bridge.register(slot, Box::new(Stub)).unwrap();
        assert!(matches!(
            bridge.register(slot, Box::new(Stub)),
            Err(GpuError::DuplicateBinding { .. })
        ));
        assert!(bridge.unregister(slot, false).is_some());
        bridge.register(slot, Box::new(Stub)).unwrap();
    }

    #[test]
    fn layout_entries_are_binding_ordered_read_only_storage() {
        let mut bridge = GpuBridge::new();
        bridge
            .register(ChannelSlot { group: 0, binding: 2 }, Box::new(Stub))
            .unwrap();
        bridge
            .register(ChannelSlot { group: 0, binding: 0 }, Box::new(Stub))
            .unwrap();
        bridge
            .register(ChannelSlot { group: 1, binding: 1 }, Box::new(Stub))
            .unwrap();

        let entries = bridge.layout_entries_for(0);
        let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 2]);
        for entry in &entries {
            assert_eq!(entry.visibility, wgpu::ShaderStages::COMPUTE);
            assert!(matches!(
                entry.ty,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    ..
                }
            ));
        }
        assert_eq!(bridge.layout_entries_for(1).len(), 1);
        assert!(bridge.layout_entries_for(9).is_empty());
    }

    #[test]
    fn bind_group_entries_fail_before_first_sync() {
        let mut bridge = GpuBridge::new();
        bridge
            .register(ChannelSlot { group: 0, binding: 0 }, Box::new(Stub))
            .unwrap();
        assert!(matches!(
            bridge.bind_group_entries_for(0),
            Err(GpuError::MissingBuffer { .. })
        ));
    }
}
