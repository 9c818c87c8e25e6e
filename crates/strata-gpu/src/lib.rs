//! Strata GPU -- mirrors ECS data into packed per-row GPU buffers.
//!
//! The [`bridge::GpuBridge`] routes world data through registered
//! [`bridge::GpuChannel`]s, each owning one CPU-side packed row buffer
//! ([`rows::RowBuffer`]), one GPU storage buffer, and a dirty-range list so
//! that only changed row runs are uploaded. Two concrete channels pack the
//! scene: [`transforms_channel::TransformsChannel`] (inverse-world 3x4 rows
//! in transform DFS order) and [`render_channel::RenderChannel`] (kind +
//! hierarchy + payload rows in render DFS order).

#![deny(unsafe_code)]

pub mod bridge;
pub mod order;
pub mod render_channel;
pub mod rows;
pub mod transforms_channel;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the GPU bridge.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// A `(group, binding)` slot was registered twice.
    #[error("channel slot (group {group}, binding {binding}) is already registered")]
    DuplicateBinding { group: u32, binding: u32 },

    /// Bind-group entries were requested before the first sync created the
    /// channel's GPU buffer.
    #[error("channel slot (group {group}, binding {binding}) has no GPU buffer yet; run sync_all first")]
    MissingBuffer { group: u32, binding: u32 },

    /// An underlying ECS lookup failed.
    #[error(transparent)]
    Ecs(#[from] strata_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::bridge::{ChannelSlot, GpuBridge, GpuChannel};
    pub use crate::order::{fixed_order, transform_tree_order, tree_order, OrderArgs, OrderProvider};
    pub use crate::render_channel::{RenderChannel, RENDER_ROW_BYTES};
    pub use crate::rows::RowBuffer;
    pub use crate::transforms_channel::{TransformsChannel, TRANSFORM_ROW_BYTES};
    pub use crate::GpuError;
}
