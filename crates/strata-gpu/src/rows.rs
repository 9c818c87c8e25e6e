//! Packed per-row CPU/GPU buffer pairs with dirty-range tracking.
//!
//! The CPU side is a `u32` lane buffer (float lanes stored via `to_bits`)
//! whose capacity never shrinks. Dirty rows are tracked as a compact list of
//! inclusive `[start, end]` ranges appended in ascending order, so a flush
//! only needs one linear merge before issuing `write_buffer` calls. The GPU
//! buffer is recreated whenever the required size changes; recreation marks
//! every row dirty so the next flush uploads the full range.

// ---------------------------------------------------------------------------
// RowBuffer
// ---------------------------------------------------------------------------

/// One channel's CPU lane buffer, dirty-range list, and GPU buffer.
pub struct RowBuffer {
    label: String,
    /// CPU lanes; length is the retained capacity, never shrunk.
    lanes: Vec<u32>,
    /// Lanes per row (row byte size / 4).
    row_lanes: usize,
    /// Current row count.
    count: usize,
    /// Inclusive dirty row ranges, in ascending append order.
    dirty: Vec<[u32; 2]>,
    gpu: Option<wgpu::Buffer>,
}

impl std::fmt::Debug for RowBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowBuffer")
            .field("label", &self.label)
            .field("count", &self.count)
            .field("row_lanes", &self.row_lanes)
            .field("dirty_ranges", &self.dirty.len())
            .field("has_gpu", &self.gpu.is_some())
            .finish()
    }
}

impl RowBuffer {
    /// Minimum CPU allocation in bytes.
    const MIN_CPU_BYTES: usize = 256;

    /// Minimum GPU allocation in bytes (zero-row buffers still bind).
    const MIN_GPU_BYTES: u64 = 4;

    /// Create an empty row buffer. `label` names the GPU allocation.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            lanes: Vec::new(),
            row_lanes: 0,
            count: 0,
            dirty: Vec::new(),
            gpu: None,
        }
    }

    /// Current row count.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bytes per row.
    #[inline]
    pub fn row_size_bytes(&self) -> usize {
        self.row_lanes * 4
    }

    /// Total live bytes (`count * row_size_bytes`).
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.count * self.row_size_bytes()
    }

    // -- CPU buffer ----------------------------------------------------------

    /// Size the CPU buffer for `rows` rows of `row_size_bytes` each.
    ///
    /// Reuses the existing allocation when the row size is unchanged and the
    /// capacity suffices (content is retained); otherwise a fresh buffer of
    /// at least `max(rows * row_size_bytes, 256)` bytes is allocated.
    pub fn ensure_cpu(&mut self, rows: usize, row_size_bytes: usize) {
        assert!(
            row_size_bytes > 0 && row_size_bytes % 4 == 0,
            "row size must be a positive multiple of 4 bytes"
        );
        let row_lanes = row_size_bytes / 4;
        let needed = rows * row_lanes;
        if row_lanes == self.row_lanes && self.lanes.len() >= needed {
            self.count = rows;
            return;
        }
        let capacity = needed.max(Self::MIN_CPU_BYTES / 4);
        self.lanes = vec![0; capacity];
        self.row_lanes = row_lanes;
        self.count = rows;
    }

    // -- lane access ---------------------------------------------------------

    #[inline]
    fn lane_index(&self, row: usize, lane: usize) -> usize {
        debug_assert!(row < self.count && lane < self.row_lanes);
        row * self.row_lanes + lane
    }

    /// Write an unsigned integer lane.
    #[inline]
    pub fn write_u32(&mut self, row: usize, lane: usize, value: u32) {
        let idx = self.lane_index(row, lane);
        self.lanes[idx] = value;
    }

    /// Write a signed integer lane.
    #[inline]
    pub fn write_i32(&mut self, row: usize, lane: usize, value: i32) {
        self.write_u32(row, lane, value as u32);
    }

    /// Write a float lane (bit-cast).
    #[inline]
    pub fn write_f32(&mut self, row: usize, lane: usize, value: f32) {
        self.write_u32(row, lane, value.to_bits());
    }

    /// Read an unsigned integer lane.
    #[inline]
    pub fn read_u32(&self, row: usize, lane: usize) -> u32 {
        self.lanes[self.lane_index(row, lane)]
    }

    /// Read a signed integer lane.
    #[inline]
    pub fn read_i32(&self, row: usize, lane: usize) -> i32 {
        self.read_u32(row, lane) as i32
    }

    /// Read a float lane (bit-cast).
    #[inline]
    pub fn read_f32(&self, row: usize, lane: usize) -> f32 {
        f32::from_bits(self.read_u32(row, lane))
    }

    /// The live lanes (`count * row_lanes`), for byte-level comparisons.
    pub fn live_lanes(&self) -> &[u32] {
        &self.lanes[..self.count * self.row_lanes]
    }

    // -- dirty tracking ------------------------------------------------------

    /// Mark one row dirty, extending the tail range when contiguous.
    pub fn mark_row_dirty(&mut self, row: usize) {
        let row = row as u32;
        if let Some(last) = self.dirty.last_mut() {
            if row <= last[1] {
                return; // already covered by the tail range
            }
            if row == last[1] + 1 {
                last[1] = row;
                return;
            }
        }
        self.dirty.push([row, row]);
    }

    /// Mark every row dirty.
    pub fn mark_all_dirty(&mut self) {
        self.dirty.clear();
        if self.count > 0 {
            self.dirty.push([0, self.count as u32 - 1]);
        }
    }

    /// Drop all dirty ranges without uploading.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Whether any rows are pending upload.
    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Merge overlapping/adjacent ranges. Input is in sorted append order,
    /// so a single linear pass suffices.
    pub fn merged_ranges(&self) -> Vec<[u32; 2]> {
        let mut merged: Vec<[u32; 2]> = Vec::with_capacity(self.dirty.len());
        for &range in &self.dirty {
            match merged.last_mut() {
                Some(last) if range[0] <= last[1] + 1 => {
                    last[1] = last[1].max(range[1]);
                }
                _ => merged.push(range),
            }
        }
        merged
    }

    /// The `(byte_offset, byte_len)` writes the next flush would issue, in
    /// ascending offset order. Full coverage collapses to one whole-buffer
    /// write.
    pub fn pending_upload_spans(&self) -> Vec<(u64, usize)> {
        if self.count == 0 {
            return Vec::new();
        }
        let merged = self.merged_ranges();
        if merged.len() == 1 && merged[0][0] == 0 && merged[0][1] as usize == self.count - 1 {
            return vec![(0, self.size_bytes())];
        }
        let row_bytes = self.row_size_bytes();
        merged
            .iter()
            .map(|range| {
                let start = range[0] as usize;
                let len = (range[1] - range[0] + 1) as usize;
                ((start * row_bytes) as u64, len * row_bytes)
            })
            .collect()
    }

    // -- GPU buffer ----------------------------------------------------------

    /// Ensure the GPU buffer exists with size `max(size_bytes, 4)`.
    ///
    /// Recreation destroys the previous buffer, marks all rows dirty (the
    /// next flush uploads the full range), and returns `true`.
    pub fn create_or_resize(&mut self, device: &wgpu::Device) -> bool {
        let desired = (self.size_bytes() as u64).max(Self::MIN_GPU_BYTES);
        if let Some(buffer) = &self.gpu {
            if buffer.size() == desired {
                return false;
            }
        }
        if let Some(old) = self.gpu.take() {
            old.destroy();
        }
        tracing::debug!(label = %self.label, bytes = desired, "recreating GPU buffer");
        self.gpu = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&self.label),
            size: desired,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        }));
        self.mark_all_dirty();
        true
    }

    /// Upload pending dirty ranges as coalesced `write_buffer` calls, in
    /// ascending byte-offset order, then clear the dirty list.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        if self.dirty.is_empty() || self.count == 0 {
            self.dirty.clear();
            return;
        }
        let Some(buffer) = &self.gpu else {
            return;
        };
        let row_lanes = self.row_lanes;
        for (offset, len) in self.pending_upload_spans() {
            let lane_start = offset as usize / 4;
            let lane_end = lane_start + len / 4;
            debug_assert_eq!(len % (row_lanes * 4), 0);
            queue.write_buffer(
                buffer,
                offset,
                bytemuck::cast_slice(&self.lanes[lane_start..lane_end]),
            );
        }
        self.dirty.clear();
    }

    /// The current GPU buffer, if one has been created.
    pub fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref()
    }

    /// Destroy the GPU buffer, if any.
    pub fn destroy_gpu(&mut self) {
        if let Some(buffer) = self.gpu.take() {
            buffer.destroy();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
