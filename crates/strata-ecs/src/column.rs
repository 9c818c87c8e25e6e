//! Typed scalar columns.
//!
//! A [`Column`] is one contiguous typed buffer of a store, tagged by
//! [`FieldKind`]. All value traffic at the generic API goes through `f64`,
//! which represents every 32-bit scalar exactly; typed slice accessors exist
//! for hot paths (transform propagation, GPU packing).

use crate::meta::FieldKind;

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// A typed scalar column. Length always equals the owning store's capacity.
#[derive(Debug, Clone)]
pub enum Column {
    F32(Vec<f32>),
    I32(Vec<i32>),
    U32(Vec<u32>),
}

impl Column {
    /// Allocate a column of `len` slots filled with `default`.
    pub fn new(kind: FieldKind, len: usize, default: f64) -> Self {
        match kind {
            FieldKind::F32 => Column::F32(vec![default as f32; len]),
            FieldKind::I32 => Column::I32(vec![default as i32; len]),
            FieldKind::U32 => Column::U32(vec![default as u32; len]),
        }
    }

    /// The element type tag.
    #[inline]
    pub fn kind(&self) -> FieldKind {
        match self {
            Column::F32(_) => FieldKind::F32,
            Column::I32(_) => FieldKind::I32,
            Column::U32(_) => FieldKind::U32,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Column::F32(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::U32(v) => v.len(),
        }
    }

    /// Whether the column has zero slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow to `len` slots, filling new slots with `default`.
    pub fn grow(&mut self, len: usize, default: f64) {
        match self {
            Column::F32(v) => v.resize(len, default as f32),
            Column::I32(v) => v.resize(len, default as i32),
            Column::U32(v) => v.resize(len, default as u32),
        }
    }

    /// Read a slot as `f64`.
    #[inline]
    pub fn get(&self, row: usize) -> f64 {
        match self {
            Column::F32(v) => v[row] as f64,
            Column::I32(v) => v[row] as f64,
            Column::U32(v) => v[row] as f64,
        }
    }

    /// Write a slot from `f64`, truncating to the column type.
    ///
    /// Returns whether the stored value changed.
    #[inline]
    pub fn set(&mut self, row: usize, value: f64) -> bool {
        match self {
            Column::F32(v) => {
                let value = value as f32;
                let changed = v[row] != value;
                v[row] = value;
                changed
            }
            Column::I32(v) => {
                let value = value as i32;
                let changed = v[row] != value;
                v[row] = value;
                changed
            }
            Column::U32(v) => {
                let value = value as u32;
                let changed = v[row] != value;
                v[row] = value;
                changed
            }
        }
    }

    /// Copy slot `from` into slot `to` (swap-remove support).
    #[inline]
    pub fn copy_row(&mut self, from: usize, to: usize) {
        match self {
            Column::F32(v) => v[to] = v[from],
            Column::I32(v) => v[to] = v[from],
            Column::U32(v) => v[to] = v[from],
        }
    }

    // -- typed access --------------------------------------------------------
    //
    // Kind mismatches on these accessors are programming errors: metas are
    // fixed at registration, so a caller that knows the meta knows the kind.

    /// Borrow as a float slice.
    #[inline]
    pub fn as_f32(&self) -> &[f32] {
        match self {
            Column::F32(v) => v,
            _ => panic!("column kind mismatch: expected f32"),
        }
    }

    /// Borrow as a mutable float slice.
    #[inline]
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        match self {
            Column::F32(v) => v,
            _ => panic!("column kind mismatch: expected f32"),
        }
    }

    /// Borrow as a signed integer slice.
    #[inline]
    pub fn as_i32(&self) -> &[i32] {
        match self {
            Column::I32(v) => v,
            _ => panic!("column kind mismatch: expected i32"),
        }
    }

    /// Borrow as a mutable signed integer slice.
    #[inline]
    pub fn as_i32_mut(&mut self) -> &mut [i32] {
        match self {
            Column::I32(v) => v,
            _ => panic!("column kind mismatch: expected i32"),
        }
    }

    /// Borrow as an unsigned integer slice.
    #[inline]
    pub fn as_u32(&self) -> &[u32] {
        match self {
            Column::U32(v) => v,
            _ => panic!("column kind mismatch: expected u32"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_new_slots() {
        let mut col = Column::new(FieldKind::I32, 2, -1.0);
        assert_eq!(col.as_i32(), &[-1, -1]);
        col.grow(4, -1.0);
        assert_eq!(col.as_i32(), &[-1, -1, -1, -1]);
    }

    #[test]
    fn set_reports_change() {
        let mut col = Column::new(FieldKind::F32, 2, 0.0);
        assert!(col.set(0, 1.5));
        assert!(!col.set(0, 1.5));
        assert_eq!(col.get(0), 1.5);
    }

    #[test]
    fn u32_round_trips_through_f64() {
        let mut col = Column::new(FieldKind::U32, 1, 0.0);
        col.set(0, 4_000_000_000.0);
        assert_eq!(col.as_u32()[0], 4_000_000_000);
        assert_eq!(col.get(0), 4_000_000_000.0);
    }

    #[test]
    fn copy_row_moves_values() {
        let mut col = Column::new(FieldKind::I32, 3, 0.0);
        col.set(2, 9.0);
        col.copy_row(2, 0);
        assert_eq!(col.as_i32()[0], 9);
    }

    #[test]
    #[should_panic(expected = "column kind mismatch")]
    fn typed_access_panics_on_wrong_kind() {
        let col = Column::new(FieldKind::I32, 1, 0.0);
        let _ = col.as_f32();
    }
}
