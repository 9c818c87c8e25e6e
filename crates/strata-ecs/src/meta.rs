//! Runtime component schemas.
//!
//! A [`ComponentMeta`] is a stable, self-describing record of ordered scalar
//! fields. Field order defines the column layout used by serialization and
//! the GPU channels, so it must never be reordered once a meta is in use.
//! Fields flagged `link` hold entity ids and are remapped by densifying
//! save/load.

use crate::NONE;

// ---------------------------------------------------------------------------
// FieldKind / FieldMeta
// ---------------------------------------------------------------------------

/// Scalar element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 32-bit float.
    F32,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
}

/// One scalar field of a component.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    key: String,
    kind: FieldKind,
    default: f64,
    link: bool,
}

impl FieldMeta {
    /// A 32-bit float field.
    pub fn f32(key: impl Into<String>, default: f32) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::F32,
            default: default as f64,
            link: false,
        }
    }

    /// A 32-bit signed integer field.
    pub fn i32(key: impl Into<String>, default: i32) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::I32,
            default: default as f64,
            link: false,
        }
    }

    /// A 32-bit unsigned integer field.
    pub fn u32(key: impl Into<String>, default: u32) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::U32,
            default: default as f64,
            link: false,
        }
    }

    /// A signed link field holding entity ids, defaulting to `NONE`.
    pub fn link(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::I32,
            default: NONE as f64,
            link: true,
        }
    }

    /// The field key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The column element type.
    #[inline]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Numeric value written on row creation.
    #[inline]
    pub fn default(&self) -> f64 {
        self.default
    }

    /// Whether the column holds entity ids.
    #[inline]
    pub fn is_link(&self) -> bool {
        self.link
    }
}

// ---------------------------------------------------------------------------
// ComponentMeta
// ---------------------------------------------------------------------------

/// A stable, ordered description of a component's scalar fields.
#[derive(Debug, Clone)]
pub struct ComponentMeta {
    name: String,
    fields: Vec<FieldMeta>,
}

impl ComponentMeta {
    /// Define a meta from a name and an ordered field list.
    pub fn new(name: impl Into<String>, fields: Vec<FieldMeta>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The component name (the registry key).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered field list; the order is the column layout.
    #[inline]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Index of a field by key.
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.key() == key)
    }
}

// ---------------------------------------------------------------------------
// Hierarchy schema
// ---------------------------------------------------------------------------

/// The five intrusive link fields that make a component a hierarchy node.
pub const HIERARCHY_FIELDS: [&str; 5] = [
    "parent",
    "firstChild",
    "lastChild",
    "nextSibling",
    "prevSibling",
];

/// Whether a meta satisfies the hierarchy schema: all five link fields
/// present as signed 32-bit, `link`-flagged columns defaulting to `NONE`.
pub fn is_hierarchy_meta(meta: &ComponentMeta) -> bool {
    HIERARCHY_FIELDS.iter().all(|key| {
        meta.field_index(key).is_some_and(|idx| {
            let f = &meta.fields()[idx];
            f.kind() == FieldKind::I32 && f.is_link() && f.default() == NONE as f64
        })
    })
}

/// Build a meta containing exactly the hierarchy schema fields.
pub fn hierarchy_node_meta(name: impl Into<String>) -> ComponentMeta {
    ComponentMeta::new(
        name,
        HIERARCHY_FIELDS.iter().map(|key| FieldMeta::link(*key)).collect(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
