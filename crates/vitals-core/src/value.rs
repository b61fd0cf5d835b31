//! Value descriptors and descriptor arrays.
//!
//! A [`ValueDesc`] is one immutable schema row: a name, an offset into a
//! backing object, a primitive type, and an aggregation kind. Descriptors
//! are grouped into a [`ValueSchema`], the unit that gets bound to a source
//! at a base address. Schema identity is `Arc` pointer identity: two
//! schemas with equal contents are still distinct schemas, and aggregation
//! only ever matches bindings that share the *same* schema allocation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Mode applied to a value file whose descriptor leaves `mode` at zero.
pub const DEFAULT_VALUE_MODE: u16 = 0o644;

/// Primitive type of a value field.
///
/// Signedness is a property of the variant rather than a bit of a packed
/// encoding; [`ValueType::is_signed`] and [`ValueType::width`] recover the
/// two axes the dispatch code cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Boolean, stored as one byte.
    Bool,
    /// Signed 8-bit integer.
    S8,
    /// Signed 16-bit integer.
    S16,
    /// Signed 32-bit integer.
    S32,
    /// Signed 64-bit integer.
    S64,
}

impl ValueType {
    /// Whether values of this type are sign-extended when widened to 64 bits.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32 | Self::S64)
    }

    /// Width of the field in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::Bool | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 => 4,
            Self::U64 | Self::S64 => 8,
        }
    }
}

/// How a descriptor's value is produced.
///
/// [`AggrKind::None`] marks a simple value read directly from the binding's
/// backing storage. Every other kind marks an aggregate: the descriptor has
/// no storage of its own and its result is computed by walking the subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggrKind {
    /// Simple value, read from memory.
    None,
    /// Sum of all contributing fields.
    Sum,
    /// Minimum contributing field (type-max sentinel when none contribute).
    Min,
    /// Maximum contributing field (type-min sentinel when none contribute).
    Max,
    /// Number of contributing fields equal to zero.
    CountZero,
    /// Integer average of contributing fields; zero when none contribute.
    Avg,
}

impl AggrKind {
    /// Whether this kind computes over the subtree instead of own storage.
    #[must_use]
    pub const fn is_aggregate(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Semantic flag of a value, emitted verbatim into the schema file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatFlag {
    /// Monotonically accumulating counter.
    #[default]
    Cumulative,
    /// Point-in-time measurement.
    Gauge,
}

impl fmt::Display for StatFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cumulative => f.write_str("CUMULATIVE"),
            Self::Gauge => f.write_str("GAUGE"),
        }
    }
}

/// One immutable schema row.
#[derive(Debug, Clone)]
pub struct ValueDesc {
    /// Name of the stat; becomes the value file name once published.
    pub name: String,
    /// Human-readable description (may be empty).
    pub desc: String,
    /// Byte offset of the field inside the backing object.
    pub offset: usize,
    /// Primitive type of the field.
    pub value_type: ValueType,
    /// Aggregation kind; `None` for simple values.
    pub aggr_kind: AggrKind,
    /// `CUMULATIVE` or `GAUGE`, for schema emission.
    pub flag: StatFlag,
    /// File permission bits; zero means [`DEFAULT_VALUE_MODE`].
    pub mode: u16,
}

impl ValueDesc {
    /// Creates a simple, cumulative descriptor with default mode.
    pub fn new(name: impl Into<String>, offset: usize, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            offset,
            value_type,
            aggr_kind: AggrKind::None,
            flag: StatFlag::Cumulative,
            mode: 0,
        }
    }

    /// Sets the aggregation kind.
    #[must_use]
    pub fn aggr(mut self, kind: AggrKind) -> Self {
        self.aggr_kind = kind;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Sets the flag.
    #[must_use]
    pub fn flag(mut self, flag: StatFlag) -> Self {
        self.flag = flag;
        self
    }

    /// Sets explicit file permission bits.
    #[must_use]
    pub fn mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    /// Permission bits with the zero default resolved.
    #[must_use]
    pub const fn effective_mode(&self) -> u16 {
        if self.mode == 0 {
            DEFAULT_VALUE_MODE
        } else {
            self.mode
        }
    }
}

/// An immutable, ordered array of descriptors.
///
/// Constructed once, shared behind an `Arc`, and compared everywhere by
/// pointer identity.
#[derive(Debug)]
pub struct ValueSchema {
    values: Vec<ValueDesc>,
}

impl ValueSchema {
    /// Wraps the descriptor list into a shared schema.
    #[must_use]
    pub fn new(values: Vec<ValueDesc>) -> Arc<Self> {
        Arc::new(Self { values })
    }

    /// The descriptors, in declaration order.
    #[must_use]
    pub fn values(&self) -> &[ValueDesc] {
        &self.values
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the schema is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the first descriptor with the given name.
    #[must_use]
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }
}

/// Handle naming one descriptor of one schema.
///
/// This is the descriptor-identity token used by the aggregator and by
/// publisher cookies: it pins the schema allocation and the index within it.
#[derive(Clone)]
pub struct ValueRef {
    schema: Arc<ValueSchema>,
    index: usize,
}

impl ValueRef {
    /// Crate-internal constructor for indices already known to be in range.
    pub(crate) fn from_parts(schema: Arc<ValueSchema>, index: usize) -> Self {
        debug_assert!(index < schema.len());
        Self { schema, index }
    }

    /// Builds a ref to `schema[index]`, or `None` if out of range.
    #[must_use]
    pub fn new(schema: &Arc<ValueSchema>, index: usize) -> Option<Self> {
        (index < schema.len()).then(|| Self {
            schema: Arc::clone(schema),
            index,
        })
    }

    /// Builds a ref to the first descriptor named `name`, if any.
    #[must_use]
    pub fn by_name(schema: &Arc<ValueSchema>, name: &str) -> Option<Self> {
        schema
            .position_by_name(name)
            .and_then(|index| Self::new(schema, index))
    }

    /// The schema this ref points into.
    #[must_use]
    pub fn schema(&self) -> &Arc<ValueSchema> {
        &self.schema
    }

    /// The descriptor this ref names.
    #[must_use]
    pub fn desc(&self) -> &ValueDesc {
        &self.schema.values()[self.index]
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("name", &self.desc().name)
            .field("index", &self.index)
            .finish()
    }
}
