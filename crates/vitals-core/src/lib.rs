//! # vitals-core
//!
//! A hierarchical stats source tree with typed value descriptors,
//! recursive aggregation, and a pluggable filesystem publisher.
//!
//! Producers create [`Source`] nodes, bind [`ValueSchema`] arrays over
//! their own [`StatSlab`] storage, and link sources into a tree. Readers
//! resolve a value on any node: simple values read straight from storage,
//! aggregates (SUM/MIN/MAX/AVG/COUNT_ZERO) walk the subtree under per-node
//! read locks. A [`StatsMount`] mirrors the tree into a host filesystem —
//! one directory per source, one file per value, one `.schema` file per
//! source — through the [`DirectoryHost`] seam; [`MemoryHost`] is the
//! in-tree host.
//!
//! ## Example
//!
//! ```rust
//! use vitals_core::{
//!     AggrKind, MemoryHost, Source, StatSlab, StatsMount, ValueDesc, ValueSchema, ValueType,
//! };
//!
//! let schema = ValueSchema::new(vec![
//!     ValueDesc::new("requests", 0, ValueType::U64).aggr(AggrKind::Sum),
//! ]);
//!
//! // The root binds the schema with no storage of its own: a pure
//! // aggregate. Each worker binds the same schema over its own slab.
//! let root = Source::new("frontend", "service");
//! root.add_values(&schema, None).unwrap();
//!
//! let worker = Source::new("worker_0", "worker");
//! let slab = StatSlab::new(8);
//! worker.add_values(&schema, Some(&slab)).unwrap();
//! root.add_subordinate(&worker).unwrap();
//!
//! slab.store_u64(0, 17);
//! assert_eq!(root.get_value_by_name("requests").unwrap(), 17);
//!
//! let mount = StatsMount::new(MemoryHost::new());
//! mount.register(&root).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod aggregate;
pub mod error;
pub mod mount;
pub mod publish;
mod schema;
pub mod slab;
pub mod source;
pub mod value;

pub use error::{Error, Result};
pub use mount::{MountOptions, DEFAULT_ROOT_MODE};
pub use publish::{
    DirectoryHost, FileNode, MemoryHost, NodeId, OpenFile, SchemaCookie, StatsMount, ValueCookie,
    SCHEMA_FILE_NAME,
};
pub use slab::StatSlab;
pub use source::{Label, Source};
pub use value::{
    AggrKind, StatFlag, ValueDesc, ValueRef, ValueSchema, ValueType, DEFAULT_VALUE_MODE,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::mount::MountOptions;
    pub use crate::publish::{DirectoryHost, MemoryHost, StatsMount};
    pub use crate::slab::StatSlab;
    pub use crate::source::Source;
    pub use crate::value::{AggrKind, StatFlag, ValueDesc, ValueRef, ValueSchema, ValueType};
}
