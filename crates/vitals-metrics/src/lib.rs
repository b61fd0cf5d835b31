//! # vitals-metrics
//!
//! Exports textual metric tables through a host filesystem.
//!
//! A producer registers a metric with a name, a description, up to two
//! field names, and a callback. The registry publishes four read-only
//! files per metric:
//!
//! - `annotations` — the escaped description, plus `CUMULATIVE` when set;
//! - `fields` — a header line of field names ending in `value`, then a
//!   type line of `str`/`int` tokens;
//! - `values` — one row per callback emission, filled into a private
//!   64 KiB buffer allocated at open; rows that do not fit are dropped
//!   whole, never split;
//! - `version` — the literal `1\n`.
//!
//! Every open allocates its own snapshot, so a reader that seeks around a
//! file sees one atomic view of the data. Open the file, read it, close it
//! quickly: the snapshot and its metric reference live as long as the
//! open.
//!
//! ## Example
//!
//! ```rust
//! use vitals_core::MemoryHost;
//! use vitals_metrics::{MetricBuilder, MetricsRegistry};
//!
//! let host = MemoryHost::new();
//! let registry = MetricsRegistry::new(host.clone(), "metrics").unwrap();
//!
//! registry
//!     .register(
//!         MetricBuilder::new("disk_ops")
//!             .description("Operations per disk")
//!             .field("disk")
//!             .cumulative(),
//!         None,
//!         |e| {
//!             e.emit_int(12, Some("sda"), None);
//!             e.emit_int(7, Some("sdb"), None);
//!         },
//!     )
//!     .unwrap();
//!
//! assert_eq!(
//!     host.read_to_string("metrics/disk_ops/values").unwrap(),
//!     "sda 12\nsdb 7\n"
//! );
//! assert_eq!(
//!     host.read_to_string("metrics/disk_ops/fields").unwrap(),
//!     "disk value\nstr int\n"
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod emitter;
pub mod error;
pub mod escape;
mod files;
pub mod metric;
pub mod registry;

pub use emitter::Emitter;
pub use error::{Error, Result};
pub use escape::{escape, unescape};
pub use files::{
    ANNOTATIONS_BUF_SIZE, FIELDS_BUF_SIZE, VALUES_BUF_SIZE, VERSION_BUF_SIZE, VERSION_CONTENTS,
};
pub use metric::{EmitFn, Metric, MetricBuilder, MetricKind};
pub use registry::{MetricsRegistry, Snapshot, Subsys};
