//! Metric definitions and the registration builder.

use std::fmt;

use vitals_core::NodeId;

use crate::emitter::Emitter;
use crate::error::{Error, Result};

/// Whether a metric's value column holds integers or strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// 64-bit signed integer values.
    Int,
    /// Escaped string values.
    Str,
}

impl MetricKind {
    /// The token emitted into the `fields` type line.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Str => "str",
        }
    }
}

/// Producer callback filling a `values` snapshot.
pub type EmitFn = dyn Fn(&mut Emitter) + Send + Sync;

/// Declarative half of a metric registration.
///
/// ```rust
/// use vitals_metrics::{MetricBuilder, MetricKind};
///
/// let spec = MetricBuilder::new("disk_ops")
///     .description("Operations per disk and cgroup")
///     .field("disk")
///     .field("cgroup")
///     .kind(MetricKind::Int)
///     .cumulative();
/// # let _ = spec;
/// ```
#[derive(Debug, Clone)]
pub struct MetricBuilder {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) fields: Vec<String>,
    pub(crate) kind: MetricKind,
    pub(crate) cumulative: bool,
}

impl MetricBuilder {
    /// Starts a spec for an integer-valued, non-cumulative metric.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            fields: Vec::new(),
            kind: MetricKind::Int,
            cumulative: false,
        }
    }

    /// Sets the description emitted into `annotations`.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a field name. Metrics carry at most two fields.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    /// Sets the value kind.
    #[must_use]
    pub const fn kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the metric cumulative.
    #[must_use]
    pub const fn cumulative(mut self) -> Self {
        self.cumulative = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.fields.len() > 2 {
            return Err(Error::TooManyFields {
                metric: self.name.clone(),
                count: self.fields.len(),
            });
        }
        for field in &self.fields {
            if field.is_empty() || field.contains(' ') || field.contains('"') {
                return Err(Error::InvalidFieldName {
                    metric: self.name.clone(),
                    name: field.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A registered metric.
///
/// Strong references are held by the registry and by every open file
/// against the metric; publisher cookies hold `Weak` references, so opens
/// racing unregistration fail with `NotFound`.
pub struct Metric {
    name: String,
    description: String,
    fields: Vec<String>,
    kind: MetricKind,
    cumulative: bool,
    emit: Box<EmitFn>,
    dir: NodeId,
}

impl Metric {
    pub(crate) fn from_builder(builder: MetricBuilder, emit: Box<EmitFn>, dir: NodeId) -> Self {
        Self {
            name: builder.name,
            description: builder.description,
            fields: builder.fields,
            kind: builder.kind,
            cumulative: builder.cumulative,
            emit,
            dir,
        }
    }

    /// The metric's name; also its directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description emitted into `annotations`.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared field names, at most two.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The value kind.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Whether the metric is cumulative.
    #[must_use]
    pub const fn is_cumulative(&self) -> bool {
        self.cumulative
    }

    pub(crate) const fn dir(&self) -> NodeId {
        self.dir
    }

    pub(crate) fn run_emit(&self, emitter: &mut Emitter) {
        (self.emit)(emitter);
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("kind", &self.kind)
            .field("cumulative", &self.cumulative)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = MetricBuilder::new("m");
        assert_eq!(builder.kind, MetricKind::Int);
        assert!(!builder.cumulative);
        assert!(builder.fields.is_empty());
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_too_many_fields_rejected() {
        let builder = MetricBuilder::new("m").field("a").field("b").field("c");
        assert!(matches!(
            builder.validate(),
            Err(Error::TooManyFields { count: 3, .. })
        ));
    }

    #[test]
    fn test_bad_field_names_rejected() {
        for bad in ["has space", "has\"quote", ""] {
            let builder = MetricBuilder::new("m").field(bad);
            assert!(
                matches!(builder.validate(), Err(Error::InvalidFieldName { .. })),
                "{bad:?}"
            );
        }
    }
}
