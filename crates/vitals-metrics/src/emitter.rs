//! Row emission into a bounded snapshot buffer.
//!
//! Producer callbacks receive an [`Emitter`] scoped to one open of a
//! `values` file. Each row lands atomically: if the rendered row would
//! push the buffer past its cap, the cursor rolls back to the pre-row
//! checkpoint and the emitter saturates — that row and every subsequent
//! row are dropped. Truncation is the documented policy, so emit the most
//! important rows first.

use crate::escape::escape_into;
use crate::metric::MetricKind;

/// Per-open emission state handed to producer callbacks.
pub struct Emitter {
    buf: String,
    cap: usize,
    saturated: bool,
    metric_name: String,
    kind: MetricKind,
    arity: usize,
    kind_warned: bool,
}

impl Emitter {
    pub(crate) fn new(metric_name: &str, kind: MetricKind, arity: usize, cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
            saturated: false,
            metric_name: metric_name.to_string(),
            kind,
            arity,
            kind_warned: false,
        }
    }

    /// Emits one integer-valued row.
    ///
    /// The number of non-`None` fields should match the metric's declared
    /// arity; a mismatch logs a diagnostic but the row is still emitted.
    pub fn emit_int(&mut self, value: i64, field0: Option<&str>, field1: Option<&str>) {
        if self.kind == MetricKind::Str && !self.kind_warned {
            self.kind_warned = true;
            tracing::warn!(
                metric = %self.metric_name,
                "integer row emitted by a string-valued metric"
            );
        }
        self.emit_row(field0, field1, |buf| {
            buf.push_str(&value.to_string());
        });
    }

    /// Emits one string-valued row; the value is escaped like a field.
    pub fn emit_str(&mut self, value: &str, field0: Option<&str>, field1: Option<&str>) {
        if self.kind == MetricKind::Int && !self.kind_warned {
            self.kind_warned = true;
            tracing::warn!(
                metric = %self.metric_name,
                "string row emitted by an integer-valued metric"
            );
        }
        self.emit_row(field0, field1, |buf| {
            escape_into(buf, value);
        });
    }

    /// Whether a row has been dropped; everything after the first dropped
    /// row is dropped too.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Bytes emitted so far.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_string(self) -> String {
        self.buf
    }

    fn emit_row(
        &mut self,
        field0: Option<&str>,
        field1: Option<&str>,
        push_value: impl FnOnce(&mut String),
    ) {
        let passed = usize::from(field0.is_some()) + usize::from(field1.is_some());
        if passed != self.arity {
            tracing::warn!(
                metric = %self.metric_name,
                declared = self.arity,
                passed,
                "field arity mismatch in emitted row"
            );
        }
        if self.saturated {
            return;
        }

        let checkpoint = self.buf.len();
        for field in [field0, field1].into_iter().flatten() {
            escape_into(&mut self.buf, field);
            self.buf.push(' ');
        }
        push_value(&mut self.buf);
        self.buf.push('\n');

        if self.buf.len() > self.cap {
            self.buf.truncate(checkpoint);
            self.saturated = true;
        }
    }
}
