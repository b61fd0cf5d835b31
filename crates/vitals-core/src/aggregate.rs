//! Recursive aggregation over the source tree.
//!
//! Resolution first locates the binding on the queried source whose schema
//! is pointer-identical to the requested descriptor's. A simple value
//! (live base, no aggregation kind) reads straight from storage. Anything
//! else walks the subtree: every binding anywhere below that shares the
//! reference schema and still has a live base contributes the same field,
//! and bindings with a different schema are skipped silently — that skip is
//! the mechanism selecting which values feed which aggregate, never an
//! error.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::source::{Source, SourceInner};
use crate::value::{AggrKind, ValueDesc, ValueRef, ValueSchema, ValueType};

/// Running accumulator for one walk.
///
/// `min`/`max` start at the type extremes chosen by the descriptor's
/// signedness; a walk with no contributors therefore reduces to the
/// sentinel, which the contract preserves rather than mapping to an error.
pub(crate) struct Accumulator {
    sum: u64,
    count: u32,
    count_zero: u32,
    min: u64,
    max: u64,
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl Accumulator {
    pub(crate) fn new(value_type: ValueType) -> Self {
        let (min, max) = if value_type.is_signed() {
            (i64::MAX as u64, i64::MIN as u64)
        } else {
            (u64::MAX, 0)
        };
        Self {
            sum: 0,
            count: 0,
            count_zero: 0,
            min,
            max,
        }
    }

    pub(crate) fn add(&mut self, value: u64, signed: bool) {
        self.sum = self.sum.wrapping_add(value);
        self.count += 1;
        self.count_zero += u32::from(value == 0);
        if signed {
            if (value as i64) >= (self.max as i64) {
                self.max = value;
            }
            if (value as i64) <= (self.min as i64) {
                self.min = value;
            }
        } else {
            if value >= self.max {
                self.max = value;
            }
            if value <= self.min {
                self.min = value;
            }
        }
    }

    pub(crate) fn reduce(&self, kind: AggrKind, signed: bool) -> u64 {
        match (kind, signed) {
            (AggrKind::Sum, _) => self.sum,
            (AggrKind::Min, _) => self.min,
            (AggrKind::Max, _) => self.max,
            (AggrKind::CountZero, _) => u64::from(self.count_zero),
            (AggrKind::Avg, false) => {
                if self.count == 0 {
                    0
                } else {
                    self.sum / u64::from(self.count)
                }
            }
            (AggrKind::Avg, true) => {
                if self.count == 0 {
                    0
                } else {
                    ((self.sum as i64) / i64::from(self.count)) as u64
                }
            }
            // A detached simple value resolves through the walk and reads
            // as zero.
            (AggrKind::None, _) => 0,
        }
    }
}

/// First descriptor named `name` among the source's own bindings, in
/// binding insertion order. Subordinates are never searched by name.
pub(crate) fn find_by_name(inner: &SourceInner, name: &str) -> Option<ValueRef> {
    inner
        .bindings
        .iter()
        .find_map(|b| ValueRef::by_name(&b.schema, name))
}

/// Resolves `value` on `source`, whose lock is already held for reading.
pub(crate) fn get_value_locked(
    source: &Source,
    inner: &SourceInner,
    value: &ValueRef,
) -> Result<u64> {
    let Some(binding) = inner
        .bindings
        .iter()
        .find(|b| Arc::ptr_eq(&b.schema, value.schema()))
    else {
        tracing::debug!(
            source = %source.name(),
            value = %value.desc().name,
            "value not found in source"
        );
        return Err(Error::NotFound(format!(
            "value {:?} in source {:?}",
            value.desc().name,
            source.name()
        )));
    };

    let desc = value.desc();
    if desc.aggr_kind == AggrKind::None {
        if let Some(base) = &binding.base {
            return Ok(base.load(desc.offset, desc.value_type));
        }
    }

    let mut acc = Accumulator::new(desc.value_type);
    walk(inner, value.schema(), desc, &mut acc);
    Ok(acc.reduce(desc.aggr_kind, desc.value_type.is_signed()))
}

/// Clears `value` on `source`, whose lock is already held for reading.
/// Slab stores are atomic, so the read lock is sufficient.
pub(crate) fn clear_locked(source: &Source, inner: &SourceInner, value: &ValueRef) -> Result<()> {
    let Some(binding) = inner
        .bindings
        .iter()
        .find(|b| Arc::ptr_eq(&b.schema, value.schema()))
    else {
        return Err(Error::NotFound(format!(
            "value {:?} in source {:?}",
            value.desc().name,
            source.name()
        )));
    };

    let desc = value.desc();
    if desc.aggr_kind == AggrKind::None {
        if let Some(base) = &binding.base {
            base.clear(desc.offset, desc.value_type);
            return Ok(());
        }
    }

    walk_clear(inner, value.schema(), desc);
    Ok(())
}

fn walk(
    inner: &SourceInner,
    ref_schema: &Arc<ValueSchema>,
    desc: &ValueDesc,
    acc: &mut Accumulator,
) {
    for binding in &inner.bindings {
        if let Some(base) = &binding.base {
            if Arc::ptr_eq(&binding.schema, ref_schema) {
                acc.add(
                    base.load(desc.offset, desc.value_type),
                    desc.value_type.is_signed(),
                );
            }
        }
    }
    for child in &inner.subordinates {
        let child_inner = child.state();
        walk(&child_inner, ref_schema, desc, acc);
    }
}

fn walk_clear(inner: &SourceInner, ref_schema: &Arc<ValueSchema>, desc: &ValueDesc) {
    for binding in &inner.bindings {
        if let Some(base) = &binding.base {
            if Arc::ptr_eq(&binding.schema, ref_schema) {
                base.clear(desc.offset, desc.value_type);
            }
        }
    }
    for child in &inner.subordinates {
        let child_inner = child.state();
        walk_clear(&child_inner, ref_schema, desc);
    }
}
