//! Source nodes and tree linkage.
//!
//! A [`Source`] is a named node in the stats tree: an ordered list of value
//! bindings, an ordered list of subordinate sources, and the label list
//! emitted into its schema file. Sources are created behind an `Arc`;
//! strong references are held by the creator, by each parent that linked
//! the source, and by each open file against one of its values. Publisher
//! cookies hold `Weak` references, so an open that races the drop of the
//! last strong reference fails cleanly instead of observing a node
//! mid-destruction.
//!
//! Each node owns one readers-writer lock guarding its bindings,
//! subordinates, labels, and published state. Recursive operations acquire
//! locks strictly parent-before-child, which is deadlock-free as long as
//! producers keep the subordinate graph a tree (a documented contract, not
//! a runtime check).

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::aggregate;
use crate::error::{Error, Result};
use crate::publish::{self, DirectoryHost, NodeId};
use crate::slab::StatSlab;
use crate::value::{ValueRef, ValueSchema};

/// One schema label: a key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Label key, taken from a source's `label_key`.
    pub key: String,
    /// Label value, taken from a source's `name`.
    pub value: String,
}

/// A value array bound to a source at a base address.
pub(crate) struct Binding {
    pub(crate) schema: Arc<ValueSchema>,
    /// `None` for pure aggregate bindings, and after revocation.
    pub(crate) base: Option<Arc<StatSlab>>,
    /// Makes file publication idempotent across publish passes.
    pub(crate) files_created: bool,
    /// Host files created for this binding, for partial-failure unwinding.
    pub(crate) files: Vec<NodeId>,
}

impl Binding {
    fn matches(&self, schema: &Arc<ValueSchema>, base: Option<&Arc<StatSlab>>) -> bool {
        if !Arc::ptr_eq(&self.schema, schema) {
            return false;
        }
        match (&self.base, base) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Host-side state of a published source.
pub(crate) struct Published {
    pub(crate) host: Arc<dyn DirectoryHost>,
    pub(crate) dir: NodeId,
}

/// Mutable state of a source, behind the per-node lock.
pub(crate) struct SourceInner {
    pub(crate) bindings: Vec<Binding>,
    pub(crate) subordinates: Vec<Arc<Source>>,
    pub(crate) labels: Vec<Label>,
    pub(crate) published: Option<Published>,
}

/// A named node in the stats tree.
pub struct Source {
    name: String,
    label_key: String,
    /// Non-owning handle to this node, cloned into publisher cookies.
    pub(crate) weak_self: Weak<Source>,
    pub(crate) inner: RwLock<SourceInner>,
}

impl Source {
    /// Creates a detached source.
    ///
    /// The label list is seeded with the single `(label_key, name)` pair;
    /// linking the source under a parent later appends copies of the
    /// parent's labels. The returned `Arc` is the creator's reference.
    pub fn new(name: impl Into<String>, label_key: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let label_key = label_key.into();
        let labels = vec![Label {
            key: label_key.clone(),
            value: name.clone(),
        }];
        Arc::new_cyclic(|weak_self| Self {
            name,
            label_key,
            weak_self: Weak::clone(weak_self),
            inner: RwLock::new(SourceInner {
                bindings: Vec::new(),
                subordinates: Vec::new(),
                labels,
                published: None,
            }),
        })
    }

    /// The source's name; becomes its directory name once published.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The label key paired with the name in schema emission.
    #[must_use]
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, SourceInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, SourceInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds a value array to this source at `base`.
    ///
    /// Pass `base: None` for a pure aggregate binding that has no storage
    /// of its own. If the source is already published, one file per
    /// descriptor is materialised immediately.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] if the same (schema, base) pair is already
    /// bound; host errors if file creation fails (the files created for
    /// the new binding are unwound first).
    pub fn add_values(
        &self,
        schema: &Arc<ValueSchema>,
        base: Option<&Arc<StatSlab>>,
    ) -> Result<()> {
        let mut inner = self.state_mut();
        if inner.bindings.iter().any(|b| b.matches(schema, base)) {
            return Err(Error::AlreadyExists(format!(
                "value array binding on source {:?}",
                self.name
            )));
        }
        inner.bindings.push(Binding {
            schema: Arc::clone(schema),
            base: base.map(Arc::clone),
            files_created: false,
            files: Vec::new(),
        });
        tracing::debug!(
            source = %self.name,
            values = schema.len(),
            aggregate = base.is_none(),
            "bound value array"
        );
        publish::create_value_files_locked(self, &mut inner)
    }

    /// Links `child` as a subordinate of this source.
    ///
    /// Takes a strong reference to the child, appends a copy of every
    /// label currently on this source to the child's label list, and, if
    /// this source is published, publishes the child subtree.
    ///
    /// # Errors
    ///
    /// Host errors if publishing the child subtree fails; the partially
    /// published files are unwound, but the link itself remains.
    pub fn add_subordinate(&self, child: &Arc<Source>) -> Result<()> {
        let mut inner = self.state_mut();
        inner.subordinates.push(Arc::clone(child));
        {
            let parent_labels = inner.labels.clone();
            let mut child_inner = child.state_mut();
            child_inner.labels.extend(parent_labels);
        }
        tracing::debug!(parent = %self.name, child = %child.name, "linked subordinate");

        let Some(published) = &inner.published else {
            return Ok(());
        };
        let host = Arc::clone(&published.host);
        let dir = published.dir;
        if let Err(err) = publish::publish_recursive(child, &host, Some(dir)) {
            tracing::warn!(
                parent = %self.name,
                child = %child.name,
                %err,
                "publishing subordinate subtree failed, unwinding its files"
            );
            publish::unpublish_recursive(child);
            return Err(err);
        }
        Ok(())
    }

    /// Unlinks `child` if it is a subordinate of this source.
    ///
    /// Tears down the child subtree's published files and releases the
    /// strong reference taken at link time. Returns whether the child was
    /// found.
    pub fn remove_subordinate(&self, child: &Arc<Source>) -> bool {
        let mut inner = self.state_mut();
        let Some(pos) = inner
            .subordinates
            .iter()
            .position(|s| Arc::ptr_eq(s, child))
        else {
            return false;
        };
        let removed = inner.subordinates.remove(pos);
        publish::unpublish_recursive(&removed);
        tracing::debug!(parent = %self.name, child = %removed.name, "unlinked subordinate");
        true
    }

    /// Disconnects every binding on this source from its backing storage.
    ///
    /// Subordinates are not touched. Afterwards the source's simple values
    /// read as zero and aggregates rooted at ancestors silently skip this
    /// source's contributions. Producers call this just before dropping
    /// their own reference to the backing slab.
    pub fn revoke(&self) {
        let mut inner = self.state_mut();
        for binding in &mut inner.bindings {
            binding.base = None;
        }
        tracing::debug!(source = %self.name, "revoked backing storage");
    }

    /// Resolves `value` on this source and returns the 64-bit bit pattern
    /// of the result (reinterpret as `i64` for signed descriptors).
    ///
    /// Simple values read straight from their backing storage; aggregates
    /// walk the subtree rooted here under per-node read locks.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no binding on this source carries the ref's
    /// schema.
    pub fn get_value(&self, value: &ValueRef) -> Result<u64> {
        let inner = self.state();
        aggregate::get_value_locked(self, &inner, value)
    }

    /// Like [`Source::get_value`], resolving the descriptor by name.
    ///
    /// Only bindings directly on this source are searched (never
    /// subordinates); the first binding added wins on duplicate names.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no binding on this source has a descriptor
    /// with that name.
    pub fn get_value_by_name(&self, name: &str) -> Result<u64> {
        let inner = self.state();
        let Some(value) = aggregate::find_by_name(&inner, name) else {
            tracing::debug!(source = %self.name, name, "value not found in source");
            return Err(Error::NotFound(format!(
                "value {name:?} in source {:?}",
                self.name
            )));
        };
        aggregate::get_value_locked(self, &inner, &value)
    }

    /// Clears `value` to zero.
    ///
    /// A simple value is zeroed in place; an aggregate recursively zeroes
    /// every contributing simple field in the subtree. Aggregates
    /// themselves have no storage and are never modified.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no binding on this source carries the ref's
    /// schema.
    pub fn clear(&self, value: &ValueRef) -> Result<()> {
        let inner = self.state();
        aggregate::clear_locked(self, &inner, value)
    }

    /// Number of simple-value descriptors across all bindings.
    #[must_use]
    pub fn value_count(&self) -> usize {
        let inner = self.state();
        count_descriptors(&inner.bindings, None, false)
    }

    /// Number of aggregate descriptors across all bindings.
    #[must_use]
    pub fn aggregate_count(&self) -> usize {
        let inner = self.state();
        count_descriptors(&inner.bindings, None, true)
    }

    /// Number of simple-value descriptors in bindings with the given base.
    #[must_use]
    pub fn value_count_with_base(&self, base: Option<&Arc<StatSlab>>) -> usize {
        let inner = self.state();
        count_descriptors(&inner.bindings, Some(base), false)
    }

    /// Number of aggregate descriptors in bindings with the given base.
    #[must_use]
    pub fn aggregate_count_with_base(&self, base: Option<&Arc<StatSlab>>) -> usize {
        let inner = self.state();
        count_descriptors(&inner.bindings, Some(base), true)
    }

    /// Number of simple-value descriptors over the whole subtree.
    #[must_use]
    pub fn total_value_count(&self) -> usize {
        let inner = self.state();
        let mut count = count_descriptors(&inner.bindings, None, false);
        for child in &inner.subordinates {
            count += child.total_value_count();
        }
        count
    }

    /// Number of directly linked subordinates.
    #[must_use]
    pub fn subordinate_count(&self) -> usize {
        self.state().subordinates.len()
    }

    /// Whether `child` is directly linked under this source.
    #[must_use]
    pub fn has_subordinate(&self, child: &Arc<Source>) -> bool {
        self.state()
            .subordinates
            .iter()
            .any(|s| Arc::ptr_eq(s, child))
    }

    /// Snapshot of the label list, in schema emission order.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        self.state().labels.clone()
    }

    /// Whether this source currently has host files behind it.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.state().published.is_some()
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("label_key", &self.label_key)
            .finish_non_exhaustive()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        // Last strong reference gone: no cookie can upgrade any more, so
        // nothing can observe the node from here on.
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for child in inner.subordinates.drain(..) {
            publish::unpublish_recursive(&child);
        }
        if let Some(published) = inner.published.take() {
            published.host.remove_recursive(published.dir);
        }
    }
}

fn count_descriptors(
    bindings: &[Binding],
    base: Option<Option<&Arc<StatSlab>>>,
    aggregates: bool,
) -> usize {
    bindings
        .iter()
        .filter(|b| match base {
            None => true,
            Some(base) => match (&b.base, base) {
                (None, None) => true,
                (Some(a), Some(wanted)) => Arc::ptr_eq(a, wanted),
                _ => false,
            },
        })
        .map(|b| {
            b.schema
                .values()
                .iter()
                .filter(|v| v.aggr_kind.is_aggregate() == aggregates)
                .count()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AggrKind, ValueDesc, ValueType};

    fn plain_values() -> Arc<ValueSchema> {
        ValueSchema::new(vec![
            ValueDesc::new("u64", 0, ValueType::U64),
            ValueDesc::new("s32", 8, ValueType::S32),
            ValueDesc::new("bo", 12, ValueType::Bool),
        ])
    }

    fn aggr_values() -> Arc<ValueSchema> {
        ValueSchema::new(vec![
            ValueDesc::new("s32", 8, ValueType::S32).aggr(AggrKind::Min),
            ValueDesc::new("u64", 0, ValueType::U64).aggr(AggrKind::Sum),
        ])
    }

    #[test]
    fn test_empty_source() {
        let src = Source::new(format!("kvm_{}", 123), format!("subsystem_{}", "name"));
        assert_eq!(src.name(), "kvm_123");
        assert_eq!(src.label_key(), "subsystem_name");
        assert_eq!(src.subordinate_count(), 0);
        assert_eq!(src.value_count(), 0);
        assert_eq!(src.aggregate_count(), 0);
    }

    #[test]
    fn test_add_subordinate_membership() {
        let src = Source::new("parent", "parent_dir");
        let sub = Source::new("child", "child_dir");
        src.add_subordinate(&sub).unwrap();
        assert!(src.has_subordinate(&sub));
        assert_eq!(src.subordinate_count(), 1);
        assert_eq!(src.total_value_count(), 0);

        let not_sub = Source::new("not a child", "not_child_dir");
        assert!(!src.has_subordinate(&not_sub));
        assert_eq!(src.subordinate_count(), 1);
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let src = Source::new("parent", "parent_dir");
        let schema = plain_values();
        let slab = StatSlab::new(16);

        src.add_values(&schema, Some(&slab)).unwrap();
        assert_eq!(src.value_count_with_base(Some(&slab)), 3);

        let err = src.add_values(&schema, Some(&slab)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(src.value_count_with_base(Some(&slab)), 3);
        assert_eq!(src.value_count(), 3);
        assert_eq!(src.aggregate_count(), 0);
    }

    #[test]
    fn test_same_schema_different_base_allowed() {
        let src = Source::new("parent", "parent_dir");
        let schema = plain_values();
        let slab_a = StatSlab::new(16);
        let slab_b = StatSlab::new(16);

        src.add_values(&schema, Some(&slab_a)).unwrap();
        src.add_values(&schema, Some(&slab_b)).unwrap();
        src.add_values(&schema, None).unwrap();
        assert_eq!(src.value_count(), 9);
        assert_eq!(src.value_count_with_base(Some(&slab_a)), 3);
        assert_eq!(src.value_count_with_base(None), 3);
    }

    #[test]
    fn test_subtree_value_counts() {
        let src = Source::new("parent", "parent_dir");
        let sub = Source::new("child", "child_dir");
        src.add_subordinate(&sub).unwrap();

        let schema = plain_values();
        let slab = StatSlab::new(16);
        sub.add_values(&schema, Some(&slab)).unwrap();
        assert_eq!(src.value_count(), 0);
        assert_eq!(src.total_value_count(), 3);

        src.remove_subordinate(&sub);
        assert_eq!(src.total_value_count(), 0);

        src.add_subordinate(&sub).unwrap();
        assert_eq!(src.total_value_count(), 3);
    }

    #[test]
    fn test_remove_subordinate_misses_stranger() {
        let src = Source::new("parent", "parent_dir");
        let stranger = Source::new("stranger", "dir");
        assert!(!src.remove_subordinate(&stranger));
    }

    #[test]
    fn test_aggregate_binding_counts() {
        let src = Source::new("parent", "parent_dir");
        let aggr = aggr_values();
        src.add_values(&aggr, None).unwrap();
        assert_eq!(src.value_count(), 0);
        assert_eq!(src.aggregate_count(), 2);
        assert_eq!(src.aggregate_count_with_base(None), 2);

        let err = src.add_values(&aggr, None).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(src.aggregate_count(), 2);
    }

    #[test]
    fn test_label_propagation() {
        let src = Source::new("parent", "parent_dir");
        let sub = Source::new("child", "child_dir");
        let subsub = Source::new("grandchild", "grandchild_dir");
        src.add_subordinate(&sub).unwrap();
        sub.add_subordinate(&subsub).unwrap();

        let labels = src.labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].key, "parent_dir");
        assert_eq!(labels[0].value, "parent");

        // Leaf first, then ancestors in link order.
        let labels = sub.labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].key, "child_dir");
        assert_eq!(labels[1].key, "parent_dir");

        let labels = subsub.labels();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].key, "grandchild_dir");
        assert_eq!(labels[1].key, "child_dir");
        assert_eq!(labels[2].key, "parent_dir");

        // A child has exactly one more label than its parent and shares
        // the parent's last label.
        assert_eq!(subsub.labels().len(), sub.labels().len() + 1);
        assert_eq!(
            subsub.labels().last().unwrap(),
            sub.labels().last().unwrap()
        );
    }

    #[test]
    fn test_revoke_detaches_bindings() {
        let src = Source::new("parent", "parent_dir");
        let schema = plain_values();
        let slab = StatSlab::new(16);
        slab.store_u64(0, 42);
        src.add_values(&schema, Some(&slab)).unwrap();

        assert_eq!(src.get_value_by_name("u64").unwrap(), 42);
        src.revoke();
        assert_eq!(src.get_value_by_name("u64").unwrap(), 0);
        // The binding itself is still present, just detached.
        assert_eq!(src.value_count(), 3);
        assert_eq!(src.value_count_with_base(Some(&slab)), 0);
        assert_eq!(src.value_count_with_base(None), 3);
    }
}
