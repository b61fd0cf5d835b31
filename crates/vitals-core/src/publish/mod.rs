//! Mirroring the source tree into a host filesystem.
//!
//! The host filesystem itself — directories, inodes, permission bits, the
//! read-from-buffer plumbing — is somebody else's problem. This module
//! defines the seam: a [`DirectoryHost`] the publisher drives, file
//! cookies that resolve back to `(source, descriptor)` on open, and the
//! [`StatsMount`] handle that makes the mount's two-phase initialisation
//! explicit instead of ambient. [`MemoryHost`] is the in-tree host used
//! by tests and embedders.
//!
//! Publication per source: one directory, one `.schema` file, one file per
//! descriptor in each bound value array. Cookies hold `Weak` source
//! references; an open that loses the race against the drop of the last
//! strong reference fails with `NotFound` instead of touching a dying
//! node.

mod memfs;

pub use memfs::MemoryHost;

use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::schema;
use crate::source::{Published, Source, SourceInner};
use crate::value::ValueRef;

/// Name of the per-source schema file.
pub const SCHEMA_FILE_NAME: &str = ".schema";

/// Mode of the per-source schema file.
pub const SCHEMA_FILE_MODE: u16 = 0o444;

/// Opaque identifier of a host directory or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Wraps a host-assigned identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-assigned identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A file's server-side identity: something that can be opened.
///
/// The publisher hands one of these to the host per created file; the host
/// calls [`FileNode::open_file`] on each userspace open and drives the
/// returned [`OpenFile`] for the lifetime of that open.
pub trait FileNode: Send + Sync {
    /// Opens the file, producing the per-open state.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the object behind the file is gone;
    /// [`Error::OutOfMemory`] if building the open snapshot exceeds its
    /// buffer budget.
    fn open_file(&self) -> Result<Box<dyn OpenFile>>;
}

/// Per-open file state.
pub trait OpenFile: Send {
    /// Full rendered contents of the file for this open.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures from the object behind the file.
    fn read(&mut self) -> Result<Vec<u8>>;

    /// Handles a write of `payload`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] unless the file supports the payload.
    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let _ = payload;
        Err(Error::InvalidArgument("file is not writable".to_string()))
    }
}

/// The directory/file surface the publisher requires from a host.
pub trait DirectoryHost: Send + Sync {
    /// Creates a directory under `parent`, or at the mount root for `None`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] on a name collision; [`Error::NotFound`]
    /// for a dangling parent; [`Error::OutOfMemory`] on exhaustion.
    fn create_dir(&self, name: &str, parent: Option<NodeId>) -> Result<NodeId>;

    /// Creates a file under `parent` served by `node`.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`DirectoryHost::create_dir`].
    fn create_file(
        &self,
        name: &str,
        mode: u16,
        parent: NodeId,
        node: Arc<dyn FileNode>,
    ) -> Result<NodeId>;

    /// Removes a directory or file and everything beneath it. Removing an
    /// id that is already gone is a no-op.
    fn remove_recursive(&self, node: NodeId);
}

/// Cookie identifying `(source, descriptor)` behind a value file.
pub struct ValueCookie {
    source: Weak<Source>,
    value: ValueRef,
}

impl ValueCookie {
    /// Builds the cookie for one descriptor of `source`.
    #[must_use]
    pub fn new(source: &Arc<Source>, value: ValueRef) -> Self {
        Self {
            source: Arc::downgrade(source),
            value,
        }
    }

    /// Opens the value file, taking a strong source reference for the
    /// lifetime of the open.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the source has been dropped.
    pub fn open(&self) -> Result<ValueFile> {
        let source = self
            .source
            .upgrade()
            .ok_or_else(|| Error::NotFound("source behind value file".to_string()))?;
        Ok(ValueFile {
            source,
            value: self.value.clone(),
            rendered: None,
        })
    }
}

impl FileNode for ValueCookie {
    fn open_file(&self) -> Result<Box<dyn OpenFile>> {
        Ok(Box::new(self.open()?))
    }
}

/// An open value file.
pub struct ValueFile {
    source: Arc<Source>,
    value: ValueRef,
    rendered: Option<Vec<u8>>,
}

impl ValueFile {
    /// Current raw 64-bit result for this value.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the descriptor is no longer on the source.
    pub fn value(&self) -> Result<u64> {
        self.source.get_value(&self.value)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn render(&self) -> Result<Vec<u8>> {
        let raw = self.source.get_value(&self.value)?;
        let desc = self.value.desc();
        let text = if desc.value_type.is_signed() {
            format!("{}\n", raw as i64)
        } else {
            format!("{raw}\n")
        };
        Ok(text.into_bytes())
    }
}

impl OpenFile for ValueFile {
    /// Renders the value on first read and serves that snapshot for the
    /// rest of the open.
    fn read(&mut self) -> Result<Vec<u8>> {
        if self.rendered.is_none() {
            self.rendered = Some(self.render()?);
        }
        Ok(self.rendered.clone().unwrap_or_default())
    }

    /// Accepts only integer zero, which clears the value; the file mode
    /// must carry a write bit.
    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let desc = self.value.desc();
        if desc.effective_mode() & 0o222 == 0 {
            return Err(Error::InvalidArgument(format!(
                "value file {:?} is read-only",
                desc.name
            )));
        }
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::InvalidArgument("write payload is not text".to_string()))?;
        let parsed: u64 = text
            .trim()
            .parse()
            .map_err(|_| Error::InvalidArgument("write payload is not an integer".to_string()))?;
        if parsed != 0 {
            return Err(Error::InvalidArgument(
                "only zero may be written to a value file".to_string(),
            ));
        }
        self.source.clear(&self.value)
    }
}

/// Cookie identifying the source behind a `.schema` file.
pub struct SchemaCookie {
    source: Weak<Source>,
}

impl SchemaCookie {
    /// Builds the cookie for `source`.
    #[must_use]
    pub fn new(source: &Arc<Source>) -> Self {
        Self {
            source: Arc::downgrade(source),
        }
    }

    /// Opens the schema file, snapshotting labels and bindings.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the source has been dropped.
    pub fn open(&self) -> Result<SchemaFile> {
        let source = self
            .source
            .upgrade()
            .ok_or_else(|| Error::NotFound("source behind schema file".to_string()))?;
        let data = {
            let inner = source.state();
            schema::render(&inner.labels, &inner.bindings).into_bytes()
        };
        Ok(SchemaFile {
            _source: source,
            data,
        })
    }
}

impl FileNode for SchemaCookie {
    fn open_file(&self) -> Result<Box<dyn OpenFile>> {
        Ok(Box::new(self.open()?))
    }
}

/// An open schema file: a snapshot taken at open time.
pub struct SchemaFile {
    _source: Arc<Source>,
    data: Vec<u8>,
}

impl OpenFile for SchemaFile {
    fn read(&mut self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}

/// Handle to a mounted stats filesystem.
///
/// The mount is a two-phase resource: the host (and its root directory)
/// exists first, sources become publishable afterwards through this
/// handle. Keeping it an explicit value threaded into registration avoids
/// ambient global state.
pub struct StatsMount {
    host: Arc<dyn DirectoryHost>,
}

impl StatsMount {
    /// Wraps an initialised host.
    #[must_use]
    pub fn new(host: Arc<dyn DirectoryHost>) -> Self {
        Self { host }
    }

    /// The underlying host.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn DirectoryHost> {
        &self.host
    }

    /// Publishes `source` and its whole subtree at the mount root.
    ///
    /// Subsequent bindings and subordinate links on a registered source
    /// materialise files immediately.
    ///
    /// # Errors
    ///
    /// Host errors; everything published by this call is unwound first.
    pub fn register(&self, source: &Arc<Source>) -> Result<()> {
        match publish_recursive(source, &self.host, None) {
            Ok(()) => {
                tracing::debug!(source = %source.name(), "registered source");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    source = %source.name(),
                    %err,
                    "registering source failed, unwinding published files"
                );
                unpublish_recursive(source);
                Err(err)
            }
        }
    }
}

/// Creates host files for bindings that do not have them yet. Requires the
/// source's write lock, passed as `inner`. No-op while unpublished.
pub(crate) fn create_value_files_locked(source: &Source, inner: &mut SourceInner) -> Result<()> {
    let (host, dir) = match &inner.published {
        Some(published) => (Arc::clone(&published.host), published.dir),
        None => return Ok(()),
    };

    for binding in &mut inner.bindings {
        if binding.files_created {
            continue;
        }
        let schema = Arc::clone(&binding.schema);
        for (index, desc) in schema.values().iter().enumerate() {
            let cookie = ValueCookie {
                source: Weak::clone(&source.weak_self),
                value: ValueRef::from_parts(Arc::clone(&schema), index),
            };
            match host.create_file(&desc.name, desc.effective_mode(), dir, Arc::new(cookie)) {
                Ok(node) => binding.files.push(node),
                Err(err) => {
                    tracing::warn!(
                        source = %source.name(),
                        value = %desc.name,
                        %err,
                        "creating value file failed, unwinding binding files"
                    );
                    for node in binding.files.drain(..) {
                        host.remove_recursive(node);
                    }
                    return Err(err);
                }
            }
        }
        binding.files_created = true;
    }
    Ok(())
}

/// Publishes `source` and its subtree under `parent`, taking each node's
/// write lock parent-before-child. Already-published nodes only fill in
/// missing value files.
pub(crate) fn publish_recursive(
    source: &Source,
    host: &Arc<dyn DirectoryHost>,
    parent: Option<NodeId>,
) -> Result<()> {
    let mut inner = source.state_mut();
    if inner.published.is_none() {
        let dir = host.create_dir(source.name(), parent)?;
        let cookie = SchemaCookie {
            source: Weak::clone(&source.weak_self),
        };
        if let Err(err) = host.create_file(SCHEMA_FILE_NAME, SCHEMA_FILE_MODE, dir, Arc::new(cookie))
        {
            host.remove_recursive(dir);
            return Err(err);
        }
        inner.published = Some(Published {
            host: Arc::clone(host),
            dir,
        });
    }
    create_value_files_locked(source, &mut inner)?;

    let dir = match &inner.published {
        Some(published) => published.dir,
        None => return Ok(()),
    };
    for child in &inner.subordinates {
        publish_recursive(child, host, Some(dir))?;
    }
    Ok(())
}

/// Tears down the published files of `source` and its subtree and resets
/// the publication state so the subtree can be published again.
pub(crate) fn unpublish_recursive(source: &Source) {
    let mut inner = source.state_mut();
    if let Some(published) = inner.published.take() {
        published.host.remove_recursive(published.dir);
    }
    for binding in &mut inner.bindings {
        binding.files_created = false;
        binding.files.clear();
    }
    for child in &inner.subordinates {
        unpublish_recursive(child);
    }
}
