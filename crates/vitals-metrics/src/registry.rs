//! The metrics registry: directory layout, file publication, snapshots.
//!
//! Each registered metric owns one directory holding four read-only
//! files — `annotations`, `fields`, `values`, `version`. File cookies
//! resolve back to the metric through a `Weak` reference on every open and
//! take a strong reference for the lifetime of the open, so snapshots
//! survive a concurrent unregistration while fresh opens fail with
//! `NotFound`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use vitals_core::{DirectoryHost, Error as HostError, FileNode, NodeId, OpenFile};

use crate::emitter::Emitter;
use crate::error::Result;
use crate::files;
use crate::metric::{Metric, MetricBuilder};

/// A directory grouping metrics under the registry root.
#[derive(Debug)]
pub struct Subsys {
    name: String,
    dir: NodeId,
}

impl Subsys {
    /// The subsystem's directory name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of exported metrics over a host filesystem.
pub struct MetricsRegistry {
    host: Arc<dyn DirectoryHost>,
    root: NodeId,
    metrics: Mutex<Vec<Arc<Metric>>>,
}

impl MetricsRegistry {
    /// Creates the registry root directory and the built-in `presence`
    /// metric, which emits the single row `1`.
    ///
    /// # Errors
    ///
    /// Host errors creating the root directory or the presence metric.
    pub fn new(host: Arc<dyn DirectoryHost>, name: &str) -> Result<Arc<Self>> {
        let root = host.create_dir(name, None)?;
        let registry = Arc::new(Self {
            host,
            root,
            metrics: Mutex::new(Vec::new()),
        });
        registry.register(
            MetricBuilder::new("presence").description("A basic presence metric."),
            None,
            |e: &mut Emitter| e.emit_int(1, None, None),
        )?;
        Ok(registry)
    }

    /// The underlying host.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn DirectoryHost> {
        &self.host
    }

    fn metrics(&self) -> MutexGuard<'_, Vec<Arc<Metric>>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a subsystem directory under `parent`, or under the registry
    /// root for `None`.
    ///
    /// # Errors
    ///
    /// Host errors, including a name collision.
    pub fn create_subsys(&self, name: &str, parent: Option<&Subsys>) -> Result<Subsys> {
        let parent_dir = parent.map_or(self.root, |s| s.dir);
        let dir = self.host.create_dir(name, Some(parent_dir))?;
        Ok(Subsys {
            name: name.to_string(),
            dir,
        })
    }

    /// Removes a subsystem directory and every metric beneath it.
    pub fn destroy_subsys(&self, subsys: Subsys) {
        self.host.remove_recursive(subsys.dir);
    }

    /// Registers a metric and publishes its four files.
    ///
    /// # Errors
    ///
    /// Validation errors from the builder, or host errors; a partially
    /// created metric directory is removed before returning.
    pub fn register(
        &self,
        builder: MetricBuilder,
        parent: Option<&Subsys>,
        emit: impl Fn(&mut Emitter) + Send + Sync + 'static,
    ) -> Result<Arc<Metric>> {
        builder.validate()?;
        let parent_dir = parent.map_or(self.root, |s| s.dir);
        let dir = self.host.create_dir(&builder.name, Some(parent_dir))?;
        let metric = Arc::new(Metric::from_builder(builder, Box::new(emit), dir));

        for file in MetricFile::ALL {
            let cookie = MetricCookie {
                metric: Arc::downgrade(&metric),
                file,
            };
            if let Err(err) = self
                .host
                .create_file(file.file_name(), 0o444, dir, Arc::new(cookie))
            {
                tracing::warn!(
                    metric = %metric.name(),
                    file = file.file_name(),
                    %err,
                    "creating metric file failed, unwinding metric directory"
                );
                self.host.remove_recursive(dir);
                return Err(err.into());
            }
        }

        self.metrics().push(Arc::clone(&metric));
        tracing::debug!(metric = %metric.name(), "registered metric");
        Ok(metric)
    }

    /// Unregisters a metric: removes its files and drops the registry's
    /// strong reference. Open snapshots stay readable; fresh opens fail.
    pub fn unregister(&self, metric: &Arc<Metric>) {
        self.metrics().retain(|m| !Arc::ptr_eq(m, metric));
        self.host.remove_recursive(metric.dir());
        tracing::debug!(metric = %metric.name(), "unregistered metric");
    }
}

impl Drop for MetricsRegistry {
    fn drop(&mut self) {
        self.host.remove_recursive(self.root);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricFile {
    Annotations,
    Fields,
    Values,
    Version,
}

impl MetricFile {
    const ALL: [Self; 4] = [Self::Annotations, Self::Fields, Self::Values, Self::Version];

    const fn file_name(self) -> &'static str {
        match self {
            Self::Annotations => "annotations",
            Self::Fields => "fields",
            Self::Values => "values",
            Self::Version => "version",
        }
    }
}

struct MetricCookie {
    metric: Weak<Metric>,
    file: MetricFile,
}

impl FileNode for MetricCookie {
    fn open_file(&self) -> std::result::Result<Box<dyn OpenFile>, HostError> {
        let metric = self
            .metric
            .upgrade()
            .ok_or_else(|| HostError::NotFound("metric behind file".to_string()))?;
        let data = match self.file {
            MetricFile::Annotations => files::render_annotations(&metric)?,
            MetricFile::Fields => files::render_fields(&metric)?,
            MetricFile::Values => files::render_values(&metric),
            MetricFile::Version => files::VERSION_CONTENTS.to_string(),
        };
        Ok(Box::new(Snapshot::new(metric, data.into_bytes())))
    }
}

impl Metric {
    /// Opens a `values` snapshot directly, without going through the host.
    ///
    /// Holding the `Arc` plays the role an open file descriptor plays on
    /// the host path: the metric stays alive for the snapshot's lifetime.
    #[must_use]
    pub fn open_values(metric: &Arc<Self>) -> Snapshot {
        Snapshot::new(Arc::clone(metric), files::render_values(metric).into_bytes())
    }
}

/// A per-open snapshot buffer.
///
/// Reading through [`std::io::Read`] advances a simple offset cursor into
/// the buffer; the buffer itself is immutable for the open's lifetime and
/// released when the snapshot is dropped.
pub struct Snapshot {
    _metric: Arc<Metric>,
    data: Vec<u8>,
    pos: usize,
}

impl Snapshot {
    fn new(metric: Arc<Metric>, data: Vec<u8>) -> Self {
        Self {
            _metric: metric,
            data,
            pos: 0,
        }
    }

    /// The full snapshot contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::io::Read for Snapshot {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl OpenFile for Snapshot {
    fn read(&mut self) -> std::result::Result<Vec<u8>, HostError> {
        Ok(self.data.clone())
    }
}
