//! In-memory host filesystem.
//!
//! [`MemoryHost`] implements [`DirectoryHost`] over a flat node table, with
//! slash-separated path lookup layered on top so tests and embedders can
//! drive the published tree the way a userspace reader would: resolve a
//! path, open it, read or write. File opens run outside the host lock, so
//! an open may take source locks freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::mount::MountOptions;
use crate::publish::{DirectoryHost, FileNode, NodeId, OpenFile};

enum MemNodeKind {
    Dir(Vec<u64>),
    File(Arc<dyn FileNode>),
}

struct MemNode {
    name: String,
    mode: u16,
    parent: Option<u64>,
    kind: MemNodeKind,
}

struct HostState {
    nodes: HashMap<u64, MemNode>,
    roots: Vec<u64>,
    next_id: u64,
}

/// An in-memory [`DirectoryHost`].
pub struct MemoryHost {
    options: MountOptions,
    state: Mutex<HostState>,
}

const DIR_MODE: u16 = 0o755;

impl MemoryHost {
    /// Creates a host with default mount options.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_options(MountOptions::default())
    }

    /// Creates a host owned and moded per `options`.
    #[must_use]
    pub fn with_options(options: MountOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(HostState {
                nodes: HashMap::new(),
                roots: Vec::new(),
                next_id: 1,
            }),
        })
    }

    /// The mount options this host was created with.
    #[must_use]
    pub const fn options(&self) -> &MountOptions {
        &self.options
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves a slash-separated path to a node id.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let state = self.state();
        let mut current: Option<u64> = None;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let candidates = match current {
                None => &state.roots,
                Some(id) => match &state.nodes.get(&id)?.kind {
                    MemNodeKind::Dir(children) => children,
                    MemNodeKind::File(_) => return None,
                },
            };
            current = Some(
                candidates
                    .iter()
                    .copied()
                    .find(|id| state.nodes.get(id).is_some_and(|n| n.name == component))?,
            );
        }
        current.map(NodeId::new)
    }

    /// Whether a path resolves to a node.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Permission bits of the node at `path`.
    #[must_use]
    pub fn mode_of(&self, path: &str) -> Option<u16> {
        let id = self.lookup(path)?;
        self.state().nodes.get(&id.raw()).map(|n| n.mode)
    }

    /// Child names of the directory at `path` (the root for `""`), in
    /// creation order.
    #[must_use]
    pub fn list(&self, path: &str) -> Option<Vec<String>> {
        let id = if path.split('/').all(str::is_empty) {
            None
        } else {
            Some(self.lookup(path)?)
        };
        let state = self.state();
        let children = match id {
            None => &state.roots,
            Some(id) => match &state.nodes.get(&id.raw())?.kind {
                MemNodeKind::Dir(children) => children,
                MemNodeKind::File(_) => return None,
            },
        };
        Some(
            children
                .iter()
                .filter_map(|id| state.nodes.get(id).map(|n| n.name.clone()))
                .collect(),
        )
    }

    /// Opens the file at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for missing paths and directories, plus
    /// whatever the file's own open reports.
    pub fn open(&self, path: &str) -> Result<Box<dyn OpenFile>> {
        let id = self
            .lookup(path)
            .ok_or_else(|| Error::NotFound(format!("path {path:?}")))?;
        let node = {
            let state = self.state();
            match state.nodes.get(&id.raw()).map(|n| &n.kind) {
                Some(MemNodeKind::File(node)) => Arc::clone(node),
                _ => return Err(Error::NotFound(format!("file at {path:?}"))),
            }
        };
        // Opened outside the host lock: the open may resolve cookies and
        // take source locks.
        node.open_file()
    }

    /// Opens and fully reads the file at `path` as UTF-8.
    ///
    /// # Errors
    ///
    /// Open/read failures, or [`Error::InvalidArgument`] for non-text
    /// contents.
    pub fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.open(path)?.read()?;
        String::from_utf8(bytes)
            .map_err(|_| Error::InvalidArgument(format!("file at {path:?} is not UTF-8")))
    }

    /// Opens the file at `path` and writes `payload` to it.
    ///
    /// # Errors
    ///
    /// Open failures, or whatever the file's write handler reports.
    pub fn write(&self, path: &str, payload: &[u8]) -> Result<()> {
        self.open(path)?.write(payload)
    }

    fn insert(&self, name: &str, mode: u16, parent: Option<NodeId>, kind: MemNodeKind) -> Result<NodeId> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidArgument(format!("bad node name {name:?}")));
        }
        let mut state = self.state();
        let parent_raw = match parent {
            Some(id) => {
                if !state.nodes.contains_key(&id.raw()) {
                    return Err(Error::NotFound(format!("parent of {name:?}")));
                }
                Some(id.raw())
            }
            None => None,
        };

        let siblings = match parent_raw {
            None => &state.roots,
            Some(id) => match &state.nodes[&id].kind {
                MemNodeKind::Dir(children) => children,
                MemNodeKind::File(_) => {
                    return Err(Error::InvalidArgument(format!(
                        "parent of {name:?} is not a directory"
                    )))
                }
            },
        };
        if siblings
            .iter()
            .any(|id| state.nodes.get(id).is_some_and(|n| n.name == name))
        {
            return Err(Error::AlreadyExists(format!("node {name:?}")));
        }

        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            MemNode {
                name: name.to_string(),
                mode,
                parent: parent_raw,
                kind,
            },
        );
        match parent_raw {
            None => state.roots.push(id),
            Some(parent_id) => {
                if let Some(MemNode {
                    kind: MemNodeKind::Dir(children),
                    ..
                }) = state.nodes.get_mut(&parent_id)
                {
                    children.push(id);
                }
            }
        }
        Ok(NodeId::new(id))
    }
}

impl DirectoryHost for MemoryHost {
    fn create_dir(&self, name: &str, parent: Option<NodeId>) -> Result<NodeId> {
        self.insert(name, DIR_MODE, parent, MemNodeKind::Dir(Vec::new()))
    }

    fn create_file(
        &self,
        name: &str,
        mode: u16,
        parent: NodeId,
        node: Arc<dyn FileNode>,
    ) -> Result<NodeId> {
        self.insert(name, mode, Some(parent), MemNodeKind::File(node))
    }

    fn remove_recursive(&self, node: NodeId) {
        let mut state = self.state();
        let Some(removed) = state.nodes.remove(&node.raw()) else {
            return;
        };
        match removed.parent {
            None => state.roots.retain(|id| *id != node.raw()),
            Some(parent_id) => {
                if let Some(MemNode {
                    kind: MemNodeKind::Dir(children),
                    ..
                }) = state.nodes.get_mut(&parent_id)
                {
                    children.retain(|id| *id != node.raw());
                }
            }
        }

        let mut pending = match removed.kind {
            MemNodeKind::Dir(children) => children,
            MemNodeKind::File(_) => Vec::new(),
        };
        while let Some(id) = pending.pop() {
            if let Some(child) = state.nodes.remove(&id) {
                if let MemNodeKind::Dir(children) = child.kind {
                    pending.extend(children);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFile(&'static str);

    impl FileNode for StaticFile {
        fn open_file(&self) -> Result<Box<dyn OpenFile>> {
            Ok(Box::new(StaticOpen(self.0)))
        }
    }

    struct StaticOpen(&'static str);

    impl OpenFile for StaticOpen {
        fn read(&mut self) -> Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_create_lookup_and_read() {
        let host = MemoryHost::new();
        let dir = host.create_dir("kvm_1", None).unwrap();
        host.create_file("exits", 0o644, dir, Arc::new(StaticFile("9\n")))
            .unwrap();

        assert!(host.exists("kvm_1"));
        assert!(host.exists("/kvm_1/exits"));
        assert_eq!(host.mode_of("kvm_1/exits"), Some(0o644));
        assert_eq!(host.read_to_string("kvm_1/exits").unwrap(), "9\n");
        assert_eq!(host.list("kvm_1").unwrap(), vec!["exits".to_string()]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let host = MemoryHost::new();
        let dir = host.create_dir("a", None).unwrap();
        host.create_file("f", 0o644, dir, Arc::new(StaticFile("x")))
            .unwrap();
        let err = host
            .create_file("f", 0o644, dir, Arc::new(StaticFile("y")))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(host.create_dir("a", None).is_err());
    }

    #[test]
    fn test_remove_recursive_removes_subtree() {
        let host = MemoryHost::new();
        let a = host.create_dir("a", None).unwrap();
        let b = host.create_dir("b", Some(a)).unwrap();
        host.create_file("f", 0o644, b, Arc::new(StaticFile("x")))
            .unwrap();

        host.remove_recursive(a);
        assert!(!host.exists("a"));
        assert!(!host.exists("a/b/f"));
        // Idempotent on stale ids.
        host.remove_recursive(a);
        host.remove_recursive(b);
    }

    #[test]
    fn test_missing_paths_fail_lookup() {
        let host = MemoryHost::new();
        assert!(host.lookup("nope").is_none());
        assert!(matches!(
            host.read_to_string("nope"),
            Err(Error::NotFound(_))
        ));
        host.create_dir("d", None).unwrap();
        // Directories cannot be opened as files.
        assert!(matches!(host.open("d"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_root_listing() {
        let host = MemoryHost::new();
        host.create_dir("x", None).unwrap();
        host.create_dir("y", None).unwrap();
        assert_eq!(
            host.list("").unwrap(),
            vec!["x".to_string(), "y".to_string()]
        );
        assert_eq!(host.list("/").unwrap().len(), 2);
    }
}
