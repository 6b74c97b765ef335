//! Per-scope registries of filesystem paths removed on scope exit.
//!
//! The driver owns an eager [`Cleaner`] rooted at the run's workspace;
//! runner workers record intent into a [`DeferredCleaner`] whose operations
//! travel back with the shard and replay into the driver's cleaner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Eager cleaner: registered paths are removed bottom-up by [`Cleaner::clean`].
///
/// Unregistering a path inside a registered subtree keeps that path (and its
/// ancestors) while siblings are still removed.
#[derive(Debug)]
pub struct Cleaner {
    root: PathBuf,
    registered: BTreeSet<PathBuf>,
    unregistered: BTreeSet<PathBuf>,
}

impl Cleaner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registered: BTreeSet::new(),
            unregistered: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a path for removal. Paths outside the scope root are logged
    /// and dropped.
    pub fn register(&mut self, path: impl AsRef<Path>) {
        self.register_path(path.as_ref(), false);
    }

    /// Registers a path for removal even when it lies outside the scope root.
    pub fn register_ignore_outside_root(&mut self, path: impl AsRef<Path>) {
        self.register_path(path.as_ref(), true);
    }

    fn register_path(&mut self, path: &Path, ignore_outside_root: bool) {
        let path = self.absolute(path);
        if !path.starts_with(&self.root) && !ignore_outside_root {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            tracing::warn!("{name} outside {}", self.root.display());
            return;
        }
        self.unregistered.remove(&path);
        self.registered.insert(path);
    }

    /// Excludes a path from removal. Accepts absolute paths and paths
    /// relative to the scope root. Idempotent; a later `register` of the same
    /// path wins.
    pub fn unregister(&mut self, path: impl AsRef<Path>) {
        let path = self.absolute(path.as_ref());
        self.registered.remove(&path);
        self.unregistered.insert(path);
    }

    /// The currently registered paths.
    pub fn registered(&self) -> impl Iterator<Item = &Path> {
        self.registered.iter().map(PathBuf::as_path)
    }

    /// Replays a deferred cleaner's recorded operations into this cleaner.
    pub fn absorb(&mut self, deferred: &DeferredCleaner) {
        for op in deferred.ops() {
            match op {
                DeferredOp::Register {
                    path,
                    ignore_outside_root,
                } => self.register_path(path, *ignore_outside_root),
                DeferredOp::Unregister { path } => self.unregister(path),
            }
        }
    }

    /// Removes every registered path, bottom-up.
    ///
    /// One `Removing <path>` is logged per top-most removed entry; removal
    /// errors are logged and do not abort the traversal.
    pub fn clean(&mut self) {
        let top_level: Vec<PathBuf> = self
            .registered
            .iter()
            .filter(|path| {
                !self
                    .registered
                    .iter()
                    .any(|other| *path != other && path.starts_with(other))
            })
            .cloned()
            .collect();

        for path in top_level {
            self.remove_pruned(&path);
        }
        self.registered.clear();
    }

    fn remove_pruned(&self, path: &Path) {
        if self.unregistered.contains(path) {
            return;
        }
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => {
                tracing::debug!("{} does not exist", path.display());
                return;
            }
        };

        let has_survivor = metadata.is_dir()
            && self
                .unregistered
                .iter()
                .any(|kept| kept.starts_with(path) && kept != path);
        if has_survivor {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::error!("{}: {error}", path.display());
                    return;
                }
            };
            for entry in entries.filter_map(Result::ok) {
                self.remove_pruned(&entry.path());
            }
            return;
        }

        let removed = if metadata.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match removed {
            Ok(()) => tracing::info!("Removing {}", path.display()),
            Err(error) => tracing::error!("{}: {error}", path.display()),
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// One recorded operation of a deferred cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeferredOp {
    Register {
        path: PathBuf,
        ignore_outside_root: bool,
    },
    Unregister {
        path: PathBuf,
    },
}

/// Deferred cleaner used inside runner workers.
///
/// Records registrations and unregistrations; the driver replays them into
/// its eager cleaner when the shard is collected. Calling [`clean`] on a
/// deferred cleaner is a logged no-op.
///
/// [`clean`]: DeferredCleaner::clean
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredCleaner {
    root: PathBuf,
    ops: Vec<DeferredOp>,
}

impl DeferredCleaner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ops: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn register(&mut self, path: impl AsRef<Path>) {
        self.record_register(path.as_ref(), false);
    }

    pub fn register_ignore_outside_root(&mut self, path: impl AsRef<Path>) {
        self.record_register(path.as_ref(), true);
    }

    fn record_register(&mut self, path: &Path, ignore_outside_root: bool) {
        let path = self.absolute(path);
        if !path.starts_with(&self.root) && !ignore_outside_root {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            tracing::warn!("{name} outside {}", self.root.display());
            return;
        }
        self.ops.push(DeferredOp::Register {
            path,
            ignore_outside_root,
        });
    }

    pub fn unregister(&mut self, path: impl AsRef<Path>) {
        let path = self.absolute(path.as_ref());
        self.ops.push(DeferredOp::Unregister { path });
    }

    pub fn clean(&self) {
        tracing::warn!("Deferred cleaner does not support cleaning");
    }

    pub fn ops(&self) -> &[DeferredOp] {
        &self.ops
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
