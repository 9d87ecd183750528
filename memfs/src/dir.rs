use std::collections::BTreeMap;

use crate::alloc::{NodeId, NodeTable};
use crate::fs::{FsError, Result};
use crate::mode::FileType;
use crate::node::{Inode, Metadata};
use crate::path;

use log::debug;

/// A directory: metadata plus a mapping from entry names to node ids.
///
/// Entries are kept sorted by name so iteration, and therefore the snapshot
/// encoding, is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub meta: Metadata,
    entries: BTreeMap<String, NodeId>,
}

impl Directory {
    pub fn new(meta: Metadata) -> Self {
        Self {
            meta,
            entries: BTreeMap::new(),
        }
    }

    /// Number of direct entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<NodeId> {
        self.entries.get(name).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.entries.iter().map(|(name, &id)| (name.as_str(), id))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Inserts or overwrites `name`, returning the id it previously mapped to.
    pub fn link(&mut self, name: &str, id: NodeId) -> Result<Option<NodeId>> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FsError::InvalidArgument(format!("invalid entry name: {:?}", name)));
        }
        let previous = self.entries.insert(name.to_string(), id);
        self.meta.touch_modified();
        Ok(previous)
    }

    /// Removes `name`, returning the id it mapped to.
    pub fn unlink(&mut self, name: &str) -> Result<NodeId> {
        let id = self
            .entries
            .remove(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.meta.touch_modified();
        Ok(id)
    }

    /// Same metadata with fresh timestamps, same entry ids.
    pub(crate) fn copy(&self) -> Self {
        Self {
            meta: self.meta.copy(),
            entries: self.entries.clone(),
        }
    }
}

/// Formats the first `n` components of `parts` as an absolute path.
fn prefix(parts: &[&str], n: usize) -> String {
    format!("/{}", parts[..n].join("/"))
}

/// Tree navigation and structural mutation. Paths handed to these methods
/// are resolved relative to the given directory node.
impl NodeTable {
    /// Walks `path` from `from`. Fails `NotFound` on a missing component and
    /// `NotADirectory` when an intermediate component is not a directory.
    pub fn lookup(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let parts: Vec<&str> = path::components(path).collect();
        let mut current = from;
        for (i, part) in parts.iter().enumerate() {
            let dir = self
                .get(current)
                .as_dir()
                .ok_or_else(|| FsError::NotADirectory(prefix(&parts, i)))?;
            current = dir
                .entry(part)
                .ok_or_else(|| FsError::NotFound(prefix(&parts, i + 1)))?;
        }
        Ok(current)
    }

    /// Like `lookup`, but a missing component yields `false`.
    pub fn exists(&self, from: NodeId, path: &str) -> Result<bool> {
        match self.lookup(from, path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Looks up a node that must be a directory.
    pub fn lookup_dir(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let id = self.lookup(from, path)?;
        if self.get(id).is_dir() {
            Ok(id)
        } else {
            Err(FsError::NotADirectory(path.to_string()))
        }
    }

    /// Maps `name` in directory `dir` to `child`. A node previously mapped
    /// under that name loses the reference and is reclaimed if orphaned.
    pub fn link(&mut self, dir: NodeId, name: &str, child: NodeId) -> Result<()> {
        let previous = self
            .get_mut(dir)
            .as_dir_mut()
            .ok_or_else(|| FsError::NotADirectory(name.to_string()))?
            .link(name, child)?;
        self.retain_link(child);
        debug!("linked {:?} -> node #{} in node #{}", name, child, dir);

        if let Some(previous) = previous {
            self.release_link(previous);
            self.reclaim(previous);
        }
        Ok(())
    }

    /// Removes `name` from directory `dir` and returns the node it named.
    /// The node is not reclaimed here, so it can be linked elsewhere; call
    /// `reclaim` once it is known to be dropped.
    pub fn unlink(&mut self, dir: NodeId, name: &str) -> Result<NodeId> {
        let child = self
            .get_mut(dir)
            .as_dir_mut()
            .ok_or_else(|| FsError::NotADirectory(name.to_string()))?
            .unlink(name)?;
        self.release_link(child);
        debug!("unlinked {:?} (node #{}) from node #{}", name, child, dir);
        Ok(child)
    }

    /// Creates the directory at `path` under `from`.
    ///
    /// Without `recursive` exactly one directory is created and its parent
    /// must exist. With `recursive` every missing component is created;
    /// components created before a failure are left in place.
    pub fn mkdir(
        &mut self,
        from: NodeId,
        path: &str,
        recursive: bool,
        permissions: u32,
        uid: u32,
        gid: u32,
    ) -> Result<NodeId> {
        let parts: Vec<&str> = path::components(path).collect();
        let (last, ancestors) = parts
            .split_last()
            .ok_or_else(|| FsError::AlreadyExists(path.to_string()))?;

        let mut current = from;
        for (i, part) in ancestors.iter().enumerate() {
            let existing = self
                .get(current)
                .as_dir()
                .ok_or_else(|| FsError::NotADirectory(prefix(&parts, i)))?
                .entry(part);
            current = match existing {
                Some(id) if self.get(id).is_dir() => id,
                Some(_) => return Err(FsError::NotADirectory(prefix(&parts, i + 1))),
                None if recursive => self.create_dir(current, part, permissions, uid, gid)?,
                None => return Err(FsError::NotFound(prefix(&parts, i + 1))),
            };
        }

        let existing = self
            .get(current)
            .as_dir()
            .ok_or_else(|| FsError::NotADirectory(prefix(&parts, ancestors.len())))?
            .entry(last);
        match existing {
            Some(id) if recursive && self.get(id).is_dir() => Ok(id),
            Some(_) => Err(FsError::AlreadyExists(prefix(&parts, parts.len()))),
            None => self.create_dir(current, last, permissions, uid, gid),
        }
    }

    fn create_dir(
        &mut self,
        parent: NodeId,
        name: &str,
        permissions: u32,
        uid: u32,
        gid: u32,
    ) -> Result<NodeId> {
        let meta = Metadata::new(FileType::Directory, permissions, uid, gid);
        let id = self.insert(Inode::directory(Directory::new(meta)));
        if let Err(e) = self.link(parent, name, id) {
            self.reclaim(id);
            return Err(e);
        }
        debug!("created directory {:?} as node #{}", name, id);
        Ok(id)
    }

    /// Direct entries plus, for every child directory, its own recursive
    /// size. Shared subdirectories are counted once per reference.
    pub fn recursive_size(&self, dir: NodeId) -> usize {
        let mut total = 0;
        let mut pending = vec![dir];
        while let Some(id) = pending.pop() {
            if let Some(dir) = self.get(id).as_dir() {
                total += dir.len();
                pending.extend(dir.entries().map(|(_, child)| child));
            }
        }
        total
    }

    /// Shallow copy of a node. A copied directory shares its children with
    /// the original. The copy is returned unlinked.
    pub fn copy(&mut self, id: NodeId) -> NodeId {
        let copy = self.get(id).copy();
        let children: Vec<NodeId> = copy
            .as_dir()
            .map(|dir| dir.entries().map(|(_, child)| child).collect())
            .unwrap_or_default();
        let copy_id = self.insert(copy);
        for child in children {
            self.retain_link(child);
        }
        copy_id
    }

    /// Deep copy of a node: every descendant of a directory is copied too.
    /// The copy is returned unlinked.
    pub fn copy_recursive(&mut self, id: NodeId) -> Result<NodeId> {
        let root = self.copy_detached(id);
        let mut pending = vec![(id, root)];
        while let Some((source, target)) = pending.pop() {
            let children: Vec<(String, NodeId)> = match self.get(source).as_dir() {
                Some(dir) => dir
                    .entries()
                    .map(|(name, child)| (name.to_string(), child))
                    .collect(),
                None => continue,
            };
            for (name, child) in children {
                let child_copy = self.copy_detached(child);
                self.link(target, &name, child_copy)?;
                pending.push((child, child_copy));
            }
        }
        Ok(root)
    }

    /// Copies a node's own data; a directory copy starts out empty.
    fn copy_detached(&mut self, id: NodeId) -> NodeId {
        let copy = match self.get(id) {
            Inode::Directory(dir) => Inode::directory(Directory::new(dir.meta.copy())),
            other => other.copy(),
        };
        self.insert(copy)
    }

    /// Whether `ancestor` is `id` or lies on some path from `id` downwards.
    pub(crate) fn contains(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut pending = vec![ancestor];
        while let Some(current) = pending.pop() {
            if current == id {
                return true;
            }
            if let Some(dir) = self.get(current).as_dir() {
                pending.extend(dir.entries().map(|(_, child)| child));
            }
        }
        false
    }
}
