use crate::node::Inode;

use log::debug;
use slab::Slab;

/// Stable handle of a node in the table. Ids of reclaimed nodes may be
/// handed out again.
pub type NodeId = usize;

/// The root directory is always the first node inserted and is never
/// reclaimed.
pub const ROOT: NodeId = 0;

#[derive(Debug)]
struct Slot {
    inode: Inode,
    /// Directory entries referring to this node.
    links: usize,
    /// Open descriptors referring to this node.
    opens: usize,
}

/// Arena owning every node of a tree. Directories store ids rather than
/// nodes, so a node may be linked from several directories at once; it stays
/// allocated while any directory entry or open descriptor refers to it.
#[derive(Debug)]
pub struct NodeTable {
    nodes: Slab<Slot>,
}

impl NodeTable {
    /// Creates a table holding only `root`.
    pub fn new(root: Inode) -> Self {
        let mut nodes = Slab::new();
        let id = nodes.insert(Slot {
            inode: root,
            links: 0,
            opens: 0,
        });
        debug_assert_eq!(id, ROOT);
        Self { nodes }
    }

    /// Adds an unreferenced node. It will be dropped by the next `reclaim`
    /// of its id unless linked or opened first.
    pub fn insert(&mut self, inode: Inode) -> NodeId {
        self.nodes.insert(Slot {
            inode,
            links: 0,
            opens: 0,
        })
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live node. Ids obtained from directory
    /// entries and descriptors always do.
    pub fn get(&self, id: NodeId) -> &Inode {
        &self.nodes[id].inode
    }

    /// # Panics
    ///
    /// Same as `get`.
    pub fn get_mut(&mut self, id: NodeId) -> &mut Inode {
        &mut self.nodes[id].inode
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Number of live nodes, the root included.
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of directory entries referring to `id`.
    pub fn links(&self, id: NodeId) -> usize {
        self.nodes.get(id).map_or(0, |slot| slot.links)
    }

    /// Number of open descriptors referring to `id`.
    pub fn opens(&self, id: NodeId) -> usize {
        self.nodes.get(id).map_or(0, |slot| slot.opens)
    }

    pub(crate) fn retain_link(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.links += 1;
        }
    }

    pub(crate) fn release_link(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.links = slot.links.saturating_sub(1);
        }
    }

    pub(crate) fn retain_open(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.opens += 1;
        }
    }

    pub(crate) fn release_open(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.opens = slot.opens.saturating_sub(1);
        }
    }

    /// Drops `id` if nothing refers to it any more. Dropping a directory
    /// releases its entries, which may cascade. Returns how many nodes were
    /// freed.
    pub fn reclaim(&mut self, id: NodeId) -> usize {
        let mut freed = 0;
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if id == ROOT {
                continue;
            }
            match self.nodes.get(id) {
                Some(slot) if slot.links == 0 && slot.opens == 0 => (),
                _ => continue,
            }

            let slot = self.nodes.remove(id);
            freed += 1;
            if let Inode::Directory(dir) = slot.inode {
                for (_, child) in dir.entries() {
                    self.release_link(child);
                    pending.push(child);
                }
            }
        }

        if freed > 0 {
            debug!("reclaimed {} node(s) starting at #{}", freed, id);
        }
        freed
    }
}
