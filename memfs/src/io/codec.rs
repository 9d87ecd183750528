use std::convert::TryFrom;

use crate::alloc::{NodeId, NodeTable};
use crate::dir::Directory;
use crate::file::RegularFile;
use crate::fs::{FsError, Result};
use crate::mode::{FileType, PERMISSION_MASK};
use crate::node::{Inode, Metadata};

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Snapshot format written by this version of the crate.
pub const FORMAT_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 10;

/// Fixed per-node header. Every node is encoded as this header followed by a
/// type specific payload:
///
/// * regular file: `size` raw content bytes.
/// * directory: `size` entries of (name length byte, name, nested node).
/// * other types: nothing.
///
/// Timestamps are not part of the format.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
struct Header {
    mode: U16<LittleEndian>,
    uid: U16<LittleEndian>,
    gid: U16<LittleEndian>,
    size: U32<LittleEndian>,
}

impl Header {
    fn for_node(node: &Inode) -> Result<Self> {
        let meta = node.metadata();
        Ok(Self {
            mode: U16::new(narrow(meta.mode(), "mode")?),
            uid: U16::new(narrow(meta.uid(), "uid")?),
            gid: U16::new(narrow(meta.gid(), "gid")?),
            size: U32::new(u32::try_from(node.size()).map_err(|_| {
                FsError::InvalidArgument(format!("size {} does not fit in 32 bits", node.size()))
            })?),
        })
    }

    fn metadata(&self) -> Result<Metadata> {
        let mode = u32::from(self.mode.get());
        let file_type = FileType::from_mode(mode)
            .ok_or_else(|| FsError::InvalidArgument(format!("invalid file mode: {:#o}", mode)))?;
        Ok(Metadata::new(
            file_type,
            mode & PERMISSION_MASK,
            u32::from(self.uid.get()),
            u32::from(self.gid.get()),
        ))
    }
}

fn narrow(value: u32, field: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| FsError::InvalidArgument(format!("{} {} does not fit in 16 bits", field, value)))
}

/// Entries of a directory still being written.
type Entries<'a> = Box<dyn Iterator<Item = (&'a str, NodeId)> + 'a>;

/// Appends the encoding of `id` and everything below it to `out`. The walk
/// keeps one frame per open directory on the heap, so tree depth is bounded
/// by memory rather than by the call stack.
pub fn export_node(table: &NodeTable, id: NodeId, out: &mut Vec<u8>) -> Result<()> {
    let mut stack: Vec<Entries<'_>> = Vec::new();
    stack.extend(write_node(table, id, out)?);
    while let Some(entries) = stack.last_mut() {
        match entries.next() {
            Some((name, child)) => {
                let len = u8::try_from(name.len()).map_err(|_| {
                    FsError::InvalidArgument(format!("entry name too long: {:?}", name))
                })?;
                out.push(len);
                out.extend_from_slice(name.as_bytes());
                stack.extend(write_node(table, child, out)?);
            }
            None => {
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Writes the header and inline payload of a single node, returning the
/// entries still to be written when it is a directory.
fn write_node<'a>(table: &'a NodeTable, id: NodeId, out: &mut Vec<u8>) -> Result<Option<Entries<'a>>> {
    let node = table.get(id);
    out.extend_from_slice(Header::for_node(node)?.as_bytes());
    match node {
        Inode::File(file) => {
            out.extend_from_slice(file.bytes());
            Ok(None)
        }
        Inode::Directory(dir) => {
            let entries: Entries<'a> = Box::new(dir.entries());
            Ok(Some(entries))
        }
        Inode::Special(_) => Ok(None),
    }
}

/// Decodes one node (and its descendants) from the start of `bytes` into
/// `table`. The new node is returned unlinked. Trailing bytes are an error.
pub fn import_node(table: &mut NodeTable, bytes: &[u8], version: u8) -> Result<NodeId> {
    check_version(version)?;
    let mut reader = Reader::new(bytes);
    let id = read_node(&mut reader, table)?;
    if let Err(e) = reader.finish() {
        table.reclaim(id);
        return Err(e);
    }
    Ok(id)
}

/// Decodes a directory whose entries are linked straight into `into`
/// instead of into a new node. Used to restore a root in place; the root's
/// own metadata is returned for the caller to apply.
pub fn import_root(table: &mut NodeTable, into: NodeId, bytes: &[u8], version: u8) -> Result<Metadata> {
    check_version(version)?;
    let mut reader = Reader::new(bytes);
    let header = reader.header()?;
    let meta = header.metadata()?;
    if meta.file_type() != FileType::Directory {
        return Err(FsError::InvalidArgument(
            "snapshot root is not a directory".to_string(),
        ));
    }
    read_entries(&mut reader, table, into, header.size.get())?;
    reader.finish()?;
    Ok(meta)
}

fn check_version(version: u8) -> Result<()> {
    match version {
        FORMAT_VERSION => Ok(()),
        other => Err(FsError::UnsupportedVersion(other)),
    }
}

fn read_node(reader: &mut Reader<'_>, table: &mut NodeTable) -> Result<NodeId> {
    let (id, entries) = read_single(reader, table)?;
    if let Some(count) = entries {
        if let Err(e) = read_entries(reader, table, id, count) {
            table.reclaim(id);
            return Err(e);
        }
    }
    Ok(id)
}

/// Decodes one node without descending into it. A directory comes back
/// empty together with the number of entries that follow it.
fn read_single(reader: &mut Reader<'_>, table: &mut NodeTable) -> Result<(NodeId, Option<u32>)> {
    let header = reader.header()?;
    let meta = header.metadata()?;
    let size = header.size.get();

    let (node, entries) = match meta.file_type() {
        FileType::Regular => {
            let data = reader.take(size as usize)?.to_vec();
            (Inode::file(RegularFile::new(meta, data)), None)
        }
        FileType::Directory => (Inode::directory(Directory::new(meta)), Some(size)),
        FileType::Symlink => return Err(FsError::Unsupported("symbolic links".to_string())),
        other => (
            Inode::special(other, meta.permissions(), meta.uid(), meta.gid())?,
            None,
        ),
    };
    Ok((table.insert(node), entries))
}

/// Reads `count` entries into `dir`, descending depth first. Each pending
/// directory is a (node, entries left) frame. Every node is linked as soon
/// as it is decoded, so reclaiming `dir` frees a partial import.
fn read_entries(reader: &mut Reader<'_>, table: &mut NodeTable, dir: NodeId, count: u32) -> Result<()> {
    let mut stack = vec![(dir, count)];
    while let Some((parent, left)) = stack.last_mut() {
        if *left == 0 {
            stack.pop();
            continue;
        }
        *left -= 1;
        let parent = *parent;

        let name = reader.name()?;
        let (child, entries) = read_single(reader, table)?;
        if let Err(e) = table.link(parent, name, child) {
            table.reclaim(child);
            return Err(e);
        }
        if let Some(count) = entries {
            stack.push((child, count));
        }
    }
    Ok(())
}

/// Cursor over snapshot bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                FsError::InvalidArgument(format!(
                    "snapshot truncated: wanted {} bytes at offset {}",
                    len, self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn header(&mut self) -> Result<Header> {
        let raw = self.take(HEADER_SIZE)?;
        Header::read_from(raw)
            .ok_or_else(|| FsError::InvalidArgument("malformed node header".to_string()))
    }

    /// A length-prefixed utf-8 entry name.
    fn name(&mut self) -> Result<&'a str> {
        let len = self.take(1)?[0] as usize;
        std::str::from_utf8(self.take(len)?)
            .map_err(|e| FsError::InvalidArgument(format!("entry name is not utf-8: {}", e)))
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(FsError::InvalidArgument(format!(
                "{} trailing bytes after snapshot",
                self.bytes.len() - self.pos
            )))
        }
    }
}
