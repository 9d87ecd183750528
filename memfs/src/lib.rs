//! An in-memory hierarchical filesystem with POSIX-style metadata,
//! permission checks, hard links, a descriptor table and a compact binary
//! snapshot format.
//!
//! Every call takes an explicit [`Context`] carrying the caller's uid, gid
//! and working directory.

mod alloc;
mod dir;
pub mod encoding;
mod file;
pub mod flags;
mod fs;
pub mod io;
pub mod mode;
mod node;
pub mod path;
mod sb;
pub mod time;

pub use crate::alloc::{NodeId, NodeTable, ROOT};
pub use crate::dir::Directory;
pub use crate::encoding::{DataArg, Encoding};
pub use crate::file::RegularFile;
pub use crate::flags::{CopyFlags, Flag, OpenFlags};
pub use crate::fs::{Descriptor, Fd, FileSystem, FsError, Result};
pub use crate::mode::{Access, FileType, ModeArg};
pub use crate::node::{Inode, Metadata, ModeBits, Stats, WideStats};
pub use crate::path::{Context, PathArg};
pub use crate::sb::{StatFs, WideStatFs, BLOCK_SIZE, FS_MAGIC};
pub use crate::time::{TimeArg, Timestamp};
