use crate::alloc::{NodeId, NodeTable, ROOT};
use crate::dir::Directory;
use crate::encoding::{DataArg, Encoding};
use crate::file::RegularFile;
use crate::flags::{CopyFlags, Flag, OpenFlags};
use crate::io::codec;
use crate::mode::{Access, FileType, ModeArg, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::node::{Inode, Metadata, Stats, WideStats};
use crate::path::{self, Context, PathArg};
use crate::sb::{StatFs, WideStatFs};
use crate::time::TimeArg;

use log::{debug, info};
use thiserror::Error;

/// Index into the descriptor table.
pub type Fd = usize;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("permission denied: requested {requested:?}, granted {granted:?}")]
    PermissionDenied { requested: Access, granted: Access },
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(Fd),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u8),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("snapshot stream failed")]
    Io(#[from] std::io::Error),
}

/// An open file: the node it refers to, the path it was opened with, its
/// flags and a cursor for reads and writes without an explicit position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    node: NodeId,
    path: String,
    flags: OpenFlags,
    position: usize,
}

impl Descriptor {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// An in-memory tree of nodes rooted at `/`, plus a table of open
/// descriptors.
///
/// Calls are synchronous and never interleave. Compound operations such as
/// `rename` are built from several primitive steps and are not atomic.
#[derive(Debug)]
pub struct FileSystem {
    nodes: NodeTable,
    /// Slots are cleared on close and never reused.
    descriptors: Vec<Option<Descriptor>>,
}

impl Default for FileSystem {
    fn default() -> Self {
        let root = Metadata::new(FileType::Directory, DEFAULT_DIR_MODE, 0, 0);
        Self {
            nodes: NodeTable::new(Inode::directory(Directory::new(root))),
            descriptors: Vec::new(),
        }
    }
}

fn permissions_or(mode: Option<ModeArg>, default: u32) -> Result<u32> {
    match mode {
        Some(mode) => mode.permissions(),
        None => Ok(default),
    }
}

fn empty_snapshot() -> FsError {
    FsError::InvalidArgument("snapshot is empty".to_string())
}

impl FileSystem {
    /// Creates a filesystem holding only a root directory (mode 0o755, owned
    /// by uid 0 and gid 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes, the root included. Unlinked nodes still held
    /// open by a descriptor count.
    pub fn total_nodes(&self) -> usize {
        self.nodes.total_nodes()
    }

    /// Turns any path argument into an absolute normalized path. A
    /// descriptor resolves to the path it was opened with.
    pub fn resolve<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<String> {
        match path.into() {
            PathArg::Descriptor(fd) => Ok(self.descriptor(fd)?.path.clone()),
            other => Ok(path::resolve(&ctx.cwd, &other.text()?)),
        }
    }

    /// Finds the node a path argument names. A descriptor yields its node
    /// directly, even if that node has since been unlinked.
    fn locate(&self, ctx: &Context, path: PathArg) -> Result<(NodeId, String)> {
        match path {
            PathArg::Descriptor(fd) => {
                let desc = self.descriptor(fd)?;
                Ok((desc.node, desc.path.clone()))
            }
            other => {
                let resolved = path::resolve(&ctx.cwd, &other.text()?);
                let id = self.nodes.lookup(ROOT, &resolved)?;
                Ok((id, resolved))
            }
        }
    }

    /// Like `locate`, but a missing final component is created as an empty
    /// regular file owned by the caller.
    fn locate_or_create(
        &mut self,
        ctx: &Context,
        path: PathArg,
        permissions: u32,
    ) -> Result<(NodeId, String)> {
        let resolved = match path {
            PathArg::Descriptor(fd) => {
                let desc = self.descriptor(fd)?;
                return Ok((desc.node, desc.path.clone()));
            }
            other => path::resolve(&ctx.cwd, &other.text()?),
        };
        match self.nodes.lookup(ROOT, &resolved) {
            Ok(id) => Ok((id, resolved)),
            Err(FsError::NotFound(_)) => {
                let id = self.create_file(ctx, &resolved, permissions)?;
                Ok((id, resolved))
            }
            Err(e) => Err(e),
        }
    }

    fn parent_of(&self, resolved: &str) -> Result<(NodeId, String)> {
        let (parent, name) = path::split_parent(resolved)?;
        let parent = self.nodes.lookup_dir(ROOT, parent)?;
        Ok((parent, name.to_string()))
    }

    fn entry(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(parent).as_dir().and_then(|dir| dir.entry(name))
    }

    /// Links a freshly inserted node, dropping it again if that fails.
    fn attach(&mut self, parent: NodeId, name: &str, id: NodeId) -> Result<()> {
        if let Err(e) = self.nodes.link(parent, name, id) {
            self.nodes.reclaim(id);
            return Err(e);
        }
        Ok(())
    }

    /// Unlinks `name` and frees whatever is no longer referenced.
    fn detach(&mut self, parent: NodeId, name: &str, id: NodeId) -> Result<usize> {
        self.nodes.unlink(parent, name)?;
        let freed = self.nodes.reclaim(id);
        if freed == 0 {
            self.nodes.get_mut(id).metadata_mut().touch_changed();
        }
        Ok(freed)
    }

    fn create_file(&mut self, ctx: &Context, resolved: &str, permissions: u32) -> Result<NodeId> {
        let (parent, name) = self.parent_of(resolved)?;
        let meta = Metadata::new(FileType::Regular, permissions, ctx.uid, ctx.gid);
        let id = self.nodes.insert(Inode::file(RegularFile::new(meta, Vec::new())));
        self.attach(parent, &name, id)?;
        debug!("created file {} as node #{}", resolved, id);
        Ok(id)
    }

    fn file(&self, id: NodeId, path: &str) -> Result<&RegularFile> {
        match self.nodes.get(id) {
            Inode::File(file) => Ok(file),
            Inode::Directory(_) => Err(FsError::IsADirectory(path.to_string())),
            Inode::Special(_) => Err(FsError::InvalidArgument(format!(
                "not a regular file: {}",
                path
            ))),
        }
    }

    fn file_mut(&mut self, id: NodeId, path: &str) -> Result<&mut RegularFile> {
        match self.nodes.get_mut(id) {
            Inode::File(file) => Ok(file),
            Inode::Directory(_) => Err(FsError::IsADirectory(path.to_string())),
            Inode::Special(_) => Err(FsError::InvalidArgument(format!(
                "not a regular file: {}",
                path
            ))),
        }
    }

    /// Returns the node at `path`.
    pub fn get<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<&Inode> {
        let (id, _) = self.locate(ctx, path.into())?;
        Ok(self.nodes.get(id))
    }

    /// Whether `path` names a node. Fails only when an intermediate
    /// component is not a directory or the path cannot be parsed.
    pub fn exists<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<bool> {
        match self.locate(ctx, path.into()) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) | Err(FsError::BadFileDescriptor(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Checks the caller's permission triplet on `path` against `mode`.
    pub fn access<P: Into<PathArg>>(&self, ctx: &Context, path: P, mode: Access) -> Result<()> {
        self.get(ctx, path)?
            .metadata()
            .access(mode, ctx.uid, ctx.gid)
    }

    pub fn chmod<P: Into<PathArg>, M: Into<ModeArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        mode: M,
    ) -> Result<()> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        let meta = self.nodes.get_mut(id).metadata_mut();
        meta.chmod(&mode.into())?;
        debug!("chmod {} to {:o}", resolved, meta.permissions());
        Ok(())
    }

    pub fn chown<P: Into<PathArg>>(&mut self, ctx: &Context, path: P, uid: u32, gid: u32) -> Result<()> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        self.nodes.get_mut(id).metadata_mut().chown(uid, gid);
        debug!("chown {} to {}:{}", resolved, uid, gid);
        Ok(())
    }

    pub fn utimes<P, A, M>(&mut self, ctx: &Context, path: P, atime: A, mtime: M) -> Result<()>
    where
        P: Into<PathArg>,
        A: Into<TimeArg>,
        M: Into<TimeArg>,
    {
        let (id, _) = self.locate(ctx, path.into())?;
        self.nodes
            .get_mut(id)
            .metadata_mut()
            .utimes(&atime.into(), &mtime.into())
    }

    pub fn stat<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Stats> {
        let (id, _) = self.locate(ctx, path.into())?;
        Ok(self.nodes.get(id).stat(self.nodes.links(id) as u64))
    }

    pub fn stat_wide<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<WideStats> {
        let (id, _) = self.locate(ctx, path.into())?;
        Ok(self.nodes.get(id).stat_wide(self.nodes.links(id) as u64))
    }

    /// Same as `stat`; there are no symbolic links to stop at.
    pub fn lstat<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Stats> {
        self.stat(ctx, path)
    }

    pub fn lstat_wide<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<WideStats> {
        self.stat_wide(ctx, path)
    }

    /// Like `stat`, with a missing path reported as `None`.
    pub fn try_stat<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Option<Stats>> {
        match self.stat(ctx, path) {
            Ok(stats) => Ok(Some(stats)),
            Err(FsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates a directory owned by the caller. See `NodeTable::mkdir` for
    /// the recursive rules.
    pub fn mkdir<P: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        recursive: bool,
        mode: Option<ModeArg>,
    ) -> Result<()> {
        let resolved = self.resolve(ctx, path)?;
        let permissions = permissions_or(mode, DEFAULT_DIR_MODE)?;
        let id = self
            .nodes
            .mkdir(ROOT, &resolved, recursive, permissions, ctx.uid, ctx.gid)?;
        debug!("mkdir {} as node #{}", resolved, id);
        Ok(())
    }

    /// Creates a device, fifo, socket or empty regular file node.
    pub fn mknod<P: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        file_type: FileType,
        mode: Option<ModeArg>,
    ) -> Result<()> {
        let resolved = self.resolve(ctx, path)?;
        let permissions = permissions_or(mode, DEFAULT_FILE_MODE)?;
        let (parent, name) = self.parent_of(&resolved)?;
        if self.entry(parent, &name).is_some() {
            return Err(FsError::AlreadyExists(resolved));
        }

        let node = match file_type {
            FileType::Regular => {
                let meta = Metadata::new(file_type, permissions, ctx.uid, ctx.gid);
                Inode::file(RegularFile::new(meta, Vec::new()))
            }
            other => Inode::special(other, permissions, ctx.uid, ctx.gid)?,
        };
        let id = self.nodes.insert(node);
        self.attach(parent, &name, id)?;
        debug!("mknod {} ({:?}) as node #{}", resolved, file_type, id);
        Ok(())
    }

    /// Entry names of a directory in sorted order.
    pub fn readdir<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Vec<String>> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        let dir = self
            .nodes
            .get(id)
            .as_dir()
            .ok_or(FsError::NotADirectory(resolved))?;
        Ok(dir.names().map(str::to_string).collect())
    }

    pub fn read_file<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Vec<u8>> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        Ok(self.file(id, &resolved)?.bytes().to_vec())
    }

    /// Decodes `length` bytes from `start` (clamped to the content) as text.
    pub fn read_from<P: Into<PathArg>>(
        &self,
        ctx: &Context,
        path: P,
        encoding: Encoding,
        start: usize,
        length: Option<usize>,
    ) -> Result<String> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        Ok(self.file(id, &resolved)?.read_string(encoding, start, length))
    }

    pub fn read_to_string<P: Into<PathArg>>(
        &self,
        ctx: &Context,
        path: P,
        encoding: Encoding,
    ) -> Result<String> {
        self.read_from(ctx, path, encoding, 0, None)
    }

    /// Writes into the file at `path`, creating it if missing. Position 0
    /// without a length replaces the content; anything else splices.
    pub fn write_to<P: Into<PathArg>, D: Into<DataArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        data: D,
        position: usize,
        length: Option<usize>,
    ) -> Result<usize> {
        let data = data.into();
        // Undecodable data must not leave a freshly created file behind.
        data.to_bytes()?;
        let (id, resolved) = self.locate_or_create(ctx, path.into(), DEFAULT_FILE_MODE)?;
        let written = self.file_mut(id, &resolved)?.write(&data, position, length)?;
        debug!("wrote {} bytes to {} at {}", written, resolved, position);
        Ok(written)
    }

    /// Replaces the content of `path`, creating the file if missing.
    pub fn write_file<P: Into<PathArg>, D: Into<DataArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        data: D,
    ) -> Result<()> {
        self.write_to(ctx, path, data, 0, None).map(|_| ())
    }

    pub fn append_file<P: Into<PathArg>, D: Into<DataArg>>(
        &mut self,
        ctx: &Context,
        path: P,
        data: D,
    ) -> Result<()> {
        let data = data.into();
        data.to_bytes()?;
        let (id, resolved) = self.locate_or_create(ctx, path.into(), DEFAULT_FILE_MODE)?;
        let appended = self.file_mut(id, &resolved)?.append(&data)?;
        debug!("appended {} bytes to {}", appended, resolved);
        Ok(())
    }

    /// Shortens a regular file to `length` bytes. Never extends it.
    pub fn truncate<P: Into<PathArg>>(&mut self, ctx: &Context, path: P, length: usize) -> Result<()> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        self.file_mut(id, &resolved)?.truncate(length);
        debug!("truncated {} to {} bytes", resolved, length);
        Ok(())
    }

    /// Adds a second name for an existing non-directory node.
    pub fn link<P: Into<PathArg>, Q: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        existing: P,
        new_path: Q,
    ) -> Result<()> {
        let (id, source) = self.locate(ctx, existing.into())?;
        if self.nodes.get(id).is_dir() {
            return Err(FsError::Unsupported(format!(
                "hard link to directory {}",
                source
            )));
        }
        let target = self.resolve(ctx, new_path)?;
        let (parent, name) = self.parent_of(&target)?;
        if self.entry(parent, &name).is_some() {
            return Err(FsError::AlreadyExists(target));
        }
        self.nodes.link(parent, &name, id)?;
        self.nodes.get_mut(id).metadata_mut().touch_changed();
        debug!("linked {} to {}", target, source);
        Ok(())
    }

    /// Removes a non-directory name. The node lives on while other names or
    /// open descriptors refer to it.
    pub fn unlink<P: Into<PathArg>>(&mut self, ctx: &Context, path: P) -> Result<()> {
        let resolved = self.resolve(ctx, path)?;
        let (parent, name) = self.parent_of(&resolved)?;
        let id = self
            .entry(parent, &name)
            .ok_or_else(|| FsError::NotFound(resolved.clone()))?;
        if self.nodes.get(id).is_dir() {
            return Err(FsError::IsADirectory(resolved));
        }
        self.detach(parent, &name, id)?;
        debug!("unlinked {}", resolved);
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir<P: Into<PathArg>>(&mut self, ctx: &Context, path: P) -> Result<()> {
        let resolved = self.resolve(ctx, path)?;
        let (parent, name) = self.parent_of(&resolved)?;
        let id = self
            .entry(parent, &name)
            .ok_or_else(|| FsError::NotFound(resolved.clone()))?;
        match self.nodes.get(id).as_dir() {
            None => return Err(FsError::NotADirectory(resolved)),
            Some(dir) if !dir.is_empty() => return Err(FsError::DirectoryNotEmpty(resolved)),
            Some(_) => (),
        }
        self.detach(parent, &name, id)?;
        debug!("removed directory {}", resolved);
        Ok(())
    }

    /// Removes any node. A non-empty directory needs `recursive`.
    pub fn rm<P: Into<PathArg>>(&mut self, ctx: &Context, path: P, recursive: bool) -> Result<()> {
        let resolved = self.resolve(ctx, path)?;
        let (parent, name) = self.parent_of(&resolved)?;
        let id = self
            .entry(parent, &name)
            .ok_or_else(|| FsError::NotFound(resolved.clone()))?;
        if let Some(dir) = self.nodes.get(id).as_dir() {
            if !dir.is_empty() && !recursive {
                return Err(FsError::DirectoryNotEmpty(resolved));
            }
        }
        let freed = self.detach(parent, &name, id)?;
        debug!("removed {} ({} nodes freed)", resolved, freed);
        Ok(())
    }

    /// Moves a node to a new name by unlinking it and linking it again. The
    /// destination's parent is checked before anything changes, but the two
    /// steps are not atomic.
    pub fn rename<P: Into<PathArg>, Q: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        old_path: P,
        new_path: Q,
    ) -> Result<()> {
        let from = self.resolve(ctx, old_path)?;
        let to = self.resolve(ctx, new_path)?;
        let (to_parent, to_name) = self.parent_of(&to)?;
        let (from_parent, from_name) = self.parent_of(&from)?;
        let id = self
            .entry(from_parent, &from_name)
            .ok_or_else(|| FsError::NotFound(from.clone()))?;
        if from == to {
            return Ok(());
        }

        let moving_dir = self.nodes.get(id).is_dir();
        if moving_dir && self.nodes.contains(id, to_parent) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {} into its own subtree {}",
                from, to
            )));
        }
        if let Some(existing) = self.entry(to_parent, &to_name) {
            match (moving_dir, self.nodes.get(existing).as_dir()) {
                (false, Some(_)) => return Err(FsError::IsADirectory(to)),
                (true, None) => return Err(FsError::NotADirectory(to)),
                (true, Some(dir)) if !dir.is_empty() => {
                    return Err(FsError::DirectoryNotEmpty(to))
                }
                _ => (),
            }
        }

        self.nodes.unlink(from_parent, &from_name)?;
        if let Err(e) = self.nodes.link(to_parent, &to_name, id) {
            self.nodes.reclaim(id);
            return Err(e);
        }
        self.nodes.get_mut(id).metadata_mut().touch_changed();
        debug!("renamed {} to {}", from, to);
        Ok(())
    }

    /// Copies a node to `dest`. A shallow copy of a directory shares its
    /// children with the source; a recursive one duplicates them.
    pub fn cp<P: Into<PathArg>, Q: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        src: P,
        dest: Q,
        recursive: bool,
    ) -> Result<()> {
        let (id, source) = self.locate(ctx, src.into())?;
        let target = self.resolve(ctx, dest)?;
        let (parent, name) = self.parent_of(&target)?;
        if let Some(existing) = self.entry(parent, &name) {
            if self.nodes.get(existing).is_dir() {
                return Err(FsError::AlreadyExists(target));
            }
        }

        let copy = if recursive {
            self.nodes.copy_recursive(id)?
        } else {
            self.nodes.copy(id)
        };
        self.attach(parent, &name, copy)?;
        debug!("copied {} to {} (recursive: {})", source, target, recursive);
        Ok(())
    }

    /// Copies the content of a regular file, creating `dest` if missing.
    pub fn copy_file<P: Into<PathArg>, Q: Into<PathArg>>(
        &mut self,
        ctx: &Context,
        src: P,
        dest: Q,
        flags: CopyFlags,
    ) -> Result<()> {
        if flags.contains(CopyFlags::FICLONE_FORCE) {
            return Err(FsError::Unsupported("copy-on-write clones".to_string()));
        }
        let (id, source) = self.locate(ctx, src.into())?;
        let data = self.file(id, &source)?.bytes().to_vec();
        let permissions = self.nodes.get(id).metadata().permissions();

        let target = self.resolve(ctx, dest)?;
        let dest_id = match self.nodes.lookup(ROOT, &target) {
            Ok(_) if flags.contains(CopyFlags::EXCL) => {
                return Err(FsError::AlreadyExists(target))
            }
            Ok(existing) => existing,
            Err(FsError::NotFound(_)) => self.create_file(ctx, &target, permissions)?,
            Err(e) => return Err(e),
        };
        self.file_mut(dest_id, &target)?.write_bytes(&data, 0, None)?;
        debug!("copied {} bytes from {} to {}", data.len(), source, target);
        Ok(())
    }

    /// The absolute normalized form of a path that exists.
    pub fn realpath<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<String> {
        let (_, resolved) = self.locate(ctx, path.into())?;
        Ok(resolved)
    }

    pub fn symlink<P: Into<PathArg>, Q: Into<PathArg>>(
        &mut self,
        _ctx: &Context,
        _target: P,
        _path: Q,
    ) -> Result<()> {
        Err(FsError::Unsupported("symbolic links".to_string()))
    }

    pub fn readlink<P: Into<PathArg>>(&self, _ctx: &Context, _path: P) -> Result<String> {
        Err(FsError::Unsupported("symbolic links".to_string()))
    }

    /// Opens `path` and returns a new descriptor. Descriptor numbers are
    /// never reused, even after `close`.
    ///
    /// A missing path is created as a regular file when `flags` include
    /// CREATE. An existing node is checked against the caller's permission
    /// triplet for the access the flags imply.
    pub fn open<P: Into<PathArg>, F: Into<Flag>>(
        &mut self,
        ctx: &Context,
        path: P,
        flags: F,
        mode: Option<ModeArg>,
    ) -> Result<Fd> {
        let flags = flags.into().parse()?;
        let resolved = self.resolve(ctx, path)?;
        let id = match self.nodes.lookup(ROOT, &resolved) {
            Ok(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                return Err(FsError::AlreadyExists(resolved))
            }
            Ok(id) => {
                self.prepare_existing(ctx, id, &resolved, flags)?;
                id
            }
            Err(FsError::NotFound(_)) if flags.contains(OpenFlags::CREATE) => {
                let permissions = permissions_or(mode, DEFAULT_FILE_MODE)?;
                self.create_file(ctx, &resolved, permissions)?
            }
            Err(e) => return Err(e),
        };

        self.nodes.retain_open(id);
        let fd = self.descriptors.len();
        debug!("opened {} as fd {} with {:?}", resolved, fd, flags);
        self.descriptors.push(Some(Descriptor {
            node: id,
            path: resolved,
            flags,
            position: 0,
        }));
        Ok(fd)
    }

    fn prepare_existing(&mut self, ctx: &Context, id: NodeId, path: &str, flags: OpenFlags) -> Result<()> {
        let node = self.nodes.get(id);
        if flags.contains(OpenFlags::DIRECTORY) && !node.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if node.is_dir() && flags.writable() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        node.metadata()
            .access(flags.required_access(), ctx.uid, ctx.gid)?;

        if flags.contains(OpenFlags::TRUNCATE) {
            if let Some(file) = self.nodes.get_mut(id).as_file_mut() {
                file.truncate(0);
            }
        }
        Ok(())
    }

    /// Clears a descriptor slot. An unlinked node is freed once its last
    /// descriptor closes.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let desc = self
            .descriptors
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FsError::BadFileDescriptor(fd))?;
        self.nodes.release_open(desc.node);
        self.nodes.reclaim(desc.node);
        debug!("closed fd {} ({})", fd, desc.path);
        Ok(())
    }

    pub fn descriptor(&self, fd: Fd) -> Result<&Descriptor> {
        self.descriptors
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(FsError::BadFileDescriptor(fd))
    }

    fn descriptor_mut(&mut self, fd: Fd) -> Result<&mut Descriptor> {
        self.descriptors
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadFileDescriptor(fd))
    }

    pub fn fstat(&self, fd: Fd) -> Result<Stats> {
        let id = self.descriptor(fd)?.node;
        Ok(self.nodes.get(id).stat(self.nodes.links(id) as u64))
    }

    pub fn fstat_wide(&self, fd: Fd) -> Result<WideStats> {
        let id = self.descriptor(fd)?.node;
        Ok(self.nodes.get(id).stat_wide(self.nodes.links(id) as u64))
    }

    pub fn fchmod<M: Into<ModeArg>>(&mut self, fd: Fd, mode: M) -> Result<()> {
        let id = self.descriptor(fd)?.node;
        self.nodes.get_mut(id).metadata_mut().chmod(&mode.into())
    }

    pub fn fchown(&mut self, fd: Fd, uid: u32, gid: u32) -> Result<()> {
        let id = self.descriptor(fd)?.node;
        self.nodes.get_mut(id).metadata_mut().chown(uid, gid);
        Ok(())
    }

    pub fn futimes<A: Into<TimeArg>, M: Into<TimeArg>>(&mut self, fd: Fd, atime: A, mtime: M) -> Result<()> {
        let id = self.descriptor(fd)?.node;
        self.nodes
            .get_mut(id)
            .metadata_mut()
            .utimes(&atime.into(), &mtime.into())
    }

    pub fn ftruncate(&mut self, fd: Fd, length: usize) -> Result<()> {
        let desc = self.descriptor(fd)?;
        if !desc.flags.writable() {
            return Err(FsError::BadFileDescriptor(fd));
        }
        let (id, path) = (desc.node, desc.path.clone());
        self.file_mut(id, &path)?.truncate(length);
        Ok(())
    }

    /// Nothing is buffered, so syncing only validates the descriptor.
    pub fn fsync(&self, fd: Fd) -> Result<()> {
        self.descriptor(fd).map(|_| ())
    }

    pub fn fdatasync(&self, fd: Fd) -> Result<()> {
        self.fsync(fd)
    }

    /// Reads up to `length` bytes into `buf[offset..]`, from `position` if
    /// given or else from the descriptor's cursor, which then advances.
    /// Returns the number of bytes read; zero at end of file.
    pub fn read(
        &mut self,
        fd: Fd,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<usize>,
    ) -> Result<usize> {
        let desc = self.descriptor(fd)?;
        if !desc.flags.readable() {
            return Err(FsError::BadFileDescriptor(fd));
        }
        if offset.checked_add(length).map_or(true, |end| end > buf.len()) {
            return Err(FsError::InvalidArgument(format!(
                "{} bytes at offset {} do not fit a {} byte buffer",
                length,
                offset,
                buf.len()
            )));
        }
        let start = position.unwrap_or(desc.position);
        let touch = !desc.flags.contains(OpenFlags::NOATIME);
        let (id, path) = (desc.node, desc.path.clone());

        let file = self.file_mut(id, &path)?;
        let chunk = file.read(start, Some(length));
        let count = chunk.len();
        buf[offset..offset + count].copy_from_slice(chunk);
        if touch {
            file.touch_accessed();
        }

        if position.is_none() {
            self.descriptor_mut(fd)?.position = start + count;
        }
        Ok(count)
    }

    /// Writes `data` at `position`, or at the cursor when no position is
    /// given. Append-mode descriptors always write at the end of the file.
    pub fn write<D: Into<DataArg>>(&mut self, fd: Fd, data: D, position: Option<usize>) -> Result<usize> {
        let data = data.into();
        let bytes = data.to_bytes()?;
        let desc = self.descriptor(fd)?;
        if !desc.flags.writable() {
            return Err(FsError::BadFileDescriptor(fd));
        }
        let (id, path, flags, cursor) = (desc.node, desc.path.clone(), desc.flags, desc.position);

        let file = self.file_mut(id, &path)?;
        let start = if flags.contains(OpenFlags::APPEND) {
            file.len()
        } else {
            position.unwrap_or(cursor)
        };
        let written = file.write_bytes(&bytes, start, Some(bytes.len()))?;

        if position.is_none() {
            // The write succeeded, so its end is addressable.
            self.descriptor_mut(fd)?.position = start + written;
        }
        debug!("wrote {} bytes to fd {} at {}", written, fd, start);
        Ok(written)
    }

    /// Statistics for the filesystem holding `path`. Capacity is unbounded;
    /// `files` counts every entry below the root.
    pub fn statfs<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<StatFs> {
        self.locate(ctx, path.into())?;
        Ok(StatFs::new(self.nodes.recursive_size(ROOT)))
    }

    pub fn statfs_wide<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<WideStatFs> {
        self.locate(ctx, path.into())?;
        Ok(WideStatFs::new(self.nodes.recursive_size(ROOT)))
    }

    /// Serializes the whole tree: one version byte, then the root directory.
    pub fn export(&self) -> Result<Vec<u8>> {
        let mut out = vec![codec::FORMAT_VERSION];
        codec::export_node(&self.nodes, ROOT, &mut out)?;
        info!(
            "exported {} nodes into a {} byte snapshot",
            self.nodes.total_nodes(),
            out.len()
        );
        Ok(out)
    }

    /// Rebuilds a filesystem from `export` output. Timestamps are not part
    /// of the snapshot, so every node gets fresh ones.
    pub fn import(bytes: &[u8]) -> Result<Self> {
        let (&version, rest) = bytes.split_first().ok_or_else(empty_snapshot)?;
        let mut fs = Self::new();
        let root = codec::import_root(&mut fs.nodes, ROOT, rest, version)?;
        *fs.nodes.get_mut(ROOT).metadata_mut() = root;
        info!(
            "imported {} nodes from a {} byte snapshot",
            fs.nodes.total_nodes(),
            bytes.len()
        );
        Ok(fs)
    }

    /// Serializes the subtree at `path` in the same framing as `export`.
    pub fn export_node<P: Into<PathArg>>(&self, ctx: &Context, path: P) -> Result<Vec<u8>> {
        let (id, resolved) = self.locate(ctx, path.into())?;
        let mut out = vec![codec::FORMAT_VERSION];
        codec::export_node(&self.nodes, id, &mut out)?;
        debug!("exported {} into {} bytes", resolved, out.len());
        Ok(out)
    }

    /// Decodes an `export_node` snapshot and links it at `path`, which must
    /// not exist yet.
    pub fn import_node<P: Into<PathArg>>(&mut self, ctx: &Context, path: P, bytes: &[u8]) -> Result<()> {
        let (&version, rest) = bytes.split_first().ok_or_else(empty_snapshot)?;
        let target = self.resolve(ctx, path)?;
        let (parent, name) = self.parent_of(&target)?;
        if self.entry(parent, &name).is_some() {
            return Err(FsError::AlreadyExists(target));
        }
        let id = codec::import_node(&mut self.nodes, rest, version)?;
        self.attach(parent, &name, id)?;
        debug!("imported node #{} at {}", id, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::F_OK;
    use crate::node::ModeBits;

    fn setup() -> (FileSystem, Context) {
        (FileSystem::new(), Context::root())
    }

    #[test]
    fn root_dir_is_owned_by_root() {
        let (fs, ctx) = setup();
        let stats = fs.stat(&ctx, "/").unwrap();
        assert!(stats.is_directory());
        assert_eq!(stats.mode & 0o777, 0o755);
        assert_eq!((stats.uid, stats.gid), (0, 0));
        assert_eq!(fs.readdir(&ctx, "/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn file_not_found_without_create_returns_error() {
        let (mut fs, ctx) = setup();
        match fs.open(&ctx, "/foo", "r", None) {
            Err(FsError::NotFound(path)) => assert_eq!(path, "/foo"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn file_not_found_with_create_returns_handle() {
        let (mut fs, ctx) = setup();
        assert_eq!(fs.open(&ctx, "/foo", "w", None).unwrap(), 0);
        assert_eq!(fs.open(&ctx, "/bar", "a", None).unwrap(), 1);
        assert_eq!(fs.stat(&ctx, "/foo").unwrap().size, 0);
    }

    #[test]
    fn exclusive_open_of_existing_path_fails() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "x").unwrap();
        assert!(matches!(
            fs.open(&ctx, "/f", "wx", None),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_checks_permissions_of_existing_nodes() {
        let (mut fs, root) = setup();
        fs.write_file(&root, "/secret", "s").unwrap();
        fs.chmod(&root, "/secret", "rw-------").unwrap();

        let user = Context::new(1000, 1000, "/");
        assert!(matches!(
            fs.open(&user, "/secret", "r", None),
            Err(FsError::PermissionDenied { .. })
        ));
        fs.chown(&root, "/secret", 1000, 1000).unwrap();
        assert!(fs.open(&user, "/secret", "r", None).is_ok());
    }

    #[test]
    fn truncating_open_empties_file() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "content").unwrap();
        fs.open(&ctx, "/f", "w", None).unwrap();
        assert_eq!(fs.read_file(&ctx, "/f").unwrap(), b"");
    }

    #[test]
    fn created_files_use_mode_and_caller_identity() {
        let (mut fs, _) = setup();
        let user = Context::new(7, 8, "/");
        fs.open(&user, "/f", "w", Some(ModeArg::from(0o600u32))).unwrap();
        let stats = fs.stat(&user, "/f").unwrap();
        assert_eq!(stats.symbolic_mode(), "rw-------");
        assert_eq!((stats.uid, stats.gid), (7, 8));
    }

    #[test]
    fn descriptors_are_never_reused() {
        let (mut fs, ctx) = setup();
        let a = fs.open(&ctx, "/a", "w", None).unwrap();
        fs.close(a).unwrap();
        let b = fs.open(&ctx, "/a", "r", None).unwrap();
        assert_ne!(a, b);
        assert!(matches!(fs.close(a), Err(FsError::BadFileDescriptor(_))));
        assert!(matches!(fs.descriptor(99), Err(FsError::BadFileDescriptor(99))));
    }

    #[test]
    fn cursor_reads_advance() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "abcdef").unwrap();
        let fd = fs.open(&ctx, "/f", "r", None).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(fs.read(fd, &mut buf, 0, 4, None).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fs.read(fd, &mut buf, 1, 3, None).unwrap(), 2);
        assert_eq!(&buf[1..3], b"ef");
        assert_eq!(fs.read(fd, &mut buf, 0, 4, None).unwrap(), 0);
        assert_eq!(fs.descriptor(fd).unwrap().position(), 6);

        assert_eq!(fs.read(fd, &mut buf, 0, 2, Some(1)).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(fs.descriptor(fd).unwrap().position(), 6);
    }

    #[test]
    fn read_rejects_range_outside_buffer() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "abc").unwrap();
        let fd = fs.open(&ctx, "/f", "r", None).unwrap();
        let mut buf = [0u8; 2];
        assert!(matches!(
            fs.read(fd, &mut buf, 1, 2, None),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn write_only_descriptor_cannot_read() {
        let (mut fs, ctx) = setup();
        let fd = fs.open(&ctx, "/f", "w", None).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            fs.read(fd, &mut buf, 0, 1, None),
            Err(FsError::BadFileDescriptor(_))
        ));
    }

    #[test]
    fn cursor_writes_splice() {
        let (mut fs, ctx) = setup();
        let fd = fs.open(&ctx, "/f", "w+", None).unwrap();
        fs.write(fd, "hello", None).unwrap();
        fs.write(fd, " world", None).unwrap();
        fs.write(fd, "J", Some(0)).unwrap();
        assert_eq!(fs.read_file(&ctx, "/f").unwrap(), b"Jello world");
        assert_eq!(fs.descriptor(fd).unwrap().position(), 11);
    }

    #[test]
    fn append_descriptor_writes_at_end() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/log", "one\n").unwrap();
        let fd = fs.open(&ctx, "/log", "a", None).unwrap();
        fs.write(fd, "two\n", Some(0)).unwrap();
        assert_eq!(
            fs.read_to_string(&ctx, "/log", Encoding::Utf8).unwrap(),
            "one\ntwo\n"
        );
    }

    #[test]
    fn writes_past_addressable_end_fail() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "keep").unwrap();
        assert!(matches!(
            fs.write_to(&ctx, "/f", "ab", usize::MAX - 1, None),
            Err(FsError::InvalidArgument(_))
        ));

        let fd = fs.open(&ctx, "/f", "r+", None).unwrap();
        match fs.write(fd, "ab", Some(usize::MAX)) {
            Err(FsError::InvalidArgument(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fs.descriptor(fd).unwrap().position(), 0);
        assert_eq!(fs.read_file(&ctx, "/f").unwrap(), b"keep");
    }

    #[test]
    fn append_file_decodes_before_creating() {
        let (mut fs, ctx) = setup();
        fs.append_file(&ctx, "/hex", DataArg::text("6869", Encoding::Hex))
            .unwrap();
        fs.append_file(&ctx, "/hex", "!").unwrap();
        assert_eq!(fs.read_file(&ctx, "/hex").unwrap(), b"hi!");

        let nodes = fs.total_nodes();
        assert!(fs
            .append_file(&ctx, "/bad", DataArg::text("zz", Encoding::Hex))
            .is_err());
        assert!(!fs.exists(&ctx, "/bad").unwrap());
        assert_eq!(fs.total_nodes(), nodes);
    }

    #[test]
    fn relative_cwd_is_taken_from_the_root() {
        let (mut fs, root) = setup();
        fs.mkdir(&root, "/home", false, None).unwrap();
        let ctx = Context::new(0, 0, "home");
        fs.write_file(&ctx, "notes", "x").unwrap();
        assert_eq!(fs.resolve(&ctx, "notes").unwrap(), "/home/notes");
        assert!(fs.exists(&root, "/home/notes").unwrap());
    }

    #[test]
    fn descriptor_keeps_unlinked_node_alive() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "still here").unwrap();
        let fd = fs.open(&ctx, "/f", "r", None).unwrap();
        let before = fs.total_nodes();

        fs.unlink(&ctx, "/f").unwrap();
        assert!(!fs.exists(&ctx, "/f").unwrap());
        assert_eq!(fs.total_nodes(), before);
        assert_eq!(
            fs.read_file(&ctx, PathArg::Descriptor(fd)).unwrap(),
            b"still here"
        );
        assert_eq!(fs.fstat(fd).unwrap().nlink, 0);

        fs.close(fd).unwrap();
        assert_eq!(fs.total_nodes(), before - 1);
    }

    #[test]
    fn descriptor_operations_reach_the_node() {
        let (mut fs, ctx) = setup();
        let fd = fs.open(&ctx, "/f", "w", None).unwrap();
        fs.write(fd, "0123456789", None).unwrap();
        fs.ftruncate(fd, 4).unwrap();
        fs.fchmod(fd, 0o640u32).unwrap();
        fs.fchown(fd, 3, 4).unwrap();
        fs.futimes(fd, 1_000i64, 2_000i64).unwrap();
        fs.fsync(fd).unwrap();
        fs.fdatasync(fd).unwrap();

        let wide = fs.fstat_wide(fd).unwrap();
        assert_eq!(wide.size, 4);
        assert_eq!(wide.mode & 0o777, 0o640);
        assert_eq!((wide.uid, wide.gid), (3, 4));
        assert_eq!((wide.atime_ns, wide.mtime_ns), (1_000, 2_000));
    }

    #[test]
    fn access_uses_caller_identity() {
        let (mut fs, root) = setup();
        fs.write_file(&root, "/f", "").unwrap();
        fs.chmod(&root, "/f", 0o604u32).unwrap();
        let other = Context::new(9, 9, "/");
        assert!(fs.access(&other, "/f", Access::READ).is_ok());
        assert!(fs.access(&other, "/f", Access::WRITE).is_err());
        assert!(fs.access(&other, "/f", F_OK).is_ok());
        assert!(matches!(
            fs.access(&other, "/missing", F_OK),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let (mut fs, root) = setup();
        fs.mkdir(&root, "/home/user", true, None).unwrap();
        let ctx = Context::new(0, 0, "/home/user");
        fs.write_file(&ctx, "notes.txt", "hi").unwrap();
        assert!(fs.exists(&root, "/home/user/notes.txt").unwrap());
        assert_eq!(fs.realpath(&ctx, "../user/./notes.txt").unwrap(), "/home/user/notes.txt");
    }

    #[test]
    fn unlink_rejects_directories() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/d", false, None).unwrap();
        assert!(matches!(fs.unlink(&ctx, "/d"), Err(FsError::IsADirectory(_))));
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/d", false, None).unwrap();
        fs.write_file(&ctx, "/d/f", "").unwrap();
        assert!(matches!(fs.rmdir(&ctx, "/d"), Err(FsError::DirectoryNotEmpty(_))));
        assert!(matches!(fs.rmdir(&ctx, "/d/f"), Err(FsError::NotADirectory(_))));
        fs.unlink(&ctx, "/d/f").unwrap();
        fs.rmdir(&ctx, "/d").unwrap();
        assert!(!fs.exists(&ctx, "/d").unwrap());
    }

    #[test]
    fn rm_recursive_frees_subtree() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/a/b/c", true, None).unwrap();
        fs.write_file(&ctx, "/a/b/c/f", "x").unwrap();
        assert!(matches!(
            fs.rm(&ctx, "/a", false),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        fs.rm(&ctx, "/a", true).unwrap();
        assert_eq!(fs.total_nodes(), 1);
    }

    #[test]
    fn root_cannot_be_removed() {
        let (mut fs, ctx) = setup();
        assert!(matches!(fs.rm(&ctx, "/", true), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn hard_links_share_content() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/a", "shared").unwrap();
        fs.link(&ctx, "/a", "/b").unwrap();
        fs.append_file(&ctx, "/b", "!").unwrap();
        assert_eq!(fs.read_file(&ctx, "/a").unwrap(), b"shared!");
        assert_eq!(fs.stat(&ctx, "/a").unwrap().nlink, 2);

        fs.unlink(&ctx, "/a").unwrap();
        assert_eq!(fs.read_file(&ctx, "/b").unwrap(), b"shared!");
        assert_eq!(fs.stat(&ctx, "/b").unwrap().nlink, 1);
    }

    #[test]
    fn hard_link_to_directory_is_unsupported() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/d", false, None).unwrap();
        assert!(matches!(
            fs.link(&ctx, "/d", "/e"),
            Err(FsError::Unsupported(_))
        ));
    }

    #[test]
    fn rename_moves_and_overwrites() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/src/inner", true, None).unwrap();
        fs.mkdir(&ctx, "/dst", false, None).unwrap();
        fs.write_file(&ctx, "/src/inner/f", "payload").unwrap();
        fs.rename(&ctx, "/src/inner", "/dst/moved").unwrap();
        assert_eq!(fs.read_file(&ctx, "/dst/moved/f").unwrap(), b"payload");
        assert!(!fs.exists(&ctx, "/src/inner").unwrap());

        fs.write_file(&ctx, "/x", "new").unwrap();
        fs.write_file(&ctx, "/y", "old").unwrap();
        let before = fs.total_nodes();
        fs.rename(&ctx, "/x", "/y").unwrap();
        assert_eq!(fs.read_file(&ctx, "/y").unwrap(), b"new");
        assert_eq!(fs.total_nodes(), before - 1);
    }

    #[test]
    fn rename_into_own_subtree_fails() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/a/b", true, None).unwrap();
        assert!(matches!(
            fs.rename(&ctx, "/a", "/a/b/c"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(fs.exists(&ctx, "/a/b").unwrap());
    }

    #[test]
    fn rename_checks_destination_parent_first() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/f", "x").unwrap();
        assert!(matches!(
            fs.rename(&ctx, "/f", "/missing/f"),
            Err(FsError::NotFound(_))
        ));
        assert!(fs.exists(&ctx, "/f").unwrap());
    }

    #[test]
    fn cp_shallow_and_recursive() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/a", false, None).unwrap();
        fs.write_file(&ctx, "/a/f", "one").unwrap();

        fs.cp(&ctx, "/a", "/shallow", false).unwrap();
        fs.cp(&ctx, "/a", "/deep", true).unwrap();
        fs.write_file(&ctx, "/a/f", "two").unwrap();

        assert_eq!(fs.read_file(&ctx, "/shallow/f").unwrap(), b"two");
        assert_eq!(fs.read_file(&ctx, "/deep/f").unwrap(), b"one");
    }

    #[test]
    fn copy_file_honours_flags() {
        let (mut fs, ctx) = setup();
        fs.write_file(&ctx, "/a", "data").unwrap();
        fs.chmod(&ctx, "/a", 0o600u32).unwrap();
        fs.copy_file(&ctx, "/a", "/b", CopyFlags::empty()).unwrap();
        assert_eq!(fs.read_file(&ctx, "/b").unwrap(), b"data");
        assert_eq!(fs.stat(&ctx, "/b").unwrap().mode & 0o777, 0o600);

        assert!(matches!(
            fs.copy_file(&ctx, "/a", "/b", CopyFlags::EXCL),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.copy_file(&ctx, "/a", "/c", CopyFlags::FICLONE_FORCE),
            Err(FsError::Unsupported(_))
        ));
        fs.copy_file(&ctx, "/a", "/c", CopyFlags::FICLONE).unwrap();
    }

    #[test]
    fn mknod_creates_special_nodes() {
        let (mut fs, ctx) = setup();
        fs.mknod(&ctx, "/pipe", FileType::Fifo, None).unwrap();
        let stats = fs.stat(&ctx, "/pipe").unwrap();
        assert!(stats.is_fifo());
        assert_eq!(stats.size, 0);
        assert!(matches!(
            fs.read_file(&ctx, "/pipe"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.mknod(&ctx, "/link", FileType::Symlink, None),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(
            fs.mknod(&ctx, "/pipe", FileType::Socket, None),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn symlinks_are_unsupported() {
        let (mut fs, ctx) = setup();
        assert!(matches!(
            fs.symlink(&ctx, "/a", "/b"),
            Err(FsError::Unsupported(_))
        ));
        assert!(matches!(fs.readlink(&ctx, "/b"), Err(FsError::Unsupported(_))));
    }

    #[test]
    fn try_stat_maps_missing_to_none() {
        let (mut fs, ctx) = setup();
        assert!(fs.try_stat(&ctx, "/nope").unwrap().is_none());
        fs.write_file(&ctx, "/f", "").unwrap();
        assert!(matches!(fs.try_stat(&ctx, "/f/x"), Err(FsError::NotADirectory(_))));
        assert_eq!(fs.lstat(&ctx, "/f").unwrap(), fs.stat(&ctx, "/f").unwrap());
    }

    #[test]
    fn statfs_counts_every_entry() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/a/b", true, None).unwrap();
        fs.write_file(&ctx, "/a/f", "").unwrap();
        let stats = fs.statfs(&ctx, "/").unwrap();
        assert_eq!(stats.files, 3.0);
        assert!(stats.bfree.is_infinite());
        assert_eq!(fs.statfs_wide(&ctx, "/a").unwrap().files, 3);
    }

    #[test]
    fn subtree_export_imports_elsewhere() {
        let (mut fs, ctx) = setup();
        fs.mkdir(&ctx, "/a/b", true, None).unwrap();
        fs.write_file(&ctx, "/a/b/f", "deep").unwrap();
        let bytes = fs.export_node(&ctx, "/a").unwrap();
        fs.import_node(&ctx, "/copy", &bytes).unwrap();
        assert_eq!(fs.read_file(&ctx, "/copy/b/f").unwrap(), b"deep");
        assert!(matches!(
            fs.import_node(&ctx, "/copy", &bytes),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn import_rejects_unknown_version() {
        let (fs, _) = setup();
        let mut bytes = fs.export().unwrap();
        bytes[0] = 9;
        assert!(matches!(
            FileSystem::import(&bytes),
            Err(FsError::UnsupportedVersion(9))
        ));
    }
}
