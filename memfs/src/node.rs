use crate::dir::Directory;
use crate::file::RegularFile;
use crate::fs::{FsError, Result};
use crate::mode::{self, Access, FileType, ModeArg, PERMISSION_MASK};
use crate::sb::BLOCK_SIZE;
use crate::time::{self, TimeArg, Timestamp};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Metadata common to every node: type tag, permission triplets, ownership
/// and the four timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    file_type: FileType,
    /// Only the low nine bits are ever set.
    permissions: u32,
    uid: u32,
    gid: u32,
    birthtime: Timestamp,
    atime: Timestamp,
    mtime: Timestamp,
    ctime: Timestamp,
}

impl Metadata {
    pub fn new(file_type: FileType, permissions: u32, uid: u32, gid: u32) -> Self {
        let now = time::now();
        Self {
            file_type,
            permissions: permissions & PERMISSION_MASK,
            uid,
            gid,
            birthtime: now,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Type bits combined with permission bits.
    pub fn mode(&self) -> u32 {
        self.file_type.bits() | self.permissions
    }

    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn birthtime(&self) -> Timestamp {
        self.birthtime
    }

    pub fn atime(&self) -> Timestamp {
        self.atime
    }

    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    pub fn ctime(&self) -> Timestamp {
        self.ctime
    }

    /// The triplet that applies to a caller: owner bits on a uid match, else
    /// group bits on a gid match, else other bits.
    pub fn granted(&self, uid: u32, gid: u32) -> Access {
        let triplet = if uid == self.uid {
            self.permissions >> 6
        } else if gid == self.gid {
            self.permissions >> 3
        } else {
            self.permissions
        };
        Access::from_bits_truncate(triplet & 0o7)
    }

    /// Fails unless every requested bit is present in the caller's triplet.
    pub fn access(&self, requested: Access, uid: u32, gid: u32) -> Result<()> {
        let granted = self.granted(uid, gid);
        if granted.contains(requested) {
            Ok(())
        } else {
            Err(FsError::PermissionDenied { requested, granted })
        }
    }

    /// Replaces the permission bits. The type tag cannot change.
    pub fn chmod(&mut self, mode: &ModeArg) -> Result<()> {
        self.permissions = mode.permissions()?;
        self.touch_changed();
        Ok(())
    }

    pub fn chown(&mut self, uid: u32, gid: u32) {
        self.uid = uid;
        self.gid = gid;
        self.touch_changed();
    }

    /// Sets access and modify times. Both arguments are validated before
    /// either timestamp changes.
    pub fn utimes(&mut self, atime: &TimeArg, mtime: &TimeArg) -> Result<()> {
        let atime = atime.to_nanos()?;
        let mtime = mtime.to_nanos()?;
        self.atime = atime;
        self.mtime = mtime;
        Ok(())
    }

    /// Same type, permissions and owner; fresh timestamps.
    pub fn copy(&self) -> Self {
        Self::new(self.file_type, self.permissions, self.uid, self.gid)
    }

    pub(crate) fn touch_accessed(&mut self) {
        self.atime = self.atime.max(time::now());
    }

    pub(crate) fn touch_modified(&mut self) {
        let now = time::now();
        self.mtime = self.mtime.max(now);
        self.ctime = self.ctime.max(now);
    }

    pub(crate) fn touch_changed(&mut self) {
        self.ctime = self.ctime.max(time::now());
    }
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub enum Inode {
    File(RegularFile),
    Directory(Directory),
    /// Device, fifo and socket nodes; metadata only.
    Special(Metadata),
}

impl Inode {
    pub fn file(file: RegularFile) -> Self {
        Inode::File(file)
    }

    pub fn directory(dir: Directory) -> Self {
        Inode::Directory(dir)
    }

    /// Creates a metadata-only node for one of the special types.
    pub fn special(file_type: FileType, permissions: u32, uid: u32, gid: u32) -> Result<Self> {
        match file_type {
            FileType::CharDevice | FileType::BlockDevice | FileType::Fifo | FileType::Socket => {
                Ok(Inode::Special(Metadata::new(file_type, permissions, uid, gid)))
            }
            FileType::Symlink => Err(FsError::Unsupported("symbolic links".to_string())),
            FileType::Regular | FileType::Directory => Err(FsError::InvalidArgument(format!(
                "{:?} is not a special file type",
                file_type
            ))),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Inode::File(file) => &file.meta,
            Inode::Directory(dir) => &dir.meta,
            Inode::Special(meta) => meta,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Inode::File(file) => &mut file.meta,
            Inode::Directory(dir) => &mut dir.meta,
            Inode::Special(meta) => meta,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.metadata().file_type()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Inode::Directory(_))
    }

    /// Bytes of content for a regular file, entry count for a directory,
    /// zero otherwise.
    pub fn size(&self) -> u64 {
        match self {
            Inode::File(file) => file.len() as u64,
            Inode::Directory(dir) => dir.len() as u64,
            Inode::Special(_) => 0,
        }
    }

    pub fn as_file(&self) -> Option<&RegularFile> {
        match self {
            Inode::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut RegularFile> {
        match self {
            Inode::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_dir(&self) -> Option<&Directory> {
        match self {
            Inode::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut Directory> {
        match self {
            Inode::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    /// A shallow copy with fresh timestamps. A copied directory refers to
    /// the same children as the original.
    pub fn copy(&self) -> Inode {
        match self {
            Inode::File(file) => Inode::File(RegularFile::new(file.meta.copy(), file.bytes().to_vec())),
            Inode::Directory(dir) => Inode::Directory(dir.copy()),
            Inode::Special(meta) => Inode::Special(meta.copy()),
        }
    }

    /// Metadata snapshot with millisecond float timestamps. `nlink` is the
    /// number of directory entries referring to this node.
    pub fn stat(&self, nlink: u64) -> Stats {
        let meta = self.metadata();
        let size = self.size();
        Stats {
            dev: 0,
            ino: 0,
            mode: meta.mode(),
            nlink,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: 0,
            size,
            blksize: BLOCK_SIZE,
            blocks: blocks_for(size),
            atime_ms: nanos_to_millis_f64(meta.atime()),
            mtime_ms: nanos_to_millis_f64(meta.mtime()),
            ctime_ms: nanos_to_millis_f64(meta.ctime()),
            birthtime_ms: nanos_to_millis_f64(meta.birthtime()),
        }
    }

    /// Metadata snapshot with integer timestamps at both millisecond and
    /// nanosecond precision.
    pub fn stat_wide(&self, nlink: u64) -> WideStats {
        let meta = self.metadata();
        let size = self.size();
        WideStats {
            dev: 0,
            ino: 0,
            mode: meta.mode(),
            nlink,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: 0,
            size,
            blksize: BLOCK_SIZE,
            blocks: blocks_for(size),
            atime_ms: meta.atime().div_euclid(NANOS_PER_MILLI),
            mtime_ms: meta.mtime().div_euclid(NANOS_PER_MILLI),
            ctime_ms: meta.ctime().div_euclid(NANOS_PER_MILLI),
            birthtime_ms: meta.birthtime().div_euclid(NANOS_PER_MILLI),
            atime_ns: meta.atime(),
            mtime_ns: meta.mtime(),
            ctime_ns: meta.ctime(),
            birthtime_ns: meta.birthtime(),
        }
    }
}

fn blocks_for(size: u64) -> u64 {
    (size + BLOCK_SIZE - 1) / BLOCK_SIZE
}

fn nanos_to_millis_f64(nanos: Timestamp) -> f64 {
    nanos as f64 / NANOS_PER_MILLI as f64
}

/// Type queries shared by both stat records.
pub trait ModeBits {
    fn mode(&self) -> u32;

    fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode())
    }

    fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    fn is_directory(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    fn is_block_device(&self) -> bool {
        self.file_type() == Some(FileType::BlockDevice)
    }

    fn is_character_device(&self) -> bool {
        self.file_type() == Some(FileType::CharDevice)
    }

    fn is_fifo(&self) -> bool {
        self.file_type() == Some(FileType::Fifo)
    }

    fn is_socket(&self) -> bool {
        self.file_type() == Some(FileType::Socket)
    }

    fn is_symbolic_link(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }

    /// Permission bits in `rwxrwxrwx` form.
    fn symbolic_mode(&self) -> String {
        mode::format_symbolic(self.mode() & PERMISSION_MASK)
    }
}

/// Stat record with millisecond float timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ms: f64,
    pub mtime_ms: f64,
    pub ctime_ms: f64,
    pub birthtime_ms: f64,
}

impl ModeBits for Stats {
    fn mode(&self) -> u32 {
        self.mode
    }
}

/// Stat record with integer timestamps, including nanosecond fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideStats {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: i64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    pub birthtime_ns: i64,
}

impl ModeBits for WideStats {
    fn mode(&self) -> u32 {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::S_IFMT;

    fn owned_file(permissions: u32) -> Metadata {
        Metadata::new(FileType::Regular, permissions, 5, 5)
    }

    #[test]
    fn fresh_nodes_share_one_timestamp() {
        for &(mode, uid, gid) in &[(0o644, 0, 0), (0o000, 7, 9), (0o777, 1000, 100)] {
            let meta = Metadata::new(FileType::Directory, mode, uid, gid);
            assert_eq!(meta.atime(), meta.birthtime());
            assert_eq!(meta.mtime(), meta.birthtime());
            assert_eq!(meta.ctime(), meta.birthtime());
        }
    }

    #[test]
    fn permission_triplet_selected_by_owner_then_group() {
        let meta = owned_file(ModeArg::from("rw-r-----").permissions().unwrap());

        assert!(meta.access(Access::READ | Access::WRITE, 5, 5).is_ok());
        match meta.access(Access::EXECUTE, 5, 5) {
            Err(FsError::PermissionDenied { .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(meta.access(Access::READ, 9, 5).is_ok());
        match meta.access(Access::READ, 9, 9) {
            Err(FsError::PermissionDenied { granted, .. }) => assert!(granted.is_empty()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn owner_match_wins_over_more_permissive_group() {
        let meta = owned_file(0o070);
        assert!(meta.access(Access::READ, 5, 5).is_err());
        assert!(meta.access(Access::READ, 6, 5).is_ok());
    }

    #[test]
    fn existence_check_always_passes() {
        let meta = owned_file(0);
        assert!(meta.access(mode::F_OK, 1, 1).is_ok());
    }

    #[test]
    fn chmod_only_touches_permission_bits() {
        for &mode in &[0o000, 0o777, 0o100755, 0o4644, 0o640] {
            let mut meta = owned_file(0o600);
            let before = meta.mode() & S_IFMT;
            meta.chmod(&ModeArg::from(mode)).unwrap();
            assert_eq!(meta.mode() & S_IFMT, before);
            assert_eq!(meta.permissions(), mode & 0o777);
        }
    }

    #[test]
    fn chmod_and_chown_advance_change_time() {
        let mut meta = owned_file(0o600);
        let ctime = meta.ctime();
        meta.chown(1, 2);
        assert!(meta.ctime() >= ctime);
        assert_eq!((meta.uid(), meta.gid()), (1, 2));
    }

    #[test]
    fn utimes_sets_only_access_and_modify() {
        let mut meta = owned_file(0o600);
        let ctime = meta.ctime();
        let birthtime = meta.birthtime();
        meta.utimes(&TimeArg::from(10i64), &TimeArg::from(2.0f64)).unwrap();
        assert_eq!(meta.atime(), 10);
        assert_eq!(meta.mtime(), 2_000_000_000);
        assert_eq!(meta.ctime(), ctime);
        assert_eq!(meta.birthtime(), birthtime);
    }

    #[test]
    fn utimes_rejects_bad_input_without_partial_update() {
        let mut meta = owned_file(0o600);
        let atime = meta.atime();
        assert!(meta
            .utimes(&TimeArg::from(1i64), &TimeArg::from("garbage"))
            .is_err());
        assert_eq!(meta.atime(), atime);
    }

    #[test]
    fn stat_reports_size_and_blocks() {
        let meta = owned_file(0o644);
        let node = Inode::file(RegularFile::new(meta, vec![0; 4097]));
        let stats = node.stat(1);
        assert_eq!(stats.size, 4097);
        assert_eq!(stats.blocks, 2);
        assert_eq!((stats.dev, stats.ino, stats.nlink), (0, 0, 1));
        assert!(stats.is_file());
        assert!(!stats.is_directory());
        assert_eq!(stats.symbolic_mode(), "rw-r--r--");
    }

    #[test]
    fn wide_stat_carries_nanoseconds() {
        let mut meta = owned_file(0o644);
        meta.utimes(&TimeArg::from(1_234_567_891i64), &TimeArg::from(5i64))
            .unwrap();
        let node = Inode::file(RegularFile::new(meta, Vec::new()));
        let wide = node.stat_wide(1);
        assert_eq!(wide.atime_ns, 1_234_567_891);
        assert_eq!(wide.atime_ms, 1234);
        assert_eq!(wide.blocks, 0);

        let narrow = node.stat(1);
        assert!((narrow.atime_ms - 1234.567891).abs() < 1e-6);
    }

    #[test]
    fn special_nodes_reject_symlinks() {
        assert!(Inode::special(FileType::Fifo, 0o600, 0, 0).is_ok());
        match Inode::special(FileType::Symlink, 0o777, 0, 0) {
            Err(FsError::Unsupported(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn copies_get_fresh_timestamps() {
        let mut meta = owned_file(0o640);
        meta.utimes(&TimeArg::from(1i64), &TimeArg::from(1i64)).unwrap();
        let node = Inode::file(RegularFile::new(meta, b"abc".to_vec()));
        let copy = node.copy();
        assert_eq!(copy.metadata().mode(), node.metadata().mode());
        assert_eq!(copy.as_file().unwrap().bytes(), b"abc");
        assert!(copy.metadata().atime() > 1);
    }
}
