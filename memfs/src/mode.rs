use crate::fs::{FsError, Result};

use bitflags::bitflags;

/// Mask selecting the file type bits of a mode.
pub const S_IFMT: u32 = 0xF000;
pub const S_IFREG: u32 = 0x8000;
pub const S_IFDIR: u32 = 0x4000;
pub const S_IFCHR: u32 = 0x2000;
pub const S_IFBLK: u32 = 0x6000;
pub const S_IFIFO: u32 = 0x1000;
pub const S_IFLNK: u32 = 0xA000;
pub const S_IFSOCK: u32 = 0xC000;

/// Mask selecting the owner/group/other permission triplets of a mode.
pub const PERMISSION_MASK: u32 = 0o777;

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// The type tag carried in the high bits of every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    /// Reserved. Nodes of this type can never be created.
    Symlink,
}

impl FileType {
    pub fn bits(self) -> u32 {
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::CharDevice => S_IFCHR,
            FileType::BlockDevice => S_IFBLK,
            FileType::Fifo => S_IFIFO,
            FileType::Socket => S_IFSOCK,
            FileType::Symlink => S_IFLNK,
        }
    }

    /// Reads the type tag out of a full mode, ignoring permission bits.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(FileType::Regular),
            S_IFDIR => Some(FileType::Directory),
            S_IFCHR => Some(FileType::CharDevice),
            S_IFBLK => Some(FileType::BlockDevice),
            S_IFIFO => Some(FileType::Fifo),
            S_IFSOCK => Some(FileType::Socket),
            S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }
}

bitflags! {
    /// Access bits requested from a permission triplet, laid out like `rwx`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const EXECUTE = 0b001;
        const WRITE = 0b010;
        const READ = 0b100;
    }
}

/// Existence check only; always granted.
pub const F_OK: Access = Access::empty();

/// A permission mode as supplied by a caller: either numeric bits or a
/// symbolic `rwxr-x---` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeArg {
    Bits(u32),
    Symbolic(String),
}

impl ModeArg {
    /// Returns the nine permission bits this argument describes.
    pub fn permissions(&self) -> Result<u32> {
        match self {
            ModeArg::Bits(bits) => Ok(bits & PERMISSION_MASK),
            ModeArg::Symbolic(text) => parse_symbolic(text),
        }
    }
}

impl From<u32> for ModeArg {
    fn from(bits: u32) -> Self {
        ModeArg::Bits(bits)
    }
}

impl From<&str> for ModeArg {
    fn from(text: &str) -> Self {
        ModeArg::Symbolic(text.to_string())
    }
}

impl From<String> for ModeArg {
    fn from(text: String) -> Self {
        ModeArg::Symbolic(text)
    }
}

fn parse_symbolic(text: &str) -> Result<u32> {
    let bytes = text.as_bytes();
    if bytes.len() != 9 {
        return Err(FsError::InvalidArgument(format!("invalid mode: {:?}", text)));
    }

    let mut bits = 0;
    for (i, &b) in bytes.iter().enumerate() {
        bits <<= 1;
        if b == b"rwx"[i % 3] {
            bits |= 1;
        } else if b != b'-' {
            return Err(FsError::InvalidArgument(format!("invalid mode: {:?}", text)));
        }
    }
    Ok(bits)
}

/// Renders permission bits in `rwxrwxrwx` form.
pub fn format_symbolic(permissions: u32) -> String {
    (0..9)
        .map(|i| {
            if permissions & (0o400 >> i) != 0 {
                b"rwx"[i % 3] as char
            } else {
                '-'
            }
        })
        .collect()
}
