use std::str::FromStr;

use crate::fs::{FsError, Result};
use crate::mode::Access;

use bitflags::bitflags;

bitflags! {
    /// Encodes open filesystem call options http://man7.org/linux/man-pages/man2/open.2.html.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const CREATE = 4;
        const EXCLUSIVE = 8;
        const NOCTTY = 16;
        const TRUNCATE = 32;
        const APPEND = 64;
        const DIRECTORY = 128;
        const NOATIME = 256;
        const NOFOLLOW = 512;
        const SYNC = 1024;
        const DSYNC = 2048;
        const SYMLINK = 4096;
        const DIRECT = 8192;
        const NONBLOCK = 16384;
    }
}

impl OpenFlags {
    /// Maps an `fopen`-style mnemonic such as `"w+"` to its flag combination.
    pub fn from_mnemonic(mnemonic: &str) -> Result<Self> {
        let flags = match mnemonic {
            "r" => Self::READ,
            "rs" => Self::READ | Self::SYNC,
            "r+" => Self::READ_WRITE,
            "rs+" => Self::READ_WRITE | Self::SYNC,
            "w" => Self::WRITE | Self::CREATE | Self::TRUNCATE,
            "wx" => Self::WRITE | Self::CREATE | Self::EXCLUSIVE | Self::TRUNCATE,
            "w+" => Self::READ_WRITE | Self::CREATE | Self::TRUNCATE,
            "wx+" => Self::READ_WRITE | Self::CREATE | Self::EXCLUSIVE | Self::TRUNCATE,
            "a" => Self::CREATE | Self::APPEND,
            "ax" => Self::CREATE | Self::EXCLUSIVE | Self::APPEND,
            "as" => Self::CREATE | Self::APPEND | Self::SYNC,
            "a+" => Self::READ | Self::CREATE | Self::APPEND,
            "ax+" => Self::READ | Self::CREATE | Self::EXCLUSIVE | Self::APPEND,
            "as+" => Self::READ | Self::CREATE | Self::APPEND | Self::SYNC,
            _ => {
                return Err(FsError::InvalidArgument(format!(
                    "unknown open flag: {:?}",
                    mnemonic
                )))
            }
        };
        Ok(flags)
    }

    /// The permission bits a caller needs on an existing node to open it
    /// with these flags.
    pub fn required_access(self) -> Access {
        let mut access = Access::empty();
        if self.contains(Self::READ) {
            access |= Access::READ;
        }
        if self.intersects(Self::WRITE | Self::APPEND | Self::TRUNCATE) {
            access |= Access::WRITE;
        }
        access
    }

    pub fn readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn writable(self) -> bool {
        self.intersects(Self::WRITE | Self::APPEND)
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_mnemonic(s)
    }
}

/// Open flags as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    Mnemonic(String),
    Bits(u32),
}

impl Flag {
    pub fn parse(&self) -> Result<OpenFlags> {
        match self {
            Flag::Mnemonic(mnemonic) => OpenFlags::from_mnemonic(mnemonic),
            Flag::Bits(bits) => OpenFlags::from_bits(*bits).ok_or_else(|| {
                FsError::InvalidArgument(format!("unknown open flag bits: {:#x}", bits))
            }),
        }
    }
}

impl From<&str> for Flag {
    fn from(mnemonic: &str) -> Self {
        Flag::Mnemonic(mnemonic.to_string())
    }
}

impl From<u32> for Flag {
    fn from(bits: u32) -> Self {
        Flag::Bits(bits)
    }
}

impl From<OpenFlags> for Flag {
    fn from(flags: OpenFlags) -> Self {
        Flag::Bits(flags.bits())
    }
}

bitflags! {
    /// Behavior switches for `copy_file`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyFlags: u32 {
        /// Fail if the destination already exists.
        const EXCL = 1;
        /// Copy-on-write if possible; always a plain copy here.
        const FICLONE = 2;
        /// Copy-on-write or fail.
        const FICLONE_FORCE = 4;
    }
}
