/// Block size reported in stat records; also the unit of `blocks`.
pub const BLOCK_SIZE: u64 = 4096;

/// Filesystem type reported by `statfs`.
pub const FS_MAGIC: u32 = 61267; // 0xEF53

/// Filesystem statistics with floating point fields. Space is unbounded, so
/// every capacity field is infinite.
#[derive(Debug, Clone, PartialEq)]
pub struct StatFs {
    pub bavail: f64,
    pub bfree: f64,
    pub blocks: f64,
    pub bsize: f64,
    pub ffree: f64,
    /// Number of entries in the whole tree.
    pub files: f64,
    pub fs_type: u32,
}

impl StatFs {
    pub fn new(files: usize) -> Self {
        Self {
            bavail: f64::INFINITY,
            bfree: f64::INFINITY,
            blocks: f64::INFINITY,
            bsize: f64::INFINITY,
            ffree: f64::INFINITY,
            files: files as f64,
            fs_type: FS_MAGIC,
        }
    }
}

/// Filesystem statistics with integer fields, `u64::MAX` standing in for
/// unbounded capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideStatFs {
    pub bavail: u64,
    pub bfree: u64,
    pub blocks: u64,
    pub bsize: u64,
    pub ffree: u64,
    pub files: u64,
    pub fs_type: u64,
}

impl WideStatFs {
    pub const UNBOUNDED: u64 = u64::MAX;

    pub fn new(files: usize) -> Self {
        Self {
            bavail: Self::UNBOUNDED,
            bfree: Self::UNBOUNDED,
            blocks: Self::UNBOUNDED,
            bsize: Self::UNBOUNDED,
            ffree: Self::UNBOUNDED,
            files: files as u64,
            fs_type: FS_MAGIC as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_unbounded() {
        let stats = StatFs::new(3);
        assert!(stats.bavail.is_infinite());
        assert!(stats.ffree.is_infinite());
        assert_eq!(stats.files, 3.0);
        assert_eq!(stats.fs_type, FS_MAGIC);

        let wide = WideStatFs::new(3);
        assert_eq!(wide.bfree, WideStatFs::UNBOUNDED);
        assert_eq!(wide.files, 3);
        assert_eq!(wide.fs_type, 61267);
    }
}
