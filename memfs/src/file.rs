use crate::encoding::{DataArg, Encoding};
use crate::fs::{FsError, Result};
use crate::node::Metadata;

/// A regular file: metadata plus an owned byte buffer whose length is the
/// file's size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularFile {
    pub meta: Metadata,
    data: Vec<u8>,
}

impl RegularFile {
    pub fn new(meta: Metadata, data: Vec<u8>) -> Self {
        Self { meta, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns up to `length` bytes starting at `start`, or everything from
    /// `start` when no length is given. Out of range bounds are clamped.
    pub fn read(&self, start: usize, length: Option<usize>) -> &[u8] {
        let start = start.min(self.data.len());
        let end = match length {
            Some(length) => start.saturating_add(length).min(self.data.len()),
            None => self.data.len(),
        };
        &self.data[start..end]
    }

    /// Like `read`, decoded as text.
    pub fn read_string(&self, encoding: Encoding, start: usize, length: Option<usize>) -> String {
        encoding.decode(self.read(start, length))
    }

    /// Writes `data` at `position`. A write at position 0 with no explicit
    /// length replaces the whole content; anything else splices into the
    /// existing bytes, zero-filling any gap and growing the buffer as needed.
    /// An explicit length truncates the supplied data.
    ///
    /// Returns the number of bytes written. A write whose end cannot be
    /// addressed fails `InvalidArgument` and leaves the content unchanged.
    pub fn write(&mut self, data: &DataArg, position: usize, length: Option<usize>) -> Result<usize> {
        let bytes = data.to_bytes()?;
        self.write_bytes(&bytes, position, length)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8], position: usize, length: Option<usize>) -> Result<usize> {
        if position == 0 && length.is_none() {
            self.data = bytes.to_vec();
            self.meta.touch_modified();
            return Ok(bytes.len());
        }

        let bytes = match length {
            Some(length) => &bytes[..length.min(bytes.len())],
            None => bytes,
        };
        let end = position.checked_add(bytes.len()).ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "write of {} bytes at {} overflows the file offset",
                bytes.len(),
                position
            ))
        })?;
        if self.data.len() < end {
            self.grow(end)?;
        }
        self.data[position..end].copy_from_slice(bytes);
        self.meta.touch_modified();
        Ok(bytes.len())
    }

    pub fn append(&mut self, data: &DataArg) -> Result<usize> {
        let bytes = data.to_bytes()?;
        let end = self.data.len().checked_add(bytes.len()).ok_or_else(|| {
            FsError::InvalidArgument(format!("append of {} bytes overflows the file", bytes.len()))
        })?;
        self.data.try_reserve(bytes.len()).map_err(|e| {
            FsError::InvalidArgument(format!("cannot grow file to {} bytes: {}", end, e))
        })?;
        self.data.extend_from_slice(&bytes);
        self.meta.touch_modified();
        Ok(bytes.len())
    }

    /// Zero-fills the buffer up to `len` bytes, failing instead of aborting
    /// when the memory cannot be had.
    fn grow(&mut self, len: usize) -> Result<()> {
        let additional = len.saturating_sub(self.data.len());
        self.data.try_reserve(additional).map_err(|e| {
            FsError::InvalidArgument(format!("cannot grow file to {} bytes: {}", len, e))
        })?;
        self.data.resize(len, 0);
        Ok(())
    }

    /// Keeps only the first `length` bytes. Never grows the file.
    pub fn truncate(&mut self, length: usize) {
        self.data.truncate(length);
        self.meta.touch_modified();
    }

    pub(crate) fn touch_accessed(&mut self) {
        self.meta.touch_accessed();
    }
}
