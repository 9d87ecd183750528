//! Snapshot persistence. The byte format lives in [`codec`]; the functions
//! here move whole snapshots through `std::io` streams.

pub mod codec;

use std::io::{Read, Write};

use crate::fs::{FileSystem, Result};

pub use codec::{FORMAT_VERSION, HEADER_SIZE};

use log::info;

/// Writes a full snapshot of `fs` to `writer` and flushes it.
pub fn export_to<W: Write>(fs: &FileSystem, mut writer: W) -> Result<()> {
    let snapshot = fs.export()?;
    writer.write_all(&snapshot)?;
    writer.flush()?;
    info!("wrote {} byte snapshot", snapshot.len());
    Ok(())
}

/// Reads a snapshot from `reader` until end of stream and restores it.
pub fn import_from<R: Read>(mut reader: R) -> Result<FileSystem> {
    let mut snapshot = Vec::new();
    reader.read_to_end(&mut snapshot)?;
    info!("read {} byte snapshot", snapshot.len());
    FileSystem::import(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Context;
    use std::io::{Seek, SeekFrom};

    #[test]
    fn can_round_trip_through_a_temp_file() {
        let ctx = Context::root();
        let mut fs = FileSystem::new();
        fs.mkdir(&ctx, "/etc", false, None).unwrap();
        fs.write_file(&ctx, "/etc/hostname", "sandbox").unwrap();

        let mut disk = tempfile::tempfile().unwrap();
        export_to(&fs, &mut disk).unwrap();
        disk.seek(SeekFrom::Start(0)).unwrap();

        let restored = import_from(&mut disk).unwrap();
        assert_eq!(
            restored.read_to_string(&ctx, "/etc/hostname", Default::default()).unwrap(),
            "sandbox"
        );
    }

    #[test]
    fn empty_stream_is_rejected() {
        let empty: &[u8] = &[];
        assert!(import_from(empty).is_err());
    }
}
