use std::io::{Seek, SeekFrom};

use memfs::{Context, Encoding, FileSystem};

pub fn main() {
    let ctx = Context::root();
    let mut fs = FileSystem::new();
    fs.mkdir(&ctx, "/etc", false, None).unwrap();
    fs.write_file(&ctx, "/etc/motd", "welcome\n").unwrap();

    // Persist to a scratch file and load it back.
    let mut disk = tempfile::tempfile().unwrap();
    memfs::io::export_to(&fs, &mut disk).unwrap();
    disk.seek(SeekFrom::Start(0)).unwrap();
    let restored = memfs::io::import_from(&mut disk).unwrap();

    print!(
        "{}",
        restored
            .read_to_string(&ctx, "/etc/motd", Encoding::Utf8)
            .unwrap()
    );
}
