//! Translation between host metadata and the wire attribute record.
//!
//! Pure functions, no state. Owner never crosses the wire: the client
//! stamps its own process uid/gid when answering the kernel.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use crate::proto::Attr;

fn clamp_secs(secs: i64) -> u64 {
    secs.max(0) as u64
}

/// Builds the wire attribute record from a host stat result.
pub fn from_metadata(meta: &Metadata) -> Attr {
    Attr {
        ino: meta.ino(),
        size: meta.size(),
        blocks: meta.blocks(),
        atime: clamp_secs(meta.atime()),
        mtime: clamp_secs(meta.mtime()),
        ctime: clamp_secs(meta.ctime()),
        atimensec: meta.atime_nsec() as u32,
        mtimensec: meta.mtime_nsec() as u32,
        ctimensec: meta.ctime_nsec() as u32,
        mode: meta.mode(),
        nlink: meta.nlink() as u32,
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
    }
}

/// True when the record describes a directory.
pub fn is_dir(attr: &Attr) -> bool {
    attr.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
}
