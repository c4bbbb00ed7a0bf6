//! FUSE bridge: inode-addressed kernel callbacks onto the path-based
//! adapter.
//!
//! The kernel speaks inodes, the adapter speaks paths, so the bridge keeps
//! a bidirectional inode⇄path table with the export root pinned at inode 1.
//! Attribute replies are stamped with the client process's own uid/gid; the
//! remote owner never reaches the kernel.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use tracing::{debug, info, warn};

use crate::client::fs::RemoteFs;
use crate::proto::{Attr, Fault, FaultCode};

/// Attribute validity window handed to the kernel; zero keeps it honest
/// about the single-authority server.
const TTL: Duration = Duration::new(0, 0);

const ROOT_INO: u64 = 1;

/// Maps a fault onto the POSIX status the kernel expects.
fn errno(fault: &Fault) -> c_int {
    match fault.code {
        FaultCode::NotFound => libc::ENOENT,
        FaultCode::Stale | FaultCode::Io | FaultCode::Bad => libc::EIO,
        FaultCode::Inval => libc::EINVAL,
        FaultCode::Unsupported => libc::ENOSYS,
    }
}

fn kind_of(mode: u32) -> FileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        _ => FileType::RegularFile,
    }
}

fn timestamp(secs: u64, nanos: u32) -> SystemTime {
    UNIX_EPOCH + Duration::new(secs, nanos)
}

/// Bidirectional inode⇄path table. Paths are export-root relative with the
/// root itself at the empty string.
struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self { by_ino: HashMap::new(), by_path: HashMap::new(), next: 2 };
        table.by_ino.insert(ROOT_INO, String::new());
        table.by_path.insert(String::new(), ROOT_INO);
        table
    }

    fn intern(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.to_owned());
        self.by_path.insert(path.to_owned(), ino);
        ino
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).cloned()
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Option<String> {
        let base = self.by_ino.get(&parent)?;
        let name = name.to_str()?;
        if base.is_empty() {
            Some(name.to_owned())
        } else {
            Some(format!("{base}/{name}"))
        }
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }

    /// Re-keys a path and everything beneath it after a rename.
    fn rename(&mut self, from: &str, to: &str) {
        self.forget_path(to);
        let prefix = format!("{from}/");
        let moved: Vec<(String, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| *path == from || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let fresh = format!("{to}{}", &old[from.len()..]);
            self.by_path.remove(&old);
            self.by_path.insert(fresh.clone(), ino);
            self.by_ino.insert(ino, fresh);
        }
    }
}

/// The `fuser` driver: adapter plus inode table plus the stamped owner.
pub struct Driver {
    fs: RemoteFs,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl Driver {
    pub fn new(fs: RemoteFs) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn file_attr(&self, ino: u64, attr: &Attr) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: timestamp(attr.atime, attr.atimensec),
            mtime: timestamp(attr.mtime, attr.mtimensec),
            ctime: timestamp(attr.ctime, attr.ctimensec),
            crtime: UNIX_EPOCH,
            kind: kind_of(attr.mode),
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: attr.rdev,
            blksize: attr.blksize.max(512),
            flags: 0,
        }
    }

    /// Fetches attributes for a known path and interns its inode.
    fn attr_for_path(&mut self, path: &str) -> Result<FileAttr, Fault> {
        let attr = self.fs.get_attr(path)?;
        let ino = self.inodes.intern(path);
        Ok(self.file_attr(ino, &attr))
    }
}

impl Filesystem for Driver {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("filesystem bridge ready");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("filesystem bridge shut down");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for_path(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for_path(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    /// Truncation is refused; mode/owner/time changes are accepted and
    /// ignored, which is all the remote semantics offer.
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if size.is_some() {
            reply.error(libc::EINVAL);
            return;
        }
        debug!(ino, ?mode, ?uid, ?gid, "setattr accepted as no-op");
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for_path(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        if mode & libc::S_IFMT as u32 != libc::S_IFREG as u32 {
            reply.error(libc::ENOSYS);
            return;
        }
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.create(&path) {
            Ok(id) => {
                self.fs.release(id);
                match self.attr_for_path(&path) {
                    Ok(attr) => reply.entry(&TTL, &attr, 0),
                    Err(fault) => reply.error(errno(&fault)),
                }
            }
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Err(fault) = self.fs.mkdir(&path) {
            reply.error(errno(&fault));
            return;
        }
        match self.attr_for_path(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(from), Some(to)) =
            (self.inodes.child_of(parent, name), self.inodes.child_of(newparent, newname))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.open(&path) {
            Ok(id) => reply.opened(id, 0),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.inodes.child_of(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let id = match self.fs.create(&path) {
            Ok(id) => id,
            Err(fault) => {
                reply.error(errno(&fault));
                return;
            }
        };
        match self.attr_for_path(&path) {
            Ok(attr) => reply.created(&TTL, &attr, 0, id, 0),
            Err(fault) => {
                self.fs.release(id);
                reply.error(errno(&fault));
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.read(fh, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.write(fh, offset as u64, data) {
            Ok(written) => reply.written(written),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.fs.flush(fh) {
            Ok(()) => reply.ok(),
            Err(fault) => reply.error(errno(&fault)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.fs.release(fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.fs.fsync(fh) {
            Ok(()) => reply.ok(),
            Err(fault) => {
                warn!(%fault, "fsync failed");
                reply.error(errno(&fault));
            }
        }
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.read_dir(&path) {
            Ok(entries) => entries,
            Err(fault) => {
                reply.error(errno(&fault));
                return;
            }
        };

        let mut listing = vec![
            (ino, FileType::Directory, ".".to_owned()),
            (ROOT_INO, FileType::Directory, "..".to_owned()),
        ];
        for entry in entries {
            let child = if path.is_empty() {
                entry.name.clone()
            } else {
                format!("{path}/{}", entry.name)
            };
            listing.push((self.inodes.intern(&child), kind_of(entry.mode), entry.name));
        }

        for (i, (entry_ino, kind, name)) in
            listing.into_iter().enumerate().skip(offset as usize)
        {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, 512, crate::proto::MAX_NAME_LEN as u32, 0);
    }

    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

/// Mounts the adapter at `mountpoint` and serves until unmounted.
pub fn mount(fs: RemoteFs, mountpoint: &Path) -> io::Result<()> {
    let options = [MountOption::FSName("sessionfs".to_owned()), MountOption::DefaultPermissions];
    fuser::mount2(Driver::new(fs), mountpoint, &options)
}
