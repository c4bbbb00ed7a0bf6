//! Stateless translation of RPC requests onto host filesystem calls.
//!
//! Every handler re-verifies the incoming handle and re-opens the target
//! file; no descriptor or per-client state survives between requests. The
//! durability rules live here: namespace mutations fsync the affected
//! parent directory before replying, Commit and committed Writes fsync the
//! file. Failures are reported, never retried.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tokio::task;
use tracing::debug;

use crate::handle;
use crate::proto::{Attr, DirEntry, Fault, FaultCode, FileHandle, Reply, Request};
use crate::server::counters::OpCounters;

/// Creation mode for files and directories, from the original service.
const CREATE_MODE: u32 = 0o766;

/// Upper bound on a single read or write payload.
pub const MAX_IO_SIZE: usize = 1 << 20;

/// One exported directory tree plus the per-boot session nonce.
pub struct Export {
    root: PathBuf,
    session: i64,
    pub counters: OpCounters,
}

impl Export {
    pub fn new(root: PathBuf, session: i64) -> Self {
        Self { root, session, counters: OpCounters::default() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> i64 {
        self.session
    }

    fn status(&self) -> Reply {
        Reply::Status { success: true, session: self.session }
    }

    /// Routes one decoded request to its handler.
    pub async fn dispatch(&self, request: Request) -> Result<Reply, Fault> {
        self.counters.record(request.opcode());
        debug!(op = ?request.opcode(), "dispatch");
        match request {
            Request::Null => Ok(Reply::Null),
            Request::Mount { root_directory: _ } => self.mount().await,
            Request::Lookup { dir, name } => self.lookup(dir, name).await,
            Request::GetAttr { file } => self.get_attr(file).await,
            Request::Readdir { dir } => self.readdir(dir).await,
            Request::Read { file, offset, size } => self.read(file, offset, size).await,
            Request::Write { file, offset, size, data, should_commit } => {
                self.write(file, offset, size, data, should_commit).await
            }
            Request::Commit { file } => self.commit(file).await,
            Request::Create { dir, name } => self.create(dir, name).await,
            Request::Mkdir { dir, name } => self.mkdir(dir, name).await,
            Request::Remove { dir, name } => self.remove(dir, name, false).await,
            Request::Rmdir { dir, name } => self.remove(dir, name, true).await,
            Request::Rename { from_dir, from_name, to_dir, to_name } => {
                self.rename(from_dir, from_name, to_dir, to_name).await
            }
        }
    }

    async fn mount(&self) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || handle::issue(&root, "").map(Reply::Handle)).await
    }

    async fn lookup(&self, dir: FileHandle, name: String) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || {
            handle::verify(&root, &dir)?;
            let child = handle::join_child(&dir.path, &name)?;
            handle::issue(&root, &child).map(Reply::Handle)
        })
        .await
    }

    async fn get_attr(&self, file: FileHandle) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || {
            let path = handle::verify(&root, &file)?;
            let opened = File::open(&path).map_err(|e| Fault::from_host(&e, &file.path))?;
            let meta = opened.metadata().map_err(|e| Fault::from_host(&e, &file.path))?;
            Ok(Reply::Attr(crate::attr::from_metadata(&meta)))
        })
        .await
    }

    async fn readdir(&self, dir: FileHandle) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || {
            let path = handle::verify(&root, &dir)?;
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&path).map_err(|e| Fault::from_host(&e, &dir.path))? {
                let entry = entry.map_err(|e| Fault::from_host(&e, &dir.path))?;
                let meta =
                    entry.metadata().map_err(|e| Fault::from_host(&e, &dir.path))?;
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    mode: meta.mode(),
                });
            }
            Ok(Reply::Dir(entries))
        })
        .await
    }

    async fn read(&self, file: FileHandle, offset: i64, size: i64) -> Result<Reply, Fault> {
        if offset < 0 || size < 0 || size as usize > MAX_IO_SIZE {
            return Err(Fault::new(FaultCode::Inval, "read range out of bounds"));
        }
        let root = self.root.clone();
        run_blocking(move || {
            let path = handle::verify(&root, &file)?;
            let opened = File::open(&path).map_err(|e| Fault::from_host(&e, &file.path))?;
            let mut data = vec![0u8; size as usize];
            let n = read_full(&opened, &mut data, offset as u64)
                .map_err(|e| Fault::from_host(&e, &file.path))?;
            data.truncate(n);
            Ok(Reply::Read { size: n as i64, data })
        })
        .await
    }

    async fn write(
        &self,
        file: FileHandle,
        offset: i64,
        size: i64,
        data: Vec<u8>,
        should_commit: bool,
    ) -> Result<Reply, Fault> {
        if offset < 0 || size < 0 || size as usize > data.len() || size as usize > MAX_IO_SIZE {
            return Err(Fault::new(FaultCode::Inval, "write range out of bounds"));
        }
        let root = self.root.clone();
        let status = self.status();
        run_blocking(move || {
            let path = handle::verify(&root, &file)?;
            let opened = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| Fault::from_host(&e, &file.path))?;
            // write_all_at drives partial writes to completion.
            opened
                .write_all_at(&data[..size as usize], offset as u64)
                .map_err(|e| Fault::from_host(&e, &file.path))?;
            if should_commit {
                opened.sync_all().map_err(|e| Fault::from_host(&e, &file.path))?;
            }
            Ok(status)
        })
        .await
    }

    async fn commit(&self, file: FileHandle) -> Result<Reply, Fault> {
        let root = self.root.clone();
        let status = self.status();
        run_blocking(move || {
            let path = handle::verify(&root, &file)?;
            let opened = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| Fault::from_host(&e, &file.path))?;
            opened.sync_all().map_err(|e| Fault::from_host(&e, &file.path))?;
            Ok(status)
        })
        .await
    }

    async fn create(&self, dir: FileHandle, name: String) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || {
            let parent = handle::verify(&root, &dir)?;
            let child_rel = handle::join_child(&dir.path, &name)?;
            let child_abs = parent.join(&name);

            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(CREATE_MODE)
                .open(&child_abs)
                .map_err(|e| Fault::from_host(&e, &child_rel))?;
            sync_dir(&parent).map_err(|e| Fault::from_host(&e, &dir.path))?;

            match handle::issue(&root, &child_rel) {
                Ok(fh) => Ok(Reply::Handle(fh)),
                Err(fault) => {
                    // The entry is unusable without an identity; undo it.
                    let _ = std::fs::remove_file(&child_abs);
                    Err(fault)
                }
            }
        })
        .await
    }

    async fn mkdir(&self, dir: FileHandle, name: String) -> Result<Reply, Fault> {
        let root = self.root.clone();
        run_blocking(move || {
            let parent = handle::verify(&root, &dir)?;
            let child_rel = handle::join_child(&dir.path, &name)?;
            let child_abs = parent.join(&name);

            std::fs::DirBuilder::new()
                .mode(CREATE_MODE)
                .create(&child_abs)
                .map_err(|e| Fault::from_host(&e, &child_rel))?;
            sync_dir(&parent).map_err(|e| Fault::from_host(&e, &dir.path))?;

            match handle::issue(&root, &child_rel) {
                Ok(fh) => Ok(Reply::Handle(fh)),
                Err(fault) => {
                    let _ = std::fs::remove_dir(&child_abs);
                    Err(fault)
                }
            }
        })
        .await
    }

    /// Remove and Rmdir share everything but the unlinking call.
    async fn remove(&self, dir: FileHandle, name: String, directory: bool) -> Result<Reply, Fault> {
        let root = self.root.clone();
        let status = self.status();
        run_blocking(move || {
            let parent = handle::verify(&root, &dir)?;
            let child_rel = handle::join_child(&dir.path, &name)?;
            let child_abs = parent.join(&name);

            let removed = if directory {
                std::fs::remove_dir(&child_abs)
            } else {
                std::fs::remove_file(&child_abs)
            };
            removed.map_err(|e| Fault::from_host(&e, &child_rel))?;
            sync_dir(&parent).map_err(|e| Fault::from_host(&e, &dir.path))?;
            Ok(status)
        })
        .await
    }

    async fn rename(
        &self,
        from_dir: FileHandle,
        from_name: String,
        to_dir: FileHandle,
        to_name: String,
    ) -> Result<Reply, Fault> {
        let root = self.root.clone();
        let status = self.status();
        run_blocking(move || {
            let from_parent = handle::verify(&root, &from_dir)?;
            let to_parent = handle::verify(&root, &to_dir)?;
            let from_rel = handle::join_child(&from_dir.path, &from_name)?;
            handle::join_child(&to_dir.path, &to_name)?;

            std::fs::rename(from_parent.join(&from_name), to_parent.join(&to_name))
                .map_err(|e| Fault::from_host(&e, &from_rel))?;
            sync_dir(&to_parent).map_err(|e| Fault::from_host(&e, &to_dir.path))?;
            Ok(status)
        })
        .await
    }
}

/// Makes a directory's entry table durable.
fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// Fills `buf` from `offset`, stopping early only at end of file.
fn read_full(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

async fn run_blocking<T, F>(work: F) -> Result<T, Fault>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Fault> + Send + 'static,
{
    task::spawn_blocking(work).await.map_err(|_| Fault::io("filesystem worker failed"))?
}
