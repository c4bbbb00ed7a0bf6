//! Path-addressed client adapter.
//!
//! Maps the kernel-facing upcall set onto RPCs. The adapter keeps no
//! directory cache: every path is resolved with per-component Lookups from
//! the root handle obtained at mount time. Open-file state is shared by
//! remote path, so several kernel handles to one file feed one write log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::client::file::OpenFile;
use crate::client::rpc::Channel;
use crate::proto::{Attr, DirEntry, Fault, FaultCode, FileHandle, Reply, Request};

pub struct RemoteFs {
    channel: Channel,
    root: FileHandle,
    /// Open-file state keyed by remote path.
    files: Mutex<HashMap<String, Arc<OpenFile>>>,
    /// Kernel-visible handle ids onto that state.
    handles: Mutex<HashMap<u64, Arc<OpenFile>>>,
    next_id: AtomicU64,
}

impl RemoteFs {
    /// Mounts the remote export: fetches the root handle.
    pub fn mount(channel: Channel) -> Result<Self, Fault> {
        let root = channel.call_handle(&Request::Mount { root_directory: "/".to_owned() })?;
        debug!(inode = root.inode, "mounted export root");
        Ok(Self {
            channel,
            root,
            files: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OpenFile>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<OpenFile>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, dir: &FileHandle, name: &str) -> Result<FileHandle, Fault> {
        self.channel.call_handle(&Request::Lookup { dir: dir.clone(), name: name.to_owned() })
    }

    /// Resolves a slash-separated relative path, one Lookup per component.
    pub fn resolve(&self, path: &str) -> Result<FileHandle, Fault> {
        let mut current = self.root.clone();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.lookup(&current, component)?;
        }
        Ok(current)
    }

    /// Splits off the final component and resolves the parent directory.
    fn parent_of(&self, path: &str) -> Result<(FileHandle, String), Fault> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Fault::new(FaultCode::Inval, "operation needs a named entry"));
        }
        match trimmed.rsplit_once('/') {
            Some((parent, name)) => Ok((self.resolve(parent)?, name.to_owned())),
            None => Ok((self.root.clone(), trimmed.to_owned())),
        }
    }

    pub fn get_attr(&self, path: &str) -> Result<Attr, Fault> {
        let file = self.resolve(path)?;
        match self.channel.call(&Request::GetAttr { file })? {
            Reply::Attr(attr) => Ok(attr),
            other => Err(Fault::bad(format!("expected attr reply, got {other:?}"))),
        }
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, Fault> {
        let dir = self.resolve(path)?;
        match self.channel.call(&Request::Readdir { dir })? {
            Reply::Dir(entries) => Ok(entries),
            other => Err(Fault::bad(format!("expected directory reply, got {other:?}"))),
        }
    }

    fn register(&self, state: Arc<OpenFile>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles().insert(id, state);
        id
    }

    /// Opens an existing file; returns a kernel handle id.
    pub fn open(&self, path: &str) -> Result<u64, Fault> {
        let handle = self.resolve(path)?;
        let state = {
            let mut files = self.files();
            match files.get(&handle.path) {
                Some(existing) => {
                    existing.retain();
                    existing.clone()
                }
                None => {
                    let fresh = Arc::new(OpenFile::new(handle.clone()));
                    files.insert(handle.path.clone(), fresh.clone());
                    fresh
                }
            }
        };
        Ok(self.register(state))
    }

    /// Creates a fresh zero-length file and opens it.
    pub fn create(&self, path: &str) -> Result<u64, Fault> {
        let (dir, name) = self.parent_of(path)?;
        let handle = self.channel.call_handle(&Request::Create { dir, name })?;
        let state = Arc::new(OpenFile::new(handle.clone()));
        // Creation truncates, so any cached state for this path is obsolete.
        self.files().insert(handle.path.clone(), state.clone());
        Ok(self.register(state))
    }

    pub fn mkdir(&self, path: &str) -> Result<(), Fault> {
        let (dir, name) = self.parent_of(path)?;
        self.channel.call_handle(&Request::Mkdir { dir, name }).map(drop)
    }

    pub fn unlink(&self, path: &str) -> Result<(), Fault> {
        let (dir, name) = self.parent_of(path)?;
        self.channel.call_status(&Request::Remove { dir, name })?;
        self.files().remove(path.trim_matches('/'));
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<(), Fault> {
        let (dir, name) = self.parent_of(path)?;
        self.channel.call_status(&Request::Rmdir { dir, name }).map(drop)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), Fault> {
        let (from_dir, from_name) = self.parent_of(from)?;
        let (to_dir, to_name) = self.parent_of(to)?;
        self.channel
            .call_status(&Request::Rename { from_dir, from_name, to_dir, to_name })?;
        // Handles held open across a rename go stale by design; drop the
        // path keys so fresh opens resolve fresh handles.
        let mut files = self.files();
        files.remove(from.trim_matches('/'));
        files.remove(to.trim_matches('/'));
        Ok(())
    }

    fn state_of(&self, id: u64) -> Result<Arc<OpenFile>, Fault> {
        self.handles()
            .get(&id)
            .cloned()
            .ok_or_else(|| Fault::new(FaultCode::Inval, format!("unknown file handle {id}")))
    }

    /// Reads pass straight through to the server; the write log never
    /// serves them.
    pub fn read(&self, id: u64, offset: u64, size: u32) -> Result<Vec<u8>, Fault> {
        let state = self.state_of(id)?;
        let request = Request::Read {
            file: state.handle().clone(),
            offset: offset as i64,
            size: size as i64,
        };
        match self.channel.call(&request)? {
            Reply::Read { data, .. } => Ok(data),
            other => Err(Fault::bad(format!("expected read reply, got {other:?}"))),
        }
    }

    pub fn write(&self, id: u64, offset: u64, data: &[u8]) -> Result<u32, Fault> {
        let state = self.state_of(id)?;
        state.write(&self.channel, offset, data)?;
        Ok(data.len() as u32)
    }

    pub fn flush(&self, id: u64) -> Result<(), Fault> {
        self.state_of(id)?.flush(&self.channel)
    }

    pub fn fsync(&self, id: u64) -> Result<(), Fault> {
        self.state_of(id)?.fsync(&self.channel)
    }

    /// Drops one kernel handle. State lingers while other handles share it
    /// or while writes are still outstanding after a failed final flush.
    pub fn release(&self, id: u64) {
        let Some(state) = self.handles().remove(&id) else { return };
        let remaining = state.release(&self.channel);
        if remaining == 0 && state.outstanding() == 0 {
            self.files().remove(&state.handle().path);
        }
    }

    /// Shared open-file state behind a kernel handle id.
    pub fn open_state(&self, id: u64) -> Option<Arc<OpenFile>> {
        self.handles().get(&id).cloned()
    }
}
