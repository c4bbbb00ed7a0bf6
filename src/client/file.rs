//! Per-open-file write cache and crash replay.
//!
//! Every confirmed write is appended to an in-memory log together with the
//! session nonce the server stamped into its reply. A nonce change between
//! two confirmations means the server restarted in between, so writes
//! buffered by the old process may be gone; the log holds everything needed
//! to send them again. Commit drains the log only once every entry is
//! proven durable under the committing boot.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::proto::{Fault, FileHandle};

/// Server seam used by the cache: confirm a write or a commit and report
/// the session nonce carried in the reply.
pub trait WriteChannel {
    fn write(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<i64, Fault>;
    fn commit(&self, handle: &FileHandle) -> Result<i64, Fault>;
}

/// One logged write: payload, position, and the boot that confirmed it.
struct LoggedWrite {
    data: Vec<u8>,
    offset: u64,
    session: i64,
}

struct State {
    refs: u32,
    log: Vec<LoggedWrite>,
    /// Set when a session change is observed between two writes; writes
    /// confirmed after the restart and before the observation may be lost.
    dirty: bool,
}

/// Shared state for one open file. The mutex covers the refcount, the log
/// and the dirty flag, and is held across the write RPC so log order
/// mirrors confirmation order.
pub struct OpenFile {
    handle: FileHandle,
    state: Mutex<State>,
}

impl OpenFile {
    pub fn new(handle: FileHandle) -> Self {
        Self { handle, state: Mutex::new(State { refs: 1, log: Vec::new(), dirty: false }) }
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-operation; the log is still
        // the best record of outstanding writes, so keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Notes another kernel handle sharing this state.
    pub fn retain(&self) {
        self.state().refs += 1;
    }

    /// Count of writes not yet proven durable.
    pub fn outstanding(&self) -> usize {
        self.state().log.len()
    }

    /// Session nonce recorded on the most recent log entry, if any.
    pub fn last_session(&self) -> Option<i64> {
        self.state().log.last().map(|entry| entry.session)
    }

    /// Sends one write and logs it with the session nonce of its reply.
    pub fn write(&self, channel: &impl WriteChannel, offset: u64, data: &[u8]) -> Result<(), Fault> {
        let mut state = self.state();
        let session = channel.write(&self.handle, offset, data)?;
        if let Some(last) = state.log.last() {
            if last.session != session {
                warn!(file = %self.handle.path, "server restarted between writes");
                state.dirty = true;
            }
        }
        state.log.push(LoggedWrite { data: data.to_vec(), offset, session });
        Ok(())
    }

    /// Flush upcall: a no-op with an empty log, otherwise a full fsync.
    pub fn flush(&self, channel: &impl WriteChannel) -> Result<(), Fault> {
        if self.state().log.is_empty() {
            return Ok(());
        }
        self.fsync(channel)
    }

    /// Makes every logged write durable.
    ///
    /// The fast path issues one Commit and checks that no entry was
    /// confirmed under a different boot than the committing one. Any
    /// discrepancy, or an already-set dirty flag, routes through replay.
    pub fn fsync(&self, channel: &impl WriteChannel) -> Result<(), Fault> {
        let mut state = self.state();
        if state.log.is_empty() {
            // Nothing buffered; still ask the server to sync the file.
            return channel.commit(&self.handle).map(drop);
        }

        if !state.dirty {
            let session = channel.commit(&self.handle)?;
            if state.log.iter().all(|entry| entry.session == session) {
                state.log.clear();
                return Ok(());
            }
            debug!(file = %self.handle.path, "commit saw a different boot, replaying");
        }
        self.replay(channel, &mut state)
    }

    /// Re-sends every logged write, commits, and proves the whole log was
    /// confirmed by the committing boot. On failure the log is left
    /// populated for the next attempt.
    fn replay(&self, channel: &impl WriteChannel, state: &mut State) -> Result<(), Fault> {
        for entry in state.log.iter_mut() {
            entry.session = channel.write(&self.handle, entry.offset, &entry.data)?;
        }
        let session = channel.commit(&self.handle)?;
        if state.log.iter().any(|entry| entry.session != session) {
            return Err(Fault::io("server restarted during replay"));
        }
        state.log.clear();
        state.dirty = false;
        Ok(())
    }

    /// Release upcall: best-effort fsync of anything outstanding, then one
    /// reference down. Returns the remaining count.
    pub fn release(&self, channel: &impl WriteChannel) -> u32 {
        if !self.state().log.is_empty() {
            if let Err(fault) = self.fsync(channel) {
                warn!(file = %self.handle.path, %fault, "flush on release failed");
            }
        }
        let mut state = self.state();
        state.refs = state.refs.saturating_sub(1);
        state.refs
    }
}
