//! Per-operation request counters.
//!
//! Incremented with relaxed atomics on the dispatch path and logged
//! periodically; a snapshot is a plain formatted line, nothing is reset.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::proto::Opcode;

#[derive(Default)]
pub struct OpCounters {
    mount: AtomicU64,
    lookup: AtomicU64,
    get_attr: AtomicU64,
    readdir: AtomicU64,
    read: AtomicU64,
    write: AtomicU64,
    commit: AtomicU64,
    create: AtomicU64,
    mkdir: AtomicU64,
    remove: AtomicU64,
    rmdir: AtomicU64,
    rename: AtomicU64,
}

impl OpCounters {
    pub fn record(&self, op: Opcode) {
        let counter = match op {
            Opcode::Null => return,
            Opcode::Mount => &self.mount,
            Opcode::Lookup => &self.lookup,
            Opcode::GetAttr => &self.get_attr,
            Opcode::Readdir => &self.readdir,
            Opcode::Read => &self.read,
            Opcode::Write => &self.write,
            Opcode::Commit => &self.commit,
            Opcode::Create => &self.create,
            Opcode::Mkdir => &self.mkdir,
            Opcode::Remove => &self.remove,
            Opcode::Rmdir => &self.rmdir,
            Opcode::Rename => &self.rename,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        [
            &self.mount,
            &self.lookup,
            &self.get_attr,
            &self.readdir,
            &self.read,
            &self.write,
            &self.commit,
            &self.create,
            &self.mkdir,
            &self.remove,
            &self.rmdir,
            &self.rename,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }
}

impl fmt::Display for OpCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mount={} lookup={} getattr={} readdir={} read={} write={} commit={} \
             create={} mkdir={} remove={} rmdir={} rename={}",
            self.mount.load(Ordering::Relaxed),
            self.lookup.load(Ordering::Relaxed),
            self.get_attr.load(Ordering::Relaxed),
            self.readdir.load(Ordering::Relaxed),
            self.read.load(Ordering::Relaxed),
            self.write.load(Ordering::Relaxed),
            self.commit.load(Ordering::Relaxed),
            self.create.load(Ordering::Relaxed),
            self.mkdir.load(Ordering::Relaxed),
            self.remove.load(Ordering::Relaxed),
            self.rmdir.load(Ordering::Relaxed),
            self.rename.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OpCounters;
    use crate::proto::Opcode;

    #[test]
    fn records_by_operation() {
        let counters = OpCounters::default();
        counters.record(Opcode::Write);
        counters.record(Opcode::Write);
        counters.record(Opcode::Commit);
        counters.record(Opcode::Null);

        assert_eq!(counters.total(), 3);
        assert!(counters.to_string().contains("write=2"));
        assert!(counters.to_string().contains("commit=1"));
    }
}
