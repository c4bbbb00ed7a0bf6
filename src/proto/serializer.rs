//! Encoding of wire messages into a byte stream.
//!
//! Mirror image of [`super::parser`]: free functions over `impl Write`,
//! primitives first, then one function per message shape. Field order is
//! the protocol definition; both sides must agree on it exactly.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};
use num_traits::ToPrimitive;

use super::{Attr, DirEntry, Fault, FileHandle, Reply, Request};

/// Writes a `u32` in network byte order.
pub fn u32(dest: &mut impl Write, n: u32) -> io::Result<()> {
    dest.write_u32::<BigEndian>(n)
}

/// Writes a `u64` in network byte order.
pub fn u64(dest: &mut impl Write, n: u64) -> io::Result<()> {
    dest.write_u64::<BigEndian>(n)
}

/// Writes an `i64` in network byte order.
pub fn i64(dest: &mut impl Write, n: i64) -> io::Result<()> {
    dest.write_i64::<BigEndian>(n)
}

/// Writes a boolean as a `u32` `0`/`1`.
pub fn bool(dest: &mut impl Write, b: bool) -> io::Result<()> {
    u32(dest, b as u32)
}

/// Writes a length-prefixed byte slice.
pub fn bytes(dest: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = data
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "field exceeds u32 length"))?;
    u32(dest, len)?;
    dest.write_all(data)
}

/// Writes a length-prefixed UTF-8 string.
pub fn string(dest: &mut impl Write, s: &str) -> io::Result<()> {
    bytes(dest, s.as_bytes())
}

/// Writes an enum as its numeric discriminant.
pub fn variant<T: ToPrimitive>(dest: &mut impl Write, value: T) -> io::Result<()> {
    match value.to_u32() {
        Some(n) => u32(dest, n),
        None => Err(io::Error::new(io::ErrorKind::InvalidInput, "discriminant exceeds u32")),
    }
}

/// Writes a file handle: path, inode, generation.
pub fn handle(dest: &mut impl Write, fh: &FileHandle) -> io::Result<()> {
    string(dest, &fh.path)?;
    u64(dest, fh.inode)?;
    u32(dest, fh.generation)
}

fn attr(dest: &mut impl Write, a: &Attr) -> io::Result<()> {
    u64(dest, a.ino)?;
    u64(dest, a.size)?;
    u64(dest, a.blocks)?;
    u64(dest, a.atime)?;
    u64(dest, a.mtime)?;
    u64(dest, a.ctime)?;
    u32(dest, a.atimensec)?;
    u32(dest, a.mtimensec)?;
    u32(dest, a.ctimensec)?;
    u32(dest, a.mode)?;
    u32(dest, a.nlink)?;
    u32(dest, a.rdev)?;
    u32(dest, a.blksize)
}

fn dir_entries(dest: &mut impl Write, entries: &[DirEntry]) -> io::Result<()> {
    let count = entries
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))?;
    u32(dest, count)?;
    for entry in entries {
        string(dest, &entry.name)?;
        u32(dest, entry.mode)?;
    }
    Ok(())
}

/// Encodes a request body: transaction id, opcode, arguments.
pub fn request(dest: &mut impl Write, xid: u32, req: &Request) -> io::Result<()> {
    u32(dest, xid)?;
    variant(dest, req.opcode())?;
    match req {
        Request::Null => Ok(()),
        Request::Mount { root_directory } => string(dest, root_directory),
        Request::Lookup { dir, name }
        | Request::Create { dir, name }
        | Request::Mkdir { dir, name }
        | Request::Remove { dir, name }
        | Request::Rmdir { dir, name } => {
            handle(dest, dir)?;
            string(dest, name)
        }
        Request::GetAttr { file } | Request::Commit { file } => handle(dest, file),
        Request::Readdir { dir } => handle(dest, dir),
        Request::Read { file, offset, size } => {
            handle(dest, file)?;
            i64(dest, *offset)?;
            i64(dest, *size)
        }
        Request::Write { file, offset, size, data, should_commit } => {
            handle(dest, file)?;
            i64(dest, *offset)?;
            i64(dest, *size)?;
            bytes(dest, data)?;
            bool(dest, *should_commit)
        }
        Request::Rename { from_dir, from_name, to_dir, to_name } => {
            handle(dest, from_dir)?;
            string(dest, from_name)?;
            handle(dest, to_dir)?;
            string(dest, to_name)
        }
    }
}

/// Encodes a success reply body.
pub fn reply_ok(dest: &mut impl Write, xid: u32, body: &Reply) -> io::Result<()> {
    u32(dest, xid)?;
    u32(dest, 0)?;
    match body {
        Reply::Null => Ok(()),
        Reply::Handle(fh) => handle(dest, fh),
        Reply::Attr(a) => attr(dest, a),
        Reply::Dir(entries) => dir_entries(dest, entries),
        Reply::Read { data, size } => {
            bytes(dest, data)?;
            i64(dest, *size)
        }
        Reply::Status { success, session } => {
            bool(dest, *success)?;
            i64(dest, *session)
        }
    }
}

/// Encodes a fault reply body: fault code as the status, then the message.
pub fn reply_fault(dest: &mut impl Write, xid: u32, fault: &Fault) -> io::Result<()> {
    u32(dest, xid)?;
    variant(dest, fault.code)?;
    string(dest, &fault.message)
}
