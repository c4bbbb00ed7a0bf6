//! Wire protocol for the sessionfs RPC surface.
//!
//! Every message travels in a length-delimited frame over TCP. A request
//! body carries a transaction id, a numeric opcode and the operation's
//! arguments in fixed field order; a reply body carries the transaction id,
//! a status discriminant and either the operation's result or a fault code
//! with a message. All integers are big-endian.

pub mod frame;
pub mod parser;
pub mod serializer;

use std::fmt;
use std::io;
use std::string::FromUtf8Error;

use num_derive::{FromPrimitive, ToPrimitive};

/// Result of protocol decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of a single name component in directory operations.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of an export-root-relative path carried in a handle.
pub const MAX_PATH_LEN: usize = 1024;

/// Upper bound on a frame body. Caps write payloads and directory listings.
pub const MAX_FRAME_LEN: usize = 8 << 20;

/// Protocol decoding errors.
#[derive(Debug)]
pub enum Error {
    /// Transport failure while reading a message.
    Io(io::Error),
    /// A discriminant (opcode, fault code, boolean) had no known mapping.
    Discriminant,
    /// A string field was not valid UTF-8.
    Utf8(FromUtf8Error),
    /// A length field exceeded its limit.
    Oversize,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o failure: {err}"),
            Error::Discriminant => write!(f, "unknown discriminant"),
            Error::Utf8(err) => write!(f, "malformed string field: {err}"),
            Error::Oversize => write!(f, "length field exceeds limit"),
        }
    }
}

/// Numeric operation tags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Opcode {
    Null = 0,
    Mount = 1,
    Lookup = 2,
    GetAttr = 3,
    Readdir = 4,
    Read = 5,
    Write = 6,
    Commit = 7,
    Create = 8,
    Mkdir = 9,
    Remove = 10,
    Rmdir = 11,
    Rename = 12,
}

/// Fault codes surfaced in error replies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FaultCode {
    /// A path component does not exist.
    NotFound = 1,
    /// The handle's (inode, generation) no longer matches the live file.
    Stale = 2,
    /// A host syscall failed.
    Io = 3,
    /// The operation or an argument is not acceptable.
    Inval = 4,
    /// The operation is not implemented by the service.
    Unsupported = 5,
    /// The request itself could not be understood.
    Bad = 6,
}

/// An RPC error: a fault code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FaultCode::NotFound, message)
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Stale, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Io, message)
    }

    pub fn bad(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Bad, message)
    }

    /// Translates a host i/o failure, keeping "does not exist" distinct.
    pub fn from_host(err: &io::Error, context: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(format!("{context}: {err}")),
            _ => Self::io(format!("{context}: {err}")),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {}

/// Server-issued file identity: export-root-relative path plus the host
/// filesystem's (inode, generation) pair observed at issue time.
///
/// Opaque to clients; produced by Mount/Lookup/Create/Mkdir and consumed by
/// every other operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: String,
    pub inode: u64,
    pub generation: u32,
}

/// Wire attribute record. Owner is deliberately absent; the client stamps
/// its own process uid/gid when answering the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub rdev: u32,
    pub blksize: u32,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub mode: u32,
}

/// A decoded request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Null,
    Mount {
        /// Advisory; the server exports its configured root regardless.
        root_directory: String,
    },
    Lookup {
        dir: FileHandle,
        name: String,
    },
    GetAttr {
        file: FileHandle,
    },
    Readdir {
        dir: FileHandle,
    },
    Read {
        file: FileHandle,
        offset: i64,
        size: i64,
    },
    Write {
        file: FileHandle,
        offset: i64,
        size: i64,
        data: Vec<u8>,
        should_commit: bool,
    },
    Commit {
        file: FileHandle,
    },
    Create {
        dir: FileHandle,
        name: String,
    },
    Mkdir {
        dir: FileHandle,
        name: String,
    },
    Remove {
        dir: FileHandle,
        name: String,
    },
    Rmdir {
        dir: FileHandle,
        name: String,
    },
    Rename {
        from_dir: FileHandle,
        from_name: String,
        to_dir: FileHandle,
        to_name: String,
    },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Null => Opcode::Null,
            Request::Mount { .. } => Opcode::Mount,
            Request::Lookup { .. } => Opcode::Lookup,
            Request::GetAttr { .. } => Opcode::GetAttr,
            Request::Readdir { .. } => Opcode::Readdir,
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::Commit { .. } => Opcode::Commit,
            Request::Create { .. } => Opcode::Create,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Remove { .. } => Opcode::Remove,
            Request::Rmdir { .. } => Opcode::Rmdir,
            Request::Rename { .. } => Opcode::Rename,
        }
    }
}

/// A decoded success reply body. The shape is implied by the opcode of the
/// request it answers; the wire carries no separate reply tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Null,
    /// Mount, Lookup, Create and Mkdir results.
    Handle(FileHandle),
    /// GetAttr result.
    Attr(Attr),
    /// Readdir result, in host enumeration order.
    Dir(Vec<DirEntry>),
    /// Read result; `size` is the actual byte count (short at EOF).
    Read { data: Vec<u8>, size: i64 },
    /// Write, Commit and the namespace mutations. `session` is the server's
    /// boot nonce, the client's restart detector.
    Status { success: bool, session: i64 },
}
