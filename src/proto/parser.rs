//! Decoding of wire messages from a byte stream.
//!
//! Free functions over `impl Read`, one layer of primitives and one
//! function per message shape. Requests are self-describing through their
//! opcode; replies are decoded against the opcode of the request they
//! answer.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use num_traits::FromPrimitive;

use super::{
    Attr, DirEntry, Error, Fault, FaultCode, FileHandle, Opcode, Reply, Request, Result,
    MAX_FRAME_LEN, MAX_NAME_LEN, MAX_PATH_LEN,
};

/// Reads a `u32` in network byte order.
pub fn u32(src: &mut impl Read) -> Result<u32> {
    Ok(src.read_u32::<BigEndian>()?)
}

/// Reads a `u64` in network byte order.
pub fn u64(src: &mut impl Read) -> Result<u64> {
    Ok(src.read_u64::<BigEndian>()?)
}

/// Reads an `i64` in network byte order.
pub fn i64(src: &mut impl Read) -> Result<i64> {
    Ok(src.read_i64::<BigEndian>()?)
}

/// Reads a boolean encoded as a `u32` `0`/`1`.
pub fn bool(src: &mut impl Read) -> Result<bool> {
    match u32(src)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Discriminant),
    }
}

/// Reads a length-prefixed byte vector, bounded by `max`.
pub fn bytes(src: &mut impl Read, max: usize) -> Result<Vec<u8>> {
    let len = u32(src)? as usize;
    if len > max {
        return Err(Error::Oversize);
    }
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads a length-prefixed UTF-8 string, bounded by `max`.
pub fn string(src: &mut impl Read, max: usize) -> Result<String> {
    String::from_utf8(bytes(src, max)?).map_err(Error::Utf8)
}

/// Reads a numeric discriminant into its enum type.
pub fn variant<T: FromPrimitive>(src: &mut impl Read) -> Result<T> {
    T::from_u32(u32(src)?).ok_or(Error::Discriminant)
}

/// Reads a file handle: path, inode, generation.
pub fn handle(src: &mut impl Read) -> Result<FileHandle> {
    Ok(FileHandle {
        path: string(src, MAX_PATH_LEN)?,
        inode: u64(src)?,
        generation: u32(src)?,
    })
}

fn name(src: &mut impl Read) -> Result<String> {
    string(src, MAX_NAME_LEN)
}

fn attr(src: &mut impl Read) -> Result<Attr> {
    Ok(Attr {
        ino: u64(src)?,
        size: u64(src)?,
        blocks: u64(src)?,
        atime: u64(src)?,
        mtime: u64(src)?,
        ctime: u64(src)?,
        atimensec: u32(src)?,
        mtimensec: u32(src)?,
        ctimensec: u32(src)?,
        mode: u32(src)?,
        nlink: u32(src)?,
        rdev: u32(src)?,
        blksize: u32(src)?,
    })
}

fn dir_entries(src: &mut impl Read) -> Result<Vec<DirEntry>> {
    let count = u32(src)? as usize;
    if count > MAX_FRAME_LEN / 8 {
        return Err(Error::Oversize);
    }
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        entries.push(DirEntry { name: name(src)?, mode: u32(src)? });
    }
    Ok(entries)
}

/// Decodes a request body: transaction id, opcode, arguments.
pub fn request(src: &mut impl Read) -> Result<(u32, Request)> {
    let xid = u32(src)?;
    let args = match variant::<Opcode>(src)? {
        Opcode::Null => Request::Null,
        Opcode::Mount => Request::Mount { root_directory: string(src, MAX_PATH_LEN)? },
        Opcode::Lookup => Request::Lookup { dir: handle(src)?, name: name(src)? },
        Opcode::GetAttr => Request::GetAttr { file: handle(src)? },
        Opcode::Readdir => Request::Readdir { dir: handle(src)? },
        Opcode::Read => Request::Read { file: handle(src)?, offset: i64(src)?, size: i64(src)? },
        Opcode::Write => Request::Write {
            file: handle(src)?,
            offset: i64(src)?,
            size: i64(src)?,
            data: bytes(src, MAX_FRAME_LEN)?,
            should_commit: bool(src)?,
        },
        Opcode::Commit => Request::Commit { file: handle(src)? },
        Opcode::Create => Request::Create { dir: handle(src)?, name: name(src)? },
        Opcode::Mkdir => Request::Mkdir { dir: handle(src)?, name: name(src)? },
        Opcode::Remove => Request::Remove { dir: handle(src)?, name: name(src)? },
        Opcode::Rmdir => Request::Rmdir { dir: handle(src)?, name: name(src)? },
        Opcode::Rename => Request::Rename {
            from_dir: handle(src)?,
            from_name: name(src)?,
            to_dir: handle(src)?,
            to_name: name(src)?,
        },
    };
    Ok((xid, args))
}

/// Decodes a reply body against the opcode of the outstanding request.
///
/// Returns the transaction id together with either the operation result or
/// the fault the server reported.
pub fn reply(
    src: &mut impl Read,
    op: Opcode,
) -> Result<(u32, std::result::Result<Reply, Fault>)> {
    let xid = u32(src)?;
    let status = u32(src)?;
    if status != 0 {
        let code = FaultCode::from_u32(status).ok_or(Error::Discriminant)?;
        let message = string(src, MAX_FRAME_LEN)?;
        return Ok((xid, Err(Fault { code, message })));
    }
    let body = match op {
        Opcode::Null => Reply::Null,
        Opcode::Mount | Opcode::Lookup | Opcode::Create | Opcode::Mkdir => {
            Reply::Handle(handle(src)?)
        }
        Opcode::GetAttr => Reply::Attr(attr(src)?),
        Opcode::Readdir => Reply::Dir(dir_entries(src)?),
        Opcode::Read => Reply::Read { data: bytes(src, MAX_FRAME_LEN)?, size: i64(src)? },
        Opcode::Write | Opcode::Commit | Opcode::Remove | Opcode::Rmdir | Opcode::Rename => {
            Reply::Status { success: bool(src)?, session: i64(src)? }
        }
    };
    Ok((xid, Ok(body)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::super::{FaultCode, Opcode, Reply, Request};

    #[test]
    fn parse_write_request() {
        #[rustfmt::skip]
        const DATA: &[u8] = &[
            0x00, 0x00, 0x00, 0x07,                         // xid 7
            0x00, 0x00, 0x00, 0x06,                         // opcode Write
            0x00, 0x00, 0x00, 0x05, b'a', b'.', b't', b'x', // handle path "a.txt"
            b't',
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x30, 0x39, // inode 12345
            0x00, 0x00, 0x00, 0x02,                         // generation 2
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, // offset 65536
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, // size 3
            0x00, 0x00, 0x00, 0x03, b'h', b'e', b'y',       // data
            0x00, 0x00, 0x00, 0x01,                         // should_commit
        ];

        let (xid, req) = super::request(&mut Cursor::new(DATA)).unwrap();
        assert_eq!(xid, 7);
        match req {
            Request::Write { file, offset, size, data, should_commit } => {
                assert_eq!(file.path, "a.txt");
                assert_eq!(file.inode, 12345);
                assert_eq!(file.generation, 2);
                assert_eq!(offset, 65536);
                assert_eq!(size, 3);
                assert_eq!(data, b"hey");
                assert!(should_commit);
            }
            other => panic!("decoded wrong request: {other:?}"),
        }
    }

    #[test]
    fn parse_status_reply() {
        #[rustfmt::skip]
        const DATA: &[u8] = &[
            0x00, 0x00, 0x00, 0x09,                         // xid 9
            0x00, 0x00, 0x00, 0x00,                         // status ok
            0x00, 0x00, 0x00, 0x01,                         // success
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0xd2, // session 1234
        ];

        let (xid, reply) = super::reply(&mut Cursor::new(DATA), Opcode::Commit).unwrap();
        assert_eq!(xid, 9);
        assert_eq!(reply.unwrap(), Reply::Status { success: true, session: 1234 });
    }

    #[test]
    fn parse_fault_reply() {
        #[rustfmt::skip]
        const DATA: &[u8] = &[
            0x00, 0x00, 0x00, 0x01,                   // xid 1
            0x00, 0x00, 0x00, 0x02,                   // status Stale
            0x00, 0x00, 0x00, 0x04, b'g', b'o', b'n', // message "gone"
            b'e',
        ];

        let (_, reply) = super::reply(&mut Cursor::new(DATA), Opcode::GetAttr).unwrap();
        let fault = reply.unwrap_err();
        assert_eq!(fault.code, FaultCode::Stale);
        assert_eq!(fault.message, "gone");
    }

    #[test]
    fn reject_oversized_name() {
        let mut body = vec![
            0x00, 0x00, 0x00, 0x01, // xid
            0x00, 0x00, 0x00, 0x02, // opcode Lookup
            0x00, 0x00, 0x00, 0x00, // handle path ""
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // inode
            0x00, 0x00, 0x00, 0x00, // generation
        ];
        body.extend_from_slice(&(300u32).to_be_bytes());
        body.extend_from_slice(&[b'x'; 300]);

        assert!(super::request(&mut Cursor::new(body)).is_err());
    }
}
