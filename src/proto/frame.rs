//! Length-delimited framing.
//!
//! Each message is preceded by a `u32` byte count. The server reads frames
//! asynchronously off its tokio sockets; the client reads them with plain
//! blocking i/o, so both flavors live here and share the size limit.

use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_FRAME_LEN;

fn oversize(len: usize) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("frame of {len} bytes exceeds limit"))
}

/// Reads one frame from an async stream.
///
/// Returns `None` when the peer closed the connection cleanly at a frame
/// boundary; EOF inside a frame is an error.
pub async fn read<S: AsyncRead + Unpin>(src: &mut S) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match src.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(oversize(len));
    }
    let mut body = vec![0u8; len];
    src.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one frame to an async stream.
pub async fn write<S: AsyncWrite + Unpin>(dest: &mut S, body: &[u8]) -> io::Result<()> {
    if body.len() > MAX_FRAME_LEN {
        return Err(oversize(body.len()));
    }
    dest.write_all(&(body.len() as u32).to_be_bytes()).await?;
    dest.write_all(body).await?;
    dest.flush().await
}

/// Reads one frame with blocking i/o.
pub fn read_blocking(src: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    src.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(oversize(len));
    }
    let mut body = vec![0u8; len];
    src.read_exact(&mut body)?;
    Ok(body)
}

/// Writes one frame with blocking i/o.
pub fn write_blocking(dest: &mut impl Write, body: &[u8]) -> io::Result<()> {
    if body.len() > MAX_FRAME_LEN {
        return Err(oversize(body.len()));
    }
    dest.write_all(&(body.len() as u32).to_be_bytes())?;
    dest.write_all(body)?;
    dest.flush()
}
