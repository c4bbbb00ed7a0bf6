//! Blocking RPC channel to a sessionfs server.
//!
//! One TCP connection, one call in flight at a time. The channel re-dials
//! and retries a call exactly once when the connection drops mid-call;
//! the crash-replay engine depends on the next RPC after a server restart
//! reaching the new process rather than failing outright.

use std::io::{self, Cursor};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::file::WriteChannel;
use crate::proto::{frame, parser, serializer, Fault, FileHandle, Reply, Request};

/// Deadline for the initial (and any replacement) dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request socket deadline; a server that stops answering turns into
/// an `io-error` fault instead of a hang.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Channel {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    next_xid: AtomicU32,
}

impl Channel {
    /// Dials `host:port`, honoring the connection deadline.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, format!("cannot resolve {host}"))
            })?;
        let stream = Self::dial(addr)?;
        Ok(Self { addr, stream: Mutex::new(Some(stream)), next_xid: AtomicU32::new(1) })
    }

    fn dial(addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
        Ok(stream)
    }

    /// Issues one request and decodes its reply.
    ///
    /// Transport failures surface as `io-error` faults after the single
    /// reconnect attempt.
    pub fn call(&self, request: &Request) -> Result<Reply, Fault> {
        let mut guard = self
            .stream
            .lock()
            .map_err(|_| Fault::io("rpc channel poisoned by a panicked caller"))?;
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);

        if let Some(stream) = guard.as_mut() {
            match Self::exchange(stream, xid, request) {
                Ok(outcome) => return outcome,
                Err(err) => {
                    warn!(%err, "call failed, re-dialing");
                    *guard = None;
                }
            }
        }

        let mut stream = Self::dial(self.addr)
            .map_err(|err| Fault::io(format!("cannot reach server at {}: {err}", self.addr)))?;
        debug!(addr = %self.addr, "reconnected");
        let outcome = Self::exchange(&mut stream, xid, request)
            .map_err(|err| Fault::io(format!("call failed after reconnect: {err}")))?;
        *guard = Some(stream);
        outcome
    }

    fn exchange(
        stream: &mut TcpStream,
        xid: u32,
        request: &Request,
    ) -> io::Result<Result<Reply, Fault>> {
        let mut body = Vec::new();
        serializer::request(&mut body, xid, request)?;
        frame::write_blocking(stream, &body)?;

        let reply = frame::read_blocking(stream)?;
        let (reply_xid, outcome) =
            parser::reply(&mut Cursor::new(reply), request.opcode()).map_err(io::Error::from)?;
        if reply_xid != xid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("reply xid {reply_xid} does not answer request {xid}"),
            ));
        }
        Ok(outcome)
    }

    /// Calls and insists on a handle-shaped reply.
    pub fn call_handle(&self, request: &Request) -> Result<FileHandle, Fault> {
        match self.call(request)? {
            Reply::Handle(fh) => Ok(fh),
            other => Err(Fault::bad(format!("expected handle reply, got {other:?}"))),
        }
    }

    /// Calls and insists on a status-shaped reply, returning the session
    /// nonce the server stamped into it.
    pub fn call_status(&self, request: &Request) -> Result<i64, Fault> {
        match self.call(request)? {
            Reply::Status { success: true, session } => Ok(session),
            Reply::Status { success: false, .. } => {
                Err(Fault::io("server reported failure"))
            }
            other => Err(Fault::bad(format!("expected status reply, got {other:?}"))),
        }
    }
}

impl WriteChannel for Channel {
    fn write(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<i64, Fault> {
        self.call_status(&Request::Write {
            file: handle.clone(),
            offset: offset as i64,
            size: data.len() as i64,
            data: data.to_vec(),
            should_commit: false,
        })
    }

    fn commit(&self, handle: &FileHandle) -> Result<i64, Fault> {
        self.call_status(&Request::Commit { file: handle.clone() })
    }
}
