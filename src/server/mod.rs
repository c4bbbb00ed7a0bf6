//! Server process: listener, session nonce, dispatch and lifecycle.
//!
//! Each accepted connection is split into a frame-reading loop, one task
//! per in-flight request, and a single writer task that owns the outbound
//! half of the socket; replies funnel through an mpsc channel so concurrent
//! handlers never interleave frames. The server itself keeps no mutable
//! state beyond the per-boot session nonce (immutable after startup) and
//! the operation counters.

pub mod counters;
pub mod handlers;

use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::proto::{self, frame, parser, serializer, Fault};
use handlers::Export;

/// How often the operation counters are logged while the server runs.
const COUNTER_INTERVAL: Duration = Duration::from_secs(60);

/// Derives the per-boot 63-bit session nonce from the wall clock.
///
/// Any difference between two nonces means "different boot"; identity means
/// "same boot". It is never persisted and never compared for order.
fn session_nonce() -> i64 {
    let seed =
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    // splitmix64 finalizer over the raw timestamp
    let mut z = seed.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^= z >> 31;
    (z & i64::MAX as u64) as i64
}

/// The server: an export root plus a fresh session nonce.
pub struct Server {
    export: Arc<Export>,
}

impl Server {
    /// Prepares a server for `root`. Fails if the root cannot be stat'ed or
    /// is not a directory.
    pub fn new(root: PathBuf) -> io::Result<Self> {
        let meta = std::fs::metadata(&root)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("export root {root:?} is not a directory"),
            ));
        }
        let session = session_nonce();
        info!(?root, session, "export prepared");
        Ok(Self { export: Arc::new(Export::new(root, session)) })
    }

    /// The nonce clients use to detect this boot.
    pub fn session(&self) -> i64 {
        self.export.session()
    }

    /// Accepts and serves connections until `shutdown` flips to true, then
    /// drains in-flight work and returns.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let mut connections = JoinSet::new();
        let mut ticker = tokio::time::interval(COUNTER_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately; skip it

        info!(addr = ?listener.local_addr().ok(), "listening");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    info!(counters = %self.export.counters, "operation counters");
                }
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    socket.set_nodelay(true)?;
                    debug!(%peer, "connection accepted");
                    connections.spawn(serve_connection(
                        self.export.clone(),
                        socket,
                        shutdown.clone(),
                    ));
                }
            }
        }

        drop(listener);
        info!(total = self.export.counters.total(), "draining connections");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

/// Serves one connection until the peer hangs up or shutdown is signalled.
async fn serve_connection(
    export: Arc<Export>,
    socket: TcpStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut read_half, write_half) = socket.into_split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(write_replies(write_half, reply_rx));

    let mut requests = JoinSet::new();
    loop {
        // Reap finished request tasks so the set stays small on
        // long-lived connections.
        while requests.try_join_next().is_some() {}

        let body = tokio::select! {
            _ = shutdown.changed() => break,
            read = frame::read(&mut read_half) => match read {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "dropping connection");
                    break;
                }
            },
        };

        match parser::request(&mut Cursor::new(&body)) {
            Ok((xid, request)) => {
                let export = export.clone();
                let reply_tx = reply_tx.clone();
                requests.spawn(async move {
                    let result = export.dispatch(request).await;
                    let _ = reply_tx.send(encode_reply(xid, &result));
                });
            }
            Err(err) => {
                // Framing isolates messages, so a bad body poisons only
                // itself; answer with a fault if the xid survived.
                warn!(%err, "unparseable request");
                if body.len() >= 4 {
                    let xid = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    let fault = Fault::bad(format!("unparseable request: {err}"));
                    let _ = reply_tx.send(encode_reply(xid, &Err(fault)));
                }
            }
        }
    }

    while requests.join_next().await.is_some() {}
    drop(reply_tx);
    if let Err(err) = writer.await {
        error!(%err, "reply writer failed");
    }
}

fn encode_reply(xid: u32, result: &Result<proto::Reply, Fault>) -> Vec<u8> {
    let mut body = Vec::new();
    let encoded = match result {
        Ok(reply) => serializer::reply_ok(&mut body, xid, reply),
        Err(fault) => serializer::reply_fault(&mut body, xid, fault),
    };
    if let Err(err) = encoded {
        // Writing into a Vec cannot fail short of allocation trouble.
        error!(%err, "reply encoding failed");
        body.clear();
        let _ = serializer::reply_fault(&mut body, xid, &Fault::io("reply encoding failed"));
    }
    body
}

async fn write_replies(mut dest: OwnedWriteHalf, mut replies: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(body) = replies.recv().await {
        if let Err(err) = frame::write(&mut dest, &body).await {
            debug!(%err, "reply write failed, peer gone");
            break;
        }
    }
}
