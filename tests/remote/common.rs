use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

use sessionfs::client::{Channel, RemoteFs};
use sessionfs::server::Server;

/// A live server on an ephemeral port, restartable in place to simulate a
/// crash between a write burst and its commit.
pub struct TestServer {
    tempdir: TempDir,
    addr: SocketAddr,
    shutdown: Option<watch::Sender<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let tempdir = TempDir::new().expect("create export root");
        let requested: SocketAddr = "127.0.0.1:0".parse().expect("parse address");
        let (addr, shutdown, thread) = spawn(tempdir.path().to_path_buf(), requested);
        Self { tempdir, addr, shutdown: Some(shutdown), thread: Some(thread) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute host path beneath the export root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.tempdir.path().join(rel)
    }

    pub fn write_file(&self, rel: &str, data: &[u8]) {
        std::fs::write(self.path(rel), data).expect("seed fixture file");
    }

    pub fn channel(&self) -> Channel {
        Channel::connect("127.0.0.1", self.addr.port()).expect("dial server")
    }

    pub fn remote_fs(&self) -> RemoteFs {
        RemoteFs::mount(self.channel()).expect("mount export")
    }

    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(thread) = self.thread.take() {
            thread.join().expect("server thread");
        }
    }

    /// Stops the server and boots a fresh process image on the same port;
    /// the new boot draws a new session nonce.
    pub fn restart(&mut self) {
        self.stop();
        let (addr, shutdown, thread) = spawn(self.tempdir.path().to_path_buf(), self.addr);
        self.addr = addr;
        self.shutdown = Some(shutdown);
        self.thread = Some(thread);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(root: PathBuf, addr: SocketAddr) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (addr_tx, addr_rx) = mpsc::channel();

    let thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("build runtime");
        runtime.block_on(async move {
            let listener = bind_with_retry(addr).await;
            addr_tx.send(listener.local_addr().expect("local addr")).expect("report addr");
            let server = Server::new(root).expect("prepare export");
            server.run(listener, shutdown_rx).await.expect("serve");
        });
    });

    let bound = addr_rx.recv_timeout(Duration::from_secs(10)).expect("server came up");
    (bound, shutdown_tx, thread)
}

/// Rebinding the port right after a restart can race the old socket.
async fn bind_with_retry(addr: SocketAddr) -> TcpListener {
    for _ in 0..50 {
        match TcpListener::bind(addr).await {
            Ok(listener) => return listener,
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("cannot bind {addr}");
}

#[allow(dead_code)]
pub fn mount_root(channel: &Channel) -> sessionfs::proto::FileHandle {
    channel
        .call_handle(&sessionfs::proto::Request::Mount { root_directory: "/".to_owned() })
        .expect("mount")
}
