use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sessionfs::config::ServerConfig;
use sessionfs::server::Server;

const DEFAULT_PORT: u16 = 24100;

/// Serve a directory tree to sessionfs clients.
#[derive(Parser)]
#[command(name = "sessionfs-server", version)]
struct Args {
    /// Directory to export; must exist.
    #[arg(long)]
    root: Option<PathBuf>,
    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,
    /// Optional TOML configuration file; explicit flags win.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("sessionfs-server: cannot load {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };

    let Some(root) = args.root.or(config.root) else {
        eprintln!("sessionfs-server: --root is required (flag or config file)");
        return ExitCode::from(2);
    };
    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);

    let server = match Server::new(root) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("sessionfs-server: cannot export root: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("sessionfs-server: cannot start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                eprintln!("sessionfs-server: cannot bind port {port}: {err}");
                return ExitCode::FAILURE;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining");
                let _ = shutdown_tx.send(true);
            }
        });

        match server.run(listener, shutdown_rx).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(%err, "server failed");
                ExitCode::FAILURE
            }
        }
    })
}
