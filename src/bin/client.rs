use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sessionfs::client::{fuse, Channel, RemoteFs};
use sessionfs::config::ClientConfig;

const DEFAULT_PORT: u16 = 24100;
const DEFAULT_SERVER: &str = "127.0.0.1";

/// Mount a sessionfs export through FUSE.
#[derive(Parser)]
#[command(name = "sessionfs-client", version)]
struct Args {
    /// Server host name or address.
    #[arg(long)]
    server: Option<String>,
    /// Server TCP port.
    #[arg(long)]
    port: Option<u16>,
    /// Local mount point; must exist.
    #[arg(long)]
    mount: Option<PathBuf>,
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
        Some(path) => match ClientConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("sessionfs-client: cannot load {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ClientConfig::default(),
    };

    let server = args.server.or(config.server).unwrap_or_else(|| DEFAULT_SERVER.to_owned());
    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);
    let Some(mount_point) = args.mount.or(config.mount) else {
        eprintln!("sessionfs-client: --mount is required (flag or config file)");
        return ExitCode::from(2);
    };

    let channel = match Channel::connect(&server, port) {
        Ok(channel) => channel,
        Err(err) => {
            eprintln!("sessionfs-client: cannot reach {server}:{port}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let fs = match RemoteFs::mount(channel) {
        Ok(fs) => fs,
        Err(fault) => {
            eprintln!("sessionfs-client: mount rpc failed: {fault}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = fuse::mount(fs, &mount_point) {
        eprintln!("sessionfs-client: cannot mount at {}: {err}", mount_point.display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
