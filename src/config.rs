//! Optional TOML configuration backing the command-line flags.
//!
//! Every field mirrors a flag; explicit flags always win over file values.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> io::Result<T> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Directory tree to export.
    pub root: Option<PathBuf>,
    /// TCP port to listen on.
    pub port: Option<u16>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        load(path)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server host name or address.
    pub server: Option<String>,
    /// Server TCP port.
    pub port: Option<u16>,
    /// Local mount point.
    pub mount: Option<PathBuf>,
}

impl ClientConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        load(path)
    }
}
