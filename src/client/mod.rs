//! Client stack: RPC channel, write cache, path adapter and FUSE bridge.

pub mod file;
pub mod fs;
pub mod fuse;
pub mod rpc;

pub use file::{OpenFile, WriteChannel};
pub use fs::RemoteFs;
pub use rpc::Channel;
