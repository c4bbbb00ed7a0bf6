//! sessionfs: a session-aware user-space network file system.
//!
//! A server process exports an on-disk directory tree over a framed TCP
//! RPC protocol with NFSv3-style stateless semantics; a client process
//! mounts it through FUSE. The one extension over classic statelessness:
//! every mutating reply carries the server's per-boot session nonce, and
//! the client keeps a per-open-file log of uncommitted writes that it
//! replays transparently when the nonce reveals a server restart between a
//! write burst and its commit.

pub mod attr;
pub mod client;
pub mod config;
pub mod handle;
pub mod platform;
pub mod proto;
pub mod server;
