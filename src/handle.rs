//! File-handle construction and verification.
//!
//! A handle binds an export-root-relative path to the (inode, generation)
//! pair observed when it was issued. The server holds no per-handle state:
//! verification resolves the path against the live filesystem and compares
//! identities on every call. A handle survives server restarts and goes
//! stale when its target is removed, renamed away, or its inode slot is
//! reused.

use std::path::{Component, Path, PathBuf};

use crate::platform;
use crate::proto::{Fault, FaultCode, FileHandle};

/// Result alias for handle operations; failures are wire-ready faults.
pub type Result<T> = std::result::Result<T, Fault>;

/// Checks that `name` is a single normal path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > crate::proto::MAX_NAME_LEN {
        return Err(Fault::new(FaultCode::Inval, format!("bad name length {}", name.len())));
    }
    let mut components = Path::new(name).components();
    if !matches!(components.next(), Some(Component::Normal(_))) || components.next().is_some() {
        return Err(Fault::new(FaultCode::Inval, format!("name {name:?} is not a single segment")));
    }
    Ok(())
}

/// Appends a validated child name to a handle-relative path.
pub fn join_child(parent: &str, name: &str) -> Result<String> {
    validate_name(name)?;
    if parent.is_empty() {
        Ok(name.to_owned())
    } else {
        Ok(format!("{parent}/{name}"))
    }
}

/// Checks a handle path: relative, normal components only, bounded length.
///
/// Handles arrive from the network; a path that climbs out of the export
/// root is rejected before it touches the filesystem.
fn validate_rel(path: &str) -> Result<()> {
    if path.len() > crate::proto::MAX_PATH_LEN {
        return Err(Fault::new(FaultCode::Inval, "handle path too long"));
    }
    for component in Path::new(path).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(Fault::new(FaultCode::Inval, format!("handle path {path:?} is not clean")));
        }
    }
    Ok(())
}

/// Resolves a handle-relative path beneath the export root.
pub fn full_path(export_root: &Path, rel: &str) -> Result<PathBuf> {
    validate_rel(rel)?;
    if rel.is_empty() {
        Ok(export_root.to_path_buf())
    } else {
        Ok(export_root.join(rel))
    }
}

/// Issues a handle for an existing file: records its live identity.
pub fn issue(export_root: &Path, rel: &str) -> Result<FileHandle> {
    let abs = full_path(export_root, rel)?;
    let (inode, generation) = platform::inode_and_generation(&abs)
        .map_err(|err| Fault::from_host(&err, rel))?;
    Ok(FileHandle { path: rel.to_owned(), inode, generation })
}

/// Verifies a handle against the live filesystem and returns the resolved
/// absolute path.
///
/// A handle is valid iff its path still exists and the live (inode,
/// generation) matches what the handle recorded: either mismatch means
/// stale. A generation of 0 on either side marks the counter unavailable
/// and the comparison degrades to inode equality.
pub fn verify(export_root: &Path, handle: &FileHandle) -> Result<PathBuf> {
    let abs = full_path(export_root, &handle.path)?;
    let (inode, generation) =
        platform::inode_and_generation(&abs).map_err(|err| Fault::from_host(&err, &handle.path))?;

    let inode_matches = inode == handle.inode;
    let generation_matches =
        generation == 0 || handle.generation == 0 || generation == handle.generation;
    if !inode_matches || !generation_matches {
        return Err(Fault::stale(format!(
            "handle for {:?} recorded (ino {}, gen {}), live file is (ino {}, gen {})",
            handle.path, handle.inode, handle.generation, inode, generation
        )));
    }
    Ok(abs)
}
