//! Host-specific (inode, generation) lookup.
//!
//! The generation number is the host filesystem's inode-reuse counter. On
//! Linux it is read with the `FS_IOC_GETVERSION` ioctl on a read-only
//! descriptor; on macOS `stat` reports it directly (0 for unprivileged
//! callers). A generation of 0 means "unavailable" and degrades handle
//! verification to inode equality.

use std::io;
use std::path::Path;

/// Returns the live (inode, generation) pair for `path`.
#[cfg(target_os = "linux")]
pub fn inode_and_generation(path: &Path) -> io::Result<(u64, u32)> {
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::MetadataExt;

    // _IOR('v', 1, long)
    const FS_IOC_GETVERSION: libc::c_ulong = (2 << 30)
        | ((std::mem::size_of::<libc::c_long>() as libc::c_ulong) << 16)
        | ((b'v' as libc::c_ulong) << 8)
        | 1;

    let file = File::open(path)?;
    let inode = file.metadata()?.ino();

    let mut generation: libc::c_long = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), FS_IOC_GETVERSION, &mut generation) };
    if rc != 0 {
        // Filesystems without version support reject the ioctl, as do some
        // kernels for unprivileged callers; identity then rests on the inode.
        return Ok((inode, 0));
    }
    Ok((inode, generation as u32))
}

/// Returns the live (inode, generation) pair for `path`.
#[cfg(target_os = "macos")]
pub fn inode_and_generation(path: &Path) -> io::Result<(u64, u32)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(cpath.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((st.st_ino, st.st_gen))
}

/// Returns the live (inode, generation) pair for `path`.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn inode_and_generation(path: &Path) -> io::Result<(u64, u32)> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path)?;
    Ok((meta.ino(), 0))
}
