//! Free-space check used before admitting a task with a known size.

use std::path::Path;

use anyhow::{Context, Result};

/// Safety margin kept free on top of the expected payload (100 MiB).
pub const STORAGE_MARGIN_BYTES: u64 = 100 * 1024 * 1024;

/// Free bytes available to unprivileged writes on the filesystem containing
/// `path`. Uses statvfs on Unix; elsewhere the check is skipped by reporting
/// unlimited space.
#[cfg(unix)]
pub fn free_space_bytes(path: &Path) -> Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .context("path contains NUL byte")?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("statvfs failed for {}", path.display()));
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_space_bytes(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

/// Whether a transfer expecting `remaining_bytes` more data fits under the
/// free space plus margin. Unknown sizes (0) are always allowed.
pub fn has_room_for(dir: &Path, remaining_bytes: u64) -> Result<bool> {
    if remaining_bytes == 0 {
        return Ok(true);
    }
    let free = free_space_bytes(dir)?;
    Ok(free >= remaining_bytes.saturating_add(STORAGE_MARGIN_BYTES))
}
