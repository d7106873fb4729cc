//! Free-space probing, used as a pre-check before downloads.

use std::path::Path;

use crate::error::Result;

/// Reports bytes available to the effective user at a path.
///
/// Implementations never mutate anything; [`SysProbe`] asks the OS,
/// tests substitute fixed answers.
pub trait DiskProbe: Send + Sync {
    fn available(&self, path: &Path) -> Result<u64>;
}

/// The operating system's answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysProbe;

impl DiskProbe for SysProbe {
    fn available(&self, path: &Path) -> Result<u64> {
        available(path)
    }
}

/// Bytes available to the (non-root) user on the filesystem at `path`.
#[cfg(unix)]
pub fn available(path: &Path) -> Result<u64> {
    use crate::error::Error;

    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| Error::Probe {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(windows)]
pub fn available(path: &Path) -> Result<u64> {
    use crate::error::Error;
    use windows::core::HSTRING;
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let mut free_bytes = 0u64;
    unsafe {
        GetDiskFreeSpaceExW(
            &HSTRING::from(path.as_os_str()),
            Some(&mut free_bytes as *mut u64),
            None,
            None,
        )
    }
    .map_err(|e| Error::Probe {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(free_bytes)
}

#[cfg(not(any(unix, windows)))]
pub fn available(_path: &Path) -> Result<u64> {
    Err(crate::error::Error::UnsupportedPlatform)
}
