//! Filesystem primitives shared across the workspace.

mod error;
mod probe;

pub use error::{Error, Result};
pub use probe::{available, DiskProbe, SysProbe};

use std::fs;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `content` to `path` through a temporary sibling and a rename,
/// so readers never observe a partial file. The targets file and feed
/// cache rewrites depend on this surviving concurrent watchers.
pub fn atomic_write(path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().ok_or_else(|| Error::Write {
        path: path.to_path_buf(),
        source: std::io::Error::other("no parent directory"),
    })?;

    let tmp_path = parent.join(format!(
        ".tmp.{}.{}.clipvault",
        process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp_path, content).map_err(|e| Error::Write {
        path: tmp_path.clone(),
        source: e,
    })?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::Write {
            path: path.to_path_buf(),
            source: e,
        }
    })?;

    Ok(())
}
