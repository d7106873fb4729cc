//! Single-pass streaming download with incremental hashing.

use std::path::Path;
use std::sync::Arc;

use clipvault_api::CancelToken;
use clipvault_fs::DiskProbe;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::http::HttpClient;

/// Minimum free space demanded when the expected size is unknown
/// (covers, avatars, album photos).
pub const MIN_REQUIRED_DISK_SPACE: u64 = 10 * 1024 * 1024;

/// Streams URLs to disk, hashing as bytes arrive.
pub struct Downloader<C: HttpClient> {
    client: C,
    probe: Arc<dyn DiskProbe>,
}

impl<C: HttpClient> Downloader<C> {
    pub fn new(client: C, probe: Arc<dyn DiskProbe>) -> Self {
        Self { client, probe }
    }

    /// Require `max(expected, 10 MiB)` free bytes in `dir`.
    ///
    /// Failing this check is fatal for the current target run; the
    /// retry harness never retries it.
    pub fn check_disk(&self, dir: &Path, expected: u64) -> Result<()> {
        let required = expected.max(MIN_REQUIRED_DISK_SPACE);
        let available = self.probe.available(dir)?;
        if available < required {
            return Err(Error::DiskSpace {
                dir: dir.to_path_buf(),
                available,
                required,
            });
        }
        Ok(())
    }

    /// Download `url` to `dest`, returning the hex SHA-256 of the bytes
    /// written.
    ///
    /// The parent directory is created if absent. The file is written
    /// in place and removed again on any failure, so an interrupted
    /// attempt leaves nothing behind. Cancellation is observed between
    /// chunks.
    pub async fn fetch_hashed(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        cancel: &CancelToken,
    ) -> Result<String> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        create_dir_0755(dir)?;
        self.check_disk(dir, expected_size)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut stream = tokio::select! {
            stream = self.client.stream(url) => stream?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| Error::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let mut hasher = Sha256::new();

        let result: Result<()> = async {
            loop {
                let chunk = tokio::select! {
                    chunk = stream.next() => chunk,
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk).await.map_err(|e| Error::Io {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
            }
            file.flush().await.map_err(|e| Error::Io {
                path: dest.to_path_buf(),
                source: e,
            })
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Hash an existing file; used when adopting files from prior runs.
pub async fn file_sha256(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await.map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn create_dir_0755(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedProbe, ScriptedHttp};
    use tempfile::tempdir;

    #[tokio::test]
    async fn fetch_writes_file_and_returns_hash() {
        let body = b"abc".to_vec();
        let client = ScriptedHttp::serving("https://cdn.example/v.mp4", body.clone());
        let dl = Downloader::new(client, Arc::new(FixedProbe(u64::MAX)));
        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice").join("v.mp4");

        let sha = dl
            .fetch_hashed("https://cdn.example/v.mp4", &dest, 0, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), body);
        // sha256("abc")
        assert_eq!(
            sha,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn adopted_file_hash_matches_streamed_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn insufficient_space_fails_before_any_network_io() {
        let client = ScriptedHttp::failing();
        let dl = Downloader::new(client, Arc::new(FixedProbe(1024)));
        let dir = tempdir().unwrap();
        let dest = dir.path().join("v.mp4");

        let err = dl
            .fetch_hashed("https://cdn.example/v.mp4", &dest, 0, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(err.is_disk_space());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn expected_size_overrides_floor() {
        let client = ScriptedHttp::failing();
        let dl = Downloader::new(client, Arc::new(FixedProbe(20 * 1024 * 1024)));
        let dir = tempdir().unwrap();

        // 20 MiB available, 30 MiB expected: refused.
        let err = dl
            .fetch_hashed(
                "https://cdn.example/v.mp4",
                &dir.path().join("v.mp4"),
                30 * 1024 * 1024,
                &CancelToken::never(),
            )
            .await
            .unwrap_err();
        assert!(err.is_disk_space());
    }

    #[tokio::test]
    async fn failed_stream_removes_partial_file() {
        let client = ScriptedHttp::truncating("https://cdn.example/v.mp4", b"part".to_vec());
        let dl = Downloader::new(client, Arc::new(FixedProbe(u64::MAX)));
        let dir = tempdir().unwrap();
        let dest = dir.path().join("v.mp4");

        let err = dl
            .fetch_hashed("https://cdn.example/v.mp4", &dest, 0, &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Download(_)));
        assert!(!dest.exists());
    }
}
