//! Video integrity checking through ffmpeg.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Decodes a whole file through ffmpeg to catch corruption or
/// truncation. With no ffmpeg path configured, validation is a no-op
/// that accepts everything.
#[derive(Debug, Clone, Default)]
pub struct FfmpegValidator {
    ffmpeg: Option<PathBuf>,
}

impl FfmpegValidator {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        Self { ffmpeg }
    }

    pub fn is_configured(&self) -> bool {
        self.ffmpeg.is_some()
    }

    /// `Ok(true)` when the file decodes cleanly, `Ok(false)` when
    /// ffmpeg rejects it, `Err` when ffmpeg cannot be run at all.
    pub async fn validate(&self, path: &Path) -> Result<bool> {
        let Some(ffmpeg) = &self.ffmpeg else {
            return Ok(true);
        };
        let output = tokio::process::Command::new(ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("null")
            .arg(NULL_SINK)
            .output()
            .await
            .map_err(|e| Error::Validation {
                path: path.to_path_buf(),
                detail: format!("could not run {}: {e}", ffmpeg.display()),
            })?;
        if output.status.success() {
            Ok(true)
        } else {
            tracing::debug!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ffmpeg rejected file"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_validator_accepts_anything() {
        let validator = FfmpegValidator::default();
        assert!(validator
            .validate(Path::new("/no/such/file.mp4"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let validator = FfmpegValidator::new(Some(PathBuf::from("/no/such/ffmpeg-zz9")));
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"not a video").unwrap();
        assert!(validator.validate(&file).await.is_err());
    }
}
