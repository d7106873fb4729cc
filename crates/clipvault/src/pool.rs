//! Static mode: a bounded worker pool over a fixed target list.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipvault_api::CancelToken;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::runner::TargetRunner;
use crate::targets::{self, parse_target};

/// Process every target with at most `max_workers` in flight.
///
/// Disk-space exhaustion halts further submissions and surfaces as the
/// pool's result; other failures are logged per target. When the
/// targets came from a file, each success rewrites it under the legacy
/// rule (posts commented out, users moved to the end).
pub async fn run_static(
    runner: Arc<dyn TargetRunner>,
    targets: Vec<String>,
    targets_file: Option<PathBuf>,
    max_workers: usize,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    tracing::info!(
        targets = targets.len(),
        workers = max_workers,
        "processing targets in static mode"
    );

    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let halted = Arc::new(AtomicBool::new(false));
    let file_lock = Arc::new(Mutex::new(()));
    let mut workers = JoinSet::new();

    for target in targets {
        let permit = semaphore.clone().acquire_owned().await?;
        // Re-check after the wait: an in-flight worker may have hit
        // disk exhaustion while we queued for a slot.
        if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }
        let runner = Arc::clone(&runner);
        let halted = Arc::clone(&halted);
        let file_lock = Arc::clone(&file_lock);
        let targets_file = targets_file.clone();
        let cancel = cancel.clone();

        workers.spawn(async move {
            let _permit = permit;
            let parsed = parse_target(&target);
            match runner.run(&parsed, cancel).await {
                Ok(()) => {
                    tracing::info!(%target, "target finished");
                    if let Some(path) = targets_file {
                        let _guard = file_lock.lock().await;
                        update_after_success(&path, &target, parsed.kind);
                    }
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(%target, "target cancelled");
                }
                Err(e) if e.is_disk_space() => {
                    tracing::error!(%target, error = %e, "disk space exhausted, halting");
                    halted.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::error!(%target, error = %e, "failed to process target");
                }
            }
        });
    }

    while workers.join_next().await.is_some() {}

    if halted.load(Ordering::SeqCst) {
        anyhow::bail!("insufficient disk space");
    }
    Ok(())
}

fn update_after_success(path: &std::path::Path, target: &str, kind: targets::TargetKind) {
    let lines = match targets::read_lines(path) {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read targets file");
            return;
        }
    };
    let Some(content) = targets::legacy_update(lines, target, kind) else {
        tracing::info!(%target, "target not found in file, leaving it unchanged");
        return;
    };
    if let Err(e) = clipvault_fs::atomic_write(path, content.as_bytes()) {
        tracing::warn!(path = %path.display(), error = %e, "could not update targets file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::ParsedTarget;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingRunner {
        seen: StdMutex<Vec<String>>,
        disk_space_on: Option<String>,
    }

    #[async_trait]
    impl TargetRunner for RecordingRunner {
        async fn run(
            &self,
            target: &ParsedTarget,
            _cancel: CancelToken,
        ) -> clipvault_core::Result<()> {
            self.seen.lock().unwrap().push(target.raw.clone());
            if self.disk_space_on.as_deref() == Some(target.raw.as_str()) {
                return Err(clipvault_core::Error::Fetch(
                    clipvault_fetch::Error::DiskSpace {
                        dir: "/tmp".into(),
                        available: 0,
                        required: 1,
                    },
                ));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn all_targets_run_and_file_is_updated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("targets.txt");
        std::fs::write(&file, "u1\nu2\n").unwrap();

        let runner = Arc::new(RecordingRunner {
            seen: StdMutex::new(Vec::new()),
            disk_space_on: None,
        });
        run_static(
            runner.clone(),
            vec!["u1".into(), "u2".into()],
            Some(file.clone()),
            2,
            CancelToken::never(),
        )
        .await
        .unwrap();

        let mut seen = runner.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["u1", "u2"]);
        // Users are moved to the end on success; both finished, so both
        // lines are still present.
        let content = std::fs::read_to_string(&file).unwrap();
        assert!(content.contains("u1"));
        assert!(content.contains("u2"));
    }

    #[tokio::test]
    async fn disk_space_halts_submissions() {
        let runner = Arc::new(RecordingRunner {
            seen: StdMutex::new(Vec::new()),
            disk_space_on: Some("u1".into()),
        });
        // One worker: u1 fails with disk space before u2 is submitted.
        let result = run_static(
            runner.clone(),
            vec!["u1".into(), "u2".into(), "u3".into()],
            None,
            1,
            CancelToken::never(),
        )
        .await;

        assert!(result.is_err());
        let seen = runner.seen.lock().unwrap().clone();
        assert!(seen.len() < 3, "submissions should halt, saw {seen:?}");
    }
}
