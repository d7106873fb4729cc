//! Dynamic mode: a file-watched scheduler over the targets file.
//!
//! The manager keeps the top-N priority targets continuously active:
//! edits to the targets file (debounced, rename-safe because the
//! parent directory is watched) trigger a reconcile that cancels
//! de-prioritized in-flight work and tops workers back up. Completed
//! targets move below the marker line; when nothing is left to do the
//! manager drops to a low-frequency poll.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clipvault_api::{cancel_pair, CancelToken, Canceller};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::runner::TargetRunner;
use crate::targets::{self, parse_target};

const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub targets_file: PathBuf,
    pub max_workers: usize,
    pub poll_interval: Duration,
}

struct ActiveTask {
    canceller: Canceller,
    handle: JoinHandle<()>,
}

/// The dynamic scheduler. One instance owns the watcher, the active
/// task map, and the (1-slot) reconcile trigger; reconciles are
/// serialized through the event loop, so no two ever overlap.
pub struct TargetManager {
    cfg: DaemonConfig,
    runner: Arc<dyn TargetRunner>,
    shutdown: CancelToken,
    active: HashMap<String, ActiveTask>,
    /// Cancelled tasks drain here so shutdown can join every worker.
    draining: Vec<JoinHandle<()>>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Option<mpsc::Receiver<()>>,
    results_tx: mpsc::UnboundedSender<String>,
    results_rx: Option<mpsc::UnboundedReceiver<String>>,
    file_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TargetManager {
    pub fn new(cfg: DaemonConfig, runner: Arc<dyn TargetRunner>, shutdown: CancelToken) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            runner,
            shutdown,
            active: HashMap::new(),
            draining: Vec::new(),
            trigger_tx,
            trigger_rx: Some(trigger_rx),
            results_tx,
            results_rx: Some(results_rx),
            file_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Fire the reconcile trigger; a pending trigger absorbs the signal.
    fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let watch_dir = self
            .cfg
            .targets_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_dir)
            .with_context(|| format!("creating targets directory {}", watch_dir.display()))?;
        {
            let _guard = self.file_lock.lock().await;
            targets::initialize_file(&self.cfg.targets_file).context("initializing targets file")?;
        }

        // Watch the parent directory so atomic-save renames of the file
        // itself keep delivering events.
        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        let _ = fs_tx.send(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "file watcher error"),
                }
            })
            .context("creating file watcher")?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", watch_dir.display()))?;

        tracing::info!(
            file = %self.cfg.targets_file.display(),
            workers = self.cfg.max_workers,
            "daemon started, watching targets file"
        );
        let mut trigger_rx = self
            .trigger_rx
            .take()
            .context("target manager is already running")?;
        let mut results_rx = self
            .results_rx
            .take()
            .context("target manager is already running")?;
        let shutdown = self.shutdown.clone();
        self.trigger();

        loop {
            tokio::select! {
                Some(()) = trigger_rx.recv() => {
                    self.reconcile().await;
                }
                Some(event) = fs_rx.recv() => {
                    if !self.is_relevant(&event) {
                        continue;
                    }
                    tracing::debug!(?event, "targets file changed");
                    sleep(DEBOUNCE).await;
                    // Coalesce the burst an editor save produces.
                    while fs_rx.try_recv().is_ok() {}
                    self.trigger();
                }
                Some(done) = results_rx.recv() => {
                    // A completion may come from a cancelled task whose
                    // handle already moved to the drain list.
                    self.draining.retain(|handle| !handle.is_finished());
                    if let Some(task) = self.active.remove(&done) {
                        let _ = task.handle.await;
                        self.trigger();
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("daemon shutting down");
        for (target, task) in self.active.drain() {
            tracing::debug!(%target, "cancelling active task");
            task.canceller.cancel();
            let _ = task.handle.await;
        }
        for handle in self.draining.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }

    fn is_relevant(&self, event: &notify::Event) -> bool {
        use notify::EventKind;
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        let name = self.cfg.targets_file.file_name();
        event.paths.iter().any(|p| p.file_name() == name)
    }

    /// Compare the priority set against the active map: cancel what
    /// fell out, start what is missing, up to the worker bound.
    async fn reconcile(&mut self) {
        let lines = match targets::read_lines(&self.cfg.targets_file) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::error!(error = %e, "failed to read targets file");
                return;
            }
        };
        let priority = targets::priority_targets(&lines);

        let stale: Vec<String> = self
            .active
            .keys()
            .filter(|running| !priority.iter().any(|t| t == *running))
            .cloned()
            .collect();
        for target in stale {
            if let Some(task) = self.active.remove(&target) {
                tracing::info!(%target, "target de-prioritized, cancelling");
                task.canceller.cancel();
                self.draining.push(task.handle);
            }
        }

        if priority.is_empty() && self.active.is_empty() {
            self.enter_idle_poll();
            return;
        }

        for target in priority {
            if self.active.len() >= self.cfg.max_workers {
                break;
            }
            if self.active.contains_key(&target) {
                continue;
            }
            tracing::info!(%target, "starting task for priority target");
            self.spawn_worker(target);
        }
    }

    fn spawn_worker(&mut self, target: String) {
        let (canceller, token) = cancel_pair();
        let runner = Arc::clone(&self.runner);
        let results = self.results_tx.clone();
        let file = self.cfg.targets_file.clone();
        let file_lock = Arc::clone(&self.file_lock);

        let worker_target = target.clone();
        let handle = tokio::spawn(async move {
            let parsed = parse_target(&worker_target);
            match runner.run(&parsed, token).await {
                Ok(()) => {
                    tracing::info!(target = %worker_target, "target finished");
                    let _guard = file_lock.lock().await;
                    mark_completed(&file, &worker_target);
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(target = %worker_target, "task cancelled");
                }
                Err(e) => {
                    tracing::error!(target = worker_target, error = %e, "target failed");
                }
            }
            let _ = results.send(worker_target);
        });

        self.active.insert(target, ActiveTask { canceller, handle });
    }

    /// Nothing to do: wait one poll interval, re-assert the marker, and
    /// reconcile again so externally edited targets re-enter.
    fn enter_idle_poll(&self) {
        let poll = self.cfg.poll_interval;
        let file = self.cfg.targets_file.clone();
        let file_lock = Arc::clone(&self.file_lock);
        let trigger = self.trigger_tx.clone();
        let shutdown = self.shutdown.clone();
        tracing::info!(secs = poll.as_secs(), "all targets processed, entering idle poll");

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(poll) => {
                    {
                        let _guard = file_lock.lock().await;
                        if let Err(e) = targets::initialize_file(&file) {
                            tracing::error!(error = %e, "failed to re-initialize targets file");
                        }
                    }
                    let _ = trigger.try_send(());
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

/// Move a finished target's line below the marker. The rewrite itself
/// wakes the watcher, which is expected and idempotent.
fn mark_completed(path: &Path, target: &str) {
    let lines = match targets::read_lines(path) {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(error = %e, "could not read targets file to record completion");
            return;
        }
    };
    let Some(content) = targets::move_below_marker(lines, target) else {
        tracing::debug!(%target, "target no longer in file");
        return;
    };
    if let Err(e) = clipvault_fs::atomic_write(path, content.as_bytes()) {
        tracing::warn!(error = %e, "could not rewrite targets file");
    }
}
