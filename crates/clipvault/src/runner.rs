//! What a scheduler worker actually runs.

use std::sync::Arc;

use async_trait::async_trait;
use clipvault_api::{Api, CancelToken};
use clipvault_core::Archiver;
use clipvault_fetch::MediaClient;

use crate::targets::{extract_username, ParsedTarget, TargetKind};

pub type AppArchiver = Archiver<Api, MediaClient>;

/// One unit of scheduler work. The daemon and the static pool both
/// drive this seam, which is what lets scheduler tests run with a stub
/// instead of a full archiver.
#[async_trait]
pub trait TargetRunner: Send + Sync {
    async fn run(&self, target: &ParsedTarget, cancel: CancelToken) -> clipvault_core::Result<()>;
}

pub struct ArchiveRunner {
    archiver: Arc<AppArchiver>,
    force: bool,
}

impl ArchiveRunner {
    pub fn new(archiver: Arc<AppArchiver>, force: bool) -> Self {
        Self { archiver, force }
    }
}

#[async_trait]
impl TargetRunner for ArchiveRunner {
    async fn run(&self, target: &ParsedTarget, cancel: CancelToken) -> clipvault_core::Result<()> {
        match target.kind {
            TargetKind::Post => self.archiver.archive_post(&target.raw, self.force, &cancel).await,
            TargetKind::User => {
                let user = extract_username(&target.raw);
                let progress: clipvault_core::ProgressFn = {
                    let user = user.clone();
                    Arc::new(move |current, total, message| {
                        tracing::debug!(%user, current, total, message, "progress");
                    })
                };
                self.archiver
                    .archive_profile(&user, self.force, progress, &cancel)
                    .await
            }
        }
    }
}
