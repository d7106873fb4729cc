//! Process-global request spacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Default spacing between upstream requests.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(1250);

/// Enforces a minimum interval between permits.
///
/// The first `acquire` after construction resolves immediately; later
/// calls resolve at least one interval after the previous permit was
/// handed out. Waiters queue on the internal mutex (FIFO under tokio),
/// so none can be starved under bounded concurrency. One instance is
/// shared by every upstream call in the process.
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    shutdown: CancelToken,
}

impl RateLimiter {
    pub fn new(interval: Duration, shutdown: CancelToken) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            shutdown,
        }
    }

    /// Block until a permit is available.
    ///
    /// Fails with [`Error::Cancelled`] once the owning scope shuts
    /// down, including for acquirers already waiting.
    pub async fn acquire(&self) -> Result<()> {
        let mut last = tokio::select! {
            guard = self.last.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
        };
        if let Some(prev) = *last {
            let due = prev + self.interval;
            let now = Instant::now();
            if due > now {
                tokio::select! {
                    _ = sleep(due - now) => {}
                    _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}
