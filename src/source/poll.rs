//! Periodic `stat()` polling.

use crate::error::{SetupError, SourceError};
use crate::prelude::debug;
use crate::source::{EventSender, SourceFuture, WatchSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum PollMode {
    Stat,
    EveryTick,
}

/// Requests reloads on a fixed interval.
///
/// By default a reload is requested only when the size or modification time
/// reported by `stat()` differs from the previous tick. This follows symlinks,
/// so a swapped link target is noticed too. With
/// [`reload_every_tick`](Self::reload_every_tick) every tick requests a reload,
/// which is useful on file systems without reliable timestamps.
#[derive(Debug, Clone)]
pub struct PollSource {
    path: PathBuf,
    period: Duration,
    mode: PollMode,
}

impl PollSource {
    /// Creates a source polling `path` every `period`.
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            path: path.into(),
            period,
            mode: PollMode::Stat,
        }
    }

    /// Requests a reload on every tick instead of comparing `stat()` results.
    #[must_use]
    pub fn reload_every_tick(mut self) -> Self {
        self.mode = PollMode::EveryTick;
        self
    }

    /// Returns the polled path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the polling period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl WatchSource for PollSource {
    fn attach(self: Box<Self>, events: EventSender) -> Result<SourceFuture, SetupError> {
        if self.period.is_zero() {
            return Err(SetupError::custom(ZeroPeriod));
        }
        Ok(Box::pin(poll_loop(*self, events)))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("poll period must be greater than zero")]
struct ZeroPeriod;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

fn fingerprint(path: &Path) -> Result<Fingerprint, SourceError> {
    let meta = std::fs::metadata(path).map_err(|e| SourceError::Stat {
        path: path.to_path_buf(),
        source: Arc::new(e),
    })?;
    Ok(Fingerprint {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

async fn poll_loop(source: PollSource, events: EventSender) -> Result<(), SourceError> {
    let mut last = match source.mode {
        PollMode::Stat => Some(fingerprint(&source.path)?),
        PollMode::EveryTick => None,
    };

    let mut ticker = interval(source.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial state is already known.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = events.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let due = match source.mode {
            PollMode::EveryTick => true,
            PollMode::Stat => {
                let current = fingerprint(&source.path)?;
                let changed = last != Some(current);
                last = Some(current);
                changed
            }
        };

        if due {
            debug!("Poll of {} requests a reload", source.path.display());
            if !events.reload().await {
                return Ok(());
            }
        }
    }
}
