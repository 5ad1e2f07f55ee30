//! Value types handed out by a [`Sentinel`](super::Sentinel).

use crate::error::SentinelError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Callback receiving every error a running sentinel encounters.
///
/// It is invoked inline on the control loop, so it should return quickly.
/// A panic inside the callback is caught and logged.
pub type ErrorCallback = Arc<dyn Fn(&SentinelError) + Send + Sync + 'static>;

/// Lifecycle of a [`Sentinel`](super::Sentinel).
///
/// ```text
/// Idle ──start──▶ Running ──loop ends──▶ Stopped
///  │                 │                      │
///  │                 └────────stop──────────┴──▶ Closing ──▶ Closed
///  └──────────────────────stop──────────────────────────────▶ Closed
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LifecycleState {
    /// Built but not started.
    Idle,
    /// The source and the control loop are running.
    Running,
    /// The control loop ended on its own (source error or source closed).
    Stopped,
    /// A stop is in progress.
    Closing,
    /// All background work has finished.
    Closed,
}

impl LifecycleState {
    /// Returns a stable string representation of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Outcome of the first load attempt, as observed by `wait_for_first_load`.
#[derive(Debug, Clone)]
pub(super) enum FirstLoad {
    Pending,
    Loaded,
    Failed(SentinelError),
}

impl FirstLoad {
    pub(super) fn outcome(&self) -> Option<Result<(), SentinelError>> {
        match self {
            Self::Pending => None,
            Self::Loaded => Some(Ok(())),
            Self::Failed(e) => Some(Err(e.clone())),
        }
    }
}

/// Handle for receiving update notifications from a [`Sentinel`](super::Sentinel).
///
/// The sequence number is the number of successful loads so far; the first
/// load publishes `1`. Receivers only see the latest value: if a receiver is
/// slow, intermediate sequence numbers may be skipped.
#[derive(Clone, Debug)]
pub struct SentinelUpdates {
    pub(super) rx: watch::Receiver<u64>,
}

impl SentinelUpdates {
    /// Waits for the next successful load and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Closed`] once the control loop has ended.
    pub async fn changed(&mut self) -> Result<u64, SentinelError> {
        self.rx
            .changed()
            .await
            .map_err(|_| SentinelError::Closed)?;
        Ok(*self.rx.borrow_and_update())
    }

    /// Returns the last sequence number without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits until the sequence number satisfies `f`.
    ///
    /// Returns immediately if the current value already does.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Closed`] once the control loop has ended.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<u64, SentinelError>
    where
        F: FnMut(&u64) -> bool,
    {
        let current = self.last();
        if f(&current) {
            return Ok(current);
        }
        loop {
            let seq = self.changed().await?;
            if f(&seq) {
                return Ok(seq);
            }
        }
    }
}

/// Validity and identity of the currently served leaf certificate, keyed by
/// the watched path.
///
/// Intended for external metrics collection (for example, gauges exporting the
/// expiry of each watched certificate).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateObservation {
    pub(super) path: PathBuf,
    pub(super) serial_number: String,
    pub(super) not_before: i64,
    pub(super) not_after: i64,
}

impl CertificateObservation {
    /// Returns the watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the serial number in decimal notation.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Returns the start of the validity period, in seconds since the Unix epoch.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// Returns the end of the validity period, in seconds since the Unix epoch.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }
}
