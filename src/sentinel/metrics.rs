//! Metrics hook for sentinel reloads and failures.

use std::fmt;

/// Error kinds reported to a [`MetricsRecorder`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MetricsErrorKind {
    /// A reload failed because a file could not be read.
    LoadRead,
    /// A reload failed because a file could not be parsed or validated.
    LoadParse,
    /// The watch source failed and the control loop ended.
    SourceFailed,
    /// The error callback panicked.
    CallbackPanicked,
    /// Background work did not finish cleanly during stop.
    ShutdownFailed,
}

impl MetricsErrorKind {
    /// Returns a string representation of the error kind.
    ///
    /// This is useful for metrics systems that require string labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadRead => "load_read",
            Self::LoadParse => "load_parse",
            Self::SourceFailed => "source_failed",
            Self::CallbackPanicked => "callback_panicked",
            Self::ShutdownFailed => "shutdown_failed",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for recording metrics from a [`Sentinel`](super::Sentinel).
///
/// Implement this trait to integrate with your metrics system (e.g., Prometheus, `StatsD`).
/// Prefer stable, low-cardinality labels when recording metrics. Certificate
/// validity gauges are better served by polling
/// [`Sentinel::observation`](super::Sentinel::observation).
///
/// # Example
///
/// ```no_run
/// use certinel::sentinel::{MetricsErrorKind, MetricsRecorder};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct Counters {
///     reloads: AtomicU64,
/// }
///
/// impl MetricsRecorder for Counters {
///     fn record_reload(&self) {
///         self.reloads.fetch_add(1, Ordering::Relaxed);
///     }
///
///     fn record_error(&self, kind: MetricsErrorKind) {
///         println!("error: {}", kind.as_str());
///     }
/// }
/// ```
pub trait MetricsRecorder: Send + Sync {
    /// Records that new material was loaded and published.
    fn record_reload(&self);

    /// Records an error with a structured error kind.
    fn record_error(&self, kind: MetricsErrorKind);
}
