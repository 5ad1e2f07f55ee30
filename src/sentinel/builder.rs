//! Builder for [`Sentinel`].

use super::lifecycle::Sentinel;
use super::metrics::MetricsRecorder;
use super::types::ErrorCallback;
use crate::cert::loader::MaterialLoader;
use crate::error::SentinelError;
use crate::source::{FsWatchSource, WatchSource};
use std::fmt::Debug;
use std::sync::Arc;

/// Default capacity of the channel between a source and the control loop.
pub(super) const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Builder for [`Sentinel`].
///
/// Without an explicit [`source`](Self::source), the sentinel watches the
/// loader's [`watch_path`](MaterialLoader::watch_path) with an
/// [`FsWatchSource`].
///
/// # Example
///
/// ```no_run
/// use certinel::cert::loader::KeyPairLoader;
/// use certinel::source::PollSource;
/// use certinel::Sentinel;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sentinel = Sentinel::builder(KeyPairLoader::new("/d/my.crt", "/d/my.key"))
///     .source(PollSource::new("/d/my.crt", Duration::from_secs(30)))
///     .on_error(|e| eprintln!("certificate rotation failed: {e}"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SentinelBuilder<L> {
    loader: L,
    source: Option<Box<dyn WatchSource>>,
    on_error: Option<ErrorCallback>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    event_capacity: usize,
}

impl<L: Debug> Debug for SentinelBuilder<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelBuilder")
            .field("loader", &self.loader)
            .field("source", &self.source.as_ref().map(|_| "<WatchSource>"))
            .field("on_error", &self.on_error.as_ref().map(|_| "<ErrorCallback>"))
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl<L: MaterialLoader> SentinelBuilder<L> {
    /// Creates a builder for a sentinel serving material produced by `loader`.
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            source: None,
            on_error: None,
            metrics: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the source of reload signals.
    #[must_use]
    pub fn source(mut self, source: impl WatchSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Sets the callback receiving every load and source error.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SentinelError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Sets the metrics recorder.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the capacity of the event channel. Values below 1 are raised to 1.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Builds an idle sentinel. Nothing runs until [`Sentinel::start`].
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Setup`] if no source was set and the loader's
    /// watch path cannot be watched.
    pub fn build(self) -> Result<Sentinel<L>, SentinelError> {
        let source = match self.source {
            Some(source) => source,
            None => Box::new(FsWatchSource::new(self.loader.watch_path())?),
        };

        Ok(Sentinel::from_parts(
            self.loader,
            source,
            self.on_error,
            self.metrics,
            self.event_capacity,
        ))
    }
}
