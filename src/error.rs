//! Error types for sentinels and watch sources.

use crate::cert::error::LoadError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A watch source could not be created or attached. Returned from `start`.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SetupError {
    /// `start` was called outside of a Tokio runtime.
    #[error("no Tokio runtime available to run the sentinel")]
    NoRuntime,

    /// The watched path has no parent directory or no file name.
    #[error("cannot watch {}: path has no parent directory or file name", path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
    },

    /// The directory watch could not be established.
    #[error("unable to watch directory {}", path.display())]
    Watch {
        /// The directory that could not be watched.
        path: PathBuf,
        /// The error reported by the file notification backend.
        #[source]
        source: Arc<notify::Error>,
    },

    /// A custom source failed to attach.
    #[error("watch source failed to attach: {0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl SetupError {
    /// Wraps an arbitrary error raised while attaching a custom
    /// [`WatchSource`](crate::source::WatchSource).
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(error))
    }
}

/// The underlying change-notification mechanism failed.
///
/// Source errors are fatal to the watch loop that produced them.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The file notification backend reported an error.
    #[error("file watch failed")]
    Watch(#[source] Arc<notify::Error>),

    /// The file notification backend stopped delivering events.
    #[error("file watch event stream ended")]
    WatchEnded,

    /// The symlink chain of the watched path could not be resolved.
    #[error("unable to resolve symlinks of {}", path.display())]
    Resolve {
        /// The watched path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The watched path could not be stat()'ed.
    #[error("unable to stat {}", path.display())]
    Stat {
        /// The watched path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A custom source failed.
    #[error("watch source failed: {0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl SourceError {
    /// Wraps an arbitrary error raised by a custom [`WatchSource`](crate::source::WatchSource).
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(error))
    }
}

/// Releasing background work failed during `stop`.
///
/// The sentinel is still considered closed afterwards.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ShutdownError {
    /// A background task panicked or was aborted.
    #[error("background task {task} did not finish cleanly: {message}")]
    Join {
        /// Which task failed (`"source"` or `"control loop"`).
        task: &'static str,
        /// The join error rendered as text.
        message: String,
    },

    /// The watch source reported an error while it was being released.
    #[error("watch source failed while stopping")]
    Release(#[source] SourceError),
}

/// Errors returned by a [`Sentinel`](crate::Sentinel).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SentinelError {
    /// The watch source could not be set up.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The material could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The watch source failed and the watch loop terminated.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Releasing background work failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    /// The sentinel was stopped.
    #[error("sentinel is closed")]
    Closed,

    /// The first load did not complete within the given time.
    #[error("first load did not complete within {0:?}")]
    FirstLoadTimeout(Duration),
}
