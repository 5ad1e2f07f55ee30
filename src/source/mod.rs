//! Watch sources: producers of "reload now" signals.
//!
//! A [`WatchSource`] is attached once, when its sentinel starts. Attaching
//! performs any fallible setup synchronously and returns a future that the
//! sentinel runs as its own task. The future emits [`Event::Reload`] through
//! the provided [`EventSender`] whenever the watched material may have changed,
//! and completes when:
//!
//! - the sentinel is stopping ([`EventSender::is_cancelled`]), returning `Ok(())`,
//! - the source has nothing more to report, returning `Ok(())`,
//! - or the underlying mechanism failed, returning a [`SourceError`].
//!
//! The sentinel turns the completion of the future into a final
//! [`Event::SourceClosed`] or [`Event::SourceError`], so events are always
//! consumed in emission order by a single control loop.
//!
//! Three implementations are provided:
//!
//! - [`FsWatchSource`]: directory change notifications, symlink-swap aware.
//! - [`PollSource`]: periodic `stat()` comparison (or unconditional reload).
//! - [`ManualSource`]: reloads triggered by application code.

use crate::error::{SetupError, SourceError};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) mod detector;
mod fs;
mod manual;
mod poll;

pub use detector::{FsEvent, FsEventKind, WatchTarget};
pub use fs::FsWatchSource;
pub use manual::{ManualSource, ManualTrigger};
pub use poll::PollSource;

/// A signal consumed by a sentinel's control loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// The watched material may have changed and should be reloaded.
    Reload,
    /// The source failed; no further events follow.
    SourceError(SourceError),
    /// The source finished without error; no further events follow.
    SourceClosed,
}

/// The running part of a watch source.
pub type SourceFuture = Pin<Box<dyn Future<Output = Result<(), SourceError>> + Send + 'static>>;

/// A producer of reload signals.
///
/// See the [module documentation](self) for the contract.
pub trait WatchSource: Send + 'static {
    /// Performs setup and returns the future that produces events.
    ///
    /// # Errors
    ///
    /// Returns a [`SetupError`] if the underlying mechanism cannot be attached
    /// (for example, the watched directory does not exist).
    fn attach(self: Box<Self>, events: EventSender) -> Result<SourceFuture, SetupError>;
}

/// Sending half of a sentinel's event channel.
///
/// Every send races against the sentinel's cancellation, so a source never
/// stays blocked on a full channel once the sentinel is stopping.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Requests a reload.
    ///
    /// Returns `false` if the sentinel is stopping and the request was dropped.
    pub async fn reload(&self) -> bool {
        self.send(Event::Reload).await
    }

    pub(crate) async fn send(&self, event: Event) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            res = self.tx.send(event) => res.is_ok(),
        }
    }

    /// Completes once the sentinel requests the source to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Returns `true` once the sentinel requested the source to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
