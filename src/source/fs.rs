//! Directory notifications through `notify`.

use crate::error::{SetupError, SourceError};
use crate::prelude::debug;
use crate::source::detector::{FsEvent, WatchTarget};
use crate::source::{EventSender, SourceFuture, WatchSource};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Notifications buffered between the backend thread and the watch loop.
const NOTIFY_BUFFER: usize = 128;

/// Watches the directory containing a file and requests a reload when the
/// file is rewritten in place or replaced through a symlink swap.
///
/// The parent directory is watched rather than the file itself, because an
/// atomic swap replaces directory entries and never touches the watched
/// inode. If the watched path cannot be resolved while processing an event
/// (for example, the file was deleted), the source fails with
/// [`SourceError::Resolve`].
#[derive(Debug)]
pub struct FsWatchSource {
    target: WatchTarget,
}

impl FsWatchSource {
    /// Creates a source watching `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPath`] if the path has no file name.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SetupError> {
        Ok(Self {
            target: WatchTarget::new(path)?,
        })
    }

    /// Returns the watched target.
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }
}

impl WatchSource for FsWatchSource {
    fn attach(self: Box<Self>, events: EventSender) -> Result<SourceFuture, SetupError> {
        let mut target = self.target;
        let (forwarder, inbox) = notifications(NOTIFY_BUFFER);

        let watch_error = |dir: &Path, e: notify::Error| SetupError::Watch {
            path: dir.to_path_buf(),
            source: Arc::new(e),
        };

        // The handler runs on the backend's own thread and never blocks it.
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| forwarder.forward(res),
            notify::Config::default(),
        )
        .map_err(|e| watch_error(target.dir(), e))?;

        watcher
            .watch(target.dir(), RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(target.dir(), e))?;

        target.prime();
        debug!(
            "Watching {} for changes of {}",
            target.dir().display(),
            target.path().display()
        );

        Ok(Box::pin(watch_loop(watcher, target, inbox, events)))
    }
}

type Notification = notify::Result<notify::Event>;

fn notifications(capacity: usize) -> (Forwarder, Inbox) {
    let (tx, rx) = mpsc::channel(capacity);
    let overflowed = Arc::new(AtomicBool::new(false));
    (
        Forwarder {
            tx,
            overflowed: Arc::clone(&overflowed),
        },
        Inbox { rx, overflowed },
    )
}

// Backend side. When the buffer is full the notification is dropped and
// the next batch forces a reload instead.
struct Forwarder {
    tx: mpsc::Sender<Notification>,
    overflowed: Arc<AtomicBool>,
}

impl Forwarder {
    fn forward(&self, res: Notification) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(res) {
            self.overflowed.store(true, Ordering::Release);
        }
    }
}

struct Inbox {
    rx: mpsc::Receiver<Notification>,
    overflowed: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct Batch {
    events: Vec<FsEvent>,
    overflowed: bool,
}

impl Inbox {
    /// Waits for a notification, then takes every notification queued behind
    /// it, so a burst of directory activity costs at most one reload.
    async fn next_batch(&mut self) -> Result<Batch, SourceError> {
        let first = self.rx.recv().await.ok_or(SourceError::WatchEnded)?;

        let mut batch = Batch::default();
        batch.extend(first)?;
        while let Ok(next) = self.rx.try_recv() {
            batch.extend(next)?;
        }
        batch.overflowed = self.overflowed.swap(false, Ordering::AcqRel);
        Ok(batch)
    }
}

impl Batch {
    fn extend(&mut self, res: Notification) -> Result<(), SourceError> {
        let event = res.map_err(|e| SourceError::Watch(Arc::new(e)))?;
        self.events.extend(FsEvent::from_notify(&event));
        Ok(())
    }
}

async fn watch_loop(
    watcher: RecommendedWatcher,
    mut target: WatchTarget,
    mut inbox: Inbox,
    events: EventSender,
) -> Result<(), SourceError> {
    // Dropping the watcher releases the OS watch.
    let _watcher = watcher;

    loop {
        let batch = tokio::select! {
            biased;
            () = events.cancelled() => return Ok(()),
            batch = inbox.next_batch() => batch?,
        };

        let current = target.resolve()?;
        let changed = target.observe(&batch.events, &current);

        if changed || batch.overflowed {
            debug!(
                "Change detected for {} (resolved to {}, overflowed={})",
                target.path().display(),
                current.display(),
                batch.overflowed
            );
            if !events.reload().await {
                return Ok(());
            }
        }
    }
}
