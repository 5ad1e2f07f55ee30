//! Reloads triggered by application code.

use crate::error::{SetupError, SourceError};
use crate::source::{EventSender, SourceFuture, WatchSource};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Command {
    Reload,
    Fail(SourceError),
    Close,
}

/// A source driven by application code through a [`ManualTrigger`].
///
/// The source finishes when every trigger has been dropped or
/// [`ManualTrigger::close`] is called, and fails when
/// [`ManualTrigger::fail`] is called.
#[derive(Debug)]
pub struct ManualSource {
    rx: mpsc::UnboundedReceiver<Command>,
}

/// Handle used to drive a [`ManualSource`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    tx: mpsc::UnboundedSender<Command>,
}

impl ManualSource {
    /// Creates a source and the trigger that drives it.
    pub fn new() -> (Self, ManualTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTrigger { tx })
    }
}

impl ManualTrigger {
    /// Requests a reload.
    ///
    /// Returns `false` if the source is no longer running.
    pub fn reload(&self) -> bool {
        self.tx.send(Command::Reload).is_ok()
    }

    /// Makes the source fail with `error`, ending the watch loop.
    ///
    /// Returns `false` if the source is no longer running.
    pub fn fail(&self, error: SourceError) -> bool {
        self.tx.send(Command::Fail(error)).is_ok()
    }

    /// Finishes the source without error, ending the watch loop.
    ///
    /// Returns `false` if the source is no longer running.
    pub fn close(&self) -> bool {
        self.tx.send(Command::Close).is_ok()
    }

    /// Returns `true` if the source is no longer running.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl WatchSource for ManualSource {
    fn attach(self: Box<Self>, events: EventSender) -> Result<SourceFuture, SetupError> {
        let mut rx = self.rx;
        Ok(Box::pin(async move {
            loop {
                let command = tokio::select! {
                    biased;
                    () = events.cancelled() => return Ok(()),
                    command = rx.recv() => command,
                };

                match command {
                    Some(Command::Reload) => {
                        if !events.reload().await {
                            return Ok(());
                        }
                    }
                    Some(Command::Fail(e)) => return Err(e),
                    Some(Command::Close) | None => return Ok(()),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Event;
    use tokio_util::sync::CancellationToken;

    type Running = (
        tokio::task::JoinHandle<Result<(), SourceError>>,
        mpsc::Receiver<Event>,
        CancellationToken,
    );

    fn run(source: ManualSource) -> Running {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let fut = Box::new(source)
            .attach(EventSender::new(tx, cancel.clone()))
            .unwrap();
        (tokio::spawn(fut), rx, cancel)
    }

    #[tokio::test]
    async fn test_reload_is_forwarded() {
        let (source, trigger) = ManualSource::new();
        let (task, mut rx, _cancel) = run(source);

        assert!(trigger.reload());
        assert!(matches!(rx.recv().await, Some(Event::Reload)));

        drop(trigger);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fail_ends_source_with_error() {
        let (source, trigger) = ManualSource::new();
        let (task, _rx, _cancel) = run(source);

        assert!(trigger.fail(SourceError::WatchEnded));
        assert!(matches!(task.await.unwrap(), Err(SourceError::WatchEnded)));
        assert!(trigger.is_closed());
        assert!(!trigger.reload());
    }

    #[tokio::test]
    async fn test_close_ends_source_cleanly() {
        let (source, trigger) = ManualSource::new();
        let (task, _rx, _cancel) = run(source);
        let other = trigger.clone();

        assert!(trigger.close());
        assert!(task.await.unwrap().is_ok());
        assert!(!other.reload());
    }

    #[tokio::test]
    async fn test_cancel_stops_source() {
        let (source, trigger) = ManualSource::new();
        let (task, _rx, cancel) = run(source);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        assert!(trigger.is_closed());
    }
}
