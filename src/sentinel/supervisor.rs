//! The control loop: turns source events into loads and cell updates.

use super::lifecycle::Shared;
use super::metrics::MetricsErrorKind;
use super::types::FirstLoad;
use crate::cert::error::{LoadError, LoadStage};
use crate::cert::loader::MaterialLoader;
use crate::cert::Material;
use crate::error::{SentinelError, SourceError};
use crate::prelude::{debug, error, info, warn};
use crate::source::Event;
use std::mem::Discriminant;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Maximum number of consecutive identical load errors logged at WARN before
/// further repetitions are downgraded to DEBUG.
pub(super) const MAX_CONSECUTIVE_SAME_ERROR: u32 = 3;

/// Identifies the kind of a load error, independent of its path and cause.
pub(super) type ErrorKey = Discriminant<LoadError>;

pub(super) fn error_key(e: &LoadError) -> ErrorKey {
    std::mem::discriminant(e)
}

/// Helper for tracking repeated errors to suppress log noise.
///
/// For the first N consecutive occurrences of the same error kind, logs are
/// emitted at WARN level. After that, logs are downgraded to DEBUG. A
/// different kind or a successful load resets the counter.
pub(super) struct ErrorTracker {
    last_error_kind: Option<ErrorKey>,
    consecutive_same_error: u32,
    max_consecutive: u32,
}

impl ErrorTracker {
    pub(super) fn new(max_consecutive: u32) -> Self {
        Self {
            last_error_kind: None,
            consecutive_same_error: 0,
            max_consecutive,
        }
    }

    pub(super) fn record_error(&mut self, error_kind: ErrorKey) -> bool {
        let should_warn = self.last_error_kind != Some(error_kind)
            || self.consecutive_same_error < self.max_consecutive;

        if self.last_error_kind == Some(error_kind) {
            self.consecutive_same_error += 1;
        } else {
            self.consecutive_same_error = 1;
            self.last_error_kind = Some(error_kind);
        }

        should_warn
    }

    pub(super) fn reset(&mut self) {
        self.consecutive_same_error = 0;
        self.last_error_kind = None;
    }

    pub(super) fn consecutive_count(&self) -> u32 {
        self.consecutive_same_error
    }
}

impl<L: MaterialLoader> Shared<L> {
    pub(super) async fn run_control_loop(
        &self,
        mut rx: mpsc::Receiver<Event>,
        updates: watch::Sender<u64>,
        cancel: CancellationToken,
    ) {
        let mut tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

        if !cancel.is_cancelled() {
            self.reload(&updates, &mut tracker);
        }

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Some(Event::Reload) => self.reload(&updates, &mut tracker),
                Some(Event::SourceError(e)) => {
                    self.source_failed(e);
                    break;
                }
                Some(Event::SourceClosed) | None => {
                    info!(
                        "Watch source finished: path={}",
                        self.watch_path().display()
                    );
                    break;
                }
            }
        }

        self.resolve_first_load(FirstLoad::Failed(SentinelError::Closed));
        self.mark_stopped();
        debug!("Control loop exited: path={}", self.watch_path().display());
    }

    fn reload(&self, updates: &watch::Sender<u64>, tracker: &mut ErrorTracker) {
        match self.loader.load() {
            Ok(material) => {
                if tracker.consecutive_count() > 0 {
                    info!(
                        "Load recovered after {} consecutive failures: path={}",
                        tracker.consecutive_count(),
                        self.watch_path().display()
                    );
                }
                tracker.reset();

                match material.leaf_metadata() {
                    Some(leaf) => info!(
                        "Loaded certificate: path={}, serial={}, not_after={}",
                        self.watch_path().display(),
                        leaf.serial_number(),
                        leaf.not_after()
                    ),
                    None => info!("Loaded material: path={}", self.watch_path().display()),
                }

                let version = self.cell.store(Arc::new(material));
                updates.send_replace(version);
                if let Some(metrics) = self.metrics.as_deref() {
                    metrics.record_reload();
                }
                self.resolve_first_load(FirstLoad::Loaded);
            }
            Err(e) => self.load_failed(e, tracker),
        }
    }

    fn load_failed(&self, e: LoadError, tracker: &mut ErrorTracker) {
        let stage = e.stage();
        if tracker.record_error(error_key(&e)) {
            warn!(
                "Failed to load; keeping current material: path={}, stage={}, error={}",
                self.watch_path().display(),
                stage,
                e
            );
        } else {
            debug!(
                "Failed to load (repeated); keeping current material: path={}, stage={}, error={}, consecutive_failures={}",
                self.watch_path().display(),
                stage,
                e,
                tracker.consecutive_count()
            );
        }

        self.record_error(match stage {
            LoadStage::Read => MetricsErrorKind::LoadRead,
            LoadStage::Parse => MetricsErrorKind::LoadParse,
        });

        let err = SentinelError::Load(e);
        self.report(&err);
        self.resolve_first_load(FirstLoad::Failed(err));
    }

    fn source_failed(&self, e: SourceError) {
        error!(
            "Watch source failed; no further reloads: path={}, error={}",
            self.watch_path().display(),
            e
        );
        self.record_error(MetricsErrorKind::SourceFailed);

        let _ = self.terminal.set(e.clone());
        let err = SentinelError::Source(e);
        self.report(&err);
        self.resolve_first_load(FirstLoad::Failed(err));
    }

    // The callback runs inline; a panic must not take the loop down with it.
    fn report(&self, err: &SentinelError) {
        let Some(callback) = self.on_error.as_deref() else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
            error!(
                "Error callback panicked: path={}, error={}",
                self.watch_path().display(),
                err
            );
            self.record_error(MetricsErrorKind::CallbackPanicked);
        }
    }
}
