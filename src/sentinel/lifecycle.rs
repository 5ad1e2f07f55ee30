//! The [`Sentinel`] handle: start, stop and read access.

use super::builder::SentinelBuilder;
use super::metrics::{MetricsErrorKind, MetricsRecorder};
use super::types::{
    CertificateObservation, ErrorCallback, FirstLoad, LifecycleState, SentinelUpdates,
};
use crate::cell::CertificateCell;
use crate::cert::loader::{CaBundleLoader, KeyPairLoader, MaterialLoader};
use crate::cert::{LoadedCaBundle, LoadedCertificate, Material};
use crate::error::{SentinelError, SetupError, ShutdownError, SourceError};
use crate::prelude::{info, warn};
use crate::source::{Event, EventSender, WatchSource};
use crate::tls::{ClientCertResolver, ClientCertificate, ServerCertResolver};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A sentinel serving a certificate/key pair.
pub type CertificateSentinel = Sentinel<KeyPairLoader>;

/// A sentinel serving a CA bundle.
pub type CaSentinel = Sentinel<CaBundleLoader>;

/// Keeps the current TLS material loaded while it is rotated on disk.
///
/// A sentinel is built idle. [`start`](Self::start) attaches its watch source
/// and spawns two tasks on the current Tokio runtime: the source itself, and a
/// control loop that loads the material once right away and again on every
/// reload signal. Successful loads replace the current value atomically;
/// failed loads are reported through the error callback and leave the
/// previous value in place.
///
/// Read accessors ([`current`](Self::current),
/// [`server_certificate`](Self::server_certificate), ...) never block and never
/// fail; before the first successful load they return nothing.
///
/// [`stop`](Self::stop) cancels both tasks and returns once they have
/// finished. Dropping the last handle cancels them without waiting.
///
/// Cloning a sentinel is cheap and yields another handle to the same instance.
pub struct Sentinel<L: MaterialLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: MaterialLoader> Clone for Sentinel<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: MaterialLoader + Debug> Debug for Sentinel<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentinel")
            .field("loader", &self.inner.shared.loader)
            .field("state", &self.state())
            .field("cell", &self.inner.shared.cell)
            .finish_non_exhaustive()
    }
}

// State shared with the spawned tasks. Tasks never hold `Inner`, so dropping
// the last `Sentinel` handle runs `Inner::drop` and cancels them.
pub(super) struct Shared<L: MaterialLoader> {
    pub(super) loader: L,
    pub(super) cell: CertificateCell<L::Material>,
    pub(super) on_error: Option<ErrorCallback>,
    pub(super) metrics: Option<Arc<dyn MetricsRecorder>>,
    pub(super) state: watch::Sender<LifecycleState>,
    pub(super) first_load: watch::Sender<FirstLoad>,
    // The error that ended the control loop, if any.
    pub(super) terminal: OnceLock<SourceError>,
    // Outcome of the teardown, published once every task has been joined.
    pub(super) stopped: watch::Sender<Option<Result<(), SentinelError>>>,
}

struct Tasks {
    runtime: Handle,
    source: JoinHandle<Result<(), SourceError>>,
    control: JoinHandle<()>,
}

struct Inner<L: MaterialLoader> {
    shared: Arc<Shared<L>>,
    cancel: CancellationToken,
    event_capacity: usize,

    // Consumed by the first start (or by a stop before start).
    source: Mutex<Option<Box<dyn WatchSource>>>,
    update_tx: Mutex<Option<watch::Sender<u64>>>,
    update_rx: watch::Receiver<u64>,

    // Start/stop guard. Start runs once; stop hands the tasks to a teardown
    // task exactly once.
    tasks: Mutex<Option<Tasks>>,
    started: OnceLock<Result<(), SentinelError>>,
}

impl<L: MaterialLoader> Drop for Inner<L> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<L: MaterialLoader> Shared<L> {
    pub(super) fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_error(kind);
        }
    }

    pub(super) fn watch_path(&self) -> PathBuf {
        self.loader.watch_path().to_path_buf()
    }

    // Moves the state forward unless a stop already took over.
    pub(super) fn mark_stopped(&self) {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Stopped;
                true
            } else {
                false
            }
        });
    }

    // Joins the tasks of a cancelled sentinel and publishes the outcome.
    async fn finish_stop(
        &self,
        source: JoinHandle<Result<(), SourceError>>,
        control: JoinHandle<()>,
    ) {
        let mut outcome = Ok(());
        match source.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => outcome = Err(ShutdownError::Release(e)),
            Err(e) => {
                outcome = Err(ShutdownError::Join {
                    task: "source",
                    message: e.to_string(),
                });
            }
        }

        if let Err(e) = control.await {
            if outcome.is_ok() {
                outcome = Err(ShutdownError::Join {
                    task: "control loop",
                    message: e.to_string(),
                });
            }
        }

        self.close();
        let outcome = match outcome {
            Ok(()) => {
                info!("Sentinel stopped for {}", self.watch_path().display());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Sentinel for {} did not stop cleanly: {}",
                    self.watch_path().display(),
                    e
                );
                self.record_error(MetricsErrorKind::ShutdownFailed);
                Err(e.into())
            }
        };
        self.stopped.send_replace(Some(outcome));
    }

    fn close(&self) {
        self.state.send_replace(LifecycleState::Closed);
        self.resolve_first_load(FirstLoad::Failed(SentinelError::Closed));
    }

    // A pending wait takes any outcome; a failure is only replaced by a success.
    pub(super) fn resolve_first_load(&self, outcome: FirstLoad) {
        self.first_load.send_if_modified(|current| {
            let replace = matches!(
                (&*current, &outcome),
                (FirstLoad::Pending, _) | (FirstLoad::Failed(_), FirstLoad::Loaded)
            );
            if replace {
                *current = outcome;
            }
            replace
        });
    }
}

impl<L: MaterialLoader> Sentinel<L> {
    /// Creates a builder for a sentinel serving material produced by `loader`.
    pub fn builder(loader: L) -> SentinelBuilder<L> {
        SentinelBuilder::new(loader)
    }

    pub(super) fn from_parts(
        loader: L,
        source: Box<dyn WatchSource>,
        on_error: Option<ErrorCallback>,
        metrics: Option<Arc<dyn MetricsRecorder>>,
        event_capacity: usize,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        let (first_load, _) = watch::channel(FirstLoad::Pending);
        let (update_tx, update_rx) = watch::channel(0u64);
        let (stopped, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            loader,
            cell: CertificateCell::new(),
            on_error,
            metrics,
            state,
            first_load,
            terminal: OnceLock::new(),
            stopped,
        });

        Self {
            inner: Arc::new(Inner {
                shared,
                cancel: CancellationToken::new(),
                event_capacity,
                source: Mutex::new(Some(source)),
                update_tx: Mutex::new(Some(update_tx)),
                update_rx,
                tasks: Mutex::new(None),
                started: OnceLock::new(),
            }),
        }
    }

    /// Starts watching and returns immediately.
    ///
    /// The material is loaded in the background; use
    /// [`wait_for_first_load`](Self::wait_for_first_load) to wait for it.
    /// Calling `start` again returns the outcome of the first call.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Setup`] if called outside of a Tokio runtime or
    /// if the watch source cannot be attached, and [`SentinelError::Closed`] if
    /// the sentinel was stopped before it was started.
    pub fn start(&self) -> Result<(), SentinelError> {
        self.inner.started.get_or_init(|| self.launch()).clone()
    }

    fn launch(&self) -> Result<(), SentinelError> {
        let inner = &self.inner;
        let mut tasks = lock(&inner.tasks);

        if *inner.shared.state.borrow() != LifecycleState::Idle {
            return Err(SentinelError::Closed);
        }

        let runtime = Handle::try_current().map_err(|_| SetupError::NoRuntime)?;
        let source = lock(&inner.source).take().ok_or(SentinelError::Closed)?;
        let updates = lock(&inner.update_tx).take().ok_or(SentinelError::Closed)?;

        let (tx, rx) = mpsc::channel(inner.event_capacity);
        let events = EventSender::new(tx, inner.cancel.clone());
        let running = source.attach(events.clone())?;

        inner.shared.state.send_replace(LifecycleState::Running);
        info!("Sentinel started for {}", inner.shared.watch_path().display());

        let source = runtime.spawn(async move {
            let result = running.await;
            if events.is_cancelled() {
                // Released by stop: an error here is a shutdown problem.
                return result;
            }

            match result {
                Ok(()) => {
                    events.send(Event::SourceClosed).await;
                    Ok(())
                }
                // Undelivered means stop raced with the failure; report it from stop.
                Err(e) if !events.send(Event::SourceError(e.clone())).await => Err(e),
                Err(_) => Ok(()),
            }
        });

        let shared = Arc::clone(&inner.shared);
        let cancel = inner.cancel.clone();
        let control = runtime.spawn(async move {
            shared.run_control_loop(rx, updates, cancel).await;
        });

        *tasks = Some(Tasks {
            runtime,
            source,
            control,
        });
        Ok(())
    }

    /// Stops watching and waits for all background work to finish.
    ///
    /// Idempotent: concurrent and repeated callers share a single teardown
    /// and observe the same outcome. The sentinel is closed afterwards even if
    /// an error is returned. Stopping a sentinel that was never started simply
    /// closes it.
    ///
    /// The teardown runs on its own task, so a `stop` future dropped before
    /// completion (for example by a timeout) does not abandon it; a later
    /// `stop` waits for the same teardown.
    ///
    /// `stop` may be spawned from within the error callback; it must not be
    /// awaited there, since the callback runs on the control loop.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Shutdown`] if a background task panicked or
    /// the watch source failed while being released.
    pub async fn stop(&self) -> Result<(), SentinelError> {
        let mut stopped = self.inner.shared.stopped.subscribe();
        self.begin_stop();

        // The sender lives as long as `self`.
        let outcome = stopped
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SentinelError::Closed)?
            .clone();
        outcome.unwrap_or(Ok(()))
    }

    fn begin_stop(&self) {
        let inner = &self.inner;
        let shared = &inner.shared;
        let mut tasks = lock(&inner.tasks);

        let state = *shared.state.borrow();
        match state {
            LifecycleState::Idle => {
                // Never started: release the source and close the update stream.
                lock(&inner.source).take();
                lock(&inner.update_tx).take();
                shared.close();
                shared.stopped.send_replace(Some(Ok(())));
                info!("Sentinel closed before start");
            }
            LifecycleState::Running | LifecycleState::Stopped => {
                shared.state.send_replace(LifecycleState::Closing);
                inner.cancel.cancel();

                match tasks.take() {
                    Some(Tasks {
                        runtime,
                        source,
                        control,
                    }) => {
                        let shared = Arc::clone(shared);
                        runtime.spawn(async move {
                            shared.finish_stop(source, control).await;
                        });
                    }
                    None => {
                        shared.close();
                        shared.stopped.send_replace(Some(Ok(())));
                    }
                }
            }
            // Already stopping or stopped.
            LifecycleState::Closing | LifecycleState::Closed => {}
        }
    }

    /// Starts watching if needed and waits until the control loop ends.
    ///
    /// Resolves when the source finishes or fails, or when the sentinel is
    /// stopped. Does not stop the sentinel itself.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Source`] if the watch source failed, or any
    /// error returned by [`start`](Self::start).
    pub async fn run(&self) -> Result<(), SentinelError> {
        self.start()?;

        let mut state = self.inner.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = state
            .wait_for(|s| matches!(s, LifecycleState::Stopped | LifecycleState::Closed))
            .await;

        match self.inner.shared.terminal.get() {
            Some(e) => Err(SentinelError::Source(e.clone())),
            None => Ok(()),
        }
    }

    /// Starts watching if needed and waits for the first load attempt.
    ///
    /// Returns as soon as the first attempt completed: `Ok` if it succeeded,
    /// its error if it failed. If a later attempt has succeeded by the time
    /// this is called, returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Load`] if the first load failed,
    /// [`SentinelError::Source`] if the source failed before any load, or
    /// [`SentinelError::Closed`] if the sentinel stopped first.
    pub async fn wait_for_first_load(&self) -> Result<(), SentinelError> {
        self.start()?;

        let mut rx = self.inner.shared.first_load.subscribe();
        let resolved = rx
            .wait_for(|s| s.outcome().is_some())
            .await
            .map_err(|_| SentinelError::Closed)?;
        resolved.outcome().unwrap_or(Err(SentinelError::Closed))
    }

    /// Like [`wait_for_first_load`](Self::wait_for_first_load), giving up
    /// after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::FirstLoadTimeout`] if no attempt completed in
    /// time, or any error of [`wait_for_first_load`](Self::wait_for_first_load).
    pub async fn wait_for_first_load_timeout(&self, timeout: Duration) -> Result<(), SentinelError> {
        tokio::time::timeout(timeout, self.wait_for_first_load())
            .await
            .map_err(|_| SentinelError::FirstLoadTimeout(timeout))?
    }

    /// Returns the current material, or `None` before the first successful load.
    pub fn current(&self) -> Option<Arc<L::Material>> {
        self.inner.shared.cell.load()
    }

    /// Returns the number of successful loads so far.
    pub fn version(&self) -> u64 {
        self.inner.shared.cell.version()
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.inner.shared.state.borrow()
    }

    /// Returns the loader.
    pub fn loader(&self) -> &L {
        &self.inner.shared.loader
    }

    /// Returns a handle for receiving update notifications.
    ///
    /// Only loads completing after this call are notified. The stream ends
    /// when the control loop ends.
    pub fn updated(&self) -> SentinelUpdates {
        let mut rx = self.inner.update_rx.clone();
        rx.borrow_and_update();
        SentinelUpdates { rx }
    }

    /// Returns the validity and serial number of the current leaf certificate,
    /// keyed by the watched path.
    ///
    /// Returns `None` before the first successful load, and always for
    /// material without a leaf certificate (CA bundles).
    pub fn observation(&self) -> Option<CertificateObservation> {
        let material = self.current()?;
        let leaf = material.leaf_metadata()?;
        Some(CertificateObservation {
            path: self.inner.shared.watch_path(),
            serial_number: leaf.serial_number().to_string(),
            not_before: leaf.not_before().unix_timestamp(),
            not_after: leaf.not_after().unix_timestamp(),
        })
    }
}

impl Sentinel<KeyPairLoader> {
    /// Creates an idle sentinel watching a certificate/key pair.
    ///
    /// Changes are detected on `cert_path`; the key is reloaded alongside it.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Setup`] if `cert_path` cannot be watched.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, SentinelError> {
        Self::builder(KeyPairLoader::new(cert_path, key_path)).build()
    }
}

impl Sentinel<CaBundleLoader> {
    /// Creates an idle sentinel watching a CA bundle.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Setup`] if `ca_path` cannot be watched.
    pub fn new(ca_path: impl Into<PathBuf>) -> Result<Self, SentinelError> {
        Self::builder(CaBundleLoader::new(ca_path)).build()
    }
}

impl<L> Sentinel<L>
where
    L: MaterialLoader<Material = LoadedCertificate>,
{
    /// Returns the current certificate chain and signing key, or `None` before
    /// the first successful load.
    pub fn server_certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.current().map(|c| c.certified_key())
    }

    /// Returns the current certificate, or [`ClientCertificate::Empty`]
    /// before the first successful load.
    pub fn client_certificate(&self) -> ClientCertificate {
        match self.current() {
            Some(cert) => ClientCertificate::Certificate(cert),
            None => ClientCertificate::Empty,
        }
    }

    /// Returns a rustls server certificate resolver backed by this sentinel.
    pub fn server_resolver(&self) -> Arc<ServerCertResolver<L>> {
        Arc::new(ServerCertResolver::new(self.clone()))
    }

    /// Returns a rustls client certificate resolver backed by this sentinel.
    pub fn client_resolver(&self) -> Arc<ClientCertResolver<L>> {
        Arc::new(ClientCertResolver::new(self.clone()))
    }
}

impl<L> Sentinel<L>
where
    L: MaterialLoader<Material = LoadedCaBundle>,
{
    /// Returns the current trust anchors, or `None` before the first
    /// successful load.
    pub fn root_store(&self) -> Option<Arc<RootCertStore>> {
        self.current().map(|b| b.root_store())
    }
}
